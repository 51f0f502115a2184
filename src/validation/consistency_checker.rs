//! Framework revision consistency
//!
//! Every package in a publish must link against the same framework revision.
//! Lock files pin the framework by git revision; more than one revision of the
//! Sui repository across the root and its local dependencies means the
//! published bytecode would reference mismatched framework code.

use crate::core::error::{PublisherError, Result};
use crate::lockfile::environments::LOCK_FILE;
use crate::lockfile::pins::{LockView, RevisionGroups, read_lock};
use crate::validation::dependency_resolver::LocalDependency;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const FRAMEWORK_PACKAGES: &[&str] = &[
    "sui",
    "movestdlib",
    "suisystem",
    "bridge",
    "deepbook",
    "std",
    "sui_system",
];
const FRAMEWORK_SUBDIR: &str = "crates/sui-framework/";

/// What to do when more than one revision is pinned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyMode {
    Warn,
    Error,
}

/// Whether a pinned package is part of the framework itself
pub fn is_framework_package(name: &str, subdir: Option<&str>) -> bool {
    FRAMEWORK_PACKAGES.contains(&name.to_ascii_lowercase().as_str())
        || subdir.is_some_and(|s| s.replace('\\', "/").contains(FRAMEWORK_SUBDIR))
}

/// Revision → non-framework packages pinned to it
pub fn summarize(groups: &RevisionGroups) -> BTreeMap<String, Vec<String>> {
    groups
        .iter()
        .map(|(revision, entries)| {
            let mut names: Vec<String> = entries
                .iter()
                .filter(|e| !is_framework_package(&e.package_name, e.subdir.as_deref()))
                .map(|e| e.package_name.clone())
                .collect();
            names.sort();
            names.dedup();
            (revision.clone(), names)
        })
        .collect()
}

/// Revision with the fewest non-framework packages, `None` on a tie
pub fn guess_outlier(summary: &BTreeMap<String, Vec<String>>) -> Option<String> {
    let fewest = summary.values().map(Vec::len).min()?;
    let mut candidates = summary.iter().filter(|(_, names)| names.len() == fewest);
    let (revision, _) = candidates.next()?;
    match candidates.next() {
        Some(_) => None,
        None => Some(revision.clone()),
    }
}

fn describe(summary: &BTreeMap<String, Vec<String>>) -> String {
    summary
        .iter()
        .map(|(revision, names)| {
            if names.is_empty() {
                format!("{} (framework only)", revision)
            } else {
                format!("{} (used by {})", revision, names.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result of a consistency check
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
    /// Revision of the root lock, when exactly one is pinned
    pub root_revision: Option<String>,
    /// Root revisions → non-framework packages
    pub revisions: BTreeMap<String, Vec<String>>,
    pub outlier: Option<String>,
    /// Dependencies whose lock could not be compared
    pub unchecked: Vec<PathBuf>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.revisions.len() <= 1
    }
}

/// Checker over the root lock and the locks of local dependencies
pub struct ConsistencyChecker {
    mode: ConsistencyMode,
}

impl ConsistencyChecker {
    pub fn new(mode: ConsistencyMode) -> Self {
        Self { mode }
    }

    /// Check the revisions a single lock view pins for `env`
    pub fn check_view(&self, view: &LockView, env: &str, lock_path: &Path) -> Result<ConsistencyReport> {
        let revisions = summarize(&view.revision_groups(env));
        let outlier = guess_outlier(&revisions);
        let root_revision = match revisions.len() {
            1 => revisions.keys().next().cloned(),
            _ => None,
        };

        if revisions.len() > 1 {
            let detail = describe(&revisions);
            match self.mode {
                ConsistencyMode::Warn => {
                    tracing::warn!(
                        lock = %lock_path.display(),
                        revisions = %detail,
                        outlier = outlier.as_deref().unwrap_or("unknown"),
                        "multiple framework revisions pinned"
                    );
                }
                ConsistencyMode::Error => {
                    let hint = outlier
                        .as_ref()
                        .map(|o| format!("; {} looks like the outlier", o))
                        .unwrap_or_default();
                    return Err(PublisherError::Consistency {
                        message: format!(
                            "{} pins {} framework revisions: {}{}",
                            lock_path.display(),
                            revisions.len(),
                            detail,
                            hint
                        ),
                    });
                }
            }
        }

        Ok(ConsistencyReport {
            root_revision,
            revisions,
            outlier,
            unchecked: Vec::new(),
        })
    }

    /// Check the root package and every local dependency for `env`
    ///
    /// A dependency pinning a single revision different from the root's single
    /// revision fails regardless of the mode.
    pub async fn check(
        &self,
        root: &Path,
        env: &str,
        dependencies: &[LocalDependency],
    ) -> Result<ConsistencyReport> {
        let root_lock = root.join(LOCK_FILE);
        let Some(view) = read_lock(&root_lock).await? else {
            tracing::debug!(lock = %root_lock.display(), "no lock file, nothing to check");
            return Ok(ConsistencyReport::default());
        };

        let mut report = self.check_view(&view, env, &root_lock)?;
        let Some(root_revision) = report.root_revision.clone() else {
            return Ok(report);
        };

        for dependency in dependencies {
            let lock_path = dependency.path.join(LOCK_FILE);
            let Some(dep_view) = read_lock(&lock_path).await? else {
                report.unchecked.push(lock_path);
                continue;
            };

            let groups = dep_view.revision_groups(env);
            if groups.len() != 1 {
                report.unchecked.push(lock_path);
                continue;
            }

            let revision = groups.keys().next().cloned().unwrap_or_default();
            if revision != root_revision {
                return Err(PublisherError::Consistency {
                    message: format!(
                        "dependency {} at {} pins framework revision {} but {} pins {}",
                        dependency.name,
                        dependency.path.display(),
                        revision,
                        root.display(),
                        root_revision
                    ),
                });
            }
        }

        Ok(report)
    }
}
