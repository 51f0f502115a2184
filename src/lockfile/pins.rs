//! Read-only view over lock files
//!
//! Pins and publication records are read with `toml` and never written back
//! through it; writes go through [`crate::lockfile::editor`].

use crate::core::error::{PublisherError, Result};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use toml::{Table, Value};

/// Marker of the Sui repository in git URLs
const SUI_REPOSITORY: &str = "mystenlabs/sui";

/// A git pin found in a lock file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDependencyEntry {
    pub package_name: String,
    pub revision: String,
    /// Environment of a `[pinned.<env>]` entry, `None` for legacy entries
    pub environment_name: Option<String>,
    pub subdir: Option<String>,
    pub git: String,
}

impl LockDependencyEntry {
    pub fn is_sui_repository(&self) -> bool {
        self.git.to_ascii_lowercase().contains(SUI_REPOSITORY)
    }
}

/// Publication recorded for one environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Publication {
    pub published_at: Option<String>,
    pub original_id: Option<String>,
    pub chain_id: Option<String>,
}

/// Parsed lock file
#[derive(Debug, Clone, Default)]
pub struct LockView {
    pub entries: Vec<LockDependencyEntry>,
    pub publications: BTreeMap<String, Publication>,
}

/// Pins grouped by revision
pub type RevisionGroups = BTreeMap<String, Vec<LockDependencyEntry>>;

impl LockView {
    /// Parse lock file text
    pub fn parse(text: &str) -> std::result::Result<Self, toml::de::Error> {
        let table: Table = text.parse()?;
        let mut view = Self::default();

        // legacy: [[move.package]] id/name + source = { git, rev, subdir }
        if let Some(packages) = table
            .get("move")
            .and_then(|m| m.get("package"))
            .and_then(Value::as_array)
        {
            for package in packages {
                let name = str_field(package, "id").or_else(|| str_field(package, "name"));
                if let (Some(name), Some(source)) = (name, package.get("source")) {
                    view.push_pin(name, source, None);
                }
            }
        }

        // modern: [pinned.<env>.<pkg>] source = { git, rev, subdir }
        if let Some(pinned) = table.get("pinned").and_then(Value::as_table) {
            for (env, packages) in pinned {
                let Some(packages) = packages.as_table() else {
                    continue;
                };
                for (name, package) in packages {
                    if let Some(source) = package.get("source") {
                        view.push_pin(name.clone(), source, Some(env.clone()));
                    }
                }
            }
        }

        if let Some(published) = table.get("published").and_then(Value::as_table) {
            for (env, record) in published {
                view.publications.insert(
                    env.clone(),
                    Publication {
                        published_at: str_field(record, "published-at"),
                        original_id: str_field(record, "original-id"),
                        chain_id: str_field(record, "chain-id"),
                    },
                );
            }
        }

        // legacy: [env.<env>] latest-published-id / original-published-id
        if let Some(envs) = table.get("env").and_then(Value::as_table) {
            for (env, record) in envs {
                view.publications
                    .entry(env.clone())
                    .or_insert_with(|| Publication {
                        published_at: str_field(record, "latest-published-id"),
                        original_id: str_field(record, "original-published-id"),
                        chain_id: str_field(record, "chain-id"),
                    });
            }
        }

        Ok(view)
    }

    fn push_pin(&mut self, package_name: String, source: &Value, environment_name: Option<String>) {
        let (Some(git), Some(revision)) = (str_field(source, "git"), str_field(source, "rev")) else {
            return;
        };

        self.entries.push(LockDependencyEntry {
            package_name,
            revision,
            environment_name,
            subdir: str_field(source, "subdir"),
            git,
        });
    }

    /// Published address for an environment
    pub fn published_address(&self, env: &str) -> Option<&str> {
        self.publications
            .get(env)
            .and_then(|p| p.published_at.as_deref().or(p.original_id.as_deref()))
    }

    /// Sui-repository pins of `env` grouped by revision
    ///
    /// Legacy entries carry no environment and always count.
    pub fn revision_groups(&self, env: &str) -> RevisionGroups {
        let mut groups = RevisionGroups::new();
        for entry in self.entries.iter().filter(|e| {
            e.is_sui_repository() && e.environment_name.as_deref().is_none_or(|name| name == env)
        }) {
            groups
                .entry(entry.revision.clone())
                .or_default()
                .push(entry.clone());
        }
        groups
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Read and parse a lock file, `None` when it does not exist
pub async fn read_lock(path: &Path) -> Result<Option<LockView>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PublisherError::persistence(path, e)),
    };

    LockView::parse(&text)
        .map(Some)
        .map_err(|e| PublisherError::configuration(format!("{} is not valid TOML: {}", path.display(), e)))
}
