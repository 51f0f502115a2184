//! Environment bookkeeping in manifests and lock files
//!
//! On a throwaway network the chain id changes every time the node restarts.
//! Manifests get their `[environments]` entry refreshed and lock files lose
//! publication records pointing at a chain that no longer exists.

use crate::core::error::Result;
use crate::lockfile::editor::{edit_file, has_section, read_entry, remove_section, upsert_entry};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "Move.toml";
pub const LOCK_FILE: &str = "Move.lock";
pub const PUBLISHED_FILE: &str = "Published.toml";

const ENVIRONMENTS_SECTION: &str = "environments";
const DEPENDENCIES_SECTION: &str = "dependencies";

/// Whether a manifest already manages `env`
///
/// A manifest manages an environment when it declares it in `[environments]`
/// or carries `[dep-replacements.<env>]`.
pub fn is_managed(manifest_text: &str, env: &str) -> bool {
    read_entry(manifest_text, ENVIRONMENTS_SECTION, env).is_some()
        || has_section(manifest_text, &format!("dep-replacements.{}", env))
}

/// Upsert `[environments] env = "chain_id"`, creating the section before
/// `[dependencies]` when needed
///
/// With `managed_only`, manifests that do not already manage `env` are left
/// alone.
pub fn sync_environment(
    manifest_text: &str,
    env: &str,
    chain_id: &str,
    managed_only: bool,
) -> (String, bool) {
    if managed_only && !is_managed(manifest_text, env) {
        return (manifest_text.to_string(), false);
    }

    upsert_entry(
        manifest_text,
        ENVIRONMENTS_SECTION,
        env,
        chain_id,
        Some(DEPENDENCIES_SECTION),
    )
}

/// Drop `[published.<env>]` when it was recorded against another chain
pub fn drop_stale_publication(lock_text: &str, env: &str, chain_id: &str) -> (String, bool) {
    let section = format!("published.{}", env);

    match read_entry(lock_text, &section, "chain-id") {
        Some(recorded) if recorded != chain_id => remove_section(lock_text, &section),
        _ => (lock_text.to_string(), false),
    }
}

/// A package directory taking part in a sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDir {
    pub path: PathBuf,
    pub is_root: bool,
}

impl PackageDir {
    pub fn root(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_root: true,
        }
    }

    pub fn dependency(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_root: false,
        }
    }
}

/// Outcome of syncing a set of packages
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Files that were rewritten
    pub updated: Vec<PathBuf>,
    /// Files that could not be read or written, with the reason
    pub failures: Vec<(PathBuf, String)>,
}

/// Refresh environments and drop stale publications across packages
///
/// The root manifest is always synced; dependency manifests only when they
/// already manage the environment. Failures are collected, never raised.
pub async fn sync_environments(packages: &[PackageDir], env: &str, chain_id: &str) -> SyncReport {
    let mut report = SyncReport::default();

    for package in packages {
        let manifest = package.path.join(MANIFEST_FILE);
        let managed_only = !package.is_root;
        record(
            &mut report,
            &manifest,
            edit_file(&manifest, |text| sync_environment(text, env, chain_id, managed_only)).await,
        );

        for lock_name in [LOCK_FILE, PUBLISHED_FILE] {
            let lock = package.path.join(lock_name);
            record(
                &mut report,
                &lock,
                edit_file(&lock, |text| drop_stale_publication(text, env, chain_id)).await,
            );
        }
    }

    for path in &report.updated {
        tracing::info!(path = %path.display(), env, chain_id, "synced environment");
    }

    report
}

fn record(report: &mut SyncReport, path: &Path, outcome: Result<bool>) {
    match outcome {
        Ok(true) => report.updated.push(path.to_path_buf()),
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "environment sync failed");
            report.failures.push((path.to_path_buf(), e.to_string()));
        }
    }
}

/// Record a publication under `[published.<env>]`
pub fn record_publication(
    lock_text: &str,
    env: &str,
    package_id: &str,
    chain_id: Option<&str>,
) -> (String, bool) {
    let section = format!("published.{}", env);
    let mut changed = false;
    let mut text = lock_text.to_string();

    let mut entries = vec![("published-at", package_id), ("original-id", package_id)];
    if let Some(chain_id) = chain_id {
        entries.insert(0, ("chain-id", chain_id));
    }

    for (key, value) in entries {
        let (updated, did_change) = upsert_entry(&text, &section, key, value, None);
        text = updated;
        changed |= did_change;
    }

    (text, changed)
}
