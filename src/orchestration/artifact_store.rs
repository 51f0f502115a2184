//! ArtifactStore - per-network deployment records
//!
//! Features:
//! - One pretty-printed JSON array per network, `deployment.<network>.json`
//! - Appends keep every prior entry, including ones this version cannot parse
//! - Writes go through a temp file and a rename so the file is always valid JSON
//! - Filtered queries for the `artifacts` command

use crate::core::error::{PublisherError, Result};
use crate::lockfile::editor::write_atomic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Persisted record of one published package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishArtifact {
    pub network: String,
    pub rpc_url: String,
    pub package_path: String,
    pub package_name: String,
    pub package_id: String,
    pub upgrade_cap_id: Option<String>,
    pub publisher_id: Option<String>,
    pub is_dependency: bool,
    pub sender: String,
    pub digest: String,
    /// RFC 3339 timestamp
    pub published_at: String,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub dependency_addresses: BTreeMap<String, String>,
    #[serde(default)]
    pub unpublished_dependencies: Vec<String>,
    pub toolchain_version: Option<String>,
    pub explorer_url: Option<String>,
}

/// Filters for reading artifacts back
#[derive(Debug, Clone, Default)]
pub struct ArtifactQuery {
    pub package_name: Option<String>,
    pub include_dependencies: bool,
    /// Keep only the newest `limit` records
    pub limit: Option<usize>,
}

/// Deployment artifact files under one directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// `<dir>/deployment.<network>.json`
    pub fn path_for(&self, network: &str) -> PathBuf {
        self.dir.join(format!("deployment.{}.json", network))
    }

    async fn read_raw(&self, path: &Path) -> Result<Vec<Value>> {
        let data = match fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PublisherError::persistence(path, e)),
        };

        if data.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&data).map_err(|e| {
            PublisherError::persistence(path, format!("existing file is not a JSON array: {}", e))
        })
    }

    /// Append artifacts to the network's file, returning its path
    pub async fn append(&self, network: &str, artifacts: &[PublishArtifact]) -> Result<PathBuf> {
        let path = self.path_for(network);
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PublisherError::persistence(&self.dir, e))?;

        let mut records = self.read_raw(&path).await?;
        for artifact in artifacts {
            records.push(
                serde_json::to_value(artifact).map_err(|e| PublisherError::persistence(&path, e))?,
            );
        }

        let json = serde_json::to_string_pretty(&records)
            .map_err(|e| PublisherError::persistence(&path, e))?;

        write_atomic(&path, format!("{}\n", json)).await?;

        tracing::info!(path = %path.display(), added = artifacts.len(), total = records.len(), "artifacts written");
        Ok(path)
    }

    /// Records of a network matching `query`, oldest first
    ///
    /// Entries that do not parse as artifacts are skipped.
    pub async fn read(&self, network: &str, query: &ArtifactQuery) -> Result<Vec<PublishArtifact>> {
        let path = self.path_for(network);
        let mut artifacts: Vec<PublishArtifact> = self
            .read_raw(&path)
            .await?
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .filter(|a: &PublishArtifact| query.include_dependencies || !a.is_dependency)
            .filter(|a| {
                query
                    .package_name
                    .as_ref()
                    .is_none_or(|name| &a.package_name == name)
            })
            .collect();

        if let Some(limit) = query.limit {
            let skip = artifacts.len().saturating_sub(limit);
            artifacts.drain(..skip);
        }

        Ok(artifacts)
    }

    /// Most recent record of a package
    pub async fn latest(&self, network: &str, package_name: &str) -> Result<Option<PublishArtifact>> {
        let query = ArtifactQuery {
            package_name: Some(package_name.to_string()),
            include_dependencies: true,
            limit: Some(1),
        };
        Ok(self.read(network, &query).await?.pop())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn artifact(name: &str, id: &str, is_dependency: bool) -> PublishArtifact {
        PublishArtifact {
            network: "localnet".to_string(),
            rpc_url: "http://127.0.0.1:9000".to_string(),
            package_path: "/work/shop".to_string(),
            package_name: name.to_string(),
            package_id: id.to_string(),
            upgrade_cap_id: Some(format!("{}cap", id)),
            publisher_id: None,
            is_dependency,
            sender: "0xa11ce".to_string(),
            digest: "9xQk".to_string(),
            published_at: "2026-10-16T00:00:00+00:00".to_string(),
            modules: vec![],
            dependencies: vec![],
            dependency_addresses: BTreeMap::new(),
            unpublished_dependencies: vec![],
            toolchain_version: Some("1.41.0".to_string()),
            explorer_url: None,
        }
    }

    #[test]
    fn test_camel_case_fields() {
        let json = serde_json::to_value(artifact("shop", "0x1", false)).unwrap();

        assert!(json.get("packageId").is_some());
        assert!(json.get("upgradeCapId").is_some());
        assert!(json.get("isDependency").is_some());
        assert!(json.get("dependencyAddresses").is_some());
    }

    #[tokio::test]
    async fn test_append_keeps_prior_entries() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path().join("deployments"));

        store.append("localnet", &[artifact("shop", "0x1", false)]).await.unwrap();
        // foreign entry written by another tool
        let path = store.path_for("localnet");
        let mut raw: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        raw.push(serde_json::json!({ "note": "manual entry" }));
        std::fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

        let written = store
            .append("localnet", &[artifact("shop", "0x2", false), artifact("items", "0x3", true)])
            .await
            .unwrap();

        let raw: Vec<Value> = serde_json::from_str(&std::fs::read_to_string(&written).unwrap()).unwrap();
        assert_eq!(raw.len(), 4);
        assert_eq!(raw[1]["note"], "manual entry");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_filters_and_limits() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path());
        store
            .append(
                "testnet",
                &[
                    artifact("shop", "0x1", false),
                    artifact("items", "0x2", true),
                    artifact("shop", "0x3", false),
                ],
            )
            .await
            .unwrap();

        let roots = store.read("testnet", &ArtifactQuery::default()).await.unwrap();
        assert_eq!(roots.len(), 2);

        let everything = ArtifactQuery {
            include_dependencies: true,
            ..Default::default()
        };
        assert_eq!(store.read("testnet", &everything).await.unwrap().len(), 3);

        let latest = store.latest("testnet", "shop").await.unwrap().unwrap();
        assert_eq!(latest.package_id, "0x3");

        assert!(store.read("mainnet", &everything).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_persistence_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp_dir.path());
        std::fs::write(store.path_for("localnet"), "{ not an array").unwrap();

        let err = store.append("localnet", &[artifact("shop", "0x1", false)]).await.unwrap_err();

        assert_eq!(err.code(), "PERSISTENCE");
        // the existing file is left untouched
        assert_eq!(std::fs::read_to_string(store.path_for("localnet")).unwrap(), "{ not an array");
    }
}
