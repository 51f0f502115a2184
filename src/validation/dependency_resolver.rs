//! Dependency Resolver - local dependency graph and published addresses
//!
//! Local dependencies are declared in `Move.toml` as `X = { local = "../x" }`
//! and walked transitively in declaration order. Each one's published address
//! for the target environment is read from its lock files, then verified on
//! chain with one concurrent lookup per dependency.
//!
//! # Example
//!
//! ```no_run
//! use sui_package_publisher::validation::DependencyResolver;
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let resolver = DependencyResolver::offline();
//! let resolved = resolver.resolve(Path::new("move/shop"), "testnet").await?;
//!
//! println!("unpublished: {:?}", resolved.unpublished());
//! # Ok(())
//! # }
//! ```

use crate::core::error::{PublisherError, Result};
use crate::core::retry::RetryManager;
use crate::core::traits::NetworkClient;
use crate::lockfile::environments::{LOCK_FILE, MANIFEST_FILE, PUBLISHED_FILE, PackageDir};
use crate::lockfile::pins::read_lock;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::task::JoinSet;

/// The parts of `Move.toml` the pipeline needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    /// Legacy `[package] published-at`
    pub published_at: Option<String>,
    /// `(name, relative path)` of local dependencies, in declaration order
    pub local_dependencies: Vec<(String, String)>,
}

impl Manifest {
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let parsed: toml::Table = text.parse().map_err(|e: toml::de::Error| e.to_string())?;

        let package = parsed
            .get("package")
            .and_then(|p| p.as_table())
            .ok_or_else(|| "missing [package] section".to_string())?;
        let name = package
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| "missing [package] name".to_string())?
            .to_string();
        let published_at = package
            .get("published-at")
            .and_then(|p| p.as_str())
            .filter(|p| !p.trim_start_matches("0x").chars().all(|c| c == '0'))
            .map(str::to_string);

        let local_dependencies = parsed
            .get("dependencies")
            .and_then(|d| d.as_table())
            .map(|deps| {
                deps.iter()
                    .filter_map(|(name, value)| {
                        let local = value.get("local")?.as_str()?;
                        Some((name.clone(), local.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            name,
            published_at,
            local_dependencies,
        })
    }
}

/// Read `<package_dir>/Move.toml`
pub async fn read_manifest(package_dir: &Path) -> Result<Manifest> {
    let path = package_dir.join(MANIFEST_FILE);
    let text = fs::read_to_string(&path).await.map_err(|e| {
        PublisherError::configuration(format!("cannot read {}: {}", path.display(), e))
    })?;

    Manifest::parse(&text)
        .map_err(|e| PublisherError::configuration(format!("{}: {}", path.display(), e)))
}

/// Lexically resolve `.` and `..` without touching the filesystem
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// A local dependency of the root package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDependency {
    pub name: String,
    pub path: PathBuf,
    /// Published address for the target environment, `None` when unpublished
    pub address: Option<String>,
}

/// Outcome of dependency resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDependencies {
    pub root_name: String,
    pub root_path: PathBuf,
    pub lock_missing: bool,
    /// Transitive local dependencies, in declaration order
    pub local: Vec<LocalDependency>,
    /// Dependency name → published address
    pub known_addresses: BTreeMap<String, String>,
}

impl ResolvedDependencies {
    /// Names of dependencies without a published address, in declaration order
    pub fn unpublished(&self) -> Vec<String> {
        self.local
            .iter()
            .filter(|d| d.address.is_none())
            .map(|d| d.name.clone())
            .collect()
    }

    /// Root followed by every local dependency
    pub fn package_dirs(&self) -> Vec<PackageDir> {
        std::iter::once(PackageDir::root(&self.root_path))
            .chain(self.local.iter().map(|d| PackageDir::dependency(&d.path)))
            .collect()
    }
}

/// Transitive local dependencies of `root`, breadth-first in declaration order
pub async fn local_dependency_graph(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let root = normalize_path(root);
    let mut seen: HashSet<PathBuf> = HashSet::from([root.clone()]);
    let mut queue = VecDeque::from([root]);
    let mut graph = Vec::new();

    while let Some(dir) = queue.pop_front() {
        let manifest = read_manifest(&dir).await?;
        for (name, relative) in manifest.local_dependencies {
            let path = normalize_path(&dir.join(relative));
            if seen.insert(path.clone()) {
                graph.push((name, path.clone()));
                queue.push_back(path);
            }
        }
    }

    Ok(graph)
}

/// Published address of a package for `env`, from its lock files or manifest
pub async fn published_address(package_dir: &Path, env: &str) -> Result<Option<String>> {
    for file in [PUBLISHED_FILE, LOCK_FILE] {
        let Some(view) = read_lock(&package_dir.join(file)).await? else {
            continue;
        };
        if let Some(address) = view.published_address(env) {
            return Ok(Some(address.to_string()));
        }
    }

    Ok(read_manifest(package_dir).await?.published_at)
}

/// Resolver for local dependencies and their published addresses
pub struct DependencyResolver {
    client: Option<Arc<dyn NetworkClient>>,
    retry: RetryManager,
}

impl DependencyResolver {
    /// Resolver verifying addresses through `client`
    pub fn new(client: Arc<dyn NetworkClient>) -> Self {
        Self {
            client: Some(client),
            retry: RetryManager::default(),
        }
    }

    /// Resolver trusting lock files without on-chain verification
    pub fn offline() -> Self {
        Self {
            client: None,
            retry: RetryManager::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryManager) -> Self {
        self.retry = retry;
        self
    }

    /// Resolve the root package's local dependencies for `env`
    pub async fn resolve(&self, root: &Path, env: &str) -> Result<ResolvedDependencies> {
        let root_path = normalize_path(root);
        let manifest = read_manifest(&root_path).await?;
        let lock_missing = !fs::try_exists(root_path.join(LOCK_FILE)).await.unwrap_or(false);

        let mut local = Vec::new();
        for (name, path) in local_dependency_graph(&root_path).await? {
            let address = published_address(&path, env).await?;
            local.push(LocalDependency {
                name,
                path,
                address,
            });
        }

        if let Some(client) = &self.client {
            self.verify_addresses(client, &mut local).await;
        }

        let known_addresses = local
            .iter()
            .filter_map(|d| d.address.clone().map(|a| (d.name.clone(), a)))
            .collect();

        Ok(ResolvedDependencies {
            root_name: manifest.name,
            root_path,
            lock_missing,
            local,
            known_addresses,
        })
    }

    /// Drop addresses that do not exist on chain
    ///
    /// Lookup errors keep the recorded address; only a definite "not found"
    /// turns a dependency into an unpublished one.
    async fn verify_addresses(&self, client: &Arc<dyn NetworkClient>, local: &mut [LocalDependency]) {
        let mut lookups = JoinSet::new();
        for (index, dependency) in local.iter().enumerate() {
            let Some(address) = dependency.address.clone() else {
                continue;
            };
            let client = client.clone();
            let retry = self.retry.clone();
            lookups.spawn(async move {
                let found = retry.retry(|| client.get_object(&address)).await;
                (index, found)
            });
        }

        while let Some(joined) = lookups.join_next().await {
            let (index, found) = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(error = %e, "address lookup task failed");
                    continue;
                }
            };
            let dependency = &mut local[index];
            match found {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::warn!(
                        dependency = %dependency.name,
                        address = dependency.address.as_deref().unwrap_or_default(),
                        "recorded address not found on chain, treating as unpublished"
                    );
                    dependency.address = None;
                }
                Err(e) => {
                    tracing::warn!(dependency = %dependency.name, error = %e, "could not verify address");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::{ObjectInfo, PublishTransaction, Signer, TransactionResponse};
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn write_package(dir: &Path, name: &str, deps: &[(&str, &str)]) {
        std::fs::create_dir_all(dir).unwrap();
        let mut manifest = format!("[package]\nname = \"{}\"\nedition = \"2024.beta\"\n\n[dependencies]\n", name);
        for (dep, path) in deps {
            manifest.push_str(&format!("{} = {{ local = \"{}\" }}\n", dep, path));
        }
        std::fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
    }

    struct KnownObjects(Vec<&'static str>);

    #[async_trait]
    impl NetworkClient for KnownObjects {
        async fn get_object(&self, object_id: &str) -> Result<Option<ObjectInfo>> {
            Ok(self.0.iter().any(|id| *id == object_id).then(|| ObjectInfo {
                object_id: object_id.to_string(),
                version: None,
                object_type: Some("package".to_string()),
            }))
        }

        async fn sign_and_submit(&self, _: &PublishTransaction, _: &dyn Signer) -> Result<TransactionResponse> {
            unreachable!("resolver never submits")
        }

        async fn get_chain_identifier(&self) -> Result<String> {
            Ok("4c78adac".to_string())
        }
    }

    #[test]
    fn test_manifest_parse() {
        let manifest = Manifest::parse(
            "[package]\nname = \"shop\"\npublished-at = \"0x0\"\n\n[dependencies]\nSui = { git = \"https://github.com/MystenLabs/sui.git\", rev = \"x\" }\nitems = { local = \"../items\" }\nutils = { local = \"../utils\" }\n",
        )
        .unwrap();

        assert_eq!(manifest.name, "shop");
        assert_eq!(manifest.published_at, None);
        assert_eq!(
            manifest.local_dependencies,
            vec![
                ("items".to_string(), "../items".to_string()),
                ("utils".to_string(), "../utils".to_string())
            ]
        );
        assert!(Manifest::parse("[dependencies]\n").is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_path(Path::new("../x")), PathBuf::from("../x"));
    }

    #[tokio::test]
    async fn test_transitive_graph_in_declaration_order() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        write_package(&base.join("shop"), "shop", &[("items", "../items"), ("utils", "../utils")]);
        write_package(&base.join("items"), "items", &[("utils", "../utils"), ("core", "../core")]);
        write_package(&base.join("utils"), "utils", &[]);
        write_package(&base.join("core"), "core", &[]);

        let graph = local_dependency_graph(&base.join("shop")).await.unwrap();
        let names: Vec<_> = graph.iter().map(|(n, _)| n.as_str()).collect();

        assert_eq!(names, vec!["items", "utils", "core"]);
    }

    #[tokio::test]
    async fn test_missing_dependency_manifest_is_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        write_package(&temp_dir.path().join("shop"), "shop", &[("ghost", "../ghost")]);

        let err = local_dependency_graph(&temp_dir.path().join("shop")).await.unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION");
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn test_resolve_reads_and_verifies_addresses() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        write_package(&base.join("shop"), "shop", &[("items", "../items"), ("utils", "../utils"), ("old", "../old")]);
        write_package(&base.join("items"), "items", &[]);
        write_package(&base.join("utils"), "utils", &[]);
        write_package(&base.join("old"), "old", &[]);
        std::fs::write(
            base.join("items").join(LOCK_FILE),
            "[published.testnet]\nchain-id = \"4c78adac\"\npublished-at = \"0x1717\"\n",
        )
        .unwrap();
        std::fs::write(
            base.join("old").join(PUBLISHED_FILE),
            "[published.testnet]\npublished-at = \"0xdead\"\n",
        )
        .unwrap();

        let resolver = DependencyResolver::new(Arc::new(KnownObjects(vec!["0x1717"])));
        let resolved = resolver.resolve(&base.join("shop"), "testnet").await.unwrap();

        assert_eq!(resolved.root_name, "shop");
        assert!(resolved.lock_missing);
        assert_eq!(resolved.local[0].address.as_deref(), Some("0x1717"));
        assert_eq!(resolved.unpublished(), vec!["utils", "old"]);
        assert_eq!(resolved.known_addresses.len(), 1);
        assert_eq!(resolved.package_dirs().len(), 4);
    }

    #[tokio::test]
    async fn test_offline_resolution_trusts_lock_files() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        write_package(&base.join("shop"), "shop", &[("old", "../old")]);
        write_package(&base.join("old"), "old", &[]);
        std::fs::write(base.join("old").join(LOCK_FILE), "[env.testnet]\nlatest-published-id = \"0xdead\"\n").unwrap();

        let resolved = DependencyResolver::offline()
            .resolve(&base.join("shop"), "testnet")
            .await
            .unwrap();

        assert!(resolved.unpublished().is_empty());
        assert_eq!(resolved.known_addresses["old"], "0xdead");
    }
}
