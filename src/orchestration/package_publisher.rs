//! Package Publisher - Main orchestrator for the build & publish pipeline
//!
//! Manages the complete publishing workflow including:
//! - Planning (network profile, dependency resolution, unpublished mode)
//! - Environment sync of manifests and lock files on permissive networks
//! - Framework revision consistency gate
//! - Build and publish, with a single SDK → CLI retry on size-limit errors
//! - Result extraction, labeling and artifact persistence

use crate::build::builder::{BuildFlags, build_package};
use crate::build::output_parser::{BuildOutput, extract_json};
use crate::core::config::{NetworkProfile, PublishStrategy, PublisherConfig};
use crate::core::error::{PublisherError, Result};
use crate::core::retry::RetryManager;
use crate::core::state_machine::{PublishState, PublishStateMachine, StateTransition};
use crate::core::traits::{NetworkClient, PublishTransaction, Signer, TransactionResponse};
use crate::lockfile::editor::edit_file;
use crate::lockfile::environments::{LOCK_FILE, PUBLISHED_FILE, record_publication, sync_environments};
use crate::orchestration::artifact_store::{ArtifactStore, PublishArtifact};
use crate::orchestration::extraction::{PublishResult, extract, label};
use crate::orchestration::plan::{PublishPlan, UnpublishedMode, decide_unpublished_mode};
use crate::toolchain::runner::{TAIL_CHARS, TAIL_LINES, Toolchain, toolchain_version};
use crate::validation::consistency_checker::{ConsistencyChecker, ConsistencyMode, ConsistencyReport};
use crate::validation::dependency_resolver::{DependencyResolver, ResolvedDependencies};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory under the package where build output is installed
pub const BUILD_DIR: &str = ".publish-build";

/// Publishing options passed from the CLI
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Root package directory
    pub package_path: PathBuf,

    /// Network name, the configured default when unset
    pub network: Option<String>,

    /// Gas budget override
    pub gas_budget: Option<u64>,

    /// Explicit `--with-unpublished-dependencies`
    pub with_unpublished_dependencies: bool,

    /// Strategy override
    pub strategy: Option<PublishStrategy>,

    /// Build install directory, `<package>/.publish-build/<network>` when unset
    pub install_dir: Option<PathBuf>,
}

impl PublishOptions {
    pub fn new<P: Into<PathBuf>>(package_path: P) -> Self {
        Self {
            package_path: package_path.into(),
            ..Default::default()
        }
    }
}

/// Publishing report returned after a successful publish
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    pub network: String,
    pub package_name: String,
    pub package_path: PathBuf,
    pub sender: String,
    pub gas_budget: u64,
    pub unpublished_dependencies: Vec<String>,
    pub auto_enabled_unpublished: bool,
    /// Strategy that produced the transaction
    pub strategy: PublishStrategy,
    pub retried: bool,
    pub digest: String,
    pub explorer_url: Option<String>,
    pub artifacts: Vec<PublishArtifact>,
    pub artifact_path: PathBuf,
    pub warnings: Vec<String>,
    /// Manifests and lock files rewritten during the run
    pub lock_updates: Vec<PathBuf>,
    /// Milliseconds
    pub duration: u64,
    pub history: Vec<StateTransition>,
}

/// Outcome of `check`: resolution and consistency without building
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub network: String,
    pub dependencies: ResolvedDependencies,
    pub unpublished_dependencies: Vec<String>,
    pub would_auto_enable_unpublished: bool,
    pub consistency: ConsistencyReport,
}

/// Main package publisher orchestrator
pub struct PackagePublisher {
    config: PublisherConfig,
    toolchain: Arc<dyn Toolchain>,
    client: Arc<dyn NetworkClient>,
    signer: Arc<dyn Signer>,
    retry: RetryManager,
}

impl PackagePublisher {
    pub fn new(
        config: PublisherConfig,
        toolchain: Arc<dyn Toolchain>,
        client: Arc<dyn NetworkClient>,
        signer: Arc<dyn Signer>,
    ) -> Self {
        Self {
            config,
            toolchain,
            client,
            signer,
            retry: RetryManager::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryManager) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Network profile for `name`, or the configured default
    pub fn network_profile(&self, name: Option<&str>) -> Result<NetworkProfile> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_network());

        self.config.network_profile(&name).ok_or_else(|| {
            PublisherError::configuration(format!(
                "unknown network '{}'; add it under `networks:` in .sui-publish.yaml",
                name
            ))
        })
    }

    fn resolver(&self) -> DependencyResolver {
        DependencyResolver::new(self.client.clone()).with_retry(self.retry.clone())
    }

    async fn resolve_mode(
        &self,
        options: &PublishOptions,
        network: &NetworkProfile,
    ) -> Result<(ResolvedDependencies, UnpublishedMode)> {
        let dependencies = self
            .resolver()
            .resolve(&options.package_path, &network.environment)
            .await?;

        let mode = decide_unpublished_mode(
            network,
            options.with_unpublished_dependencies,
            dependencies.lock_missing,
            &dependencies.unpublished(),
        )?;

        Ok((dependencies, mode))
    }

    /// Decide everything the pipeline needs before anything runs
    pub async fn plan(&self, options: &PublishOptions) -> Result<PublishPlan> {
        let network = self.network_profile(options.network.as_deref())?;
        let (dependencies, mode) = self.resolve_mode(options, &network).await?;

        if mode.auto_enabled {
            tracing::info!(
                network = %network.name,
                lock_missing = dependencies.lock_missing,
                unpublished = ?dependencies.unpublished(),
                "bundling unpublished dependencies"
            );
        }

        let signer_address = match self.config.sender() {
            Some(sender) => sender,
            None => self.signer.address().await?,
        };

        let package_path = dependencies.root_path.clone();
        let install_dir = options
            .install_dir
            .clone()
            .unwrap_or_else(|| package_path.join(BUILD_DIR).join(&network.name));

        let artifacts_dir = self.config.artifacts_dir();
        let artifacts_dir = if artifacts_dir.is_absolute() {
            artifacts_dir
        } else {
            package_path.join(artifacts_dir)
        };

        let build_flags = BuildFlags {
            install_dir,
            with_unpublished_dependencies: mode.enabled,
            strip_test_modules: !mode.enabled,
            // only permissive networks get their environment written into the manifest
            environment: network.permissive.then(|| network.environment.clone()),
        };

        Ok(PublishPlan {
            package_path,
            signer_address,
            gas_budget: options.gas_budget.unwrap_or_else(|| self.config.gas_budget()),
            should_use_unpublished_dependencies: mode.enabled,
            auto_enabled_unpublished: mode.auto_enabled,
            build_flags,
            dependencies,
            strategy: options.strategy.unwrap_or_else(|| self.config.strategy()),
            skip_dependency_verification: self.config.skip_dependency_verification(),
            artifacts_dir,
            network,
        })
    }

    /// Resolve dependencies and run the consistency check without building
    ///
    /// Strict networks use the error mode, permissive ones only warn.
    pub async fn check(&self, options: &PublishOptions) -> Result<CheckReport> {
        let network = self.network_profile(options.network.as_deref())?;
        let (dependencies, mode) = self.resolve_mode(options, &network).await?;

        let checker = ConsistencyChecker::new(if network.permissive {
            ConsistencyMode::Warn
        } else {
            ConsistencyMode::Error
        });
        let consistency = checker
            .check(&dependencies.root_path, &network.environment, &dependencies.local)
            .await?;

        Ok(CheckReport {
            network: network.name,
            unpublished_dependencies: dependencies.unpublished(),
            would_auto_enable_unpublished: mode.auto_enabled,
            dependencies,
            consistency,
        })
    }

    /// Publish a package
    ///
    /// Any error moves the pipeline to `Failed`; the history is logged.
    pub async fn publish(&self, options: &PublishOptions) -> Result<PublishReport> {
        let mut machine = PublishStateMachine::new();

        match self.run(options, &mut machine).await {
            Ok(report) => Ok(report),
            Err(error) => {
                machine.fail(&error);
                tracing::error!(
                    code = error.code(),
                    error = %error,
                    history = %machine.get_history(),
                    "publish failed"
                );
                Err(error)
            }
        }
    }

    async fn run(&self, options: &PublishOptions, machine: &mut PublishStateMachine) -> Result<PublishReport> {
        let mut warnings = Vec::new();

        // 1. Planning
        let plan = self.plan(options).await?;
        tracing::info!(
            package = plan.root_name(),
            network = %plan.network.name,
            strategy = %plan.strategy,
            sender = %plan.signer_address,
            unpublished = plan.should_use_unpublished_dependencies,
            "publish planned"
        );

        // 2. Environment sync
        let mut chain_id = None;
        let mut lock_updates = Vec::new();
        if plan.should_sync_lock() {
            machine.transition(PublishState::SyncingLock, None)?;
            chain_id = self.sync_lock(&plan, &mut lock_updates, &mut warnings).await;
        } else {
            machine.transition(PublishState::SyncingLock, Some("skipped".to_string()))?;
        }

        // 3. Consistency gate, before any subprocess
        if plan.should_check_consistency() {
            machine.transition(PublishState::ConsistencyCheck, None)?;
            ConsistencyChecker::new(ConsistencyMode::Error)
                .check(&plan.package_path, &plan.network.environment, &plan.dependencies.local)
                .await?;
        } else {
            machine.transition(PublishState::ConsistencyCheck, Some("skipped".to_string()))?;
        }

        // 4. Build
        machine.transition(PublishState::Building, None)?;
        let build = build_package(
            self.toolchain.as_ref(),
            &plan.package_path,
            plan.root_name(),
            &plan.build_flags,
        )
        .await?;
        tracing::info!(
            modules = build.modules.len(),
            dependencies = build.dependencies.len(),
            "package built"
        );

        // 5. Publish, switching to the CLI once on size-limit failures
        machine.transition(PublishState::Publishing(plan.strategy), None)?;
        let mut current = plan.clone();
        let response = loop {
            match self.execute(&current, &build).await {
                Ok(response) => break response,
                Err(error) if error.is_size_limit() && machine.can_retry() => {
                    let warning = format!("SDK publish hit a size limit, retrying with the CLI: {}", error);
                    tracing::warn!(error = %error, "size limit exceeded, switching to CLI publish");
                    warnings.push(warning);
                    current = current.with_strategy(PublishStrategy::Cli);
                    machine.transition(PublishState::Publishing(PublishStrategy::Cli), Some(error.to_string()))?;
                }
                Err(error) => return Err(error),
            }
        };

        // 6. Extraction
        machine.transition(PublishState::Extracting, None)?;
        let (mut result, extraction_warnings) = extract(&response)?;
        warnings.extend(extraction_warnings);

        // 7. Labeling
        machine.transition(PublishState::Labeling, None)?;
        let unpublished = plan.unpublished_dependencies();
        label(&mut result, plan.root_name(), &unpublished);

        // 8. Persisting
        machine.transition(PublishState::Persisting, None)?;
        let artifacts = self.artifacts(&plan, &build, &result).await;
        let artifact_path = ArtifactStore::new(&plan.artifacts_dir)
            .append(&plan.network.name, &artifacts)
            .await?;

        if current.strategy == PublishStrategy::Sdk {
            self.record_publication(&plan, &result, chain_id, &mut lock_updates, &mut warnings)
                .await;
        }

        machine.transition(PublishState::Done, None)?;

        tracing::info!(
            digest = %result.digest,
            packages = result.packages.len(),
            path = %artifact_path.display(),
            "publish complete"
        );

        Ok(PublishReport {
            network: plan.network.name.clone(),
            package_name: plan.root_name().to_string(),
            package_path: plan.package_path.clone(),
            sender: plan.signer_address.clone(),
            gas_budget: plan.gas_budget,
            unpublished_dependencies: unpublished,
            auto_enabled_unpublished: plan.auto_enabled_unpublished,
            strategy: current.strategy,
            retried: machine.has_retried(),
            explorer_url: plan.network.explorer_link(&result.digest),
            digest: result.digest,
            artifacts,
            artifact_path,
            warnings,
            lock_updates,
            duration: machine.get_elapsed_time().max(0) as u64,
            history: machine.transitions().to_vec(),
        })
    }

    /// Sync `[environments]` and drop stale publications; never fails
    async fn sync_lock(
        &self,
        plan: &PublishPlan,
        lock_updates: &mut Vec<PathBuf>,
        warnings: &mut Vec<String>,
    ) -> Option<String> {
        let client = &self.client;
        let chain_id = match self.retry.retry(move || client.get_chain_identifier()).await {
            Ok(chain_id) => chain_id,
            Err(e) => {
                tracing::warn!(error = %e, "could not fetch chain identifier, skipping environment sync");
                warnings.push(format!("environment sync skipped: {}", e));
                return None;
            }
        };

        let report = sync_environments(
            &plan.dependencies.package_dirs(),
            &plan.network.environment,
            &chain_id,
        )
        .await;

        for (path, message) in report.failures {
            warnings.push(format!("environment sync failed for {}: {}", path.display(), message));
        }
        if !report.updated.is_empty() {
            tracing::info!(
                chain_id = %chain_id,
                updated = ?report.updated,
                "environments synced"
            );
        }
        lock_updates.extend(report.updated);

        Some(chain_id)
    }

    async fn execute(&self, plan: &PublishPlan, build: &BuildOutput) -> Result<TransactionResponse> {
        let response = match plan.strategy {
            PublishStrategy::Sdk => self.publish_sdk(plan, build).await?,
            PublishStrategy::Cli => self.publish_cli(plan).await?,
        };

        if !response.status.is_success() {
            return Err(PublisherError::Execution {
                message: response
                    .status
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("transaction {} ended with status {}", response.digest, response.status.status)),
            });
        }

        Ok(response)
    }

    async fn publish_sdk(&self, plan: &PublishPlan, build: &BuildOutput) -> Result<TransactionResponse> {
        let transaction = PublishTransaction::publish(
            plan.signer_address.clone(),
            plan.gas_budget,
            build.modules.clone(),
            build.dependencies.clone(),
        );

        self.client
            .sign_and_submit(&transaction, self.signer.as_ref())
            .await
    }

    async fn publish_cli(&self, plan: &PublishPlan) -> Result<TransactionResponse> {
        let output = self.toolchain.run(&plan.cli_publish_args()).await?;

        if !output.success() {
            return Err(PublisherError::Toolchain {
                message: format!("`client publish` exited with code {}", output.exit_code()),
                output_tail: output.tail(TAIL_LINES, TAIL_CHARS),
            });
        }

        let has_digest = |value: Value| value.get("digest").is_some().then_some(value);
        let value = extract_json(&output.stdout, has_digest)
            .or_else(|| extract_json(&output.stderr, has_digest))
            .ok_or_else(|| PublisherError::Toolchain {
                message: "`client publish` printed no transaction JSON".to_string(),
                output_tail: output.tail(TAIL_LINES, TAIL_CHARS),
            })?;

        TransactionResponse::from_json(&value)
    }

    /// One artifact per package; dependencies carry no modules
    async fn artifacts(&self, plan: &PublishPlan, build: &BuildOutput, result: &PublishResult) -> Vec<PublishArtifact> {
        let mut addresses: BTreeMap<String, String> = build.dependency_addresses.clone();
        addresses.extend(plan.dependencies.known_addresses.clone());
        for package in result.packages.iter().filter(|p| p.is_dependency) {
            if let Some(name) = &package.package_name {
                addresses.insert(name.clone(), package.package_id.clone());
            }
        }

        let version = toolchain_version(self.toolchain.as_ref()).await;
        let published_at = chrono::Utc::now().to_rfc3339();
        let unpublished = plan.unpublished_dependencies();

        result
            .packages
            .iter()
            .map(|package| PublishArtifact {
                network: plan.network.name.clone(),
                rpc_url: plan.network.rpc_url.clone(),
                package_path: plan.package_path.display().to_string(),
                package_name: package
                    .package_name
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                package_id: package.package_id.clone(),
                upgrade_cap_id: package.upgrade_cap_id.clone(),
                publisher_id: package.publisher_id.clone(),
                is_dependency: package.is_dependency,
                sender: plan.signer_address.clone(),
                digest: result.digest.clone(),
                published_at: published_at.clone(),
                modules: if package.is_dependency {
                    Vec::new()
                } else {
                    build.modules.clone()
                },
                dependencies: if package.is_dependency {
                    Vec::new()
                } else {
                    build.dependencies.clone()
                },
                dependency_addresses: addresses.clone(),
                unpublished_dependencies: unpublished.clone(),
                toolchain_version: version.clone(),
                explorer_url: plan.network.explorer_link(&result.digest),
            })
            .collect()
    }

    /// Best-effort `[published.<env>]` record for the root package
    async fn record_publication(
        &self,
        plan: &PublishPlan,
        result: &PublishResult,
        chain_id: Option<String>,
        lock_updates: &mut Vec<PathBuf>,
        warnings: &mut Vec<String>,
    ) {
        let Some(root) = result.packages.first().filter(|p| !p.is_dependency) else {
            return;
        };

        let chain_id = match chain_id {
            Some(chain_id) => Some(chain_id),
            None => self.client.get_chain_identifier().await.ok(),
        };

        let target = publication_file(&plan.package_path).await;
        let env = plan.network.environment.clone();
        let package_id = root.package_id.clone();
        let edit = move |text: &str| record_publication(text, &env, &package_id, chain_id.as_deref());

        match edit_file(&target, edit).await {
            Ok(true) => lock_updates.push(target),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(path = %target.display(), error = %e, "could not record publication");
                warnings.push(format!("publication not recorded in {}: {}", target.display(), e));
            }
        }
    }
}

/// `Published.toml` when the package has one, `Move.lock` otherwise
async fn publication_file(package_path: &Path) -> PathBuf {
    let published = package_path.join(PUBLISHED_FILE);
    if tokio::fs::try_exists(&published).await.unwrap_or(false) {
        published
    } else {
        package_path.join(LOCK_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::ObjectInfo;
    use crate::lockfile::editor::read_entry;
    use crate::orchestration::artifact_store::tests::artifact;
    use crate::toolchain::runner::ToolchainOutput;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const CHAIN_ID: &str = "4c78adac";
    const SENDER: &str = "0xa11ce";

    struct FakeToolchain {
        build_stdout: String,
        publish: ToolchainOutput,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeToolchain {
        fn new(publish: ToolchainOutput) -> Self {
            Self {
                build_stdout: r#"{"modules":["oRzrCwYAAAA="],"dependencies":["0x1","0x2"]}"#.to_string(),
                publish,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, first: &str) -> usize {
            self.calls().iter().filter(|c| c[0] == first).count()
        }
    }

    #[async_trait]
    impl Toolchain for FakeToolchain {
        async fn run(&self, args: &[String]) -> Result<ToolchainOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(match args[0].as_str() {
                "--version" => ToolchainOutput::exited(0, "sui 1.41.0\n", ""),
                "move" => ToolchainOutput::exited(0, self.build_stdout.clone(), "BUILDING shop"),
                "client" => self.publish.clone(),
                _ => ToolchainOutput::exited(1, "", "unexpected command"),
            })
        }
    }

    struct FakeClient {
        submit_error: Option<String>,
        response: Value,
        submits: AtomicUsize,
    }

    impl FakeClient {
        fn responding(response: Value) -> Self {
            Self {
                submit_error: None,
                response,
                submits: AtomicUsize::new(0),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                submit_error: Some(message.to_string()),
                response: Value::Null,
                submits: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl NetworkClient for FakeClient {
        async fn get_object(&self, _: &str) -> Result<Option<ObjectInfo>> {
            Ok(None)
        }

        async fn sign_and_submit(&self, tx: &PublishTransaction, signer: &dyn Signer) -> Result<TransactionResponse> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            assert_eq!(tx.sender, SENDER);
            signer.sign("dHg=").await?;
            match &self.submit_error {
                Some(message) => Err(PublisherError::Execution {
                    message: message.clone(),
                }),
                None => TransactionResponse::from_json(&self.response),
            }
        }

        async fn get_chain_identifier(&self) -> Result<String> {
            Ok(CHAIN_ID.to_string())
        }
    }

    struct FakeSigner;

    #[async_trait]
    impl Signer for FakeSigner {
        async fn address(&self) -> Result<String> {
            Ok(SENDER.to_string())
        }

        async fn sign(&self, _: &str) -> Result<String> {
            Ok("c2lnbmF0dXJl".to_string())
        }
    }

    fn publish_response(digest: &str, packages: &[&str]) -> Value {
        let mut changes = vec![json!({
            "type": "mutated",
            "objectId": "0xgas",
            "objectType": "0x2::coin::Coin<0x2::sui::SUI>"
        })];
        for id in packages {
            changes.push(json!({ "type": "published", "packageId": id, "version": "1", "modules": [] }));
            changes.push(json!({
                "type": "created",
                "objectId": format!("{}cap", id),
                "objectType": "0x2::package::UpgradeCap"
            }));
        }
        json!({
            "digest": digest,
            "effects": { "status": { "status": "success" } },
            "objectChanges": changes
        })
    }

    const FRAMEWORK_PIN: &str = "\n[[move.package]]\nname = \"Sui\"\nsource = { git = \"https://github.com/MystenLabs/sui.git\", rev = \"REV\", subdir = \"crates/sui-framework/packages/sui-framework\" }\n";

    fn lock_pinning(revisions: &[&str]) -> String {
        let mut text = String::from("[move]\nversion = 0\n");
        for rev in revisions {
            text.push_str(&FRAMEWORK_PIN.replace("REV", rev));
        }
        text
    }

    fn write_package(dir: &Path, name: &str, deps: &[&str], lock: Option<&str>) {
        std::fs::create_dir_all(dir).unwrap();
        let mut manifest = format!("[package]\nname = \"{}\"\nedition = \"2024.beta\"\n\n[dependencies]\n", name);
        for dep in deps {
            manifest.push_str(&format!("{} = {{ local = \"../{}\" }}\n", dep, dep));
        }
        std::fs::write(dir.join("Move.toml"), manifest).unwrap();
        if let Some(lock) = lock {
            std::fs::write(dir.join("Move.lock"), lock).unwrap();
        }
    }

    /// shop → items, utils; every lock pins the same framework revision
    fn workspace(temp_dir: &TempDir) -> PathBuf {
        let root = temp_dir.path().join("shop");
        let lock = lock_pinning(&["a1b2c3"]);
        write_package(&root, "shop", &["items", "utils"], Some(&lock));
        write_package(&temp_dir.path().join("items"), "items", &[], Some(&lock));
        write_package(&temp_dir.path().join("utils"), "utils", &[], Some(&lock));
        root
    }

    fn publisher(toolchain: Arc<FakeToolchain>, client: Arc<FakeClient>) -> PackagePublisher {
        PackagePublisher::new(PublisherConfig::default(), toolchain, client, Arc::new(FakeSigner))
    }

    fn options(root: &Path, network: &str) -> PublishOptions {
        PublishOptions {
            network: Some(network.to_string()),
            ..PublishOptions::new(root)
        }
    }

    #[tokio::test]
    async fn test_permissive_publish_appends_three_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let root = workspace(&temp_dir);
        ArtifactStore::new(root.join("deployments"))
            .append("localnet", &[artifact("shop", "0xold", false)])
            .await
            .unwrap();

        let toolchain = Arc::new(FakeToolchain::new(ToolchainOutput::exited(1, "", "unused")));
        let client = Arc::new(FakeClient::responding(publish_response("9xQk", &["0xshop", "0xitems", "0xutils"])));
        let report = publisher(toolchain.clone(), client.clone())
            .publish(&options(&root, "localnet"))
            .await
            .unwrap();

        assert_eq!(report.strategy, PublishStrategy::Sdk);
        assert!(!report.retried);
        assert!(report.auto_enabled_unpublished);
        assert_eq!(report.unpublished_dependencies, vec!["items", "utils"]);

        let names: Vec<_> = report.artifacts.iter().map(|a| a.package_name.as_str()).collect();
        assert_eq!(names, vec!["shop", "items", "utils"]);
        assert_eq!(report.artifacts[0].modules, vec!["oRzrCwYAAAA="]);
        assert!(report.artifacts[1].modules.is_empty());
        assert_eq!(report.artifacts[0].upgrade_cap_id.as_deref(), Some("0xshopcap"));
        assert_eq!(
            report.artifacts[0].dependency_addresses.get("items").map(String::as_str),
            Some("0xitems")
        );
        assert!(!report.artifacts[0].dependency_addresses.contains_key("shop"));
        assert_eq!(report.artifacts[0].toolchain_version.as_deref(), Some("1.41.0"));

        let raw: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(&report.artifact_path).unwrap()).unwrap();
        assert_eq!(raw.len(), 4);
        assert_eq!(raw[0]["packageId"], "0xold");
        assert_eq!(raw[3]["packageName"], "utils");

        // the build bundled the dependencies and kept test modules
        let build = toolchain.calls().into_iter().find(|c| c[0] == "move").unwrap();
        assert!(build.contains(&"--with-unpublished-dependencies".to_string()));

        let manifest = std::fs::read_to_string(root.join("Move.toml")).unwrap();
        assert_eq!(read_entry(&manifest, "environments", "localnet").as_deref(), Some(CHAIN_ID));

        let lock = std::fs::read_to_string(root.join("Move.lock")).unwrap();
        assert_eq!(read_entry(&lock, "published.localnet", "published-at").as_deref(), Some("0xshop"));
        assert_eq!(read_entry(&lock, "published.localnet", "chain-id").as_deref(), Some(CHAIN_ID));
        assert!(report.lock_updates.contains(&root.join("Move.lock")));

        assert_eq!(client.submits.load(Ordering::SeqCst), 1);
        assert_eq!(report.history.last().unwrap().to, PublishState::Done);
    }

    #[tokio::test]
    async fn test_strict_network_with_divergent_revisions_fails_before_any_subprocess() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("shop");
        write_package(&root, "shop", &[], Some(&lock_pinning(&["a1b2c3", "d4e5f6"])));

        let toolchain = Arc::new(FakeToolchain::new(ToolchainOutput::exited(1, "", "unused")));
        let client = Arc::new(FakeClient::responding(publish_response("9xQk", &["0xshop"])));
        let err = publisher(toolchain.clone(), client.clone())
            .publish(&options(&root, "testnet"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CONSISTENCY");
        assert!(toolchain.calls().is_empty());
        assert_eq!(client.submits.load(Ordering::SeqCst), 0);
        assert!(!root.join("deployments").exists());
    }

    #[tokio::test]
    async fn test_unpublished_flag_rejected_on_strict_network() {
        let temp_dir = TempDir::new().unwrap();
        let root = workspace(&temp_dir);

        let toolchain = Arc::new(FakeToolchain::new(ToolchainOutput::exited(1, "", "unused")));
        let client = Arc::new(FakeClient::responding(Value::Null));
        let mut options = options(&root, "testnet");
        options.with_unpublished_dependencies = true;

        let err = publisher(toolchain.clone(), client).publish(&options).await.unwrap_err();

        assert_eq!(err.code(), "CONFIGURATION");
        assert!(toolchain.calls().is_empty());
    }

    #[tokio::test]
    async fn test_size_limit_retries_with_cli_exactly_once() {
        let temp_dir = TempDir::new().unwrap();
        let root = workspace(&temp_dir);
        let cli_stdout = format!(
            "UPDATING GIT DEPENDENCY\n{}\n",
            serde_json::to_string_pretty(&publish_response("cliDigest", &["0xshop", "0xitems", "0xutils"])).unwrap()
        );

        let toolchain = Arc::new(FakeToolchain::new(ToolchainOutput::exited(0, cli_stdout, "")));
        let client = Arc::new(FakeClient::failing("rpc error -32002: Transaction size limit exceeded"));
        let report = publisher(toolchain.clone(), client.clone())
            .publish(&options(&root, "localnet"))
            .await
            .unwrap();

        assert_eq!(report.strategy, PublishStrategy::Cli);
        assert!(report.retried);
        assert_eq!(report.digest, "cliDigest");
        assert_eq!(client.submits.load(Ordering::SeqCst), 1);
        assert_eq!(toolchain.count("client"), 1);
        assert_eq!(report.warnings.len(), 1);

        let publish = toolchain.calls().into_iter().find(|c| c[0] == "client").unwrap();
        assert!(publish.contains(&"--json".to_string()));
        assert!(publish.contains(&SENDER.to_string()));

        // the CLI records the publication itself
        let lock = std::fs::read_to_string(root.join("Move.lock")).unwrap();
        assert!(read_entry(&lock, "published.localnet", "published-at").is_none());
    }

    #[tokio::test]
    async fn test_size_limit_after_retry_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let root = workspace(&temp_dir);

        let toolchain = Arc::new(FakeToolchain::new(ToolchainOutput::exited(
            1,
            "",
            "Error: transaction size too large",
        )));
        let client = Arc::new(FakeClient::failing("SizeLimitExceeded"));
        let err = publisher(toolchain.clone(), client.clone())
            .publish(&options(&root, "localnet"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "TOOLCHAIN");
        assert_eq!(client.submits.load(Ordering::SeqCst), 1);
        assert_eq!(toolchain.count("client"), 1);
    }

    #[tokio::test]
    async fn test_zero_packages_writes_no_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let root = workspace(&temp_dir);

        let toolchain = Arc::new(FakeToolchain::new(ToolchainOutput::exited(1, "", "unused")));
        let client = Arc::new(FakeClient::responding(publish_response("emptyDigest", &[])));
        let err = publisher(toolchain, client)
            .publish(&options(&root, "localnet"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "EMPTY_PUBLISH");
        assert!(!ArtifactStore::new(root.join("deployments")).path_for("localnet").exists());
    }

    #[tokio::test]
    async fn test_failed_status_is_execution_error() {
        let temp_dir = TempDir::new().unwrap();
        let root = workspace(&temp_dir);
        let response = json!({
            "digest": "bad",
            "effects": { "status": { "status": "failure", "error": "InsufficientGas" } }
        });

        let toolchain = Arc::new(FakeToolchain::new(ToolchainOutput::exited(1, "", "unused")));
        let err = publisher(toolchain, Arc::new(FakeClient::responding(response)))
            .publish(&options(&root, "localnet"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "EXECUTION");
        assert!(err.to_string().contains("InsufficientGas"));
    }

    #[tokio::test]
    async fn test_plan_on_strict_network() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("shop");
        write_package(&root, "shop", &[], Some(&lock_pinning(&["a1b2c3"])));

        let toolchain = Arc::new(FakeToolchain::new(ToolchainOutput::exited(1, "", "unused")));
        let client = Arc::new(FakeClient::responding(Value::Null));
        let plan = publisher(toolchain, client)
            .plan(&options(&root, "testnet"))
            .await
            .unwrap();

        assert!(!plan.should_use_unpublished_dependencies);
        assert!(plan.build_flags.strip_test_modules);
        assert!(plan.build_flags.environment.is_none());
        assert!(plan.should_check_consistency());
        assert!(!plan.should_sync_lock());
        assert_eq!(plan.signer_address, SENDER);
        assert_eq!(plan.build_flags.install_dir, root.join(BUILD_DIR).join("testnet"));
        assert_eq!(plan.artifacts_dir, root.join("deployments"));
    }

    #[tokio::test]
    async fn test_check_reports_without_building() {
        let temp_dir = TempDir::new().unwrap();
        let root = workspace(&temp_dir);

        let toolchain = Arc::new(FakeToolchain::new(ToolchainOutput::exited(1, "", "unused")));
        let client = Arc::new(FakeClient::responding(Value::Null));
        let report = publisher(toolchain.clone(), client)
            .check(&options(&root, "localnet"))
            .await
            .unwrap();

        assert_eq!(report.unpublished_dependencies, vec!["items", "utils"]);
        assert!(report.would_auto_enable_unpublished);
        assert_eq!(report.consistency.root_revision.as_deref(), Some("a1b2c3"));
        assert!(toolchain.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_network_is_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let root = workspace(&temp_dir);

        let toolchain = Arc::new(FakeToolchain::new(ToolchainOutput::exited(1, "", "unused")));
        let client = Arc::new(FakeClient::responding(Value::Null));
        let err = publisher(toolchain, client)
            .publish(&options(&root, "moonnet"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CONFIGURATION");
        assert!(err.to_string().contains("moonnet"));
    }
}
