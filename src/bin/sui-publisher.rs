//! Sui Publisher CLI
//!
//! Build and publish Move packages, and inspect what was deployed

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use sui_package_publisher::lockfile::sync_environments;
use sui_package_publisher::validation::DependencyResolver;
use sui_package_publisher::{
    ArtifactQuery, ArtifactStore, ConfigLoadOptions, ConfigLoader, KeytoolSigner, NetworkClient,
    NetworkProfile, PackagePublisher, ProcessToolchain, PublishOptions, PublishStrategy,
    PublisherConfig, RpcNetworkClient, Toolchain,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Build & publish pipeline for Sui Move packages
#[derive(Parser)]
#[command(name = "sui-publisher")]
#[command(version)]
#[command(about = "Build & publish pipeline for Sui Move packages", long_about = None)]
struct Cli {
    /// Debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and publish a package
    Publish {
        /// Package path (defaults to current directory)
        #[arg(value_name = "PACKAGE_PATH")]
        package_path: Option<PathBuf>,

        /// Network profile (localnet, devnet, testnet, mainnet or configured)
        #[arg(short, long)]
        network: Option<String>,

        /// Gas budget in MIST
        #[arg(long)]
        gas_budget: Option<u64>,

        /// Bundle unpublished dependencies (permissive networks only)
        #[arg(long)]
        with_unpublished_dependencies: bool,

        /// Execution strategy (sdk|cli)
        #[arg(long)]
        strategy: Option<PublishStrategy>,

        /// Build install directory
        #[arg(long)]
        install_dir: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve dependencies and check framework revision consistency
    Check {
        /// Package path (defaults to current directory)
        #[arg(value_name = "PACKAGE_PATH")]
        package_path: Option<PathBuf>,

        /// Network profile
        #[arg(short, long)]
        network: Option<String>,
    },

    /// List deployment records of a network
    Artifacts {
        /// Package path (defaults to current directory)
        #[arg(value_name = "PACKAGE_PATH")]
        package_path: Option<PathBuf>,

        /// Network profile
        #[arg(short, long)]
        network: Option<String>,

        /// Filter by package name
        #[arg(short, long)]
        package: Option<String>,

        /// Include dependencies published alongside the root
        #[arg(long)]
        all: bool,

        /// Show only the newest N records
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Write the chain id into `[environments]` and drop stale publications
    SyncEnv {
        /// Package path (defaults to current directory)
        #[arg(value_name = "PACKAGE_PATH")]
        package_path: Option<PathBuf>,

        /// Network profile
        #[arg(short, long)]
        network: Option<String>,

        /// Chain id, fetched from the network when omitted
        #[arg(long)]
        chain_id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("\n❌ Error");
            eprintln!("{:#}", e);
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .ok();
}

async fn run(command: Commands) -> Result<i32> {
    match command {
        Commands::Publish {
            package_path,
            network,
            gas_budget,
            with_unpublished_dependencies,
            strategy,
            install_dir,
            json,
        } => {
            let options = PublishOptions {
                package_path: package_path.unwrap_or_else(|| PathBuf::from(".")),
                network,
                gas_budget,
                with_unpublished_dependencies,
                strategy,
                install_dir,
            };
            publish_command(options, json).await
        }
        Commands::Check {
            package_path,
            network,
        } => {
            let path = package_path.unwrap_or_else(|| PathBuf::from("."));
            check_command(path, network).await
        }
        Commands::Artifacts {
            package_path,
            network,
            package,
            all,
            limit,
        } => {
            let path = package_path.unwrap_or_else(|| PathBuf::from("."));
            let query = ArtifactQuery {
                package_name: package,
                include_dependencies: all,
                limit,
            };
            artifacts_command(path, network, query).await
        }
        Commands::SyncEnv {
            package_path,
            network,
            chain_id,
        } => {
            let path = package_path.unwrap_or_else(|| PathBuf::from("."));
            sync_env_command(path, network, chain_id).await
        }
    }
}

/// Layered configuration, refusing to continue on validation errors
async fn load_config(package_path: &Path) -> Result<PublisherConfig> {
    let config = ConfigLoader::load(ConfigLoadOptions::for_project(package_path))
        .await
        .context("failed to load configuration")?;

    let validation = ConfigLoader::validate(&config);
    if !validation.valid || !validation.warnings.is_empty() {
        println!("{}", ConfigLoader::format_validation_result(&validation));
    }
    if !validation.valid {
        return Err(anyhow!("invalid configuration"));
    }

    Ok(config)
}

fn network_profile(config: &PublisherConfig, name: Option<&str>) -> Result<NetworkProfile> {
    let name = name
        .map(str::to_string)
        .unwrap_or_else(|| config.default_network());
    config
        .network_profile(&name)
        .ok_or_else(|| anyhow!("unknown network '{}'", name))
}

fn publisher(config: PublisherConfig, network: &NetworkProfile) -> PackagePublisher {
    let toolchain: Arc<dyn Toolchain> = Arc::new(ProcessToolchain::from_config(&config));
    let client = Arc::new(RpcNetworkClient::new(network.rpc_url.clone()));

    let mut signer = KeytoolSigner::new(toolchain.clone());
    if let Some(sender) = config.sender() {
        signer = signer.with_address(sender);
    }

    PackagePublisher::new(config, toolchain, client, Arc::new(signer))
}

async fn publish_command(options: PublishOptions, json: bool) -> Result<i32> {
    println!("\n📦 sui-publisher\n");

    let config = load_config(&options.package_path).await?;
    let network = network_profile(&config, options.network.as_deref())?;
    let publisher = publisher(config, &network);

    match publisher.publish(&options).await {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(0);
            }

            println!("✅ Published {} to {}", report.package_name, report.network);
            println!("  Digest:   {}", report.digest);
            println!("  Strategy: {}{}", report.strategy, if report.retried { " (after size-limit retry)" } else { "" });
            println!("  Sender:   {}", report.sender);
            for artifact in &report.artifacts {
                let kind = if artifact.is_dependency { "dependency" } else { "package" };
                println!("  {} {} {}", kind, artifact.package_name, artifact.package_id);
                if let Some(cap) = &artifact.upgrade_cap_id {
                    println!("    UpgradeCap: {}", cap);
                }
            }
            if let Some(url) = &report.explorer_url {
                println!("  Explorer: {}", url);
            }
            println!("  Artifacts: {}", report.artifact_path.display());

            if !report.warnings.is_empty() {
                println!("\n⚠️  Warnings:");
                for warning in &report.warnings {
                    println!("  - {}", warning);
                }
            }

            println!("\n✅ Publishing completed in {} ms", report.duration);
            Ok(0)
        }
        Err(e) => {
            eprintln!("\n❌ Publishing failed [{}]: {}", e.code(), e);
            for action in e.suggested_actions() {
                eprintln!("  → {}", action);
            }
            Ok(1)
        }
    }
}

async fn check_command(package_path: PathBuf, network: Option<String>) -> Result<i32> {
    println!("\n🔍 Package Check\n");

    let config = load_config(&package_path).await?;
    let profile = network_profile(&config, network.as_deref())?;
    let publisher = publisher(config, &profile);

    let options = PublishOptions {
        network,
        ..PublishOptions::new(&package_path)
    };

    match publisher.check(&options).await {
        Ok(report) => {
            println!("📦 {} on {}", report.dependencies.root_name, report.network);
            for dependency in &report.dependencies.local {
                match &dependency.address {
                    Some(address) => println!("  ✅ {} {}", dependency.name, address),
                    None => println!("  ⚠️  {} (unpublished)", dependency.name),
                }
            }
            if report.would_auto_enable_unpublished {
                println!("\n  Unpublished dependencies would be bundled automatically");
            }

            match &report.consistency.root_revision {
                Some(revision) => println!("\n  ✅ Framework revision {}", revision),
                None if report.consistency.revisions.is_empty() => {
                    println!("\n  No framework pins in Move.lock")
                }
                None => println!("\n  ⚠️  {} framework revisions pinned", report.consistency.revisions.len()),
            }
            for path in &report.consistency.unchecked {
                println!("  - not checked: {}", path.display());
            }

            println!();
            Ok(0)
        }
        Err(e) => {
            println!("  ❌ [{}] {}", e.code(), e);
            Ok(1)
        }
    }
}

async fn artifacts_command(package_path: PathBuf, network: Option<String>, query: ArtifactQuery) -> Result<i32> {
    let config = load_config(&package_path).await?;
    let profile = network_profile(&config, network.as_deref())?;

    let dir = config.artifacts_dir();
    let dir = if dir.is_absolute() { dir } else { package_path.join(dir) };
    let store = ArtifactStore::new(dir);

    let artifacts = store.read(&profile.name, &query).await?;
    println!("\n📊 Deployments on {} ({})\n", profile.name, store.path_for(&profile.name).display());

    if artifacts.is_empty() {
        println!("  No deployments recorded");
        return Ok(0);
    }

    for artifact in &artifacts {
        let kind = if artifact.is_dependency { " (dependency)" } else { "" };
        println!("  {} {}{}", artifact.published_at, artifact.package_name, kind);
        println!("    package: {}", artifact.package_id);
        println!("    digest:  {}", artifact.digest);
        if let Some(cap) = &artifact.upgrade_cap_id {
            println!("    cap:     {}", cap);
        }
    }
    println!();

    Ok(0)
}

async fn sync_env_command(package_path: PathBuf, network: Option<String>, chain_id: Option<String>) -> Result<i32> {
    println!("\n🔄 Environment sync\n");

    let config = load_config(&package_path).await?;
    let profile = network_profile(&config, network.as_deref())?;

    let chain_id = match chain_id {
        Some(chain_id) => chain_id,
        None => RpcNetworkClient::new(profile.rpc_url.clone())
            .get_chain_identifier()
            .await
            .with_context(|| format!("failed to fetch chain id from {}", profile.rpc_url))?,
    };

    let resolved = DependencyResolver::offline()
        .resolve(&package_path, &profile.environment)
        .await?;
    let report = sync_environments(&resolved.package_dirs(), &profile.environment, &chain_id).await;

    println!("  {} = \"{}\"", profile.environment, chain_id);
    for path in &report.updated {
        println!("  ✅ updated {}", path.display());
    }
    if report.updated.is_empty() {
        println!("  Already in sync");
    }
    for (path, message) in &report.failures {
        eprintln!("  ❌ {}: {}", path.display(), message);
    }

    Ok(if report.failures.is_empty() { 0 } else { 1 })
}
