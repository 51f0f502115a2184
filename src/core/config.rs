//! Configuration structures and types for sui-package-publisher
//!
//! This module provides type-safe configuration management with serde support.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Network used when nothing else selects one
pub const DEFAULT_NETWORK: &str = "localnet";

/// Default gas budget in MIST (0.5 SUI)
pub const DEFAULT_GAS_BUDGET: u64 = 500_000_000;

/// Default toolchain binary
pub const DEFAULT_TOOLCHAIN: &str = "sui";

/// Default directory for deployment artifacts, relative to the package
pub const DEFAULT_ARTIFACTS_DIR: &str = "deployments";

/// Root configuration object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublisherConfig {
    /// Schema version (required)
    pub version: String,

    /// Extend from base configuration file (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// External toolchain settings (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolchain: Option<ToolchainConfig>,

    /// Publish defaults (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishDefaults>,

    /// Network profiles, merged over the built-in ones (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub networks: Option<BTreeMap<String, NetworkConfig>>,

    /// Security settings (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityConfig>,
}

/// External toolchain settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolchainConfig {
    /// Binary name or path (default: "sui")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,

    /// Arguments placed before every invocation (e.g. `--client.config ...`)
    #[serde(skip_serializing_if = "Option::is_none", rename = "argsPrefix")]
    pub args_prefix: Option<Vec<String>>,

    /// Timeout per invocation in seconds (default: none)
    #[serde(skip_serializing_if = "Option::is_none", rename = "timeoutSecs")]
    pub timeout_secs: Option<u64>,
}

/// Publish defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PublishDefaults {
    /// Network to publish to (default: "localnet")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Gas budget in MIST
    #[serde(skip_serializing_if = "Option::is_none", rename = "gasBudget")]
    pub gas_budget: Option<u64>,

    /// Execution strategy (default: sdk)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<PublishStrategy>,

    /// Artifact directory, relative to the package (default: "deployments")
    #[serde(skip_serializing_if = "Option::is_none", rename = "artifactsDir")]
    pub artifacts_dir: Option<PathBuf>,

    /// Sender address; the active toolchain address is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    /// Pass `--skip-dependency-verification` to the CLI publish
    #[serde(
        skip_serializing_if = "Option::is_none",
        rename = "skipDependencyVerification"
    )]
    pub skip_dependency_verification: Option<bool>,
}

/// Publish execution strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PublishStrategy {
    /// Transaction built and signed in-process, submitted through the network client
    Sdk,
    /// `sui client publish --json`
    Cli,
}

impl PublishStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sdk => "sdk",
            Self::Cli => "cli",
        }
    }
}

impl fmt::Display for PublishStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublishStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sdk" => Ok(Self::Sdk),
            "cli" => Ok(Self::Cli),
            other => Err(format!("unknown publish strategy '{}' (expected sdk|cli)", other)),
        }
    }
}

/// Network profile as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint (environment variable expansion supported)
    #[serde(rename = "rpcUrl")]
    pub rpc_url: String,

    /// Explorer template, `{digest}` and `{network}` are substituted
    #[serde(skip_serializing_if = "Option::is_none", rename = "explorerUrl")]
    pub explorer_url: Option<String>,

    /// Local/throwaway network tolerating unpublished dependencies (default: false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissive: Option<bool>,

    /// Environment name used in Move.toml / Move.lock (default: network name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// Fully resolved network profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkProfile {
    pub name: String,
    pub rpc_url: String,
    pub explorer_url: Option<String>,
    pub permissive: bool,
    pub environment: String,
}

impl NetworkProfile {
    /// Explorer link for a transaction digest
    pub fn explorer_link(&self, digest: &str) -> Option<String> {
        self.explorer_url.as_ref().map(|template| {
            template
                .replace("{network}", &self.name)
                .replace("{digest}", digest)
        })
    }
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    /// Environment variable expansion settings
    #[serde(skip_serializing_if = "Option::is_none", rename = "envVarExpansion")]
    pub env_var_expansion: Option<EnvVarExpansionConfig>,
}

/// Environment variable expansion configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvVarExpansionConfig {
    /// Enable environment variable expansion (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Allowed environment variable prefixes (default: all)
    #[serde(skip_serializing_if = "Option::is_none", rename = "allowedPrefixes")]
    pub allowed_prefixes: Option<Vec<String>>,
}

/// Built-in network profiles
pub fn builtin_networks() -> BTreeMap<String, NetworkConfig> {
    let explorer = Some("https://suiscan.xyz/{network}/tx/{digest}".to_string());
    let mut networks = BTreeMap::new();

    networks.insert(
        "localnet".to_string(),
        NetworkConfig {
            rpc_url: "http://127.0.0.1:9000".to_string(),
            explorer_url: None,
            permissive: Some(true),
            environment: None,
        },
    );
    for name in ["devnet", "testnet", "mainnet"] {
        networks.insert(
            name.to_string(),
            NetworkConfig {
                rpc_url: format!("https://fullnode.{}.sui.io:443", name),
                explorer_url: explorer.clone(),
                permissive: Some(false),
                environment: None,
            },
        );
    }

    networks
}

impl PublisherConfig {
    /// Resolve a network profile by name, user profiles first
    pub fn network_profile(&self, name: &str) -> Option<NetworkProfile> {
        let configured = self.networks.as_ref().and_then(|n| n.get(name)).cloned();
        let network = configured.or_else(|| builtin_networks().remove(name))?;

        Some(NetworkProfile {
            name: name.to_string(),
            rpc_url: network.rpc_url,
            explorer_url: network.explorer_url,
            permissive: network.permissive.unwrap_or(false),
            environment: network.environment.unwrap_or_else(|| name.to_string()),
        })
    }

    pub fn default_network(&self) -> String {
        self.publish
            .as_ref()
            .and_then(|p| p.network.clone())
            .unwrap_or_else(|| DEFAULT_NETWORK.to_string())
    }

    pub fn gas_budget(&self) -> u64 {
        self.publish
            .as_ref()
            .and_then(|p| p.gas_budget)
            .unwrap_or(DEFAULT_GAS_BUDGET)
    }

    pub fn strategy(&self) -> PublishStrategy {
        self.publish
            .as_ref()
            .and_then(|p| p.strategy)
            .unwrap_or(PublishStrategy::Sdk)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.publish
            .as_ref()
            .and_then(|p| p.artifacts_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACTS_DIR))
    }

    pub fn sender(&self) -> Option<String> {
        self.publish.as_ref().and_then(|p| p.sender.clone())
    }

    pub fn skip_dependency_verification(&self) -> bool {
        self.publish
            .as_ref()
            .and_then(|p| p.skip_dependency_verification)
            .unwrap_or(false)
    }

    pub fn toolchain_binary(&self) -> String {
        self.toolchain
            .as_ref()
            .and_then(|t| t.binary.clone())
            .unwrap_or_else(|| DEFAULT_TOOLCHAIN.to_string())
    }

    pub fn toolchain_args_prefix(&self) -> Vec<String> {
        self.toolchain
            .as_ref()
            .and_then(|t| t.args_prefix.clone())
            .unwrap_or_default()
    }

    pub fn toolchain_timeout(&self) -> Option<Duration> {
        self.toolchain
            .as_ref()
            .and_then(|t| t.timeout_secs)
            .map(Duration::from_secs)
    }
}

/// Default configuration values
impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            extends: None,
            toolchain: None,
            publish: None,
            networks: None,
            security: Some(SecurityConfig::default()),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            env_var_expansion: Some(EnvVarExpansionConfig {
                enabled: Some(true),
                allowed_prefixes: None,
            }),
        }
    }
}
