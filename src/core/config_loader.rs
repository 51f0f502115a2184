//! Configuration file loader for sui-package-publisher
//!
//! This module provides configuration loading, validation, and merging capabilities.

use super::config::*;
use crate::core::error::PublisherError;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Configuration file name
pub const CONFIG_FILENAME: &str = ".sui-publish.yaml";

lazy_static! {
    /// Environment variable pattern (${VAR_NAME})
    static ref ENV_VAR_REGEX: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid");
}

/// Configuration load options
#[derive(Debug, Clone)]
pub struct ConfigLoadOptions {
    /// Project path to load config from
    pub project_path: PathBuf,

    /// Global config file, skipped when `None`
    pub global_config_path: Option<PathBuf>,

    /// CLI arguments (highest priority)
    pub cli_args: Option<PublisherConfig>,

    /// Environment variables
    pub env: HashMap<String, String>,
}

impl ConfigLoadOptions {
    /// Options reading `~/.sui-publish.yaml` and the process environment
    pub fn for_project<P: AsRef<Path>>(project_path: P) -> Self {
        let global_config_path = env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(CONFIG_FILENAME));

        Self {
            project_path: project_path.as_ref().to_path_buf(),
            global_config_path,
            cli_args: None,
            env: env::vars().collect(),
        }
    }
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationResult {
    /// Is configuration valid?
    pub valid: bool,

    /// Validation errors
    pub errors: Vec<ConfigValidationError>,

    /// Validation warnings
    pub warnings: Vec<ConfigValidationWarning>,
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationError {
    /// Field path (e.g., "networks.testnet.rpcUrl")
    pub field: String,

    /// Error message
    pub message: String,
}

/// Configuration validation warning
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigValidationWarning {
    /// Field path
    pub field: String,

    /// Warning message
    pub message: String,

    /// Suggestion
    pub suggestion: Option<String>,
}

/// Configuration file loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from multiple sources with priority
    ///
    /// Priority (high to low):
    /// 1. CLI arguments
    /// 2. Environment variables (`SUI_PUBLISH_*`)
    /// 3. Project config (./.sui-publish.yaml)
    /// 4. Global config (~/.sui-publish.yaml)
    /// 5. Default values
    pub async fn load(options: ConfigLoadOptions) -> Result<PublisherConfig, PublisherError> {
        let mut configs: Vec<PublisherConfig> = vec![PublisherConfig::default()];

        if let Some(global_path) = &options.global_config_path
            && let Some(global_config) = Self::load_config_file(global_path).await?
        {
            configs.push(global_config);
        }

        let project_config_path = options.project_path.join(CONFIG_FILENAME);
        if let Some(project_config) = Self::load_config_file(&project_config_path).await? {
            configs.push(project_config);
        }

        if let Some(env_config) = Self::load_env_config(&options.env)? {
            configs.push(env_config);
        }

        if let Some(cli_config) = options.cli_args {
            configs.push(cli_config);
        }

        let merged_config = Self::merge_configs(configs);

        Ok(Self::expand_env_vars(merged_config, &options.env))
    }

    /// Load configuration from YAML file, following `extends`
    fn load_config_file(
        file_path: &Path,
    ) -> std::pin::Pin<
        Box<
            dyn std::future::Future<Output = Result<Option<PublisherConfig>, PublisherError>>
                + Send
                + '_,
        >,
    > {
        Box::pin(async move {
            if !file_path.exists() {
                return Ok(None);
            }

            let content = fs::read_to_string(file_path).await.map_err(|e| {
                PublisherError::configuration(format!(
                    "failed to read {}: {}",
                    file_path.display(),
                    e
                ))
            })?;

            let config: PublisherConfig = serde_yaml::from_str(&content).map_err(|e| {
                PublisherError::configuration(format!(
                    "failed to parse {}: {}",
                    file_path.display(),
                    e
                ))
            })?;

            if let Some(extends_path) = &config.extends {
                let base_path = file_path
                    .parent()
                    .ok_or_else(|| PublisherError::configuration("invalid config file path"))?
                    .join(extends_path);

                if let Some(base_config) = Self::load_config_file(&base_path).await? {
                    return Ok(Some(Self::merge_configs(vec![base_config, config])));
                }
            }

            Ok(Some(config))
        })
    }

    /// Load configuration from environment variables
    fn load_env_config(
        env: &HashMap<String, String>,
    ) -> Result<Option<PublisherConfig>, PublisherError> {
        let mut publish = PublishDefaults::default();
        let mut toolchain = ToolchainConfig::default();
        let mut has_publish = false;
        let mut has_toolchain = false;

        if let Some(network) = env.get("SUI_PUBLISH_NETWORK") {
            publish.network = Some(network.clone());
            has_publish = true;
        }

        if let Some(budget) = env.get("SUI_PUBLISH_GAS_BUDGET") {
            let parsed = budget.trim().parse::<u64>().map_err(|_| {
                PublisherError::configuration(format!(
                    "SUI_PUBLISH_GAS_BUDGET must be an integer amount of MIST (got '{}')",
                    budget
                ))
            })?;
            publish.gas_budget = Some(parsed);
            has_publish = true;
        }

        if let Some(strategy) = env.get("SUI_PUBLISH_STRATEGY") {
            publish.strategy = Some(strategy.parse().map_err(|e: String| {
                PublisherError::configuration(format!("SUI_PUBLISH_STRATEGY: {}", e))
            })?);
            has_publish = true;
        }

        if let Some(dir) = env.get("SUI_PUBLISH_ARTIFACTS_DIR") {
            publish.artifacts_dir = Some(PathBuf::from(dir));
            has_publish = true;
        }

        if let Some(sender) = env.get("SUI_PUBLISH_SENDER") {
            publish.sender = Some(sender.clone());
            has_publish = true;
        }

        if let Some(binary) = env.get("SUI_PUBLISH_TOOLCHAIN") {
            toolchain.binary = Some(binary.clone());
            has_toolchain = true;
        }

        if !has_publish && !has_toolchain {
            return Ok(None);
        }

        Ok(Some(PublisherConfig {
            publish: has_publish.then_some(publish),
            toolchain: has_toolchain.then_some(toolchain),
            security: None,
            ..Default::default()
        }))
    }

    /// Merge multiple configurations with priority
    fn merge_configs(configs: Vec<PublisherConfig>) -> PublisherConfig {
        let mut result = PublisherConfig::default();

        for config in configs {
            Self::merge_into(&mut result, config);
        }

        result
    }

    /// Merge source config into target
    fn merge_into(target: &mut PublisherConfig, source: PublisherConfig) {
        if !source.version.is_empty() {
            target.version = source.version;
        }

        if source.extends.is_some() {
            target.extends = source.extends;
        }

        // Toolchain (field-wise)
        if let Some(source_toolchain) = source.toolchain {
            let target_toolchain = target.toolchain.get_or_insert_with(Default::default);
            if source_toolchain.binary.is_some() {
                target_toolchain.binary = source_toolchain.binary;
            }
            if source_toolchain.args_prefix.is_some() {
                target_toolchain.args_prefix = source_toolchain.args_prefix;
            }
            if source_toolchain.timeout_secs.is_some() {
                target_toolchain.timeout_secs = source_toolchain.timeout_secs;
            }
        }

        // Publish defaults (field-wise)
        if let Some(source_publish) = source.publish {
            let target_publish = target.publish.get_or_insert_with(Default::default);
            if source_publish.network.is_some() {
                target_publish.network = source_publish.network;
            }
            if source_publish.gas_budget.is_some() {
                target_publish.gas_budget = source_publish.gas_budget;
            }
            if source_publish.strategy.is_some() {
                target_publish.strategy = source_publish.strategy;
            }
            if source_publish.artifacts_dir.is_some() {
                target_publish.artifacts_dir = source_publish.artifacts_dir;
            }
            if source_publish.sender.is_some() {
                target_publish.sender = source_publish.sender;
            }
            if source_publish.skip_dependency_verification.is_some() {
                target_publish.skip_dependency_verification =
                    source_publish.skip_dependency_verification;
            }
        }

        // Networks (per profile)
        if let Some(source_networks) = source.networks {
            target
                .networks
                .get_or_insert_with(Default::default)
                .extend(source_networks);
        }

        if source.security.is_some() {
            target.security = source.security;
        }
    }

    /// Expand `${VAR}` references in network profiles and the sender
    fn expand_env_vars(mut config: PublisherConfig, env: &HashMap<String, String>) -> PublisherConfig {
        let expansion = config
            .security
            .as_ref()
            .and_then(|s| s.env_var_expansion.clone());

        let enabled = expansion.as_ref().and_then(|e| e.enabled).unwrap_or(true);
        if !enabled {
            return config;
        }

        let allowed_prefixes = expansion.and_then(|e| e.allowed_prefixes);

        if let Some(networks) = &mut config.networks {
            for network in networks.values_mut() {
                network.rpc_url = Self::expand_string(&network.rpc_url, env, &allowed_prefixes);
                if let Some(explorer) = &network.explorer_url {
                    network.explorer_url =
                        Some(Self::expand_string(explorer, env, &allowed_prefixes));
                }
            }
        }

        if let Some(publish) = &mut config.publish
            && let Some(sender) = &publish.sender
        {
            publish.sender = Some(Self::expand_string(sender, env, &allowed_prefixes));
        }

        config
    }

    /// Expand environment variables in a single string
    fn expand_string(
        input: &str,
        env: &HashMap<String, String>,
        allowed_prefixes: &Option<Vec<String>>,
    ) -> String {
        let mut result = input.to_string();

        for cap in ENV_VAR_REGEX.captures_iter(input) {
            let var_name = &cap[1];

            if let Some(prefixes) = allowed_prefixes
                && !prefixes.iter().any(|prefix| var_name.starts_with(prefix))
            {
                tracing::warn!(variable = var_name, "not allowed by prefix whitelist, skipping");
                continue;
            }

            match env.get(var_name) {
                Some(value) => result = result.replace(&format!("${{{}}}", var_name), value),
                None => tracing::warn!(variable = var_name, "environment variable not found"),
            }
        }

        result
    }

    /// Validate configuration
    pub fn validate(config: &PublisherConfig) -> ConfigValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if config.version.is_empty() {
            errors.push(ConfigValidationError {
                field: "version".to_string(),
                message: "version is required".to_string(),
            });
        } else if config.version != "1.0" {
            warnings.push(ConfigValidationWarning {
                field: "version".to_string(),
                message: format!("unknown version: {}", config.version),
                suggestion: Some("currently supported version is \"1.0\" only".to_string()),
            });
        }

        if let Some(networks) = &config.networks {
            for (name, network) in networks {
                Self::validate_network(name, network, &mut errors, &mut warnings);
            }
        }

        if let Some(publish) = &config.publish {
            if publish.gas_budget == Some(0) {
                errors.push(ConfigValidationError {
                    field: "publish.gasBudget".to_string(),
                    message: "gas budget must be greater than zero".to_string(),
                });
            }

            if let Some(network) = &publish.network
                && config.network_profile(network).is_none()
            {
                errors.push(ConfigValidationError {
                    field: "publish.network".to_string(),
                    message: format!("unknown network '{}'", network),
                });
            }
        }

        if let Some(toolchain) = &config.toolchain {
            if toolchain.binary.as_deref() == Some("") {
                errors.push(ConfigValidationError {
                    field: "toolchain.binary".to_string(),
                    message: "binary must not be empty".to_string(),
                });
            }
            if toolchain.timeout_secs == Some(0) {
                warnings.push(ConfigValidationWarning {
                    field: "toolchain.timeoutSecs".to_string(),
                    message: "a zero timeout fails every invocation".to_string(),
                    suggestion: Some("remove the field to disable the timeout".to_string()),
                });
            }
        }

        ConfigValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    fn validate_network(
        name: &str,
        network: &NetworkConfig,
        errors: &mut Vec<ConfigValidationError>,
        warnings: &mut Vec<ConfigValidationWarning>,
    ) {
        if network.rpc_url.trim().is_empty() {
            errors.push(ConfigValidationError {
                field: format!("networks.{}.rpcUrl", name),
                message: "rpcUrl is required".to_string(),
            });
        } else if !network.rpc_url.starts_with("http://") && !network.rpc_url.starts_with("https://")
        {
            warnings.push(ConfigValidationWarning {
                field: format!("networks.{}.rpcUrl", name),
                message: format!("'{}' is not an http(s) URL", network.rpc_url),
                suggestion: None,
            });
        }

        if name == "mainnet" && network.permissive == Some(true) {
            warnings.push(ConfigValidationWarning {
                field: "networks.mainnet.permissive".to_string(),
                message: "mainnet is marked permissive".to_string(),
                suggestion: Some("unpublished dependencies would be allowed on mainnet".to_string()),
            });
        }
    }

    /// Format validation result as human-readable string
    pub fn format_validation_result(result: &ConfigValidationResult) -> String {
        let mut lines = Vec::new();

        if result.valid {
            lines.push("✅ Configuration validation succeeded".to_string());
        } else {
            lines.push("❌ Configuration has errors".to_string());
        }

        if !result.errors.is_empty() {
            lines.push("\n🔴 Errors:".to_string());
            for error in &result.errors {
                lines.push(format!("  - [{}] {}", error.field, error.message));
            }
        }

        if !result.warnings.is_empty() {
            lines.push("\n🟡 Warnings:".to_string());
            for warning in &result.warnings {
                lines.push(format!("  - [{}] {}", warning.field, warning.message));
                if let Some(suggestion) = &warning.suggestion {
                    lines.push(format!("    Suggestion: {}", suggestion));
                }
            }
        }

        lines.join("\n")
    }
}
