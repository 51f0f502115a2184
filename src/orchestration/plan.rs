//! Publish plan
//!
//! A plan is decided once, before anything runs, and never mutated. The
//! strategy retry derives a new plan with [`PublishPlan::with_strategy`].

use crate::build::builder::BuildFlags;
use crate::core::config::{NetworkProfile, PublishStrategy};
use crate::core::error::{PublisherError, Result};
use crate::validation::dependency_resolver::ResolvedDependencies;
use std::path::PathBuf;

pub const UNPUBLISHED_FLAG: &str = "--with-unpublished-dependencies";

/// Whether unpublished dependencies are bundled, and why
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnpublishedMode {
    pub enabled: bool,
    /// Turned on by the pipeline rather than requested
    pub auto_enabled: bool,
}

/// Decide the unpublished-dependencies mode
///
/// The flag is rejected outright on non-permissive networks. On permissive
/// networks the mode turns itself on when the lock file is missing or a
/// dependency is unpublished. Anything still unpublished without the mode is
/// a configuration error.
pub fn decide_unpublished_mode(
    network: &NetworkProfile,
    requested: bool,
    lock_missing: bool,
    unpublished: &[String],
) -> Result<UnpublishedMode> {
    if requested && !network.permissive {
        return Err(PublisherError::configuration(format!(
            "{} is only allowed on permissive networks (got {})",
            UNPUBLISHED_FLAG, network.name
        )));
    }

    let auto_enabled = !requested && network.permissive && (lock_missing || !unpublished.is_empty());
    let enabled = requested || auto_enabled;

    if !enabled && !unpublished.is_empty() {
        return Err(PublisherError::configuration(format!(
            "dependencies without a published address on {}: {}. Publish them first, or use {} on a permissive network",
            network.name,
            unpublished.join(", "),
            UNPUBLISHED_FLAG
        )));
    }

    Ok(UnpublishedMode {
        enabled,
        auto_enabled,
    })
}

/// Everything the pipeline needs to run one publish
#[derive(Debug, Clone, PartialEq)]
pub struct PublishPlan {
    pub network: NetworkProfile,
    pub package_path: PathBuf,
    pub signer_address: String,
    pub gas_budget: u64,
    pub should_use_unpublished_dependencies: bool,
    pub auto_enabled_unpublished: bool,
    pub build_flags: BuildFlags,
    pub dependencies: ResolvedDependencies,
    pub strategy: PublishStrategy,
    pub skip_dependency_verification: bool,
    pub artifacts_dir: PathBuf,
}

impl PublishPlan {
    /// Same plan with another strategy
    pub fn with_strategy(&self, strategy: PublishStrategy) -> Self {
        Self {
            strategy,
            ..self.clone()
        }
    }

    pub fn root_name(&self) -> &str {
        &self.dependencies.root_name
    }

    /// Unpublished dependency names, in declaration order
    pub fn unpublished_dependencies(&self) -> Vec<String> {
        self.dependencies.unpublished()
    }

    /// Lock sync only makes sense where chain ids are throwaway
    pub fn should_sync_lock(&self) -> bool {
        self.network.permissive
    }

    pub fn should_check_consistency(&self) -> bool {
        !self.network.permissive && !self.auto_enabled_unpublished
    }

    /// Arguments of `client publish`
    pub fn cli_publish_args(&self) -> Vec<String> {
        let mut args = vec![
            "client".to_string(),
            "publish".to_string(),
            self.package_path.display().to_string(),
            "--gas-budget".to_string(),
            self.gas_budget.to_string(),
            "--sender".to_string(),
            self.signer_address.clone(),
            "--json".to_string(),
        ];
        if self.should_use_unpublished_dependencies {
            args.push(UNPUBLISHED_FLAG.to_string());
        }
        if self.skip_dependency_verification {
            args.push("--skip-dependency-verification".to_string());
        }
        args
    }
}
