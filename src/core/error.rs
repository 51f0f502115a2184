//! Error handling for the build & publish pipeline
//!
//! Variants follow the pipeline taxonomy: configuration, consistency, toolchain,
//! parse, on-chain execution and persistence. Each carries enough context to be
//! actionable without re-running with extra logging.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for publishing operations
#[derive(Error, Debug)]
pub enum PublisherError {
    // Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    // Consistency errors
    #[error("consistency check failed: {message}")]
    Consistency { message: String },

    // Toolchain errors
    #[error("toolchain command failed: {message}{}", format_tail(.output_tail))]
    Toolchain {
        message: String,
        output_tail: String,
    },

    #[error("toolchain command `{command}` timed out after {after:?}")]
    ToolchainTimeout { command: String, after: Duration },

    // Parse errors
    #[error(
        "could not read build output: {message} (expected compiled units under {}){}",
        .expected_dir.display(),
        format_tail(.output_tail)
    )]
    Parse {
        message: String,
        expected_dir: PathBuf,
        output_tail: String,
    },

    // On-chain execution errors
    #[error("transaction execution failed: {message}")]
    Execution { message: String },

    #[error("publish succeeded but nothing was returned (digest {digest})")]
    EmptyPublish { digest: String },

    // Persistence errors
    #[error("failed to persist {}: {message}", .path.display())]
    Persistence { path: PathBuf, message: String },

    // Network transport errors
    #[error("network error: {message}")]
    Network { message: String },

    // Pipeline state errors
    #[error("invalid pipeline transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

fn format_tail(tail: &str) -> String {
    if tail.trim().is_empty() {
        String::new()
    } else {
        format!("\n--- output tail ---\n{}", tail)
    }
}

pub type Result<T, E = PublisherError> = std::result::Result<T, E>;

impl PublisherError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Check if this error is recoverable by the caller
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Configuration { .. }
                | Self::Consistency { .. }
                | Self::ToolchainTimeout { .. }
                | Self::EmptyPublish { .. }
                | Self::InvalidTransition { .. }
        )
    }

    /// Get suggested actions for this error
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            Self::Configuration { .. } => vec![
                "Check the flag and network named in the message",
                "Review .sui-publish.yaml and SUI_PUBLISH_* environment variables",
            ],
            Self::Consistency { .. } => vec![
                "Pin every package to the same framework revision",
                "Rebuild the lock files of the listed dependencies",
            ],
            Self::Toolchain { .. } => vec![
                "Inspect the output tail above",
                "Make sure the `sui` binary on PATH matches the target network",
            ],
            Self::ToolchainTimeout { .. } => {
                vec!["Raise toolchain.timeoutSecs in the configuration"]
            }
            Self::Parse { .. } => vec![
                "Run the build manually and check that it produces compiled units",
                "Remove the build directory and retry",
            ],
            Self::Execution { .. } => vec![
                "Check the gas budget",
                "Check that the sender owns enough gas coins",
            ],
            Self::EmptyPublish { .. } => {
                vec!["Look the digest up in an explorer to see what was executed"]
            }
            Self::Persistence { .. } => vec![
                "Check permissions on the artifacts directory",
                "Make sure the disk is not full",
            ],
            Self::Network { .. } => vec![
                "Check the RPC URL for the selected network",
                "Retry once the node is reachable",
            ],
            Self::InvalidTransition { .. } => vec!["Report this as a bug"],
        }
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION",
            Self::Consistency { .. } => "CONSISTENCY",
            Self::Toolchain { .. } => "TOOLCHAIN",
            Self::ToolchainTimeout { .. } => "TOOLCHAIN_TIMEOUT",
            Self::Parse { .. } => "PARSE",
            Self::Execution { .. } => "EXECUTION",
            Self::EmptyPublish { .. } => "EMPTY_PUBLISH",
            Self::Persistence { .. } => "PERSISTENCE",
            Self::Network { .. } => "NETWORK",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }

    /// Whether the error text matches a transaction size-limit failure
    pub fn is_size_limit(&self) -> bool {
        crate::core::retry::is_size_limit_error(&self.to_string())
    }
}
