//! External toolchain runner
//!
//! Every `sui` invocation goes through [`Toolchain::run`]. A non-zero exit or a
//! spawn failure is reported in [`ToolchainOutput`] rather than as an error so
//! each caller decides what counts as failure. The one hard error is a
//! configured timeout elapsing.
//!
//! Arguments are handed to the process as a vector and never go through a
//! shell.

use crate::core::config::PublisherConfig;
use crate::core::error::{PublisherError, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Lines kept from the end of an output when reporting a failure
pub const TAIL_LINES: usize = 20;

/// Character cap on a reported output tail
pub const TAIL_CHARS: usize = 2_000;

lazy_static! {
    static ref VERSION_REGEX: Regex =
        Regex::new(r"\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?").expect("version pattern is valid");
}

/// How the process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    Exited(i32),
    /// Killed by a signal
    Terminated,
    /// The binary could not be started
    SpawnFailed(String),
}

/// Captured result of a toolchain invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: ProcessStatus,
}

impl ToolchainOutput {
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            status: ProcessStatus::Exited(code),
        }
    }

    pub fn success(&self) -> bool {
        self.status == ProcessStatus::Exited(0)
    }

    /// Exit code, `-1` when the process never ran or was killed
    pub fn exit_code(&self) -> i32 {
        match self.status {
            ProcessStatus::Exited(code) => code,
            _ => -1,
        }
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
        }
    }

    /// Bounded tail of the combined output
    pub fn tail(&self, max_lines: usize, max_chars: usize) -> String {
        output_tail(&self.combined(), max_lines, max_chars)
    }
}

/// Last `max_lines` lines of `text`, capped to its last `max_chars` characters
pub fn output_tail(text: &str, max_lines: usize, max_chars: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    let tail = lines[start..].join("\n");

    let char_count = tail.chars().count();
    if char_count <= max_chars {
        return tail;
    }

    tail.chars().skip(char_count - max_chars).collect()
}

/// The external `sui` toolchain
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Run the toolchain with `args`
    async fn run(&self, args: &[String]) -> Result<ToolchainOutput>;
}

/// [`Toolchain`] backed by a real process
#[derive(Debug, Clone)]
pub struct ProcessToolchain {
    binary: String,
    args_prefix: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessToolchain {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            args_prefix: Vec::new(),
            timeout: None,
        }
    }

    /// Binary, argument prefix and timeout from configuration
    pub fn from_config(config: &PublisherConfig) -> Self {
        Self {
            binary: config.toolchain_binary(),
            args_prefix: config.toolchain_args_prefix(),
            timeout: config.toolchain_timeout(),
        }
    }

    pub fn with_args_prefix(mut self, prefix: Vec<String>) -> Self {
        self.args_prefix = prefix;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn describe(&self, args: &[String]) -> String {
        std::iter::once(self.binary.as_str())
            .chain(self.args_prefix.iter().map(String::as_str))
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Toolchain for ProcessToolchain {
    async fn run(&self, args: &[String]) -> Result<ToolchainOutput> {
        let mut command = Command::new(&self.binary);
        command
            .args(&self.args_prefix)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        tracing::debug!(command = %self.describe(args), "running toolchain");

        let output = match self.timeout {
            Some(after) => match tokio::time::timeout(after, command.output()).await {
                Ok(output) => output,
                Err(_) => {
                    return Err(PublisherError::ToolchainTimeout {
                        command: self.describe(args),
                        after,
                    });
                }
            },
            None => command.output().await,
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(binary = %self.binary, error = %e, "toolchain failed to start");
                return Ok(ToolchainOutput {
                    stdout: String::new(),
                    stderr: e.to_string(),
                    status: ProcessStatus::SpawnFailed(e.to_string()),
                });
            }
        };

        let status = match output.status.code() {
            Some(code) => ProcessStatus::Exited(code),
            None => ProcessStatus::Terminated,
        };

        Ok(ToolchainOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status,
        })
    }
}

/// Extract a version from `--version` output
///
/// Falls back to the trimmed first line when no semver-like token is present.
pub fn parse_version(output: &str) -> Option<String> {
    let parsed = VERSION_REGEX
        .find_iter(output)
        .find_map(|m| semver::Version::parse(m.as_str()).ok());

    match parsed {
        Some(version) => Some(version.to_string()),
        None => output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string),
    }
}

/// Toolchain version, `None` when it cannot be determined
pub async fn toolchain_version(toolchain: &dyn Toolchain) -> Option<String> {
    let output = toolchain.run(&["--version".to_string()]).await.ok()?;
    if !output.success() {
        return None;
    }
    parse_version(&output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_output_tail_limits_lines_and_chars() {
        let text = (1..=30).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");

        let tail = output_tail(&text, TAIL_LINES, TAIL_CHARS);
        assert!(tail.starts_with("line 11"));
        assert!(tail.ends_with("line 30"));

        let capped = output_tail(&text, TAIL_LINES, 7);
        assert_eq!(capped, "line 30");
    }

    #[test]
    fn test_combined_output() {
        let output = ToolchainOutput::exited(1, "out\n", "err\n");
        assert_eq!(output.combined(), "out\nerr\n");
        assert!(!output.success());
        assert_eq!(output.exit_code(), 1);

        let spawn_failed = ToolchainOutput {
            stdout: String::new(),
            stderr: "No such file or directory".to_string(),
            status: ProcessStatus::SpawnFailed("No such file or directory".to_string()),
        };
        assert_eq!(spawn_failed.exit_code(), -1);
        assert_eq!(spawn_failed.combined(), "No such file or directory");
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(
            parse_version("sui 1.30.1-5e4bd8f8b0cb\n").as_deref(),
            Some("1.30.1-5e4bd8f8b0cb")
        );
        assert_eq!(parse_version("sui 1.41.0").as_deref(), Some("1.41.0"));
        assert_eq!(parse_version("sui nightly\n").as_deref(), Some("sui nightly"));
        assert_eq!(parse_version("  \n"), None);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_not_an_error() {
        let toolchain = ProcessToolchain::new("definitely-not-a-real-sui-binary");

        let output = toolchain.run(&args(&["--version"])).await.unwrap();

        assert!(matches!(output.status, ProcessStatus::SpawnFailed(_)));
        assert_eq!(output.stdout, "");
        assert!(!output.stderr.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_captured() {
        let toolchain = ProcessToolchain::new("sh").with_args_prefix(args(&["-c"]));

        let output = toolchain
            .run(&args(&["echo out; echo err >&2; exit 3"]))
            .await
            .unwrap();

        assert_eq!(output.status, ProcessStatus::Exited(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_the_only_error() {
        let toolchain = ProcessToolchain::new("sleep").with_timeout(Duration::from_millis(100));

        let err = toolchain.run(&args(&["5"])).await.unwrap_err();

        assert_eq!(err.code(), "TOOLCHAIN_TIMEOUT");
        assert!(err.to_string().contains("sleep 5"));
    }
}
