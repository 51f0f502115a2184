//! `move build` invocation and the fallback chain around it

use crate::build::compiled_units::{build_root, read_compiled_units};
use crate::build::output_parser::{BuildOutput, parse_build_json};
use crate::core::error::{PublisherError, Result};
use crate::toolchain::runner::{TAIL_CHARS, TAIL_LINES, Toolchain};
use std::path::{Path, PathBuf};

/// Flags of a single build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFlags {
    pub install_dir: PathBuf,
    pub with_unpublished_dependencies: bool,
    /// Drop `*_tests` units; only honoured by the on-disk reader
    pub strip_test_modules: bool,
    pub environment: Option<String>,
}

impl BuildFlags {
    /// Toolchain arguments for building `package_path`
    pub fn to_args(&self, package_path: &Path) -> Vec<String> {
        let mut args = vec![
            "move".to_string(),
            "build".to_string(),
            "--path".to_string(),
            package_path.display().to_string(),
            "--install-dir".to_string(),
            self.install_dir.display().to_string(),
            "--dump-bytecode-as-base64".to_string(),
        ];
        if self.with_unpublished_dependencies {
            args.push("--with-unpublished-dependencies".to_string());
        }
        if let Some(env) = &self.environment {
            args.push("-e".to_string());
            args.push(env.clone());
        }
        args
    }
}

/// Build a package and return its compiled units
///
/// JSON on stdout/stderr is tried first. The on-disk units are read when no
/// JSON is found or when test modules must be stripped; in the latter case
/// the JSON dependency list still wins over the build-info addresses.
pub async fn build_package(
    toolchain: &dyn Toolchain,
    package_path: &Path,
    package_name: &str,
    flags: &BuildFlags,
) -> Result<BuildOutput> {
    // stale units from an earlier build must never be picked up
    let stale = build_root(&flags.install_dir);
    match tokio::fs::remove_dir_all(&stale).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(PublisherError::persistence(&stale, e)),
    }

    let output = toolchain.run(&flags.to_args(package_path)).await?;
    let json = parse_build_json(&output.stdout, &output.stderr);

    if !output.success() {
        if json.is_none() {
            return Err(PublisherError::Toolchain {
                message: format!("`move build` exited with code {}", output.exit_code()),
                output_tail: output.tail(TAIL_LINES, TAIL_CHARS),
            });
        }
        tracing::warn!(code = output.exit_code(), "build exited non-zero but produced output");
    }

    if json.is_none() || flags.strip_test_modules {
        if let Some(mut disk) =
            read_compiled_units(&flags.install_dir, Some(package_name), flags.strip_test_modules).await?
        {
            if let Some(json) = &json {
                if !json.dependencies.is_empty() {
                    disk.dependencies = json.dependencies.clone();
                }
                disk.dependency_addresses
                    .extend(json.dependency_addresses.clone());
            }
            tracing::debug!(modules = disk.modules.len(), "using on-disk compiled units");
            return Ok(disk);
        }
    }

    match json {
        Some(json) => {
            if flags.strip_test_modules {
                tracing::warn!("no on-disk units to strip test modules from, using JSON output");
            }
            Ok(json)
        }
        None => Err(PublisherError::Parse {
            message: "no compiled modules in toolchain output or on disk".to_string(),
            expected_dir: build_root(&flags.install_dir),
            output_tail: output.tail(TAIL_LINES, TAIL_CHARS),
        }),
    }
}
