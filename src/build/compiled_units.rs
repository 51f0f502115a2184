//! On-disk compiled units
//!
//! `move build --install-dir D` leaves `D/build/<Package>/BuildInfo.yaml` and
//! `D/build/<Package>/bytecode_modules/*.mv`. This is read when the JSON output
//! is missing or when test modules must be stripped.

use crate::build::output_parser::BuildOutput;
use crate::core::error::{PublisherError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const BUILD_INFO_FILE: &str = "BuildInfo.yaml";
const BYTECODE_DIR: &str = "bytecode_modules";
const MODULE_EXTENSION: &str = "mv";

/// `<install_dir>/build`
pub fn build_root(install_dir: &Path) -> PathBuf {
    install_dir.join("build")
}

/// Whether a module file stem names a test-only unit
pub fn is_test_unit(stem: &str) -> bool {
    stem == "tests" || stem.ends_with("_tests")
}

/// Directory holding `BuildInfo.yaml`, preferring one named after the package
pub fn find_package_dir(install_dir: &Path, package_name: Option<&str>) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = WalkDir::new(build_root(install_dir))
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == BUILD_INFO_FILE)
        .filter_map(|entry| entry.path().parent().map(Path::to_path_buf))
        .collect();
    candidates.sort();

    let preferred = package_name.and_then(|name| {
        candidates
            .iter()
            .find(|dir| dir.file_name().is_some_and(|n| n == name))
            .cloned()
    });

    preferred.or_else(|| candidates.into_iter().next())
}

fn normalize_address(raw: &str) -> String {
    let hex = raw.trim().trim_start_matches("0x").to_ascii_lowercase();
    format!("0x{}", hex)
}

fn is_zero_address(address: &str) -> bool {
    address.trim_start_matches("0x").chars().all(|c| c == '0')
}

/// Alias → address table from `BuildInfo.yaml`, without zero addresses
pub fn read_address_table(build_info: &str) -> std::result::Result<BTreeMap<String, String>, serde_yaml::Error> {
    let info: Value = serde_yaml::from_str(build_info)?;

    let table = info
        .get("compiled_package_info")
        .and_then(|i| i.get("address_alias_instantiation"))
        .and_then(Value::as_mapping)
        .map(|mapping| {
            mapping
                .iter()
                .filter_map(|(alias, address)| {
                    let alias = alias.as_str()?;
                    let address = normalize_address(address.as_str()?);
                    (!is_zero_address(&address)).then(|| (alias.to_string(), address))
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(table)
}

/// Read compiled units from the install directory
///
/// Returns `None` when no package directory or no module is found.
pub async fn read_compiled_units(
    install_dir: &Path,
    package_name: Option<&str>,
    strip_test_modules: bool,
) -> Result<Option<BuildOutput>> {
    let Some(package_dir) = find_package_dir(install_dir, package_name) else {
        return Ok(None);
    };

    let info_path = package_dir.join(BUILD_INFO_FILE);
    let build_info = tokio::fs::read_to_string(&info_path)
        .await
        .map_err(|e| PublisherError::persistence(&info_path, e))?;
    let dependency_addresses = read_address_table(&build_info).map_err(|e| PublisherError::Parse {
        message: format!("invalid {}: {}", BUILD_INFO_FILE, e),
        expected_dir: package_dir.clone(),
        output_tail: String::new(),
    })?;

    let mut module_files: Vec<PathBuf> = WalkDir::new(package_dir.join(BYTECODE_DIR))
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == MODULE_EXTENSION))
        .collect();
    module_files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut modules = Vec::with_capacity(module_files.len());
    for path in module_files {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if strip_test_modules && is_test_unit(stem) {
            tracing::debug!(module = stem, "skipping test module");
            continue;
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| PublisherError::persistence(&path, e))?;
        modules.push(BASE64.encode(bytes));
    }

    if modules.is_empty() {
        return Ok(None);
    }

    let mut dependencies: Vec<String> = Vec::new();
    for address in dependency_addresses.values() {
        if !dependencies.contains(address) {
            dependencies.push(address.clone());
        }
    }

    Ok(Some(BuildOutput {
        modules,
        dependencies,
        dependency_addresses,
    }))
}
