//! Publish result extraction and labeling

use crate::core::error::{PublisherError, Result};
use crate::core::traits::{ObjectChange, TransactionResponse};
use serde::Serialize;

pub const UPGRADE_CAP_SUFFIX: &str = "::package::UpgradeCap";
pub const PUBLISHER_SUFFIX: &str = "::package::Publisher";

/// One package created by the transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedPackage {
    pub package_id: String,
    pub upgrade_cap_id: Option<String>,
    pub publisher_id: Option<String>,
    pub is_dependency: bool,
    pub package_name: Option<String>,
}

/// Packages of a publish, root first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub packages: Vec<PublishedPackage>,
    pub digest: String,
}

/// Collect published packages and their capabilities from the object changes
///
/// Capabilities are paired with packages by position. Mismatched counts are
/// returned as warnings; no package at all is an error.
pub fn extract(response: &TransactionResponse) -> Result<(PublishResult, Vec<String>)> {
    let mut package_ids = Vec::new();
    let mut caps = Vec::new();
    let mut publishers = Vec::new();

    for change in &response.object_changes {
        match change {
            ObjectChange::Published { package_id, .. } => package_ids.push(package_id.clone()),
            ObjectChange::Created {
                object_id,
                object_type,
            } => {
                if object_type.ends_with(UPGRADE_CAP_SUFFIX) {
                    caps.push(object_id.clone());
                } else if object_type.ends_with(PUBLISHER_SUFFIX) {
                    publishers.push(object_id.clone());
                }
            }
            _ => {}
        }
    }

    if package_ids.is_empty() {
        return Err(PublisherError::EmptyPublish {
            digest: response.digest.clone(),
        });
    }

    let mut warnings = Vec::new();
    for (kind, count) in [("upgrade caps", caps.len()), ("publishers", publishers.len())] {
        if count != 0 && count != package_ids.len() {
            let warning = format!(
                "{} packages but {} {}; pairing by position",
                package_ids.len(),
                count,
                kind
            );
            tracing::warn!(digest = %response.digest, "{}", warning);
            warnings.push(warning);
        }
    }

    let packages = package_ids
        .into_iter()
        .enumerate()
        .map(|(index, package_id)| PublishedPackage {
            package_id,
            upgrade_cap_id: caps.get(index).cloned(),
            publisher_id: publishers.get(index).cloned(),
            is_dependency: index > 0,
            package_name: None,
        })
        .collect();

    Ok((
        PublishResult {
            packages,
            digest: response.digest.clone(),
        },
        warnings,
    ))
}

/// Name packages: the root first, then unpublished dependencies in order
pub fn label(result: &mut PublishResult, root_name: &str, unpublished: &[String]) {
    for (index, package) in result.packages.iter_mut().enumerate() {
        package.package_name = if index == 0 && !package.is_dependency {
            Some(root_name.to_string())
        } else {
            index
                .checked_sub(1)
                .and_then(|i| unpublished.get(i))
                .cloned()
        };
    }
}
