//! Collaborator traits and the on-chain types they exchange
//!
//! The network client and the signing identity are external services. The
//! pipeline only talks to them through [`NetworkClient`] and [`Signer`], which
//! keeps the orchestrator testable with in-memory fakes.

use crate::core::error::{PublisherError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Objects
// ============================================================================

/// Minimal view of an on-chain object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub object_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
}

// ============================================================================
// Transactions
// ============================================================================

/// Command embedded in a publish transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PublishCommand {
    /// Publish the compiled modules, linking against the dependency ids
    Publish,
    /// Hand the freshly minted upgrade capability to `recipient`
    TransferUpgradeCap { recipient: String },
}

/// Unsigned publish transaction built by the SDK strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishTransaction {
    pub sender: String,
    pub gas_budget: u64,
    /// Base64 compiled modules, in build order
    pub modules: Vec<String>,
    /// Package ids the modules link against
    pub dependencies: Vec<String>,
    pub commands: Vec<PublishCommand>,
}

impl PublishTransaction {
    /// Publish `modules` and transfer the upgrade cap back to `sender`
    pub fn publish(
        sender: impl Into<String>,
        gas_budget: u64,
        modules: Vec<String>,
        dependencies: Vec<String>,
    ) -> Self {
        let sender = sender.into();
        Self {
            commands: vec![
                PublishCommand::Publish,
                PublishCommand::TransferUpgradeCap {
                    recipient: sender.clone(),
                },
            ],
            sender,
            gas_budget,
            modules,
            dependencies,
        }
    }

    /// Rough serialized size, used only for diagnostics
    pub fn payload_bytes(&self) -> usize {
        self.modules.iter().map(|m| m.len() * 3 / 4).sum()
    }
}

/// Execution status reported by the effects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionStatus {
    pub fn success() -> Self {
        Self {
            status: "success".to_string(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: "failure".to_string(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }
}

/// Object-level effect of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ObjectChange {
    Published {
        package_id: String,
        #[serde(default)]
        modules: Vec<String>,
    },
    Created {
        object_id: String,
        object_type: String,
    },
    /// Mutated, transferred, deleted and anything else the pipeline ignores
    #[serde(other)]
    Other,
}

/// Finalized transaction as seen by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub digest: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub object_changes: Vec<ObjectChange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEffects {
    status: ExecutionStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransactionResponse {
    digest: String,
    #[serde(default)]
    effects: Option<RawEffects>,
    #[serde(default)]
    object_changes: Vec<Value>,
}

impl TransactionResponse {
    /// Read a node-shaped response (`digest`, `effects.status`, `objectChanges`)
    ///
    /// Unknown object change kinds are kept as [`ObjectChange::Other`] rather than
    /// failing the whole response.
    pub fn from_json(value: &Value) -> Result<Self> {
        let raw: RawTransactionResponse =
            serde_json::from_value(value.clone()).map_err(|e| PublisherError::Execution {
                message: format!("unexpected transaction response shape: {}", e),
            })?;

        let status = raw
            .effects
            .map(|effects| effects.status)
            .unwrap_or_else(|| ExecutionStatus::failure("response carried no effects"));

        let object_changes = raw
            .object_changes
            .into_iter()
            .map(|change| serde_json::from_value(change).unwrap_or(ObjectChange::Other))
            .collect();

        Ok(Self {
            digest: raw.digest,
            status,
            object_changes,
        })
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Signing identity
#[async_trait]
pub trait Signer: Send + Sync {
    /// Address transactions are sent from
    async fn address(&self) -> Result<String>;

    /// Sign base64 transaction bytes, returning a base64 serialized signature
    async fn sign(&self, tx_bytes: &str) -> Result<String>;
}

/// Network client used by the pipeline
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Look an object up, `None` when it does not exist
    async fn get_object(&self, object_id: &str) -> Result<Option<ObjectInfo>>;

    /// Sign, submit and wait for finality
    async fn sign_and_submit(
        &self,
        transaction: &PublishTransaction,
        signer: &dyn Signer,
    ) -> Result<TransactionResponse>;

    /// Identifier of the chain the client is connected to
    async fn get_chain_identifier(&self) -> Result<String>;
}
