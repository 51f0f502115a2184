//! JSON-RPC network client
//!
//! Reads go through [`RetryManager`]. Publishing asks the node to build the
//! transaction (`unsafe_publish`), signs the returned bytes with the
//! [`Signer`] and executes them, waiting for local execution.

use crate::core::error::{PublisherError, Result};
use crate::core::retry::RetryManager;
use crate::core::traits::{
    NetworkClient, ObjectInfo, PublishCommand, PublishTransaction, Signer, TransactionResponse,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};

/// Client for a full node's JSON-RPC endpoint
pub struct RpcNetworkClient {
    http: reqwest::Client,
    url: String,
    retry: RetryManager,
    next_id: AtomicU64,
}

/// JSON-RPC request envelope
pub fn rpc_request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// `result` of a JSON-RPC response, or its `error` as a message
pub fn rpc_result(response: Value) -> std::result::Result<Value, String> {
    if let Some(error) = response.get("error") {
        let code = error.get("code").map(Value::to_string).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(format!("rpc error {}: {}", code, message));
    }

    match response {
        Value::Object(mut map) => map
            .remove("result")
            .ok_or_else(|| "response has neither result nor error".to_string()),
        _ => Err("response is not a JSON object".to_string()),
    }
}

/// `sui_getObject` result, `None` for a missing object
pub fn parse_object(result: Value) -> Result<Option<ObjectInfo>> {
    if let Some(data) = result.get("data").filter(|d| !d.is_null()) {
        return serde_json::from_value(data.clone())
            .map(Some)
            .map_err(|e| PublisherError::Network {
                message: format!("unexpected object shape: {}", e),
            });
    }

    match result.get("error") {
        Some(_) => Ok(None),
        None => Err(PublisherError::Network {
            message: "object response has neither data nor error".to_string(),
        }),
    }
}

impl RpcNetworkClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            retry: RetryManager::default(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_retry(mut self, retry: RetryManager) -> Self {
        self.retry = retry;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let network_error = |message: String| PublisherError::Network {
            message: format!("{} {}: {}", method, self.url, message),
        };

        let response = self
            .http
            .post(&self.url)
            .json(&rpc_request(id, method, params))
            .send()
            .await
            .map_err(|e| network_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(network_error(format!("HTTP {}", response.status())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| network_error(e.to_string()))?;

        rpc_result(body).map_err(network_error)
    }

    async fn read(&self, method: &str, params: Value) -> Result<Value> {
        self.retry.retry(|| self.call(method, params.clone())).await
    }
}

fn as_execution(error: PublisherError) -> PublisherError {
    match error {
        PublisherError::Network { message } => PublisherError::Execution { message },
        other => other,
    }
}

#[async_trait]
impl NetworkClient for RpcNetworkClient {
    async fn get_object(&self, object_id: &str) -> Result<Option<ObjectInfo>> {
        let result = self
            .read("sui_getObject", json!([object_id, { "showType": true }]))
            .await?;
        parse_object(result)
    }

    async fn sign_and_submit(
        &self,
        transaction: &PublishTransaction,
        signer: &dyn Signer,
    ) -> Result<TransactionResponse> {
        // the node always hands the upgrade cap to the sender
        for command in &transaction.commands {
            if let PublishCommand::TransferUpgradeCap { recipient } = command
                && recipient != &transaction.sender
            {
                return Err(PublisherError::configuration(format!(
                    "upgrade cap can only be transferred to the sender {} (got {})",
                    transaction.sender, recipient
                )));
            }
        }

        tracing::debug!(
            modules = transaction.modules.len(),
            approx_bytes = transaction.payload_bytes(),
            "requesting publish transaction"
        );

        let built = self
            .call(
                "unsafe_publish",
                json!([
                    transaction.sender,
                    transaction.modules,
                    transaction.dependencies,
                    Value::Null,
                    transaction.gas_budget.to_string(),
                ]),
            )
            .await
            .map_err(as_execution)?;

        let tx_bytes = built
            .get("txBytes")
            .and_then(Value::as_str)
            .ok_or_else(|| PublisherError::Execution {
                message: "unsafe_publish returned no txBytes".to_string(),
            })?
            .to_string();

        let signature = signer.sign(&tx_bytes).await?;

        let executed = self
            .call(
                "sui_executeTransactionBlock",
                json!([
                    tx_bytes,
                    [signature],
                    { "showEffects": true, "showObjectChanges": true },
                    "WaitForLocalExecution",
                ]),
            )
            .await
            .map_err(as_execution)?;

        TransactionResponse::from_json(&executed)
    }

    async fn get_chain_identifier(&self) -> Result<String> {
        let result = self.read("sui_getChainIdentifier", json!([])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PublisherError::Network {
                message: format!("unexpected chain identifier: {}", result),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverSigns;

    #[async_trait]
    impl Signer for NeverSigns {
        async fn address(&self) -> Result<String> {
            Ok("0xa11ce".to_string())
        }

        async fn sign(&self, _: &str) -> Result<String> {
            unreachable!("rejected before signing")
        }
    }

    #[test]
    fn test_rpc_request_envelope() {
        let request = rpc_request(7, "sui_getChainIdentifier", json!([]));

        assert_eq!(request["jsonrpc"], "2.0");
        assert_eq!(request["id"], 7);
        assert_eq!(request["method"], "sui_getChainIdentifier");
    }

    #[test]
    fn test_rpc_result_and_error() {
        let ok = rpc_result(json!({ "jsonrpc": "2.0", "id": 1, "result": "4c78adac" })).unwrap();
        assert_eq!(ok, "4c78adac");

        let err = rpc_result(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32002, "message": "Transaction size limit exceeded" }
        }))
        .unwrap_err();
        assert!(err.contains("-32002"));
        assert!(crate::core::retry::is_size_limit_error(&err));
    }

    #[test]
    fn test_parse_object() {
        let found = parse_object(json!({
            "data": { "objectId": "0x2", "version": "1", "digest": "abc", "type": "package" }
        }))
        .unwrap()
        .unwrap();
        assert_eq!(found.object_id, "0x2");
        assert_eq!(found.object_type.as_deref(), Some("package"));

        let missing = parse_object(json!({ "error": { "code": "notExists", "object_id": "0xdead" } })).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_as_execution_keeps_message() {
        let err = as_execution(PublisherError::Network {
            message: "rpc error -32002: size limit exceeded".to_string(),
        });

        assert_eq!(err.code(), "EXECUTION");
        assert!(err.is_size_limit());
    }

    #[tokio::test]
    async fn test_cap_transfer_to_other_recipient_is_rejected() {
        let client = RpcNetworkClient::new("http://127.0.0.1:1");
        let mut tx = PublishTransaction::publish("0xa11ce", 1_000, vec!["AAA".to_string()], vec![]);
        tx.commands[1] = PublishCommand::TransferUpgradeCap {
            recipient: "0xb0b".to_string(),
        };

        let err = client.sign_and_submit(&tx, &NeverSigns).await.unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION");
    }
}
