//! Signer backed by the toolchain keystore

use crate::build::output_parser::extract_json;
use crate::core::error::{PublisherError, Result};
use crate::core::traits::Signer;
use crate::toolchain::runner::{TAIL_CHARS, TAIL_LINES, Toolchain, ToolchainOutput};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Signs with `keytool sign` using the configured or active address
pub struct KeytoolSigner {
    toolchain: Arc<dyn Toolchain>,
    address: Option<String>,
}

impl KeytoolSigner {
    pub fn new(toolchain: Arc<dyn Toolchain>) -> Self {
        Self {
            toolchain,
            address: None,
        }
    }

    /// Sign as `address` instead of the active address
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    async fn run_checked(&self, args: &[&str]) -> Result<ToolchainOutput> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let output = self.toolchain.run(&args).await?;
        if !output.success() {
            return Err(PublisherError::Toolchain {
                message: format!("`{}` exited with code {}", args[..2].join(" "), output.exit_code()),
                output_tail: output.tail(TAIL_LINES, TAIL_CHARS),
            });
        }
        Ok(output)
    }
}

fn looks_like_address(value: &str) -> bool {
    value.len() > 2 && value.starts_with("0x") && value[2..].chars().all(|c| c.is_ascii_hexdigit())
}

#[async_trait]
impl Signer for KeytoolSigner {
    async fn address(&self) -> Result<String> {
        if let Some(address) = &self.address {
            return Ok(address.clone());
        }

        let output = self.run_checked(&["client", "active-address"]).await?;
        output
            .stdout
            .lines()
            .map(str::trim)
            .rev()
            .find(|line| looks_like_address(line))
            .map(str::to_string)
            .ok_or_else(|| {
                PublisherError::configuration("no active address; run `sui client switch --address`")
            })
    }

    async fn sign(&self, tx_bytes: &str) -> Result<String> {
        let address = self.address().await?;
        let output = self
            .run_checked(&["keytool", "sign", "--address", &address, "--data", tx_bytes, "--json"])
            .await?;

        extract_json(&output.stdout, |value| {
            value
                .get("suiSignature")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .ok_or_else(|| PublisherError::Toolchain {
            message: "`keytool sign` printed no suiSignature".to_string(),
            output_tail: output.tail(TAIL_LINES, TAIL_CHARS),
        })
    }
}
