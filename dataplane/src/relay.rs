//! Flashbots-style private bundle relay

use std::time::Duration;
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Bytes, H256};
use ethers::utils::keccak256;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{traits::BundleRelay, BundleAck, DataplaneError, Result};

/// Header carrying the searcher reputation signature
pub const FLASHBOTS_SIGNATURE_HEADER: &str = "X-Flashbots-Signature";

/// JSON-RPC body for `eth_sendBundle`
pub fn bundle_request_body(signed_txs: &[Bytes], target_block: u64) -> Value {
    let txs: Vec<String> = signed_txs.iter().map(|tx| format!("0x{}", hex::encode(tx))).collect();
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_sendBundle",
        "params": [{
            "txs": txs,
            "blockNumber": format!("0x{:x}", target_block),
        }]
    })
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    result: Option<RelayResult>,
    error: Option<RelayErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayResult {
    bundle_hash: Option<H256>,
}

#[derive(Debug, Deserialize)]
struct RelayErrorBody {
    message: String,
}

/// Relay client signing every request with a dedicated auth key.
///
/// The auth key identifies the searcher to the relay; it never holds funds
/// and is distinct from the transaction signing key.
#[derive(Debug, Clone)]
pub struct FlashbotsRelay {
    url: String,
    auth_signer: LocalWallet,
    client: reqwest::Client,
}

impl FlashbotsRelay {
    /// Create a relay client
    pub fn new(url: impl Into<String>, auth_signer: LocalWallet) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            url: url.into(),
            auth_signer,
            client,
        })
    }

    /// Create a relay client with a throwaway auth identity
    pub fn with_random_identity(url: impl Into<String>) -> Result<Self> {
        let wallet = LocalWallet::new(&mut ethers::core::rand::thread_rng());
        Self::new(url, wallet)
    }

    /// Relay endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Compute the signature header value for a request body
    pub async fn sign_body(&self, body: &str) -> Result<String> {
        let digest = format!("0x{}", hex::encode(keccak256(body.as_bytes())));
        let signature = self.auth_signer.sign_message(digest).await?;
        Ok(format!("{:?}:0x{}", self.auth_signer.address(), signature))
    }
}

#[async_trait]
impl BundleRelay for FlashbotsRelay {
    async fn submit_bundle(&self, signed_txs: Vec<Bytes>, target_block: u64) -> Result<BundleAck> {
        let body = bundle_request_body(&signed_txs, target_block).to_string();
        let signature = self.sign_body(&body).await?;

        debug!(url = self.url, target_block, tx_count = signed_txs.len(), "Submitting bundle");

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(FLASHBOTS_SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(DataplaneError::relay(format!("HTTP {}: {}", status, text)));
        }

        let parsed: RelayResponse = serde_json::from_str(&text)?;
        if let Some(err) = parsed.error {
            return Err(DataplaneError::relay(err.message));
        }

        let bundle_hash = parsed.result.and_then(|r| r.bundle_hash);
        info!(target_block, bundle_hash = ?bundle_hash, "Bundle accepted by relay");

        Ok(BundleAck {
            bundle_hash,
            target_block,
        })
    }
}
