//! # Vesper Dataplane
//!
//! Chain connectivity for the Vesper strike engine. Everything the engine
//! consumes from the outside world is expressed as a capability trait in
//! [`traits`], with one concrete adapter per capability:
//!
//! - pending transaction stream: [`providers::WsPendingFeed`]
//! - chain read/write with provider racing: [`providers::MultiRpcClient`]
//! - private bundle relay: [`relay::FlashbotsRelay`]
//! - transaction signing: [`signer::WalletSigner`]

pub mod contracts;
pub mod error;
pub mod providers;
pub mod relay;
pub mod signer;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{DataplaneError, Result};
pub use traits::{BundleRelay, ChainClient, PendingTxFeed, TransactionSigner};
pub use types::*;

/// Current version of the dataplane
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Supported blockchain networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Chain {
    #[serde(rename = "ethereum")]
    Ethereum,
    #[serde(rename = "base")]
    Base,
    #[serde(rename = "arbitrum")]
    Arbitrum,
    #[serde(rename = "polygon")]
    Polygon,
    #[serde(rename = "optimism")]
    Optimism,
}

impl Chain {
    /// All supported chains, in startup order
    pub const ALL: [Chain; 5] = [
        Chain::Ethereum,
        Chain::Base,
        Chain::Arbitrum,
        Chain::Polygon,
        Chain::Optimism,
    ];

    /// Get the chain ID for this network
    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Ethereum => 1,
            Chain::Base => 8453,
            Chain::Arbitrum => 42161,
            Chain::Polygon => 137,
            Chain::Optimism => 10,
        }
    }

    /// Get the human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Base => "base",
            Chain::Arbitrum => "arbitrum",
            Chain::Polygon => "polygon",
            Chain::Optimism => "optimism",
        }
    }

    /// Whether a private bundle relay exists for this network.
    ///
    /// Only Ethereum L1 has a block-builder relay market; the rollups and
    /// Polygon are sequencer/validator ordered and only take public submissions.
    pub fn supports_private_relay(&self) -> bool {
        matches!(self, Chain::Ethereum)
    }

    /// Default relay endpoint for chains that support one
    pub fn default_relay_url(&self) -> Option<&'static str> {
        match self {
            Chain::Ethereum => Some("https://relay.flashbots.net"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Chain {
    type Err = DataplaneError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ethereum" | "eth" | "mainnet" => Ok(Chain::Ethereum),
            "base" => Ok(Chain::Base),
            "arbitrum" | "arb" => Ok(Chain::Arbitrum),
            "polygon" | "matic" => Ok(Chain::Polygon),
            "optimism" | "op" => Ok(Chain::Optimism),
            _ => Err(DataplaneError::InvalidChain(s.to_string())),
        }
    }
}
