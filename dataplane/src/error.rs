//! Error types for the dataplane

use thiserror::Error;

/// Result type alias for dataplane operations
pub type Result<T> = std::result::Result<T, DataplaneError>;

/// Error types for chain connectivity
#[derive(Error, Debug)]
pub enum DataplaneError {
    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Ethereum client error: {0}")]
    Ethereum(#[from] ethers::providers::ProviderError),

    #[error("ABI error: {0}")]
    Abi(#[from] ethers::abi::Error),

    #[error("Signing error: {0}")]
    Signing(#[from] ethers::signers::WalletError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Provider error: {provider} - {message}")]
    Provider { provider: String, message: String },

    #[error("All providers failed: {message}")]
    AllProvidersFailed { message: String },

    #[error("Relay rejected request: {message}")]
    Relay { message: String },

    #[error("Connection timeout for provider: {provider}")]
    ConnectionTimeout { provider: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DataplaneError {
    /// Create a new provider error
    pub fn provider<P: Into<String>, S: Into<String>>(provider: P, message: S) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a new relay error
    pub fn relay<S: Into<String>>(message: S) -> Self {
        Self::Relay {
            message: message.into(),
        }
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            DataplaneError::InvalidChain(_) => "validation",
            DataplaneError::Network(_) => "network",
            DataplaneError::WebSocket(_) => "network",
            DataplaneError::Ethereum(_) => "blockchain",
            DataplaneError::Abi(_) => "abi",
            DataplaneError::Signing(_) => "signing",
            DataplaneError::Serialization(_) => "serialization",
            DataplaneError::Provider { .. } => "provider",
            DataplaneError::AllProvidersFailed { .. } => "provider",
            DataplaneError::Relay { .. } => "relay",
            DataplaneError::ConnectionTimeout { .. } => "timeout",
            DataplaneError::Decode { .. } => "decode",
            DataplaneError::Internal(_) => "internal",
        }
    }
}
