//! Error types for the strike engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, IntelligenceError>;

/// Top-level engine errors
#[derive(Error, Debug)]
pub enum IntelligenceError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing secret: environment variable {0} is not set")]
    MissingSecret(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dataplane error: {0}")]
    Dataplane(#[from] vesper_dataplane::DataplaneError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Intelligence feed error: {message}")]
    Feed { message: String },

    #[error("Search error: {message}")]
    Search { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntelligenceError {
    /// Create a configuration validation error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an intelligence feed error
    pub fn feed<S: Into<String>>(message: S) -> Self {
        Self::Feed {
            message: message.into(),
        }
    }

    /// Create a search error
    pub fn search<S: Into<String>>(message: S) -> Self {
        Self::Search {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error prevents a chain context from starting
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IntelligenceError::Config(_)
                | IntelligenceError::InvalidConfig { .. }
                | IntelligenceError::MissingSecret(_)
        )
    }
}

/// Rejected market graph writes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("invalid weight {weight} for edge {from} -> {to}")]
    InvalidWeight { from: String, to: String, weight: f64 },

    #[error("self-loop on {0}")]
    SelfLoop(String),

    #[error("empty node identifier")]
    EmptyNode,
}

/// Failures while turning a signal into a submitted strike
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("signal carries no payload")]
    EmptyPayload,

    #[error("no fee tier covers confidence {0}")]
    NoFeeTier(f64),

    #[error("chain read failed: {0}")]
    ChainRead(#[source] vesper_dataplane::DataplaneError),

    #[error("signing failed: {0}")]
    Signing(#[source] vesper_dataplane::DataplaneError),

    #[error("relay submission failed: {0}")]
    Relay(#[source] vesper_dataplane::DataplaneError),

    #[error("public submission failed: {0}")]
    Public(#[source] vesper_dataplane::DataplaneError),
}

impl DispatchError {
    /// Short label used for metrics and logs
    pub fn stage(&self) -> &'static str {
        match self {
            DispatchError::EmptyPayload => "payload",
            DispatchError::NoFeeTier(_) => "fees",
            DispatchError::ChainRead(_) => "chain_read",
            DispatchError::Signing(_) => "signing",
            DispatchError::Relay(_) => "relay",
            DispatchError::Public(_) => "public",
        }
    }
}
