//! Shared data types exchanged between the dataplane and the engine

use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A pending transaction observed on the feed; starts one pipeline pass
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    /// Hash of the pending transaction
    pub tx_hash: H256,

    /// Monotonic arrival time, used for latency accounting
    pub received_at: Instant,

    /// Wall-clock arrival time
    pub observed_at: DateTime<Utc>,

    /// Name of the feed endpoint that delivered it
    pub source: String,
}

impl TriggerEvent {
    /// Create a trigger stamped with the current time
    pub fn new(tx_hash: H256, source: impl Into<String>) -> Self {
        Self {
            tx_hash,
            received_at: Instant::now(),
            observed_at: Utc::now(),
            source: source.into(),
        }
    }

    /// Time elapsed since the trigger arrived
    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }
}

/// Relay acknowledgement for a submitted bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleAck {
    /// Bundle hash returned by the relay, when it returns one
    pub bundle_hash: Option<H256>,

    /// Block the bundle was targeted at
    pub target_block: u64,
}

/// One HTTP RPC endpoint participating in the racing client.
///
/// Lower `priority` values are tried first. Within a priority group,
/// endpoints with higher `weight` are launched first. If an endpoint has not
/// answered within `stall_timeout_ms`, the next endpoint is raced alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEndpoint {
    /// Provider name/identifier used in logs
    pub name: String,

    /// HTTP RPC URL
    pub url: String,

    /// Racing priority (1 = first)
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Ordering weight inside a priority group
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Time to wait before racing the next endpoint
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,

    /// Hard request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Enable this endpoint
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_priority() -> u32 {
    1
}

fn default_weight() -> u32 {
    1
}

fn default_stall_timeout_ms() -> u64 {
    100
}

fn default_timeout_ms() -> u64 {
    2_000
}

fn default_enabled() -> bool {
    true
}

impl RpcEndpoint {
    /// Create an endpoint with default racing parameters
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            priority: default_priority(),
            weight: default_weight(),
            stall_timeout_ms: default_stall_timeout_ms(),
            timeout_ms: default_timeout_ms(),
            enabled: default_enabled(),
        }
    }

    /// Builder-style priority/weight/stall setter
    pub fn with_racing(mut self, priority: u32, weight: u32, stall_timeout_ms: u64) -> Self {
        self.priority = priority;
        self.weight = weight;
        self.stall_timeout_ms = stall_timeout_ms;
        self
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
