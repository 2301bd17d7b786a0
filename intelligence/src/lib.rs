//! Vesper Strike Engine
//!
//! Watches pending transactions on several EVM chains and, for each one,
//! scores the moment and searches the market graph for a profitable cycle.
//! When both agree, a single strike transaction is signed and submitted,
//! privately through a bundle relay where the chain has one.
//!
//! ## Per-trigger flow
//! 1. **Feed**: a pending transaction hash arrives ([`vesper_dataplane::PendingTxFeed`])
//! 2. **Gate + Search**: [`gate::ConfidenceGate`] and [`search::SearchEngine`] run concurrently
//! 3. **Dispatch**: [`dispatch::StrikeDispatcher`] prices, signs and submits
//!
//! Each chain runs in its own [`context::ChainContext`] on its own thread.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod graph;
pub mod ingestion;
pub mod pipeline;
pub mod search;
pub mod supervisor;
pub mod telemetry;
pub mod types;

pub use config::{ChainConfig, FeeConfig, GateConfig, GlobalConfig, SearchConfig, VesperConfig};
pub use context::{Adapters, ChainContext};
pub use dispatch::{FeeSchedule, FeeTier, NonceManager, StrikeDispatcher};
pub use error::{DispatchError, GraphError, IntelligenceError, Result};
pub use gate::{ConfidenceGate, GateScore, IntelFeed, TimeWindow};
pub use graph::{EdgeUpdate, GraphSnapshot, GraphView, MarketGraph};
pub use pipeline::Pipeline;
pub use search::{SearchEngine, SearchParams};
pub use supervisor::{spawn_chain_thread, supervise, RestartPolicy};
pub use telemetry::{PipelineStats, StatsSnapshot};
pub use types::*;

/// Version of the strike engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
