//! Chain providers
//!
//! HTTP access goes through [`MultiRpcClient`], which races several endpoints
//! for the same chain. Pending transactions arrive over [`WsPendingFeed`].

pub mod failover;
pub mod multi_rpc;
pub mod websocket;

pub use failover::{FailoverConfig, FailoverManager, ProviderHealth, ProviderStatus};
pub use multi_rpc::{race_endpoints, racing_order, MultiRpcClient};
pub use websocket::{FeedMessage, FeedStats, WsPendingFeed};
