//! WebSocket pending-transaction feed
//!
//! Subscribes to `newPendingTransactions` on one WebSocket endpoint and turns
//! each notification into a [`TriggerEvent`]. The connection is re-established
//! with exponential backoff whenever it drops.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use ethers::types::H256;
use futures::stream::{BoxStream, StreamExt};
use futures::SinkExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{traits::PendingTxFeed, Chain, DataplaneError, Result, TriggerEvent};

/// Capacity of the buffer between the socket task and the consumer
const FEED_BUFFER: usize = 4_096;

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Counters shared between the socket task and observers
#[derive(Debug, Default)]
pub struct FeedStats {
    /// Pending transaction hashes forwarded
    pub received: AtomicU64,

    /// Notifications that could not be decoded
    pub malformed: AtomicU64,

    /// Reconnect attempts
    pub reconnects: AtomicU64,

    /// Whether the socket is currently subscribed
    pub connected: AtomicBool,
}

/// Classification of one inbound WebSocket text frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// A pending transaction notification
    PendingTx(H256),

    /// Subscription confirmation or other RPC response
    Control,

    /// A notification whose payload is not a transaction hash
    Malformed(String),
}

/// Classify a text frame from an `eth_subscribe` socket
pub fn parse_feed_message(text: &str) -> FeedMessage {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => return FeedMessage::Malformed(format!("invalid json: {}", e)),
    };

    if value.get("method").and_then(Value::as_str) != Some("eth_subscription") {
        return FeedMessage::Control;
    }

    let result = &value["params"]["result"];
    // Some nodes push full transaction objects instead of bare hashes
    let hash = result
        .as_str()
        .or_else(|| result.get("hash").and_then(Value::as_str));

    match hash.map(|h| h.parse::<H256>()) {
        Some(Ok(hash)) => FeedMessage::PendingTx(hash),
        Some(Err(e)) => FeedMessage::Malformed(format!("bad hash: {}", e)),
        None => FeedMessage::Malformed("missing params.result".to_string()),
    }
}

/// Pending-transaction feed backed by one WebSocket endpoint
#[derive(Debug, Clone)]
pub struct WsPendingFeed {
    chain: Chain,
    name: String,
    ws_url: String,
    stats: Arc<FeedStats>,
    shutdown: CancellationToken,
}

impl WsPendingFeed {
    /// Create a new feed. No connection is made until [`PendingTxFeed::subscribe`].
    pub fn new(chain: Chain, name: impl Into<String>, ws_url: impl Into<String>) -> Result<Self> {
        let ws_url = ws_url.into();
        let parsed = url::Url::parse(&ws_url)
            .map_err(|e| DataplaneError::provider(chain.name(), format!("Invalid WebSocket URL: {}", e)))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(DataplaneError::provider(
                chain.name(),
                format!("WebSocket URL must use ws:// or wss://, got {}", parsed.scheme()),
            ));
        }

        Ok(Self {
            chain,
            name: name.into(),
            ws_url,
            stats: Arc::new(FeedStats::default()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Feed counters
    pub fn stats(&self) -> Arc<FeedStats> {
        Arc::clone(&self.stats)
    }

    /// Stop every connection task started by this feed
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Main connection loop with automatic reconnection
    async fn connection_loop(self, tx: mpsc::Sender<TriggerEvent>) {
        let mut reconnect_delay = INITIAL_RECONNECT_DELAY;

        loop {
            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                outcome = self.connect_and_forward(&tx) => outcome,
            };
            self.stats.connected.store(false, Ordering::Relaxed);

            match outcome {
                Ok(true) => {
                    // Subscription was live for a while; start backoff over
                    reconnect_delay = INITIAL_RECONNECT_DELAY;
                }
                Ok(false) => {}
                Err(e) => {
                    error!(chain = %self.chain, provider = self.name, error = %e, "WebSocket connection failed");
                }
            }

            if tx.is_closed() {
                debug!(chain = %self.chain, provider = self.name, "Feed consumer dropped, stopping");
                break;
            }

            warn!(
                chain = %self.chain,
                provider = self.name,
                delay_seconds = reconnect_delay.as_secs(),
                "Reconnecting pending transaction feed"
            );
            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(reconnect_delay) => {}
            }
            reconnect_delay = std::cmp::min(reconnect_delay * 2, MAX_RECONNECT_DELAY);
        }
    }

    /// Connect, subscribe and forward notifications until the socket ends.
    /// Returns `Ok(true)` if at least one transaction was forwarded.
    async fn connect_and_forward(&self, tx: &mpsc::Sender<TriggerEvent>) -> Result<bool> {
        let (ws_stream, _) = connect_async(self.ws_url.as_str()).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let subscribe_msg = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": ["newPendingTransactions"]
        });
        ws_sender.send(Message::Text(subscribe_msg.to_string())).await?;

        info!(chain = %self.chain, provider = self.name, "Subscribed to pending transactions");
        self.stats.connected.store(true, Ordering::Relaxed);

        let mut forwarded = false;
        while let Some(message) = ws_receiver.next().await {
            match message? {
                Message::Text(text) => match parse_feed_message(&text) {
                    FeedMessage::PendingTx(hash) => {
                        let event = TriggerEvent::new(hash, self.name.clone());
                        if tx.send(event).await.is_err() {
                            return Ok(forwarded);
                        }
                        forwarded = true;
                        self.stats.received.fetch_add(1, Ordering::Relaxed);
                    }
                    FeedMessage::Control => {
                        debug!(provider = self.name, message = %text, "Control message");
                    }
                    FeedMessage::Malformed(reason) => {
                        self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                        debug!(provider = self.name, reason, "Dropping malformed notification");
                    }
                },
                Message::Ping(payload) => {
                    ws_sender.send(Message::Pong(payload)).await?;
                }
                Message::Close(_) => {
                    info!(chain = %self.chain, provider = self.name, "WebSocket connection closed");
                    break;
                }
                _ => {}
            }
        }

        Ok(forwarded)
    }
}

impl PendingTxFeed for WsPendingFeed {
    fn subscribe(&self) -> BoxStream<'static, TriggerEvent> {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        tokio::spawn(self.clone().connection_loop(tx));

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed()
    }
}
