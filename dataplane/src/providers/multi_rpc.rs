//! Racing multi-RPC client
//!
//! Presents several HTTP endpoints for one chain as a single
//! [`ChainClient`]. Requests follow a racing/fallback policy:
//!
//! 1. Endpoints are ordered by `priority` (ascending), then `weight`
//!    (descending), then name. Demoted endpoints are skipped unless every
//!    endpoint is demoted.
//! 2. The first endpoint is launched. If it has not answered within its
//!    `stall_timeout`, the next endpoint is launched alongside it, and so on.
//! 3. An endpoint error immediately launches the next endpoint.
//! 4. The first successful answer wins; in-flight losers are dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, Bytes, Eip1559TransactionRequest, TxHash, U256};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    providers::failover::{FailoverConfig, FailoverManager, ProviderHealth},
    traits::ChainClient,
    Chain, DataplaneError, Result, RpcEndpoint,
};

/// Outcome of a race: index of the winning endpoint and its value
pub type RaceWin<T> = (usize, T);

/// Run `launch` against `endpoints` in the given order using the racing policy.
///
/// `launch(i)` must return a future for endpoint `i`; it is called at most once
/// per endpoint. Errors are collected and reported only if every endpoint fails.
pub async fn race_endpoints<T, F>(endpoints: &[RpcEndpoint], order: &[usize], launch: F) -> Result<RaceWin<T>>
where
    T: Send + 'static,
    F: Fn(usize) -> BoxFuture<'static, Result<T>>,
{
    let mut queue = order.iter().copied();
    let mut in_flight = FuturesUnordered::new();
    let mut errors: Vec<String> = Vec::new();

    let spawn = |index: usize, in_flight: &mut FuturesUnordered<BoxFuture<'static, (usize, Result<T>)>>| {
        let fut = launch(index);
        in_flight.push(Box::pin(async move { (index, fut.await) }) as BoxFuture<'static, _>);
        tokio::time::Instant::now() + endpoints[index].stall_timeout()
    };

    let mut stall_deadline = match queue.next() {
        Some(first) => spawn(first, &mut in_flight),
        None => {
            return Err(DataplaneError::AllProvidersFailed {
                message: "no endpoints configured".to_string(),
            })
        }
    };
    let mut exhausted = false;

    while !in_flight.is_empty() {
        tokio::select! {
            Some((index, result)) = in_flight.next() => match result {
                Ok(value) => return Ok((index, value)),
                Err(e) => {
                    errors.push(format!("{}: {}", endpoints[index].name, e));
                    if let Some(next) = queue.next() {
                        stall_deadline = spawn(next, &mut in_flight);
                    } else {
                        exhausted = true;
                    }
                }
            },
            _ = tokio::time::sleep_until(stall_deadline), if !exhausted => {
                match queue.next() {
                    Some(next) => {
                        debug!(provider = endpoints[next].name, "Endpoint stalled, racing next provider");
                        stall_deadline = spawn(next, &mut in_flight);
                    }
                    None => exhausted = true,
                }
            }
        }
    }

    Err(DataplaneError::AllProvidersFailed {
        message: errors.join("; "),
    })
}

/// Multi-RPC client for a specific chain
#[derive(Debug, Clone)]
pub struct MultiRpcClient {
    /// Chain this client serves
    chain: Chain,

    /// Enabled endpoints
    endpoints: Arc<Vec<RpcEndpoint>>,

    /// One ethers provider per endpoint, same index as `endpoints`
    clients: Arc<Vec<Provider<Http>>>,

    /// Health tracking
    failover: FailoverManager,
}

impl MultiRpcClient {
    /// Create a new multi-RPC client
    pub fn new(chain: Chain, endpoints: Vec<RpcEndpoint>) -> Result<Self> {
        let endpoints: Vec<RpcEndpoint> = endpoints.into_iter().filter(|e| e.enabled).collect();
        if endpoints.is_empty() {
            return Err(DataplaneError::provider(chain.name(), "no enabled RPC endpoints"));
        }

        info!(chain = %chain, provider_count = endpoints.len(), "Creating multi-RPC client");

        let failover = FailoverManager::new(FailoverConfig::default());
        let mut clients = Vec::with_capacity(endpoints.len());

        for endpoint in &endpoints {
            let http_client = reqwest::Client::builder()
                .timeout(endpoint.timeout())
                .tcp_nodelay(true)
                .pool_idle_timeout(Duration::from_secs(60))
                .build()
                .map_err(|e| DataplaneError::provider(&endpoint.name, format!("Failed to create HTTP client: {}", e)))?;

            let url = Url::parse(&endpoint.url)
                .map_err(|e| DataplaneError::provider(&endpoint.name, format!("Invalid HTTP URL: {}", e)))?;

            clients.push(Provider::new(Http::new_with_client(url, http_client)));
            failover.add_provider(&endpoint.name);

            debug!(
                provider = endpoint.name,
                priority = endpoint.priority,
                weight = endpoint.weight,
                stall_timeout_ms = endpoint.stall_timeout_ms,
                "Registered RPC endpoint"
            );
        }

        Ok(Self {
            chain,
            endpoints: Arc::new(endpoints),
            clients: Arc::new(clients),
            failover,
        })
    }

    /// Chain served by this client
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Racing order for the next request
    pub fn racing_order(&self) -> Vec<usize> {
        racing_order(&self.endpoints, |name| self.failover.is_usable(name))
    }

    /// Execute a request under the racing policy
    async fn execute<T, F>(&self, operation: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(Provider<Http>) -> BoxFuture<'static, std::result::Result<T, ProviderError>>,
    {
        let order = self.racing_order();
        let started = Instant::now();

        let launch = |index: usize| -> BoxFuture<'static, Result<T>> {
            let fut = op(self.clients[index].clone());
            let failover = self.failover.clone();
            let endpoint = self.endpoints[index].clone();
            Box::pin(async move {
                let launched = Instant::now();
                let result = match tokio::time::timeout(endpoint.timeout(), fut).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(DataplaneError::from(e)),
                    Err(_) => Err(DataplaneError::ConnectionTimeout {
                        provider: endpoint.name.clone(),
                    }),
                };
                match &result {
                    Ok(_) => failover.record_success(&endpoint.name, launched.elapsed()),
                    Err(e) => failover.record_failure(&endpoint.name, &e.to_string()),
                }
                result
            })
        };

        match race_endpoints(&self.endpoints, &order, launch).await {
            Ok((index, value)) => {
                debug!(
                    chain = %self.chain,
                    operation,
                    provider = self.endpoints[index].name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "RPC request succeeded"
                );
                Ok(value)
            }
            Err(e) => {
                warn!(chain = %self.chain, operation, error = %e, "RPC request failed on every provider");
                Err(e)
            }
        }
    }

    /// Get provider health
    pub fn get_provider_health(&self, provider_name: &str) -> Option<ProviderHealth> {
        self.failover.get_provider_health(provider_name)
    }
}

/// Compute the racing order: usable endpoints sorted by priority, weight, name.
/// Falls back to every endpoint when none is usable.
pub fn racing_order(endpoints: &[RpcEndpoint], is_usable: impl Fn(&str) -> bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..endpoints.len()).filter(|&i| is_usable(&endpoints[i].name)).collect();
    if order.is_empty() {
        order = (0..endpoints.len()).collect();
    }
    order.sort_by(|&a, &b| {
        let (ea, eb) = (&endpoints[a], &endpoints[b]);
        ea.priority
            .cmp(&eb.priority)
            .then(eb.weight.cmp(&ea.weight))
            .then(ea.name.cmp(&eb.name))
    });
    order
}

#[async_trait]
impl ChainClient for MultiRpcClient {
    async fn current_block_number(&self) -> Result<u64> {
        let number = self
            .execute("eth_blockNumber", |client| {
                Box::pin(async move { client.get_block_number().await })
            })
            .await?;
        Ok(number.as_u64())
    }

    async fn base_fee_per_gas(&self) -> Result<U256> {
        let block = self
            .execute("eth_getBlockByNumber", |client| {
                Box::pin(async move { client.get_block(BlockNumber::Latest).await })
            })
            .await?;
        Ok(block.and_then(|b| b.base_fee_per_gas).unwrap_or_default())
    }

    async fn transaction_count(&self, address: Address) -> Result<U256> {
        self.execute("eth_getTransactionCount", move |client| {
            Box::pin(async move {
                client
                    .get_transaction_count(address, Some(BlockNumber::Pending.into()))
                    .await
            })
        })
        .await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx: TypedTransaction = Eip1559TransactionRequest::new().to(to).data(data).into();
        self.execute("eth_call", move |client| {
            let tx = tx.clone();
            Box::pin(async move { client.call(&tx, None).await })
        })
        .await
    }

    async fn submit_transaction(&self, raw_tx: Bytes) -> Result<TxHash> {
        self.execute("eth_sendRawTransaction", move |client| {
            let raw_tx = raw_tx.clone();
            Box::pin(async move {
                let pending = client.send_raw_transaction(raw_tx).await?;
                Ok::<_, ProviderError>(*pending)
            })
        })
        .await
    }
}
