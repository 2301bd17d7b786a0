//! Configuration management for the strike engine
//!
//! Layering, lowest precedence first:
//! 1. built-in defaults
//! 2. optional YAML/TOML file (`--config`)
//! 3. environment variables, e.g. `VESPER__GATE__THRESHOLD=-0.2`
//!
//! Secrets (signing keys, relay auth keys) never live in the file; the file
//! names the environment variable that holds them.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use config::{Config, Environment, File};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use url::Url;
use vesper_dataplane::{Chain, RpcEndpoint};

use crate::error::{IntelligenceError, Result};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "VESPER";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VesperConfig {
    /// Process-wide settings
    pub global: GlobalConfig,

    /// Cycle search settings
    pub search: SearchConfig,

    /// Confidence gate settings
    pub gate: GateConfig,

    /// Fee schedule
    pub fees: FeeConfig,

    /// Per-chain settings
    pub chains: BTreeMap<Chain, ChainConfig>,
}

/// Global settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log format: "pretty" or "json"
    pub log_format: String,

    /// Grace period for in-flight triggers on shutdown
    pub shutdown_grace_secs: u64,

    /// Interval between stats log lines
    pub stats_interval_secs: u64,

    /// Prometheus exporter listen address, disabled when unset
    pub metrics_addr: Option<String>,

    /// Worker threads per chain runtime
    pub worker_threads: usize,

    /// Run the whole pipeline but never submit
    pub dry_run: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            shutdown_grace_secs: 10,
            stats_interval_secs: 60,
            metrics_addr: None,
            worker_threads: 2,
            dry_run: false,
        }
    }
}

/// Cycle search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum cycle length in hops
    pub max_hops: usize,

    /// Wall-clock budget per search
    pub deadline_ms: u64,

    /// Node expansion budget per search
    pub max_steps: u64,

    /// Minimum margin (product - 1) for a cycle to count as profitable
    pub min_margin: f64,

    /// Trade size in units of the origin asset
    pub notional: f64,

    /// Decimals used to turn `notional` into an on-chain amount
    pub notional_decimals: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_hops: 12,
            deadline_ms: 30,
            max_steps: 250_000,
            min_margin: 0.001,
            notional: 1.0,
            notional_decimals: 18,
        }
    }
}

impl SearchConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

/// Confidence gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Triggers with confidence at or below this are skipped
    pub threshold: f64,

    /// Intelligence feed timeout
    pub timeout_ms: u64,

    /// Length of the text window fetched per trigger
    pub window_secs: u64,

    /// Intelligence feed URL; the neutral static feed is used when unset
    pub intel_url: Option<String>,

    /// Word list in AFINN format (`word<TAB>valence` per line) merged over
    /// the built-in lexicon, e.g. AFINN-165
    pub lexicon_file: Option<PathBuf>,

    /// Extra or overriding word valences (-5..=5); these win over the file
    pub lexicon: HashMap<String, i32>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            threshold: -0.1,
            timeout_ms: 250,
            window_secs: 3_600,
            intel_url: None,
            lexicon_file: None,
            lexicon: HashMap::new(),
        }
    }
}

impl GateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Entries of `lexicon_file` with the inline `lexicon` applied on top
    pub fn effective_lexicon(&self) -> Result<HashMap<String, i32>> {
        let mut lexicon = match &self.lexicon_file {
            Some(path) => crate::gate::load_lexicon_file(path)?,
            None => HashMap::new(),
        };
        lexicon.extend(self.lexicon.iter().map(|(word, valence)| (word.to_lowercase(), *valence)));
        Ok(lexicon)
    }
}

/// One fee tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTierConfig {
    /// Tier name used in logs
    pub name: String,

    /// The tier applies when confidence is strictly above this value.
    /// The first tier is the fallback for the whole range.
    pub min_confidence: f64,

    /// Priority fee in gwei
    pub priority_fee_gwei: f64,
}

/// Fee schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Gas limit for strike transactions
    pub gas_limit: u64,

    /// Tiers ordered by ascending `min_confidence`
    pub tiers: Vec<FeeTierConfig>,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            gas_limit: 1_200_000,
            tiers: vec![
                FeeTierConfig {
                    name: "conservative".to_string(),
                    min_confidence: -1.0,
                    priority_fee_gwei: 15.0,
                },
                FeeTierConfig {
                    name: "aggressive".to_string(),
                    min_confidence: 0.5,
                    priority_fee_gwei: 40.0,
                },
            ],
        }
    }
}

/// Private relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay endpoint
    pub url: String,

    /// Environment variable holding the relay auth key; a random identity is
    /// used when unset
    #[serde(default)]
    pub auth_key_env: Option<String>,
}

/// Uniswap-V2 style pair polled for graph edges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pair contract address
    pub address: String,

    /// token0 address (lower-case hex)
    pub token0: String,

    /// token1 address (lower-case hex)
    pub token1: String,

    #[serde(default = "default_decimals")]
    pub decimals0: u32,

    #[serde(default = "default_decimals")]
    pub decimals1: u32,

    /// Swap fee in basis points
    #[serde(default = "default_fee_bps")]
    pub fee_bps: u32,
}

fn default_decimals() -> u32 {
    18
}

fn default_fee_bps() -> u32 {
    30
}

/// Per-chain settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Start a context for this chain
    pub enabled: bool,

    /// HTTP endpoints raced by the chain client
    pub rpc: Vec<RpcEndpoint>,

    /// WebSocket endpoint for the pending transaction feed
    pub ws_url: String,

    /// Environment variable holding the signing key
    pub private_key_env: String,

    /// Executor contract address
    pub executor: String,

    /// Private relay, only honoured on chains that support one
    pub relay: Option<RelayConfig>,

    /// Assets a cycle may start and end at
    pub search_origins: Vec<String>,

    /// Pairs polled for reserves
    pub pools: Vec<PoolConfig>,

    /// Reserve polling interval
    pub reserve_poll_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rpc: Vec::new(),
            ws_url: String::new(),
            private_key_env: "VESPER_PRIVATE_KEY".to_string(),
            executor: String::new(),
            relay: None,
            search_origins: Vec::new(),
            pools: Vec::new(),
            reserve_poll_ms: 2_000,
        }
    }
}

impl ChainConfig {
    /// Parsed executor address
    pub fn executor_address(&self) -> Result<Address> {
        self.executor
            .parse()
            .map_err(|_| IntelligenceError::config(format!("invalid executor address: {:?}", self.executor)))
    }

    pub fn reserve_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reserve_poll_ms)
    }
}

impl VesperConfig {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Write configuration as YAML
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Template written by `--generate-config`: defaults plus one disabled
    /// example chain to fill in
    pub fn example() -> Self {
        let mut config = Self::default();
        config.chains.insert(
            Chain::Ethereum,
            ChainConfig {
                enabled: false,
                rpc: vec![
                    RpcEndpoint::new("primary", "https://eth.llamarpc.com").with_racing(1, 2, 80),
                    RpcEndpoint::new("backup", "https://rpc.ankr.com/eth").with_racing(2, 1, 100),
                ],
                ws_url: "wss://ethereum-rpc.publicnode.com".to_string(),
                executor: "0x0000000000000000000000000000000000000000".to_string(),
                relay: Some(RelayConfig {
                    url: "https://relay.flashbots.net".to_string(),
                    auth_key_env: Some("VESPER_FLASHBOTS_AUTH_KEY".to_string()),
                }),
                search_origins: vec!["0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2".to_string()],
                ..ChainConfig::default()
            },
        );
        config
    }

    /// Chains with `enabled: true`, optionally filtered
    pub fn enabled_chains(&self, only: Option<&[Chain]>) -> Vec<Chain> {
        self.chains
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(chain, _)| *chain)
            .filter(|chain| only.map_or(true, |only| only.contains(chain)))
            .collect()
    }

    /// Validate the configuration. Any error here is fatal.
    pub fn validate(&self) -> Result<()> {
        let search = &self.search;
        if search.max_hops < 2 {
            return Err(IntelligenceError::config("search.max_hops must be at least 2"));
        }
        if search.deadline_ms == 0 || search.max_steps == 0 {
            return Err(IntelligenceError::config("search.deadline_ms and search.max_steps must be positive"));
        }
        if !(search.min_margin.is_finite() && search.min_margin >= 0.0) {
            return Err(IntelligenceError::config("search.min_margin must be a non-negative number"));
        }
        if !(search.notional.is_finite() && search.notional > 0.0) {
            return Err(IntelligenceError::config("search.notional must be positive"));
        }

        if !(-1.0..=1.0).contains(&self.gate.threshold) {
            return Err(IntelligenceError::config("gate.threshold must be within [-1, 1]"));
        }
        if self.gate.timeout_ms == 0 {
            return Err(IntelligenceError::config("gate.timeout_ms must be positive"));
        }
        if let Some(url) = &self.gate.intel_url {
            Url::parse(url).map_err(|e| IntelligenceError::config(format!("invalid gate.intel_url: {}", e)))?;
        }
        if let Some((word, _)) = self.gate.lexicon.iter().find(|(_, v)| !(-5..=5).contains(*v)) {
            return Err(IntelligenceError::config(format!("lexicon valence for {:?} must be within -5..=5", word)));
        }
        if self.gate.lexicon_file.is_some() {
            self.gate.effective_lexicon()?;
        }

        self.validate_fees()?;

        if self.global.worker_threads == 0 {
            return Err(IntelligenceError::config("global.worker_threads must be greater than 0"));
        }

        if !self.chains.values().any(|c| c.enabled) {
            return Err(IntelligenceError::config("no chains enabled"));
        }

        for (chain, chain_config) in self.chains.iter().filter(|(_, c)| c.enabled) {
            validate_chain(*chain, chain_config)?;
        }

        Ok(())
    }

    fn validate_fees(&self) -> Result<()> {
        let fees = &self.fees;
        if fees.gas_limit == 0 {
            return Err(IntelligenceError::config("fees.gas_limit must be positive"));
        }
        if fees.tiers.len() < 2 {
            return Err(IntelligenceError::config("fees.tiers needs at least two tiers"));
        }
        if fees.tiers[0].min_confidence > -1.0 {
            return Err(IntelligenceError::config("the first fee tier must cover confidence -1.0"));
        }
        for pair in fees.tiers.windows(2) {
            if pair[1].min_confidence <= pair[0].min_confidence {
                return Err(IntelligenceError::config(format!(
                    "fee tier {} must have a higher min_confidence than {}",
                    pair[1].name, pair[0].name
                )));
            }
            if pair[1].priority_fee_gwei < pair[0].priority_fee_gwei {
                return Err(IntelligenceError::config(format!(
                    "fee tier {} must not bid less than {}",
                    pair[1].name, pair[0].name
                )));
            }
        }
        if fees.tiers.iter().any(|t| !(t.priority_fee_gwei.is_finite() && t.priority_fee_gwei >= 0.0)) {
            return Err(IntelligenceError::config("priority fees must be non-negative"));
        }
        Ok(())
    }
}

fn validate_chain(chain: Chain, config: &ChainConfig) -> Result<()> {
    let err = |msg: String| IntelligenceError::config(format!("chains.{}: {}", chain, msg));

    let enabled_rpc: Vec<_> = config.rpc.iter().filter(|e| e.enabled).collect();
    if enabled_rpc.is_empty() {
        return Err(err("no RPC endpoints configured".to_string()));
    }
    for endpoint in enabled_rpc {
        match Url::parse(&endpoint.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => return Err(err(format!("invalid HTTP URL for provider {}: {}", endpoint.name, endpoint.url))),
        }
        if endpoint.timeout_ms == 0 {
            return Err(err(format!("provider {} has a zero timeout", endpoint.name)));
        }
    }

    match Url::parse(&config.ws_url) {
        Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
        _ => return Err(err(format!("invalid WebSocket URL: {:?}", config.ws_url))),
    }

    if config.private_key_env.trim().is_empty() {
        return Err(err("private_key_env is empty".to_string()));
    }

    config.executor_address().map_err(|e| err(e.to_string()))?;

    if let Some(relay) = &config.relay {
        Url::parse(&relay.url).map_err(|e| err(format!("invalid relay URL: {}", e)))?;
    }

    if config.search_origins.is_empty() {
        return Err(err("search_origins is empty".to_string()));
    }

    for pool in &config.pools {
        for (field, value) in [("address", &pool.address), ("token0", &pool.token0), ("token1", &pool.token1)] {
            value
                .parse::<Address>()
                .map_err(|_| err(format!("pool {}: invalid {}", pool.address, field)))?;
        }
        if pool.fee_bps >= 10_000 {
            return Err(err(format!("pool {}: fee_bps must be below 10000", pool.address)));
        }
    }
    if !config.pools.is_empty() && config.reserve_poll_ms == 0 {
        return Err(err("reserve_poll_ms must be positive".to_string()));
    }

    Ok(())
}

/// Read a secret from the named environment variable
pub fn resolve_secret(env_var: &str) -> Result<String> {
    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(IntelligenceError::MissingSecret(env_var.to_string())),
    }
}
