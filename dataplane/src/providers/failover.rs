//! Provider health tracking for the racing client
//!
//! An endpoint that fails `max_consecutive_failures` times in a row is
//! demoted: it drops out of the racing order for `cooldown`, after which it
//! is raced again as a probe. One success restores it fully.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

/// Health classification of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Healthy,

    /// Recent failures, still raced
    Degraded,

    /// Out of the racing order until the cooldown passes
    Demoted,
}

/// Rolling health of one endpoint
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub name: String,
    pub status: ProviderStatus,
    pub consecutive_failures: u32,
    pub requests: u64,
    pub failures: u64,

    /// Smoothed latency of successful requests
    pub latency_ms: Option<f64>,

    /// Last error seen, for logs and health dumps
    pub last_error: Option<String>,

    demoted_until: Option<Instant>,
}

impl ProviderHealth {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: ProviderStatus::Healthy,
            consecutive_failures: 0,
            requests: 0,
            failures: 0,
            latency_ms: None,
            last_error: None,
            demoted_until: None,
        }
    }

    /// Fraction of requests that succeeded; 1.0 before any request
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            1.0 - self.failures as f64 / self.requests as f64
        }
    }

    fn usable_at(&self, now: Instant) -> bool {
        match self.demoted_until {
            Some(until) => now >= until,
            None => true,
        }
    }
}

/// Demotion policy
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Consecutive failures before an endpoint is demoted
    pub max_consecutive_failures: u32,

    /// How long a demoted endpoint sits out
    pub cooldown: Duration,

    /// Weight of the newest sample in the latency average
    pub latency_alpha: f64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            cooldown: Duration::from_secs(30),
            latency_alpha: 0.2,
        }
    }
}

/// Health registry shared by every in-flight request of one client
#[derive(Debug, Clone)]
pub struct FailoverManager {
    health: Arc<RwLock<HashMap<String, ProviderHealth>>>,
    config: FailoverConfig,
}

impl FailoverManager {
    pub fn new(config: FailoverConfig) -> Self {
        Self {
            health: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn add_provider(&self, name: &str) {
        self.health.write().insert(name.to_string(), ProviderHealth::new(name));
    }

    pub fn record_success(&self, name: &str, latency: Duration) {
        let mut health = self.health.write();
        let Some(entry) = health.get_mut(name) else { return };

        let sample = latency.as_secs_f64() * 1000.0;
        let alpha = self.config.latency_alpha;
        entry.latency_ms = Some(entry.latency_ms.map_or(sample, |avg| alpha * sample + (1.0 - alpha) * avg));
        entry.requests += 1;
        entry.consecutive_failures = 0;
        entry.demoted_until = None;

        if entry.status != ProviderStatus::Healthy {
            info!(provider = entry.name, "Provider recovered");
            entry.status = ProviderStatus::Healthy;
        }
    }

    pub fn record_failure(&self, name: &str, error: &str) {
        let mut health = self.health.write();
        let Some(entry) = health.get_mut(name) else { return };

        entry.requests += 1;
        entry.failures += 1;
        entry.consecutive_failures += 1;
        entry.last_error = Some(error.to_string());

        if entry.consecutive_failures >= self.config.max_consecutive_failures {
            // A failed probe restarts the cooldown
            entry.demoted_until = Some(Instant::now() + self.config.cooldown);
            if entry.status != ProviderStatus::Demoted {
                warn!(
                    provider = entry.name,
                    consecutive_failures = entry.consecutive_failures,
                    cooldown_secs = self.config.cooldown.as_secs(),
                    error,
                    "Provider demoted"
                );
            }
            entry.status = ProviderStatus::Demoted;
        } else {
            entry.status = ProviderStatus::Degraded;
            debug!(provider = entry.name, consecutive_failures = entry.consecutive_failures, error, "Provider request failed");
        }
    }

    /// Whether an endpoint may be raced now. Unknown names are usable.
    pub fn is_usable(&self, name: &str) -> bool {
        let now = Instant::now();
        self.health.read().get(name).map_or(true, |h| h.usable_at(now))
    }

    pub fn get_provider_health(&self, name: &str) -> Option<ProviderHealth> {
        self.health.read().get(name).cloned()
    }

    /// Health of every endpoint, ordered by name
    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        let mut all: Vec<_> = self.health.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(cooldown: Duration) -> FailoverManager {
        let manager = FailoverManager::new(FailoverConfig {
            cooldown,
            ..FailoverConfig::default()
        });
        manager.add_provider("alchemy");
        manager.add_provider("infura");
        manager
    }

    #[test]
    fn test_demotion_after_consecutive_failures() {
        let manager = manager(Duration::from_secs(60));
        manager.record_success("alchemy", Duration::from_millis(12));

        manager.record_failure("alchemy", "timeout");
        manager.record_failure("alchemy", "timeout");
        assert_eq!(manager.get_provider_health("alchemy").unwrap().status, ProviderStatus::Degraded);
        assert!(manager.is_usable("alchemy"));

        manager.record_failure("alchemy", "timeout");
        let health = manager.get_provider_health("alchemy").unwrap();
        assert_eq!(health.status, ProviderStatus::Demoted);
        assert_eq!(health.last_error.as_deref(), Some("timeout"));
        assert!((health.success_rate() - 0.25).abs() < 1e-12);
        assert!(!manager.is_usable("alchemy"));
        assert!(manager.is_usable("infura"));

        manager.record_success("alchemy", Duration::from_millis(10));
        assert!(manager.is_usable("alchemy"));
        assert_eq!(manager.get_provider_health("alchemy").unwrap().status, ProviderStatus::Healthy);
    }

    #[test]
    fn test_demoted_provider_is_probed_after_cooldown() {
        let manager = manager(Duration::ZERO);
        for _ in 0..3 {
            manager.record_failure("infura", "503");
        }
        assert_eq!(manager.get_provider_health("infura").unwrap().status, ProviderStatus::Demoted);
        assert!(manager.is_usable("infura"));
    }

    #[test]
    fn test_latency_average() {
        let manager = manager(Duration::from_secs(1));
        manager.record_success("alchemy", Duration::from_millis(10));
        manager.record_success("alchemy", Duration::from_millis(20));
        let latency = manager.get_provider_health("alchemy").unwrap().latency_ms.unwrap();
        assert!((latency - 12.0).abs() < 1e-9);
        assert!(manager.is_usable("never-added"));
        assert_eq!(manager.snapshot().len(), 2);
    }
}
