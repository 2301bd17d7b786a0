//! Chain context supervision
//!
//! Each chain runs on a dedicated OS thread with its own multi-thread tokio
//! runtime, so a slow or wedged chain cannot starve the others. Inside that
//! runtime a supervisor loop restarts the context whenever it exits with an
//! error or panics, backing off exponentially.

use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vesper_dataplane::Chain;

use crate::context::ChainContext;
use crate::error::Result;

/// Restart backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,

    /// A context that ran at least this long restarts with the initial backoff
    pub reset_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            reset_after: Duration::from_secs(300),
        }
    }
}

impl RestartPolicy {
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

/// Sleep unless shutdown fires first; `false` means shut down
async fn backoff_or_shutdown(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Run `first`, then keep rebuilding and rerunning the context until shutdown.
///
/// Returns an error only when a rebuild fails with a fatal (configuration)
/// error; transient build failures are retried like a crashed context.
pub async fn supervise<F>(
    first: ChainContext,
    mut rebuild: F,
    policy: RestartPolicy,
    shutdown: CancellationToken,
) -> Result<()>
where
    F: FnMut() -> Result<ChainContext>,
{
    let chain = first.chain();
    let mut next = Some(first);
    let mut backoff = policy.initial_backoff;

    loop {
        let context = match next.take() {
            Some(context) => context,
            None => match rebuild() {
                Ok(context) => context,
                Err(e) if e.is_fatal() => {
                    error!(chain = %chain, error = %e, "Chain context cannot be rebuilt");
                    return Err(e);
                }
                Err(e) => {
                    warn!(chain = %chain, error = %e, backoff_ms = backoff.as_millis() as u64, "Chain context rebuild failed");
                    if !backoff_or_shutdown(backoff, &shutdown).await {
                        return Ok(());
                    }
                    backoff = policy.next_backoff(backoff);
                    continue;
                }
            },
        };

        let started = Instant::now();
        // Spawned so a panic surfaces as a JoinError instead of unwinding the runtime
        let exit = tokio::spawn(context.run(shutdown.clone())).await;
        if shutdown.is_cancelled() {
            return Ok(());
        }

        match exit {
            Ok(Ok(())) => {
                info!(chain = %chain, "Chain context exited");
                return Ok(());
            }
            Ok(Err(e)) => warn!(chain = %chain, error = %e, "Chain context failed"),
            Err(e) => error!(chain = %chain, error = %e, "Chain context panicked"),
        }

        if started.elapsed() >= policy.reset_after {
            backoff = policy.initial_backoff;
        }
        info!(chain = %chain, backoff_ms = backoff.as_millis() as u64, "Restarting chain context");
        if !backoff_or_shutdown(backoff, &shutdown).await {
            return Ok(());
        }
        backoff = policy.next_backoff(backoff);
    }
}

/// Start a chain's supervisor on its own thread and runtime
pub fn spawn_chain_thread<F>(
    first: ChainContext,
    rebuild: F,
    worker_threads: usize,
    policy: RestartPolicy,
    shutdown: CancellationToken,
) -> std::io::Result<thread::JoinHandle<Result<()>>>
where
    F: FnMut() -> Result<ChainContext> + Send + 'static,
{
    let chain: Chain = first.chain();
    thread::Builder::new()
        .name(format!("vesper-{}", chain))
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(worker_threads)
                .thread_name(format!("vesper-{}-rt", chain))
                .enable_all()
                .build()?;
            runtime.block_on(supervise(first, rebuild, policy, shutdown))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RestartPolicy::default();
        let mut backoff = policy.initial_backoff;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(backoff.as_secs());
            backoff = policy.next_backoff(backoff);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[tokio::test]
    async fn test_backoff_interrupted_by_shutdown() {
        let shutdown = CancellationToken::new();
        assert!(backoff_or_shutdown(Duration::from_millis(10), &shutdown).await);
        shutdown.cancel();
        assert!(!backoff_or_shutdown(Duration::from_secs(3600), &shutdown).await);
    }
}
