//! Background discovery and health-check timers
//!
//! ```text
//! stopped --start()--> running --stop()--> stopped
//! ```
//!
//! Both transitions are idempotent. Every background probe runs under a
//! context derived from the running state's token, so `stop()` aborts
//! in-flight probes and then waits (bounded) for the loops to exit.

use crate::context::RequestContext;
use crate::discovery::Discoverer;
use crate::health::HealthChecker;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on how long `stop()` waits for a loop before aborting it
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Intervals and per-pass timeouts; `None` interval disables a loop
#[derive(Debug, Clone, Copy)]
pub(crate) struct Schedule {
    pub sniff_interval: Option<Duration>,
    pub sniff_timeout: Duration,
    pub health_interval: Option<Duration>,
    pub health_timeout: Duration,
}

struct Running {
    token: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

pub(crate) struct Lifecycle {
    discoverer: Arc<Discoverer>,
    health: Arc<HealthChecker>,
    schedule: Schedule,
    state: Mutex<Option<Running>>,
}

impl Lifecycle {
    pub(crate) fn new(discoverer: Arc<Discoverer>, health: Arc<HealthChecker>, schedule: Schedule) -> Self {
        Self {
            discoverer,
            health,
            schedule,
            state: Mutex::new(None),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Arm the timers with a fresh token. No-op when already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn start(&self) {
        let mut state = self.state.lock();
        if state.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let mut handles = Vec::new();

        if let Some(interval) = self.schedule.sniff_interval {
            let discoverer = Arc::clone(&self.discoverer);
            let timeout = self.schedule.sniff_timeout;
            let handle = tokio::spawn(run_periodic("sniffer", token.clone(), interval, move |ctx| {
                let discoverer = Arc::clone(&discoverer);
                async move {
                    // Failures are logged by the discoverer and leave the pool as is
                    let _ = discoverer.discover(&ctx, timeout).await;
                }
            }));
            handles.push(("sniffer", handle));
        }

        if let Some(interval) = self.schedule.health_interval {
            let health = Arc::clone(&self.health);
            let timeout = self.schedule.health_timeout;
            let handle = tokio::spawn(run_periodic("health checker", token.clone(), interval, move |ctx| {
                let health = Arc::clone(&health);
                async move {
                    health.check_all(&ctx, timeout).await;
                }
            }));
            handles.push(("health checker", handle));
        }

        info!(tasks = handles.len(), "Client background tasks started");
        *state = Some(Running { token, handles });
    }

    /// Cancel the timers and wait for them to finish. No-op when stopped.
    pub(crate) async fn stop(&self) {
        let Some(running) = self.state.lock().take() else {
            return;
        };
        running.token.cancel();

        let deadline = Instant::now() + STOP_TIMEOUT;
        for (name, mut handle) in running.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(task = name, "Background task stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Background task ended abnormally"),
                Err(_) => {
                    warn!(task = name, "Background task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
        info!("Client background tasks stopped");
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if let Some(running) = self.state.get_mut().take() {
            running.token.cancel();
            for (_, handle) in running.handles {
                handle.abort();
            }
        }
    }
}

/// Run `tick` every `interval` (first run after one interval) until `token` is cancelled.
async fn run_periodic<F, Fut>(name: &'static str, token: CancellationToken, interval: Duration, mut tick: F)
where
    F: FnMut(RequestContext) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(task = name, interval_ms = interval.as_millis() as u64, "Background loop started");

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let ctx = RequestContext::with_token(token.child_token());
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tick(ctx) => {}
        }
    }

    debug!(task = name, "Background loop exited");
}
