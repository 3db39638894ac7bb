//! Liveness probing for pool members
//!
//! ```text
//! probe GET / → 2xx              → mark_healthy
//!             → other status     → mark_dead
//!             → transport error  → mark_dead
//!             → deadline passed  → mark_dead
//!             → cancelled        → left unchanged
//! ```

use crate::context::RequestContext;
use crate::error::{describe, Error, Result};
use crate::metrics;
use crate::node::Node;
use crate::pool::NodePool;
use crate::request::Request;
use crate::transport::Dispatcher;
use futures::future::join_all;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pause between rounds of the startup check
const STARTUP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of one full health-check round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: usize,
    pub unhealthy: usize,
    /// Probes abandoned because the round was cancelled
    pub skipped: usize,
}

enum ProbeOutcome {
    Healthy,
    Unhealthy,
    Skipped,
}

pub(crate) struct HealthChecker {
    dispatcher: Arc<Dispatcher>,
    pool: Arc<NodePool>,
}

impl HealthChecker {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>, pool: Arc<NodePool>) -> Self {
        Self { dispatcher, pool }
    }

    /// Probe every pool member concurrently, each bounded by `timeout`.
    pub(crate) async fn check_all(&self, ctx: &RequestContext, timeout: Duration) -> HealthReport {
        let nodes = self.pool.nodes();
        let probe_ctx = ctx.timeout(timeout);
        let outcomes = join_all(nodes.iter().map(|node| self.probe(&probe_ctx, node))).await;

        let mut report = HealthReport::default();
        for outcome in outcomes {
            match outcome {
                ProbeOutcome::Healthy => report.healthy += 1,
                ProbeOutcome::Unhealthy => report.unhealthy += 1,
                ProbeOutcome::Skipped => report.skipped += 1,
            }
        }

        let stats = self.pool.stats();
        metrics::record_pool_size(stats.alive, stats.dead);
        debug!(
            healthy = report.healthy,
            unhealthy = report.unhealthy,
            skipped = report.skipped,
            "Health check round complete"
        );
        report
    }

    async fn probe(&self, ctx: &RequestContext, node: &Arc<Node>) -> ProbeOutcome {
        let url = node.url();
        let start = Instant::now();
        let result = self.dispatcher.perform(ctx, &url, &Request::get("/")).await;

        let healthy = match result {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                debug!(url = %url, status = response.status_code(), "Health probe got error status");
                false
            }
            Err(Error::Cancelled) => return ProbeOutcome::Skipped,
            Err(e) => {
                debug!(url = %url, error = %e, "Health probe failed");
                false
            }
        };

        metrics::record_health_probe(&url, healthy, start.elapsed());
        if healthy {
            node.mark_healthy();
            ProbeOutcome::Healthy
        } else {
            node.mark_dead();
            ProbeOutcome::Unhealthy
        }
    }

    /// Poll `seeds` until one answers 2xx or `timeout` passes.
    ///
    /// HTTP 401 aborts immediately with the status error, since retrying with
    /// the same credentials cannot succeed.
    pub(crate) async fn wait_for_any(
        &self,
        ctx: &RequestContext,
        seeds: &[String],
        timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<()> {
        let startup_ctx = ctx.timeout(timeout);
        let mut last_error = String::from("no seed URLs configured");

        'rounds: loop {
            for url in seeds {
                let probe_ctx = startup_ctx.timeout(probe_timeout);
                match self.dispatcher.perform(&probe_ctx, url, &Request::get("/")).await {
                    Ok(response) if response.is_success() => {
                        info!(url = %url, "Cluster reachable");
                        return Ok(());
                    }
                    Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                        return Err(Error::from_status(response));
                    }
                    Ok(response) => {
                        last_error = format!("{} answered HTTP {}", url, response.status_code());
                    }
                    Err(e) if e.is_context_error() && startup_ctx.err().is_some() => break 'rounds,
                    Err(e) => last_error = describe(&e),
                }
            }
            if startup_ctx.sleep(STARTUP_POLL_INTERVAL).await.is_err() {
                break;
            }
        }

        if let Some(err) = ctx.err() {
            return Err(err);
        }
        warn!(timeout_ms = timeout.as_millis() as u64, error = %last_error, "No node reachable at startup");
        Err(Error::HealthCheckTimeout(format!(
            "no node answered within {:?}: {}",
            timeout, last_error
        )))
    }
}
