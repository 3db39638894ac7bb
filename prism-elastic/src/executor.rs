//! Request execution with node selection and transport-level retries
//!
//! Only failures to reach a node are retried, each time on the next node in
//! rotation. A node that failed is marked dead once the request gives up on
//! it or another node can take the retry. Once a node has answered, its
//! status is final: error statuses come back as [`Error::Status`] carrying
//! the response, without a retry.

use crate::backoff::Backoff;
use crate::context::RequestContext;
use crate::discovery::Discoverer;
use crate::error::{Error, Result};
use crate::logging::Loggers;
use crate::metrics::{self, AttemptTimer};
use crate::node::Node;
use crate::pool::NodePool;
use crate::request::{Request, Response};
use crate::transport::{read_response, Dispatcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Where an attempt is sent
enum Target {
    Pooled(Arc<Node>),
    /// Caller-chosen URL; tracked only if it is also a pool member
    Explicit(String, Option<Arc<Node>>),
}

impl Target {
    fn url(&self) -> String {
        match self {
            Target::Pooled(node) => node.url(),
            Target::Explicit(url, _) => url.clone(),
        }
    }

    fn node(&self) -> Option<&Arc<Node>> {
        match self {
            Target::Pooled(node) => Some(node),
            Target::Explicit(_, node) => node.as_ref(),
        }
    }
}

/// Re-sniff settings used when a request finds no usable node
pub(crate) struct OutageDiscovery {
    pub discoverer: Arc<Discoverer>,
    pub timeout: Duration,
}

pub(crate) struct Executor {
    dispatcher: Arc<Dispatcher>,
    pool: Arc<NodePool>,
    outage: Option<OutageDiscovery>,
    attempts: u32,
    retry_backoff: Arc<dyn Backoff>,
    loggers: Loggers,
}

impl Executor {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        pool: Arc<NodePool>,
        outage: Option<OutageDiscovery>,
        attempts: u32,
        retry_backoff: Arc<dyn Backoff>,
        loggers: Loggers,
    ) -> Self {
        Self {
            dispatcher,
            pool,
            outage,
            attempts: attempts.max(1),
            retry_backoff,
            loggers,
        }
    }

    pub(crate) async fn execute(&self, ctx: &RequestContext, mut request: Request) -> Result<Response> {
        let method = request.method().as_str().to_string();
        let result = self.run_attempts(ctx, &mut request, &method).await;
        if let Err(e) = &result {
            metrics::record_request_error(&method, e.error_type());
        }
        result
    }

    async fn run_attempts(
        &self,
        ctx: &RequestContext,
        request: &mut Request,
        method: &str,
    ) -> Result<Response> {
        let body = request.take_body()?;
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            if attempt > 1 {
                ctx.sleep(self.retry_backoff.delay(attempt - 1)).await?;
            }
            if let Some(err) = ctx.err() {
                return Err(err);
            }

            let target = match self.select(ctx, request).await {
                Ok(target) => target,
                Err(e) if e.is_context_error() => return Err(e),
                Err(e) => {
                    debug!(attempt, error = %e, "No node available for attempt");
                    if attempt < self.attempts {
                        metrics::record_retry(method, e.error_type());
                    }
                    last_error = Some(e);
                    continue;
                }
            };

            let base = target.url();
            let outgoing = self.dispatcher.build(&base, request, body.clone())?;
            let url = outgoing.url.clone();
            if self.loggers.tracing_enabled() {
                self.loggers.trace_request(&outgoing.request);
            }

            let timer = AttemptTimer::new(method, &base);
            let head = match self.dispatcher.round_trip(ctx, outgoing).await {
                Ok(head) => head,
                Err(e) if e.is_context_error() => {
                    timer.finish(e.error_type());
                    return Err(e);
                }
                Err(e) => {
                    timer.finish(e.error_type());
                    if let Some(node) = target.node() {
                        // A lone node stays selectable while the request may still retry it
                        if attempt == self.attempts || self.pool.has_selectable_besides(node) {
                            node.mark_dead();
                        }
                    }
                    self.loggers.error(&format!("{} {} failed: {}", method, url, e));
                    if attempt < self.attempts {
                        metrics::record_retry(method, e.error_type());
                    }
                    last_error = Some(e);
                    continue;
                }
            };

            let response = match read_response(ctx, head, url.clone(), request.response_limit()).await {
                Ok(response) => response,
                Err(e) => {
                    timer.finish(e.error_type());
                    if let (Error::Transport { .. }, Some(node)) = (&e, target.node()) {
                        node.mark_dead();
                    }
                    self.loggers.error(&format!("{} {} failed: {}", method, url, e));
                    return Err(e);
                }
            };

            let took = timer.finish(outcome_label(&response, request));
            if let Some(node) = target.node() {
                node.mark_healthy();
            }
            self.loggers.request_done(method, &url, response.status_code(), took);
            self.loggers.trace_response(&response);

            if response.is_success() || request.is_ignored(response.status()) {
                return Ok(response);
            }
            return Err(Error::from_status(response));
        }

        Err(last_error.unwrap_or(Error::NoConnection))
    }

    /// Pick the node for one attempt.
    ///
    /// A "no connection" from the pool ends this attempt. Every node has
    /// been revived by then, so the next attempt (or the next request) can
    /// select again. With outage discovery configured, the pool is re-sniffed
    /// first.
    async fn select(&self, ctx: &RequestContext, request: &Request) -> Result<Target> {
        if let Some(url) = request.explicit_node() {
            let url = url.trim_end_matches('/').to_string();
            let node = self.pool.find(&url);
            return Ok(Target::Explicit(url, node));
        }

        match self.pool.next() {
            Ok(node) => Ok(Target::Pooled(node)),
            Err(Error::NoConnection) => {
                if let Some(outage) = &self.outage {
                    match outage.discoverer.discover(ctx, outage.timeout).await {
                        Err(e) if e.is_context_error() => return Err(e),
                        Err(e) => debug!(error = %e, "Discovery after outage failed"),
                        Ok(_) => {}
                    }
                }
                Err(Error::NoConnection)
            }
            Err(e) => Err(e),
        }
    }
}

fn outcome_label(response: &Response, request: &Request) -> &'static str {
    if response.is_success() {
        "ok"
    } else if request.is_ignored(response.status()) {
        "ignored"
    } else {
        "status"
    }
}
