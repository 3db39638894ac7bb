//! Cluster-aware client façade
//!
//! Owns the node pool and wires the executor, discoverer, health checker and
//! background lifecycle around it. Cloning a [`Client`] is cheap and shares
//! all state.

use crate::backoff::{ConstantBackoff, ExponentialBackoff};
use crate::config::Config;
use crate::context::RequestContext;
use crate::discovery::{Discoverer, NodeFilter, NodeInfo};
use crate::error::{Error, Result};
use crate::executor::{Executor, OutageDiscovery};
use crate::health::{HealthChecker, HealthReport};
use crate::lifecycle::{Lifecycle, Schedule};
use crate::logging::{Loggers, RequestLogger};
use crate::metrics;
use crate::node::{Node, NodeSnapshot};
use crate::pool::{NodePool, PoolStats};
use crate::request::{Request, Response};
use crate::transport::{Dispatcher, Transport};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Client for one cluster
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Config,
    seeds: Vec<String>,
    pool: Arc<NodePool>,
    discoverer: Arc<Discoverer>,
    health: Arc<HealthChecker>,
    executor: Executor,
    lifecycle: Lifecycle,
}

/// Attaches runtime collaborators that cannot live in [`Config`]
pub struct ClientBuilder {
    config: Config,
    http_client: Option<reqwest::Client>,
    transport: Option<Arc<dyn Transport>>,
    filter: Option<NodeFilter>,
    loggers: Loggers,
}

impl ClientBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            http_client: None,
            transport: None,
            filter: None,
            loggers: Loggers::default(),
        }
    }

    /// Use this `reqwest` client for both building and sending requests
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Send every request through `transport`
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Only keep discovered nodes for which `filter` returns true
    pub fn node_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&NodeInfo) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn info_logger(mut self, logger: impl RequestLogger + 'static) -> Self {
        self.loggers.info = Some(Arc::new(logger));
        self
    }

    pub fn error_logger(mut self, logger: impl RequestLogger + 'static) -> Self {
        self.loggers.error = Some(Arc::new(logger));
        self
    }

    pub fn trace_logger(mut self, logger: impl RequestLogger + 'static) -> Self {
        self.loggers.trace = Some(Arc::new(logger));
        self
    }

    pub fn loggers(mut self, loggers: Loggers) -> Self {
        self.loggers = loggers;
        self
    }

    /// Probe the cluster, populate the pool and start background tasks.
    pub async fn build(self) -> Result<Client> {
        self.build_with_context(&RequestContext::background()).await
    }

    /// Like [`build`](Self::build), with startup probing bounded by `ctx`.
    pub async fn build_with_context(self, ctx: &RequestContext) -> Result<Client> {
        let client = self.assemble()?;
        client.startup(ctx).await?;
        client.start();
        Ok(client)
    }

    /// Client with discovery and health checks off: no startup probing and
    /// no background tasks. Requests rotate over the seeds.
    pub fn build_simple(mut self) -> Result<Client> {
        self.config.sniffer.enabled = false;
        self.config.health_check.enabled = false;
        let client = self.assemble()?;
        client.start();
        Ok(client)
    }

    fn assemble(self) -> Result<Client> {
        let config = self.config;
        let (seeds, basic_auth) = config.canonical_seeds()?;
        let scheme = config.sniff_scheme(&seeds);

        let http_client = match self.http_client {
            Some(client) => client,
            None => {
                let mut builder = reqwest::Client::builder().gzip(config.compression);
                if let Some(timeout) = config.connect_timeout() {
                    builder = builder.connect_timeout(timeout);
                }
                builder
                    .build()
                    .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?
            }
        };
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(http_client.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            http_client,
            transport,
            basic_auth,
            config.header_map()?,
            config.get_body_method()?,
        ));

        let node_backoff = Arc::new(ExponentialBackoff::new(
            Duration::from_millis(config.dead_node_backoff.initial_ms),
            Duration::from_millis(config.dead_node_backoff.max_ms),
        ));
        let pool = Arc::new(NodePool::new(
            seeds
                .iter()
                .map(|url| Arc::new(Node::with_backoff(url.clone(), None, node_backoff.clone())))
                .collect(),
        ));

        let discoverer = Arc::new(Discoverer::new(
            Arc::clone(&dispatcher),
            Arc::clone(&pool),
            seeds.clone(),
            scheme,
            self.filter,
            node_backoff,
        ));
        let health = Arc::new(HealthChecker::new(Arc::clone(&dispatcher), Arc::clone(&pool)));

        let outage = (config.sniffer.enabled && config.sniffer.on_outage).then(|| OutageDiscovery {
            discoverer: Arc::clone(&discoverer),
            timeout: config.sniffer.timeout(),
        });
        let executor = Executor::new(
            Arc::clone(&dispatcher),
            Arc::clone(&pool),
            outage,
            config.attempts(),
            Arc::new(ConstantBackoff::new(config.retry_backoff())),
            self.loggers,
        );

        let schedule = Schedule {
            sniff_interval: config.sniffer.interval(),
            sniff_timeout: config.sniffer.timeout(),
            health_interval: config.health_check.interval(),
            health_timeout: config.health_check.timeout(),
        };
        let lifecycle = Lifecycle::new(Arc::clone(&discoverer), Arc::clone(&health), schedule);

        Ok(Client {
            inner: Arc::new(ClientInner {
                config,
                seeds,
                pool,
                discoverer,
                health,
                executor,
                lifecycle,
            }),
        })
    }
}

impl Client {
    /// Build a client with full startup probing
    pub async fn new(config: Config) -> Result<Self> {
        ClientBuilder::new(config).build().await
    }

    /// Single-endpoint style client; see [`ClientBuilder::build_simple`]
    pub fn simple(config: Config) -> Result<Self> {
        ClientBuilder::new(config).build_simple()
    }

    pub fn builder(config: Config) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    async fn startup(&self, ctx: &RequestContext) -> Result<()> {
        let inner = &self.inner;
        let config = &inner.config;

        if let Some(timeout) = config.health_check.startup_timeout() {
            inner
                .health
                .wait_for_any(ctx, &inner.seeds, timeout, config.health_check.timeout())
                .await?;
        }

        if let Some(timeout) = config.sniffer.startup_timeout() {
            inner.discoverer.discover(ctx, timeout).await?;
        }

        if let Some(timeout) = config.health_check.startup_timeout() {
            inner.health.check_all(ctx, timeout).await;
        }

        if inner.pool.is_empty() {
            return Err(Error::NoConnection);
        }

        for plugin in &config.required_plugins {
            if !self.has_plugin_with(ctx, plugin).await? {
                return Err(Error::PluginNotFound(plugin.clone()));
            }
        }

        let stats = inner.pool.stats();
        metrics::record_pool_size(stats.alive, stats.dead);
        info!(nodes = stats.total, alive = stats.alive, "Client ready");
        Ok(())
    }

    /// Execute `request` against the cluster under `ctx`.
    pub async fn execute(&self, ctx: &RequestContext, request: Request) -> Result<Response> {
        self.inner.executor.execute(ctx, request).await
    }

    /// Execute without cancellation or deadline
    pub async fn perform(&self, request: Request) -> Result<Response> {
        self.execute(&RequestContext::background(), request).await
    }

    /// Run one discovery pass now, bounded by the configured sniff timeout.
    pub async fn discover(&self, ctx: &RequestContext) -> Result<usize> {
        self.inner
            .discoverer
            .discover(ctx, self.inner.config.sniffer.timeout())
            .await
    }

    /// Probe every node now, bounded by the configured health-check timeout.
    pub async fn health_check(&self, ctx: &RequestContext) -> HealthReport {
        self.inner
            .health
            .check_all(ctx, self.inner.config.health_check.timeout())
            .await
    }

    /// Arm background timers; no-op when already running
    pub fn start(&self) {
        self.inner.lifecycle.start();
    }

    /// Stop background timers and wait for them; no-op when stopped
    pub async fn stop(&self) {
        self.inner.lifecycle.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.is_running()
    }

    /// Snapshot of the pool in rotation order
    pub fn nodes(&self) -> Vec<NodeSnapshot> {
        self.inner.pool.snapshot()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Canonical seed URLs
    pub fn seeds(&self) -> &[String] {
        &self.inner.seeds
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("seeds", &self.inner.seeds)
            .field("pool", &self.inner.pool.stats())
            .field("running", &self.is_running())
            .finish()
    }
}
