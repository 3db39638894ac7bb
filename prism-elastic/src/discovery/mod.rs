//! Cluster topology discovery ("sniffing")
//!
//! A discovery pass races a topology probe against every candidate URL (the
//! configured seeds plus every live pool member). The first probe that returns
//! at least one usable node wins; its node list replaces the pool, reusing
//! existing entries whose node identifier matches so that liveness history
//! survives an address change.

mod probe;

pub use probe::{extract_hostname, parse_nodes, DiscoveredNode, NodeHttpInfo, NodeInfo, NODES_HTTP_PATH};

use crate::backoff::Backoff;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::metrics;
use crate::node::Node;
use crate::pool::NodePool;
use crate::transport::Dispatcher;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Decides whether a discovered node joins the pool.
pub type NodeFilter = Arc<dyn Fn(&NodeInfo) -> bool + Send + Sync>;

pub(crate) struct Discoverer {
    dispatcher: Arc<Dispatcher>,
    pool: Arc<NodePool>,
    seeds: Vec<String>,
    scheme: String,
    filter: Option<NodeFilter>,
    node_backoff: Arc<dyn Backoff>,
}

impl Discoverer {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        pool: Arc<NodePool>,
        seeds: Vec<String>,
        scheme: String,
        filter: Option<NodeFilter>,
        node_backoff: Arc<dyn Backoff>,
    ) -> Self {
        Self {
            dispatcher,
            pool,
            seeds,
            scheme,
            filter,
            node_backoff,
        }
    }

    /// Seeds first, then live pool members, without duplicates
    fn candidates(&self) -> Vec<String> {
        let mut urls = self.seeds.clone();
        for node in self.pool.nodes().iter() {
            let url = node.url();
            if node.is_alive() && !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls
    }

    /// Run one discovery pass and swap the result into the pool.
    ///
    /// Returns the new pool size. On failure the pool is left untouched.
    pub(crate) async fn discover(&self, ctx: &RequestContext, timeout: Duration) -> Result<usize> {
        let start = Instant::now();
        let result = self.discover_inner(ctx, timeout).await;
        match &result {
            Ok(count) => {
                metrics::record_discovery(true, *count, start.elapsed());
                let stats = self.pool.stats();
                metrics::record_pool_size(stats.alive, stats.dead);
                info!(nodes = count, elapsed_ms = start.elapsed().as_millis() as u64, "Discovery pass complete");
            }
            Err(e) => {
                metrics::record_discovery(false, 0, start.elapsed());
                warn!(error = %e, "Discovery pass failed");
            }
        }
        result
    }

    async fn discover_inner(&self, ctx: &RequestContext, timeout: Duration) -> Result<usize> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let candidates = self.candidates();
        if candidates.is_empty() {
            return Err(Error::NoNodesFound);
        }

        let probe_ctx = ctx.timeout(timeout);
        let (tx, mut rx) = mpsc::channel(candidates.len());
        for url in candidates.iter().cloned() {
            let tx = tx.clone();
            let dispatcher = Arc::clone(&self.dispatcher);
            let probe_ctx = probe_ctx.clone();
            let scheme = self.scheme.clone();
            tokio::spawn(async move {
                let result = probe::sniff_node(&dispatcher, &probe_ctx, &url, &scheme).await;
                // The receiver is gone once a winner has been taken
                let _ = tx.send((url, result)).await;
            });
        }
        drop(tx);

        let mut winner = None;
        loop {
            match probe_ctx.run(rx.recv()).await {
                Ok(Some((url, Ok(nodes)))) if !nodes.is_empty() => {
                    debug!(url = %url, nodes = nodes.len(), "Discovery probe succeeded");
                    winner = Some(nodes);
                    break;
                }
                Ok(Some((url, Ok(_)))) => {
                    debug!(url = %url, "Discovery probe returned no nodes");
                }
                Ok(Some((url, Err(e)))) => {
                    debug!(url = %url, error = %e, "Discovery probe failed");
                }
                Ok(None) => break,
                Err(_) => {
                    if let Some(err) = ctx.err() {
                        return Err(err);
                    }
                    break;
                }
            }
        }

        let discovered = winner.ok_or(Error::NoNodesFound)?;
        let accepted: Vec<DiscoveredNode> = discovered
            .into_iter()
            .filter(|node| self.accepts(node))
            .collect();
        if accepted.is_empty() {
            return Err(Error::NoNodesFound);
        }
        Ok(self.merge(accepted))
    }

    fn accepts(&self, node: &DiscoveredNode) -> bool {
        match &self.filter {
            Some(filter) => {
                let keep = filter(&node.info);
                if !keep {
                    debug!(node_id = %node.node_id, url = %node.url, "Node rejected by filter");
                }
                keep
            }
            None => true,
        }
    }

    /// Replace the pool, reusing nodes whose identifier is already known.
    fn merge(&self, discovered: Vec<DiscoveredNode>) -> usize {
        let backoff = Arc::clone(&self.node_backoff);
        self.pool.replace_with(move |current| {
            discovered
                .into_iter()
                .map(|found| {
                    let existing = current
                        .iter()
                        .find(|node| node.node_id() == Some(found.node_id.as_str()));
                    match existing {
                        Some(node) => {
                            if node.url() != found.url {
                                info!(
                                    node_id = %found.node_id,
                                    old_url = %node.url(),
                                    new_url = %found.url,
                                    "Node changed address"
                                );
                                node.set_url(found.url);
                            }
                            Arc::clone(node)
                        }
                        None => Arc::new(Node::with_backoff(
                            found.url,
                            Some(found.node_id),
                            Arc::clone(&backoff),
                        )),
                    }
                })
                .collect()
        })
    }
}
