//! A single candidate endpoint and its liveness state
//!
//! ```text
//! Liveness: Alive ⇄ Dead { retry_at }
//!
//!   alive → dead:   transport failure or failed health probe
//!   dead  → alive:  successful request or health probe
//!   dead, now >= retry_at: selectable again (provisionally alive)
//! ```

use crate::backoff::{Backoff, ExponentialBackoff};
use crate::metrics;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Liveness of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Excluded from rotation until `retry_at`
    Dead { retry_at: Instant },
}

impl Liveness {
    /// Whether a node in this state may be handed out at `now`.
    pub fn is_selectable(&self, now: Instant) -> bool {
        match self {
            Liveness::Alive => true,
            Liveness::Dead { retry_at } => now >= *retry_at,
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, Liveness::Dead { .. })
    }
}

#[derive(Debug)]
struct NodeState {
    liveness: Liveness,
    failures: u32,
}

/// One addressable node of the cluster
pub struct Node {
    url: RwLock<String>,
    node_id: Option<String>,
    state: Mutex<NodeState>,
    backoff: Arc<dyn Backoff>,
}

impl Node {
    /// Node for a configured seed URL (no identifier yet)
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_backoff(url, None, Arc::new(ExponentialBackoff::default()))
    }

    /// Node learned from sniffing
    pub fn with_id(url: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self::with_backoff(
            url,
            Some(node_id.into()),
            Arc::new(ExponentialBackoff::default()),
        )
    }

    pub fn with_backoff(
        url: impl Into<String>,
        node_id: Option<String>,
        backoff: Arc<dyn Backoff>,
    ) -> Self {
        Self {
            url: RwLock::new(url.into()),
            node_id,
            state: Mutex::new(NodeState {
                liveness: Liveness::Alive,
                failures: 0,
            }),
            backoff,
        }
    }

    pub fn url(&self) -> String {
        self.url.read().clone()
    }

    /// Replace the advertised URL, keeping identity and liveness.
    pub(crate) fn set_url(&self, url: String) {
        *self.url.write() = url;
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn liveness(&self) -> Liveness {
        self.state.lock().liveness
    }

    /// Consecutive failures since the node was last healthy
    pub fn failures(&self) -> u32 {
        self.state.lock().failures
    }

    pub fn is_dead(&self) -> bool {
        self.liveness().is_dead()
    }

    pub fn is_alive(&self) -> bool {
        !self.is_dead()
    }

    pub fn is_selectable(&self, now: Instant) -> bool {
        self.liveness().is_selectable(now)
    }

    /// Clear the dead flag and failure count.
    pub fn mark_healthy(&self) {
        let was_dead = {
            let mut state = self.state.lock();
            let was_dead = state.liveness.is_dead();
            state.liveness = Liveness::Alive;
            state.failures = 0;
            was_dead
        };
        if was_dead {
            let url = self.url();
            debug!(url = %url, "Node is alive again");
            metrics::record_node_transition(&url, false);
        }
    }

    /// Mark dead and push the retry time out by the backoff for the new failure count.
    pub fn mark_dead(&self) {
        let (failures, delay) = {
            let mut state = self.state.lock();
            state.failures = state.failures.saturating_add(1);
            let delay = self.backoff.delay(state.failures);
            state.liveness = Liveness::Dead {
                retry_at: Instant::now() + delay,
            };
            (state.failures, delay)
        };
        let url = self.url();
        debug!(
            url = %url,
            failures,
            retry_in_ms = delay.as_millis() as u64,
            "Node marked dead"
        );
        metrics::record_node_transition(&url, true);
    }

    /// Make a dead node selectable now without forgetting its failure count.
    pub(crate) fn revive(&self, now: Instant) {
        let mut state = self.state.lock();
        if let Liveness::Dead { retry_at } = &mut state.liveness {
            if *retry_at > now {
                *retry_at = now;
            }
        }
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let state = self.state.lock();
        NodeSnapshot {
            url: self.url(),
            node_id: self.node_id.clone(),
            dead: state.liveness.is_dead(),
            failures: state.failures,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Node")
            .field("url", &*self.url.read())
            .field("node_id", &self.node_id)
            .field("liveness", &state.liveness)
            .field("failures", &state.failures)
            .finish()
    }
}

/// Point-in-time view of a node, for introspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub url: String,
    pub node_id: Option<String>,
    pub dead: bool,
    pub failures: u32,
}
