//! Node pool and round-robin selection with failover

use crate::error::{Error, Result};
use crate::node::{Node, NodeSnapshot};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

struct PoolState {
    /// Replaced wholesale by sniffing, never spliced in place
    nodes: Arc<[Arc<Node>]>,
    cursor: usize,
}

/// Ordered set of nodes plus a rotation cursor, guarded by one lock
pub struct NodePool {
    state: Mutex<PoolState>,
}

impl NodePool {
    pub fn new(nodes: Vec<Arc<Node>>) -> Self {
        Self {
            state: Mutex::new(PoolState {
                nodes: nodes.into(),
                cursor: 0,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current nodes in rotation order
    pub fn nodes(&self) -> Arc<[Arc<Node>]> {
        Arc::clone(&self.state.lock().nodes)
    }

    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.nodes().iter().map(|node| node.snapshot()).collect()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats::from_nodes(&self.nodes())
    }

    /// Pick the next selectable node, starting at the cursor and wrapping once.
    ///
    /// When every node is still backing off, the cursor still advances, all
    /// nodes are made selectable again, and this call alone reports
    /// [`Error::NoConnection`]; the following call succeeds.
    pub fn next(&self) -> Result<Arc<Node>> {
        let mut state = self.state.lock();
        let len = state.nodes.len();
        if len == 0 {
            return Err(Error::NoConnection);
        }

        let now = Instant::now();
        let start = state.cursor % len;
        for offset in 0..len {
            let index = (start + offset) % len;
            if state.nodes[index].is_selectable(now) {
                state.cursor = (index + 1) % len;
                return Ok(Arc::clone(&state.nodes[index]));
            }
        }

        state.cursor = (start + 1) % len;
        for node in state.nodes.iter() {
            node.revive(now);
        }
        Err(Error::NoConnection)
    }

    /// Swap in a new node set computed from the current one, atomically.
    ///
    /// The rotation cursor restarts at the first node.
    pub fn replace_with<F>(&self, build: F) -> usize
    where
        F: FnOnce(&[Arc<Node>]) -> Vec<Arc<Node>>,
    {
        let mut state = self.state.lock();
        let next: Arc<[Arc<Node>]> = build(&state.nodes).into();
        let len = next.len();
        state.nodes = next;
        state.cursor = 0;
        len
    }

    /// True when some node other than `node` could be selected right now
    pub fn has_selectable_besides(&self, node: &Arc<Node>) -> bool {
        let now = Instant::now();
        self.nodes()
            .iter()
            .any(|other| !Arc::ptr_eq(other, node) && other.is_selectable(now))
    }

    /// Find a node by its current URL
    pub fn find(&self, url: &str) -> Option<Arc<Node>> {
        self.nodes().iter().find(|node| node.url() == url).cloned()
    }
}

/// Pool health summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub alive: usize,
    pub dead: usize,
    pub total: usize,
}

impl PoolStats {
    pub fn from_nodes(nodes: &[Arc<Node>]) -> Self {
        let dead = nodes.iter().filter(|node| node.is_dead()).count();
        Self {
            alive: nodes.len() - dead,
            dead,
            total: nodes.len(),
        }
    }
}
