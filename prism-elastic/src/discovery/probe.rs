//! Single-node topology query against `/_nodes/http`

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::transport::Dispatcher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Path of the topology endpoint
pub const NODES_HTTP_PATH: &str = "/_nodes/http";

/// Node entry as reported by the topology endpoint
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct NodeInfo {
    /// Node identifier; the key of the entry, not part of its body
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub http: Option<NodeHttpInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct NodeHttpInfo {
    #[serde(default)]
    pub publish_address: String,
    #[serde(default)]
    pub bound_address: Vec<String>,
}

impl NodeInfo {
    pub fn publish_address(&self) -> Option<&str> {
        self.http
            .as_ref()
            .map(|http| http.publish_address.as_str())
            .filter(|address| !address.is_empty())
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// A node reported by a probe, with the URL it should be reached at
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredNode {
    pub node_id: String,
    pub url: String,
    pub info: NodeInfo,
}

#[derive(Deserialize)]
struct NodesResponse {
    #[serde(default)]
    nodes: BTreeMap<String, serde_json::Value>,
}

/// Turn an advertised HTTP address into a node URL.
///
/// Handles `ip:port`, `alias/ip:port` (rightmost token wins) and the legacy
/// `inet[alias/ip:port]` form. Anything without a port yields `None`.
pub fn extract_hostname(scheme: &str, address: &str) -> Option<String> {
    let address = address.trim();
    let address = match address.strip_prefix("inet[") {
        Some(inner) => inner.strip_suffix(']').unwrap_or(inner),
        None => address,
    };
    let host_port = address.rsplit('/').next().unwrap_or(address);
    if host_port.is_empty() || !host_port.contains(':') {
        return None;
    }
    Some(format!("{}://{}", scheme, host_port))
}

/// Parse a topology body, skipping entries that are malformed or lack an address.
///
/// Entries come back ordered by node identifier.
pub fn parse_nodes(body: &[u8], scheme: &str) -> Result<Vec<DiscoveredNode>> {
    let response: NodesResponse = serde_json::from_slice(body).map_err(Error::Decode)?;
    let mut discovered = Vec::with_capacity(response.nodes.len());
    for (id, raw) in response.nodes {
        let mut info: NodeInfo = match serde_json::from_value(raw) {
            Ok(info) => info,
            Err(e) => {
                debug!(node_id = %id, error = %e, "Skipping malformed node entry");
                continue;
            }
        };
        info.id = id.clone();
        let Some(url) = info.publish_address().and_then(|a| extract_hostname(scheme, a)) else {
            debug!(node_id = %id, "Skipping node without usable HTTP publish address");
            continue;
        };
        discovered.push(DiscoveredNode {
            node_id: id,
            url,
            info,
        });
    }
    Ok(discovered)
}

/// Ask the node at `url` for the cluster topology.
pub(crate) async fn sniff_node(
    dispatcher: &Dispatcher,
    ctx: &RequestContext,
    url: &str,
    scheme: &str,
) -> Result<Vec<DiscoveredNode>> {
    let response = dispatcher
        .perform(ctx, url, &Request::get(NODES_HTTP_PATH))
        .await?;
    if !response.is_success() {
        return Err(Error::from_status(response));
    }
    parse_nodes(response.body(), scheme)
}
