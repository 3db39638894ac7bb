//! Cluster-level convenience calls built on the executor

use crate::client::Client;
use crate::context::RequestContext;
use crate::error::Result;
use crate::request::Request;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Path listing installed plugins per node
pub const NODES_PLUGINS_PATH: &str = "/_nodes/plugins";

/// Body of `GET /`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PingResult {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub cluster_uuid: String,
    #[serde(default)]
    pub version: VersionInfo,
    #[serde(default)]
    pub tagline: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct VersionInfo {
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub build_flavor: String,
    #[serde(default)]
    pub build_hash: String,
    #[serde(default)]
    pub lucene_version: String,
}

#[derive(Deserialize)]
struct NodesPlugins {
    #[serde(default)]
    nodes: BTreeMap<String, NodePlugins>,
}

#[derive(Deserialize)]
struct NodePlugins {
    #[serde(default)]
    plugins: Vec<PluginInfo>,
}

#[derive(Deserialize)]
struct PluginInfo {
    name: String,
}

impl Client {
    /// `GET /` on a specific node, returning the decoded body and status.
    pub async fn ping(&self, ctx: &RequestContext, url: &str) -> Result<(PingResult, u16)> {
        let response = self.execute(ctx, Request::get("/").node_url(url)).await?;
        let status = response.status_code();
        Ok((response.json()?, status))
    }

    /// Version number reported by the node at `url`
    pub async fn version(&self, ctx: &RequestContext, url: &str) -> Result<String> {
        let (ping, _) = self.ping(ctx, url).await?;
        Ok(ping.version.number)
    }

    /// Names of plugins installed on any node, sorted
    pub async fn plugins(&self, ctx: &RequestContext) -> Result<Vec<String>> {
        let response = self.execute(ctx, Request::get(NODES_PLUGINS_PATH)).await?;
        let parsed: NodesPlugins = response.json()?;
        let names: BTreeSet<String> = parsed
            .nodes
            .into_values()
            .flat_map(|node| node.plugins.into_iter().map(|plugin| plugin.name))
            .collect();
        Ok(names.into_iter().collect())
    }

    pub async fn has_plugin(&self, name: &str) -> Result<bool> {
        self.has_plugin_with(&RequestContext::background(), name).await
    }

    pub(crate) async fn has_plugin_with(&self, ctx: &RequestContext, name: &str) -> Result<bool> {
        Ok(self.plugins(ctx).await?.iter().any(|plugin| plugin == name))
    }
}
