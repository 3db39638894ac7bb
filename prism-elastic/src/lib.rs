//! Prism Elastic - cluster-aware connection core for Elasticsearch-compatible engines
//!
//! This crate tracks a pool of cluster nodes and executes HTTP requests
//! against them with failure-aware rotation and retries.
//!
//! # Architecture
//!
//! - **Node / Pool**: candidate endpoints with liveness state, round-robin
//!   selection that skips nodes backing off after a failure
//! - **Discovery**: topology sniffing via `/_nodes/http`, merging by node id
//! - **Health**: concurrent liveness probes that mark nodes alive or dead
//! - **Executor**: select, send, classify, retry on transport failure only
//! - **Lifecycle**: background sniff and health timers with bounded shutdown
//!
//! # Example
//!
//! ```ignore
//! use prism_elastic::{Client, Config, Request, RequestContext};
//!
//! let client = Client::new(Config::default()).await?;
//! let ctx = RequestContext::with_timeout(Duration::from_secs(5));
//! let response = client
//!     .execute(&ctx, Request::head("/my-index").ignore(&[404]))
//!     .await?;
//! println!("exists: {}", response.status_code() == 200);
//! client.stop().await;
//! ```

pub mod backoff;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod pool;
pub mod request;
pub mod transport;

mod api;
mod client;
mod executor;
mod lifecycle;

pub use api::{PingResult, VersionInfo, NODES_PLUGINS_PATH};
pub use backoff::{Backoff, ConstantBackoff, ExponentialBackoff};
pub use client::{Client, ClientBuilder};
pub use config::{BasicAuth, Config, DeadNodeBackoffConfig, HealthCheckConfig, SnifferConfig, DEFAULT_URL};
pub use context::RequestContext;
pub use discovery::{DiscoveredNode, NodeFilter, NodeInfo};
pub use error::{BoxError, Error, ErrorDetails, Result};
pub use health::HealthReport;
pub use logging::{Loggers, RequestLogger, TracingLogger};
pub use node::{Liveness, Node, NodeSnapshot};
pub use pool::{NodePool, PoolStats};
pub use request::{Request, Response};
pub use transport::Transport;
