//! End-to-end tests for discovery, health checking, startup and the
//! background lifecycle against mock cluster nodes.

mod common;

use common::{quiet_config, wait_until, FailingTransport, MockNode};
use prism_elastic::{Client, Config, Error, Request, RequestContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sniffing and health checking on, background timers effectively idle
fn cluster_config(urls: &[&str]) -> Config {
    let mut config = Config {
        urls: urls.iter().map(|u| u.to_string()).collect(),
        retry_backoff_ms: 1,
        ..Default::default()
    };
    config.sniffer.startup_timeout_ms = 2000;
    config.health_check.startup_timeout_ms = 2000;
    config
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_startup_discovers_cluster() {
    let a = MockNode::start("a").await;
    let b = MockNode::start("b").await;
    a.advertise(&[("b", b.addr.as_str()), ("a", a.addr.as_str())]);

    let client = Client::new(cluster_config(&[&a.url])).await.unwrap();
    let nodes = client.nodes();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].node_id.as_deref(), Some("a"));
    assert_eq!(nodes[0].url, a.url);
    assert_eq!(nodes[1].node_id.as_deref(), Some("b"));
    assert_eq!(nodes[1].url, b.url);
    assert!(client.is_running());

    client.perform(Request::get("/docs")).await.unwrap();
    client.perform(Request::get("/docs")).await.unwrap();
    // One fallback hit each, on top of the startup probes
    assert!(b.requests() >= 2);

    client.stop().await;
}

#[tokio::test]
async fn test_discovery_keeps_node_identity_across_address_change() {
    let seed = MockNode::start("seed").await;
    let first = MockNode::start("first").await;
    let second = MockNode::start("second").await;
    seed.advertise(&[("x", first.addr.as_str())]);

    let client = Client::builder(quiet_config(&[&seed.url]))
        .transport(FailingTransport::failing_first("/flaky", 1))
        .build_simple()
        .unwrap();
    let ctx = RequestContext::with_timeout(Duration::from_secs(5));

    assert_eq!(client.discover(&ctx).await.unwrap(), 1);
    let nodes = client.nodes();
    assert_eq!(nodes[0].node_id.as_deref(), Some("x"));
    assert_eq!(nodes[0].url, first.url);

    assert!(client.perform(Request::get("/flaky")).await.is_err());
    assert_eq!(client.nodes()[0].failures, 1);

    seed.advertise(&[("x", second.addr.as_str())]);
    assert_eq!(client.discover(&ctx).await.unwrap(), 1);

    // Same node, new address, failure history intact
    let nodes = client.nodes();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].node_id.as_deref(), Some("x"));
    assert_eq!(nodes[0].url, second.url);
    assert!(nodes[0].dead);
    assert_eq!(nodes[0].failures, 1);
}

#[tokio::test]
async fn test_node_filter_called_once_per_node() {
    let a = MockNode::start("a").await;
    let b = MockNode::start("b").await;
    a.advertise(&[("a", a.addr.as_str()), ("b", b.addr.as_str()), ("c", "127.0.0.1:1")]);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let client = Client::builder(quiet_config(&[&a.url]))
        .node_filter(move |info| {
            counter.fetch_add(1, Ordering::SeqCst);
            info.name != "node-c"
        })
        .build_simple()
        .unwrap();

    let count = client.discover(&RequestContext::background()).await.unwrap();
    assert_eq!(count, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let urls: Vec<String> = client.nodes().into_iter().map(|n| n.url).collect();
    assert_eq!(urls, vec![a.url.clone(), b.url.clone()]);
}

#[tokio::test]
async fn test_failed_discovery_leaves_pool_untouched() {
    let a = MockNode::start("a").await;
    let client = Client::simple(quiet_config(&[&a.url])).unwrap();

    let err = client.discover(&RequestContext::background()).await.unwrap_err();
    assert!(matches!(err, Error::NoNodesFound));
    assert_eq!(err.to_string(), "no nodes found");

    let nodes = client.nodes();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].url, a.url);
    assert_eq!(nodes[0].node_id, None);
}

#[tokio::test]
async fn test_filter_rejecting_everything_leaves_pool_untouched() {
    let a = MockNode::start("a").await;
    a.advertise(&[("a", a.addr.as_str())]);
    let client = Client::builder(quiet_config(&[&a.url]))
        .node_filter(|_| false)
        .build_simple()
        .unwrap();

    let err = client.discover(&RequestContext::background()).await.unwrap_err();
    assert!(matches!(err, Error::NoNodesFound));
    assert_eq!(client.nodes()[0].node_id, None);
}

#[tokio::test]
async fn test_first_discovery_answer_wins() {
    let slow = MockNode::start("slow").await;
    let fast = MockNode::start("fast").await;
    slow.advertise(&[("s", slow.addr.as_str())]);
    slow.set_nodes_delay(Duration::from_millis(300));
    fast.advertise(&[("f", fast.addr.as_str())]);

    let client = Client::simple(quiet_config(&[&slow.url, &fast.url])).unwrap();
    client.discover(&RequestContext::background()).await.unwrap();

    assert_eq!(client.nodes()[0].node_id.as_deref(), Some("f"));
}

#[tokio::test]
async fn test_discovery_on_outage() {
    let a = MockNode::start("a").await;
    a.advertise(&[("a", a.addr.as_str())]);
    let mut config = cluster_config(&[&a.url]);
    config.health_check.enabled = false;
    config.sniffer.interval_ms = 0;
    config.sniffer.on_outage = true;

    config.max_retries = 2;
    let transport = FailingTransport::failing_first("/flaky", 2);

    let client = Client::builder(config)
        .transport(transport.clone())
        .build()
        .await
        .unwrap();
    // Both attempts reach the lone node; it is marked dead once retries run out
    assert!(matches!(
        client.perform(Request::get("/flaky")).await,
        Err(Error::Transport { .. })
    ));
    assert_eq!(transport.failures.load(Ordering::SeqCst), 2);
    assert!(client.nodes()[0].dead);

    // The first attempt finds no live node and re-sniffs; the retry goes out
    let before = a.requests();
    client.perform(Request::get("/flaky")).await.unwrap();
    assert_eq!(a.requests(), before + 2);
    assert_eq!(transport.failures.load(Ordering::SeqCst), 3);

    client.stop().await;
}

// ---------------------------------------------------------------------------
// Health checks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_check_marks_unreachable_nodes() {
    let live = MockNode::start("live").await;
    let client = Client::simple(quiet_config(&[&live.url, "http://127.0.0.1:1"])).unwrap();

    let report = client.health_check(&RequestContext::background()).await;
    assert_eq!(report.healthy, 1);
    assert_eq!(report.unhealthy, 1);
    assert_eq!(report.skipped, 0);

    let stats = client.pool_stats();
    assert_eq!((stats.alive, stats.dead, stats.total), (1, 1, 2));
}

#[tokio::test]
async fn test_health_check_treats_error_status_as_dead() {
    let node = MockNode::start("sick").await;
    node.set_root_status(503);
    let client = Client::simple(quiet_config(&[&node.url])).unwrap();

    let report = client.health_check(&RequestContext::background()).await;
    assert_eq!(report.unhealthy, 1);
    assert!(client.nodes()[0].dead);

    node.set_root_status(200);
    client.health_check(&RequestContext::background()).await;
    assert!(!client.nodes()[0].dead);
}

#[tokio::test]
async fn test_background_health_check_revives_node() {
    let node = MockNode::start("only").await;
    let mut config = cluster_config(&[&node.url]);
    config.sniffer.enabled = false;
    config.health_check.interval_ms = 100;

    let client = Client::builder(config)
        .transport(FailingTransport::failing_first("/flaky", 1))
        .build()
        .await
        .unwrap();
    assert!(client.perform(Request::get("/flaky")).await.is_err());

    let revived = wait_until(Duration::from_secs(3), || !client.nodes()[0].dead).await;
    assert!(revived);

    client.stop().await;
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_startup_times_out_without_reachable_node() {
    let mut config = cluster_config(&["http://127.0.0.1:1"]);
    config.sniffer.enabled = false;
    config.health_check.startup_timeout_ms = 1500;

    let start = Instant::now();
    let err = Client::new(config).await.unwrap_err();
    assert!(matches!(err, Error::HealthCheckTimeout(_)));
    assert!(err.is_connection_error());
    assert!(err.to_string().to_lowercase().contains("refused"), "{}", err);
    assert!(start.elapsed() >= Duration::from_millis(1400));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_startup_fails_fast_on_unauthorized() {
    let node = MockNode::start("locked").await;
    node.set_root_status(401);
    let mut config = cluster_config(&[&node.url]);
    config.health_check.startup_timeout_ms = 10_000;

    let start = Instant::now();
    let err = Client::new(config).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_startup_propagates_sniff_failure() {
    let node = MockNode::start("empty").await;
    let err = Client::new(cluster_config(&[&node.url])).await.unwrap_err();
    assert!(matches!(err, Error::NoNodesFound));
}

#[tokio::test]
async fn test_startup_checks_required_plugins() {
    let node = MockNode::start("only").await;
    node.set_plugins(&["analysis-icu"]);

    let mut config = cluster_config(&[&node.url]);
    config.sniffer.enabled = false;
    config.required_plugins = vec!["analysis-icu".into()];
    let client = Client::new(config.clone()).await.unwrap();
    client.stop().await;

    config.required_plugins = vec!["analysis-icu".into(), "no-such-plugin".into()];
    let err = Client::new(config).await.unwrap_err();
    assert!(matches!(err, Error::PluginNotFound(_)));
    assert_eq!(err.to_string(), "plugin no-such-plugin not found");
}

#[tokio::test]
async fn test_startup_respects_caller_context() {
    let mut config = cluster_config(&["http://127.0.0.1:1"]);
    config.health_check.startup_timeout_ms = 10_000;

    let ctx = RequestContext::with_timeout(Duration::from_millis(300));
    let start = Instant::now();
    let err = Client::builder(config)
        .build_with_context(&ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
    assert!(start.elapsed() < Duration::from_secs(2));
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let node = MockNode::start("only").await;
    node.advertise(&[("n", node.addr.as_str())]);
    let client = Client::new(cluster_config(&[&node.url])).await.unwrap();

    assert!(client.is_running());
    client.start();
    assert!(client.is_running());

    client.stop().await;
    assert!(!client.is_running());
    client.stop().await;
    assert!(!client.is_running());

    client.start();
    assert!(client.is_running());
    client.stop().await;
}

#[tokio::test]
async fn test_background_sniff_picks_up_new_nodes() {
    let a = MockNode::start("a").await;
    let b = MockNode::start("b").await;
    a.advertise(&[("a", a.addr.as_str())]);
    let mut config = cluster_config(&[&a.url]);
    config.sniffer.interval_ms = 100;

    let client = Client::new(config).await.unwrap();
    assert_eq!(client.pool_stats().total, 1);

    a.advertise(&[("a", a.addr.as_str()), ("b", b.addr.as_str())]);
    let grown = wait_until(Duration::from_secs(3), || client.pool_stats().total == 2).await;
    assert!(grown);

    client.stop().await;
}

#[tokio::test]
async fn test_stop_interrupts_inflight_probe() {
    let node = MockNode::start("only").await;
    let mut config = cluster_config(&[&node.url]);
    config.sniffer.enabled = false;
    config.health_check.interval_ms = 50;
    config.health_check.timeout_ms = 30_000;

    let client = Client::new(config).await.unwrap();
    node.set_root_delay(Duration::from_secs(10));
    let started = node.root_started();
    let probing = wait_until(Duration::from_secs(3), || node.root_started() > started).await;
    assert!(probing);

    let start = Instant::now();
    client.stop().await;
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!client.is_running());

    // An abandoned probe says nothing about the node
    assert!(!client.nodes()[0].dead);

    // The server sees the connection go away and drops its handler
    let abandoned = wait_until(Duration::from_secs(5), || node.root_abandoned() > 0).await;
    assert!(abandoned);
}

#[tokio::test]
async fn test_stop_interrupts_inflight_discovery() {
    let node = MockNode::start("only").await;
    node.advertise(&[("only", node.addr.as_str())]);
    let mut config = cluster_config(&[&node.url]);
    config.health_check.enabled = false;
    config.sniffer.interval_ms = 50;
    config.sniffer.timeout_ms = 30_000;

    let client = Client::new(config).await.unwrap();
    node.set_nodes_delay(Duration::from_secs(10));
    let started = node.nodes_started();
    let sniffing = wait_until(Duration::from_secs(3), || node.nodes_started() > started).await;
    assert!(sniffing);

    let start = Instant::now();
    client.stop().await;
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!client.is_running());
    assert_eq!(client.nodes().len(), 1);

    let abandoned = wait_until(Duration::from_secs(5), || node.nodes_abandoned() > 0).await;
    assert!(abandoned);
}
