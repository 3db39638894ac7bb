use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prism_elastic::{Client, ClientBuilder, Config, Loggers, Request, RequestContext};
use reqwest::Method;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "prism-elastic")]
#[command(about = "Cluster-aware Elasticsearch client")]
#[command(version)]
struct Cli {
    /// Seed node URL (repeatable)
    #[arg(short, long = "url", env = "PRISM_ELASTIC_URL")]
    urls: Vec<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Disable topology discovery
    #[arg(long)]
    no_sniff: bool,

    /// Disable health checks
    #[arg(long)]
    no_healthcheck: bool,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Query the root endpoint of every seed
    Ping,

    /// List the nodes currently in the pool
    Nodes,

    /// Send an arbitrary request and print the response body
    Request {
        /// HTTP method
        method: String,

        /// Request path, e.g. /_cluster/health
        path: String,

        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,

        /// Status codes to accept besides 2xx
        #[arg(long = "ignore")]
        ignore: Vec<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn,prism_elastic=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let client = ClientBuilder::new(config)
        .loggers(Loggers::tracing())
        .build()
        .await
        .context("failed to connect to cluster")?;
    let ctx = RequestContext::with_timeout(Duration::from_secs(cli.timeout));

    let outcome = run(&client, &ctx, cli.command).await;
    client.stop().await;
    outcome
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if !cli.urls.is_empty() {
        config.urls = cli.urls.clone();
    }
    if cli.no_sniff {
        config.sniffer.enabled = false;
    }
    if cli.no_healthcheck {
        config.health_check.enabled = false;
    }
    Ok(config)
}

async fn run(client: &Client, ctx: &RequestContext, command: Commands) -> Result<()> {
    match command {
        Commands::Ping => {
            for url in client.seeds() {
                match client.ping(ctx, url).await {
                    Ok((info, status)) => println!(
                        "{} [status:{}] name={} cluster={} version={}",
                        url, status, info.name, info.cluster_name, info.version.number
                    ),
                    Err(e) => println!("{} unreachable: {}", url, e),
                }
            }
        }
        Commands::Nodes => {
            let stats = client.pool_stats();
            println!("{} nodes ({} alive, {} dead)", stats.total, stats.alive, stats.dead);
            for node in client.nodes() {
                println!(
                    "{}\t{}\t{}\tfailures={}",
                    node.node_id.as_deref().unwrap_or("-"),
                    node.url,
                    if node.dead { "dead" } else { "alive" },
                    node.failures
                );
            }
        }
        Commands::Request {
            method,
            path,
            body,
            ignore,
        } => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("invalid method '{}'", method))?;
            let mut request = Request::new(method, path).ignore(&ignore);
            if let Some(body) = body {
                let value: serde_json::Value =
                    serde_json::from_str(&body).context("request body is not valid JSON")?;
                request = request.json(&value);
            }
            let response = client.execute(ctx, request).await?;
            eprintln!("status: {}", response.status());
            println!("{}", response.text());
        }
    }
    Ok(())
}
