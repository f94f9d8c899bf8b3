mod api;
mod cache;
mod config;
mod mcp_api;
mod models;
mod pricing;
mod render;
mod stdio;
mod tools;
mod upstream;

use std::sync::Arc;

use anyhow::Result;
use cache::SystemClock;
use clap::Parser;
use config::Config;
use mcp_api::Dispatcher;
use tools::QueryService;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use upstream::HttpProvider;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub dispatcher: Arc<Dispatcher>,
}

/// Diamond pricing MCP server
#[derive(Parser, Debug)]
#[command(name = "diamond-pricing-mcp", version, about)]
struct Args {
    /// Serve newline-delimited JSON-RPC on stdin/stdout (default)
    #[arg(long, conflicts_with = "http")]
    stdio: bool,

    /// Serve JSON-RPC over HTTP
    #[arg(long)]
    http: bool,

    /// HTTP port, overrides the configured bind port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let http = args.http && !args.stdio;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "diamond_pricing_mcp=info,tower_http=info".into());

    // stdout belongs to the protocol on stdio
    if http {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.bind_addr.set_port(port);
    }

    let provider = HttpProvider::new(&config.upstream_base_url, config.upstream_timeout())?;
    let queries = QueryService::new(
        Arc::new(provider),
        config.cache_ttl(),
        Arc::new(SystemClock),
    );
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(queries), config.log_payloads));

    if http {
        let state = AppState {
            config: config.clone(),
            dispatcher,
        };
        let app = api::router(state);

        let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
        info!(
            "diamond-pricing-mcp listening on http://{} (upstream {})",
            config.bind_addr, config.upstream_base_url
        );
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        info!(
            "diamond-pricing-mcp starting on stdio (upstream {})",
            config.upstream_base_url
        );
        stdio::serve(&dispatcher, shutdown_signal()).await?;
    }

    info!("diamond-pricing-mcp stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutting down...");
}
