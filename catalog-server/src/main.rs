//! # Catalog Server Binary
//!
//! Entry point for the catalog server: loads configuration, builds the
//! `axum::Router` via `create_server`, and serves it.
//!
//! ## Usage
//!
//! ```bash
//! catalog-server --config config.toml --sources catalog-sources.yaml
//! catalog-server --config config.toml --sources base.yaml --sources team-overrides.yaml
//! ```

use clap::Parser;
use std::net::SocketAddr;

use catalog_server::config::Config;
use catalog_server::create_server;

/// Command line arguments for the catalog server binary.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the server configuration file (TOML).
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// One or more catalog source-set documents (YAML), merged in order
    /// with later files overriding earlier ones field-by-field per source
    /// id. Overrides `[sources] paths` in the config file when given.
    #[arg(long = "sources")]
    sources: Vec<String>,

    /// Port number for the HTTP server. Overrides `[server] port`.
    #[arg(short, long)]
    port: Option<u16>,

    /// Host address to bind the server to. Overrides `[server] host`.
    #[arg(long)]
    host: Option<String>,

    /// Logging level. Available: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt().with_env_filter(&args.log_level).init();

    let mut config = Config::load(&args.config)?;
    if !args.sources.is_empty() {
        config.sources.paths = args.sources;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    config.validate()?;

    let app = create_server(config.clone()).await?;

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!(%addr, "starting catalog server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
