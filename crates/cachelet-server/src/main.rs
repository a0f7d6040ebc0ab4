//! cachelet server binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cachelet::{CacheService, CacheletConfig};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cachelet", version, about = "Clustered key-value cache server")]
struct Args {
    /// JSON configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "CACHELET_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind (overrides the config file).
    #[arg(long, env = "CACHELET_HOST")]
    host: Option<String>,

    /// Port to bind (overrides the config file).
    #[arg(short, long, env = "CACHELET_PORT")]
    port: Option<u16>,
}

/// Initialize tracing with CACHELET_LOG and LOG_FORMAT support.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("CACHELET_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!(
            "cachelet={level},cachelet_server={level},cachelet::bridge::codec=warn"
        ))
    };

    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }
}

fn load_config(args: &Args) -> anyhow::Result<CacheletConfig> {
    let mut config = match &args.config {
        Some(path) => CacheletConfig::from_file(path)?,
        None => CacheletConfig::default(),
    };
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = load_config(&args)?;
    tracing::info!(
        version = cachelet::CACHELET_VERSION,
        config = ?args.config,
        "Starting cachelet"
    );

    let service =
        Arc::new(CacheService::from_config(config).context("failed to start cache service")?);
    cachelet::transport::serve(service).await
}
