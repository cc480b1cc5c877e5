//! The server's entry point: parse the launch surface, initialize logging,
//! and hand off to the accept loop.

use anyhow::Result;
use respkv::config::ServerConfig;
use std::env;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = match ServerConfig::from_args(args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = respkv::server::run(config).await {
        error!("server error: {e}");
        std::process::exit(1);
    }

    Ok(())
}
