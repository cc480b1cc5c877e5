//! Server bootstrap: binds the listener, starts the master link when
//! configured as a replica, and runs the accept loop.

mod connection_loop;
mod state;

pub use state::ServerState;

use crate::config::{Role, ServerConfig};
use crate::replication::run_master_link;
use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Runs the server until the listener itself fails to bind. Per-connection
/// and per-replica errors are logged and never tear down the process.
pub async fn run(config: ServerConfig) -> Result<()> {
    let port = config.port;
    let role = config.role;
    let master_addr = config.master_addr;

    let state = Arc::new(ServerState::new(config));
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("listening on port {port} as {role:?}");

    if let (Role::Replica, Some(master_addr)) = (role, master_addr) {
        let link_state = state.clone();
        tokio::spawn(async move {
            run_master_link(master_addr, port, link_state).await;
        });
    }

    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let conn_state = state.clone();
                tokio::spawn(async move {
                    connection_loop::handle_connection(socket, addr, conn_state).await;
                });
            }
            Err(e) => error!("failed to accept connection: {e}"),
        }
    }
}
