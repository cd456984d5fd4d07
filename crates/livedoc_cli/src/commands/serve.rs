//! Serve command implementation.

use super::load_registry;
use livedoc_server::{tcp, LiveServer, ServerConfig};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Runs the serve command until interrupted.
pub fn run(models: &Path, config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = load_registry(models)?;
    info!(models = ?registry.names(), "models loaded");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let server = Arc::new(LiveServer::new(config, registry));
        tcp::serve(server, listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
