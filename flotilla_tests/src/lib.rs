//! Shared helpers for the integration tests.

use anyhow::Context;
use flotilla_server::{bind_ephemeral, GameServer};
use flotilla_shared::prelude::EngineConfig;
use tokio::task::JoinHandle;

/// Installs the test tracing subscriber; repeated calls are fine.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Binds a server on an ephemeral port and runs it in the background.
/// Returns the config pointing at the bound address.
pub async fn spawn_server(
    mut cfg: EngineConfig,
) -> anyhow::Result<(EngineConfig, JoinHandle<anyhow::Result<()>>)> {
    let mut server: GameServer = bind_ephemeral(cfg.clone()).await.context("bind server")?;
    cfg.server_addr = server.cfg.server_addr.clone();
    let handle = tokio::spawn(async move { server.run().await });
    Ok((cfg, handle))
}
