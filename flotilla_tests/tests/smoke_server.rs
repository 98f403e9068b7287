use flotilla_client::GameClient;
use flotilla_shared::prelude::EngineConfig;
use flotilla_tests::{init_tracing, spawn_server};

/// Smoke test: the server accepts a connection and completes the handshake.
#[tokio::test]
async fn server_accepts_and_welcomes_a_client() -> anyhow::Result<()> {
    init_tracing();

    let (cfg, handle) = spawn_server(EngineConfig::default()).await?;
    let client = GameClient::connect(&cfg).await?;
    assert!(client.is_open());
    assert!(client.connection_id.0 > 0);

    handle.abort();
    Ok(())
}
