//! Heartbeat/liveness: a connection that never pongs is reaped.

use std::time::Duration;

use flotilla_shared::prelude::*;
use flotilla_shared::protocol::framed;
use flotilla_tests::{init_tracing, spawn_server};
use tokio::net::TcpStream;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_connection_is_terminated_after_the_kill_timeout() -> anyhow::Result<()> {
    init_tracing();

    let (cfg, server) = spawn_server(EngineConfig {
        kill_timeout_ms: 300,
        ..Default::default()
    })
    .await?;

    let stream = TcpStream::connect(cfg.server_addr.as_str()).await?;
    let (mut reader, mut writer) = framed(stream);
    writer
        .send(&ClientFrame::Hello {
            protocol: PROTOCOL_VERSION,
        })
        .await?;

    // Expect Welcome and Ping, then go silent; the server must reap us.
    let deadline = Duration::from_secs(3);
    let outcome = tokio::time::timeout(deadline, async {
        let mut got_ping = false;
        loop {
            match reader.recv::<ServerFrame>().await {
                Ok(ServerFrame::Welcome { .. }) => {}
                Ok(ServerFrame::Ping) => got_ping = true,
                Ok(ServerFrame::Disconnect { .. }) => return Ok::<_, anyhow::Error>(got_ping),
                // The server may drop the socket right after the disconnect.
                Err(_) => return Ok(got_ping),
                Ok(other) => anyhow::bail!("unexpected frame {other:?}"),
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("server never terminated the silent connection"))??;

    assert!(outcome, "expected at least one ping before the kill");
    server.abort();
    Ok(())
}
