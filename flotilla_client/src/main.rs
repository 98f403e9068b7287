//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p flotilla_client -- [--addr 127.0.0.1:40000] [--join <alias>]
//!
//! Without `--join` a fresh match is created and its alias printed; a second
//! client can then join it. Both ready up and log match updates.

use std::env;

use flotilla_client::ClientSession;
use flotilla_shared::prelude::EngineConfig;
use tracing::info;

struct Args {
    cfg: EngineConfig,
    join: Option<String>,
}

fn parse_args() -> Args {
    let mut cfg = EngineConfig::default();
    let mut join = None;
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--join" if i + 1 < args.len() => {
                join = Some(args[i + 1].clone());
                i += 2;
            }
            _ => i += 1,
        }
    }
    Args { cfg, join }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let mut session = ClientSession::connect(args.cfg).await?;
    info!(user = %session.user_id, "registered");

    let alias = match &args.join {
        Some(alias) => {
            let alias = session.load_match(alias).await?;
            session.join().await?;
            alias
        }
        None => session.create_match().await?,
    };
    info!(alias = %alias, "in match, join with --join {alias}");

    session.ready()?;
    session.request_spawn()?;

    loop {
        if !session.pump_one().await? {
            info!("connection closed");
            return Ok(());
        }
        if let Some(m) = session.current_match() {
            let store = m.store().get();
            info!(
                state = ?store.state,
                turn = store.current_turn,
                active = ?store.active_player,
                countdown = ?store.countdown,
                "match update"
            );
        }
    }
}
