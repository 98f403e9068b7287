//! Full socket-based integration tests for client <-> server communication.

use std::time::Duration;

use flotilla_client::ClientSession;
use flotilla_shared::component::ComponentKind;
use flotilla_shared::prelude::*;
use flotilla_shared::{gun_attack, moveable};
use flotilla_tests::{init_tracing, spawn_server};

/// Unit-style test: protocol messages roundtrip correctly.
#[test]
fn protocol_messages_roundtrip() -> anyhow::Result<()> {
    use flotilla_shared::protocol::{decode_from_bytes, encode_to_bytes};

    let hello = ClientFrame::Hello {
        protocol: PROTOCOL_VERSION,
    };
    let decoded: ClientFrame = decode_from_bytes(&encode_to_bytes(&hello)?)?;
    assert_eq!(decoded, hello);

    let welcome = ServerFrame::Welcome {
        connection_id: ConnectionId(1),
    };
    let decoded: ServerFrame = decode_from_bytes(&encode_to_bytes(&welcome)?)?;
    assert_eq!(decoded, welcome);

    Ok(())
}

/// Pumps the session until the predicate holds on its match mirror.
async fn wait_until<F>(session: &mut ClientSession, what: &str, predicate: F) -> anyhow::Result<()>
where
    F: Fn(&Match) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if session.current_match().map(&predicate).unwrap_or(false) {
                return Ok::<_, anyhow::Error>(());
            }
            if !session.pump_one().await? {
                anyhow::bail!("connection closed while waiting for {what}");
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for {what}"))?
}

fn owned_ships(m: &Match) -> Vec<EntityId> {
    let scene = m.game().scene();
    scene
        .registry
        .entities_with_tags(&["ship"])
        .into_iter()
        .filter(|id| gun_attack::is_owned_locally(scene, *id))
        .collect()
}

/// Full integration: two clients create/join a match, ready up, start, move
/// a ship through the RPC round trip, and rotate the turn.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_server_full_match_flow() -> anyhow::Result<()> {
    init_tracing();

    let (cfg, server) = spawn_server(EngineConfig {
        start_countdown_ms: 500,
        ..Default::default()
    })
    .await?;

    let mut host = ClientSession::connect(cfg.clone()).await?;
    let alias = host.create_match().await?;
    assert_eq!(alias.len(), 7);

    let mut guest = ClientSession::connect(cfg.clone()).await?;
    let loaded = guest.load_match(&alias).await?;
    assert_eq!(loaded, alias);
    guest.join().await?;

    host.ready()?;
    guest.ready()?;
    wait_until(&mut host, "both players ready", |m| {
        m.players().len() == 2 && m.store().get().can_start
    })
    .await?;

    // Start: Idle -> Started -> (countdown) -> Running with the
    // position-0 player active.
    host.start()?;
    wait_until(&mut host, "match running", |m| {
        m.store().get().state == MatchState::Running
    })
    .await?;
    let store = host.current_match().unwrap().store().get();
    assert_eq!(store.active_player, Some(host.user_id));
    assert_eq!(store.current_turn, 1);
    assert!(store.turn_ends_at.is_some());

    // Late-join resync: one snapshot per entity, ownership mapped per
    // receiving client.
    host.request_spawn()?;
    wait_until(&mut host, "host world spawned", |m| {
        m.game().scene().registry.entities_with_tags(&["ship"]).len() == 10
    })
    .await?;
    assert_eq!(owned_ships(host.current_match().unwrap()).len(), 5);

    guest.request_spawn()?;
    wait_until(&mut guest, "guest world spawned", |m| {
        m.game().scene().registry.entities_with_tags(&["ship"]).len() == 10
    })
    .await?;
    assert_eq!(owned_ships(guest.current_match().unwrap()).len(), 5);

    // Client action flow: begin a move, select a legal field, and let the
    // server-confirmed response drive the client body.
    let ship = owned_ships(host.current_match().unwrap())[0];
    host.current_match_mut().unwrap().begin_move(ship)?;
    let target = moveable::targets(host.current_match().unwrap().game().scene(), ship)?[0];
    host.select_entity(target).await?;

    let field_pos = {
        let scene = host.current_match().unwrap().game().scene();
        scene
            .registry
            .get(target)
            .unwrap()
            .component(ComponentKind::Position)
            .unwrap()
            .as_position()
            .unwrap()
            .cloned()
    };
    wait_until(&mut host, "move replicated", move |m| {
        let scene = m.game().scene();
        scene
            .registry
            .get(ship)
            .and_then(|obj| obj.component(ComponentKind::Position))
            .and_then(|c| c.as_position())
            .is_some_and(|s| s.get().x == field_pos.x && s.get().y == field_pos.y)
    })
    .await?;

    // Turn rotation reaches both mirrors.
    host.end_turn()?;
    let guest_id = guest.user_id;
    wait_until(&mut host, "turn rotated", move |m| {
        m.store().get().active_player == Some(guest_id)
    })
    .await?;
    assert_eq!(host.current_match().unwrap().store().get().current_turn, 2);

    wait_until(&mut guest, "guest sees rotation", move |m| {
        m.store().get().active_player == Some(guest_id)
    })
    .await?;

    server.abort();
    Ok(())
}

/// Joining a match that is already running fails with a structured
/// validation error, not a crash or a silent drop.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn joining_a_running_match_is_rejected() -> anyhow::Result<()> {
    init_tracing();

    let (cfg, server) = spawn_server(EngineConfig {
        start_countdown_ms: 100,
        ..Default::default()
    })
    .await?;

    let mut host = ClientSession::connect(cfg.clone()).await?;
    let alias = host.create_match().await?;

    let mut guest = ClientSession::connect(cfg.clone()).await?;
    guest.load_match(&alias).await?;
    guest.join().await?;

    host.ready()?;
    guest.ready()?;
    host.start()?;
    wait_until(&mut host, "match running", |m| {
        m.store().get().state == MatchState::Running
    })
    .await?;

    // A third user tries to join the running match.
    let mut late = ClientSession::connect(cfg.clone()).await?;
    late.load_match(&alias).await?;
    let before = late.current_match().unwrap().players().len();
    late.join().await?;
    assert_eq!(late.current_match().unwrap().players().len(), before);

    server.abort();
    Ok(())
}
