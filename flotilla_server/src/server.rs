//! Server implementation.
//!
//! One process hosts any number of matches authoritatively. The loop is a
//! single task: per-connection reader tasks feed frames into it, RPC
//! handlers mutate the world, and the simulation pushes replication
//! messages through the outbound channel which this loop fans out per
//! connection.
//!
//! Concurrency model: interleaving of independent connections, not
//! parallelism. RPCs are processed in raw message-arrival order; there is
//! no turn lock beyond the active-player gate inside each action's own
//! validation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use flotilla_shared::match_::Caller;
use flotilla_shared::net::{OutboundMessage, GAMEOBJECT_SPAWN_EVENT};
use flotilla_shared::prelude::*;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::ClientConnection;
use crate::users::UserRegistry;

/// Everything the RPC handlers mutate.
pub struct ServerWorld {
    pub users: UserRegistry,
    pub matches: HashMap<MatchId, Match>,
    aliases: HashMap<String, MatchId>,
    start_countdown: Duration,
    turn_length: Duration,
    outbound: UnboundedSender<Outbound>,
}

impl ServerWorld {
    pub fn new(cfg: &EngineConfig, outbound: UnboundedSender<Outbound>) -> Self {
        Self {
            users: UserRegistry::default(),
            matches: HashMap::new(),
            aliases: HashMap::new(),
            start_countdown: Duration::from_millis(cfg.start_countdown_ms),
            turn_length: Duration::from_millis(cfg.turn_ms),
            outbound,
        }
    }

    /// The caller identity of a connection; requires a registered user.
    pub fn caller(&self, connection: ConnectionId) -> Result<Caller, GameError> {
        let user = self
            .users
            .by_connection(connection)
            .ok_or_else(|| GameError::NotFound(format!("user for connection {connection}")))?;
        Ok(Caller {
            connection,
            user: user.id,
        })
    }

    pub fn match_by_alias_mut(&mut self, alias: &str) -> Option<&mut Match> {
        let id = self.aliases.get(alias)?;
        self.matches.get_mut(id)
    }

    /// Finds the match whose identity map knows the network id.
    pub fn resolve_instance(&self, network_id: NetworkId) -> Option<(MatchId, NetworkAddress)> {
        self.matches
            .values()
            .find_map(|m| m.resolve(network_id).map(|addr| (m.id, addr)))
    }

    /// Hosts a fresh match for the calling user under a generated alias.
    pub fn create_match(&mut self, caller: Caller) -> Result<MatchData, GameError> {
        let alias: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(7)
            .map(char::from)
            .collect();

        let battlefield = flotilla_shared::battlefield::Battlefield::pacific_ocean()
            .data()
            .clone();
        let m = Match::host(
            &alias,
            battlefield,
            caller,
            self.start_countdown,
            self.turn_length,
            self.outbound.clone(),
        )?;
        let data = m.to_data();

        self.aliases.insert(alias, m.id);
        self.matches.insert(m.id, m);
        Ok(data)
    }

    /// Resolves a match by alias and re-binds the caller into it.
    pub fn load_match(&mut self, alias: &str, caller: Caller) -> Result<MatchData, GameError> {
        let previous = self
            .users
            .get(caller.user)
            .and_then(|u| u.previous_connection);

        let m = self
            .match_by_alias_mut(alias)
            .ok_or_else(|| GameError::NotFound(format!("match '{alias}'")))?;
        m.acknowledge_player(caller, previous);
        Ok(m.to_data())
    }
}

fn first_arg(params: &RpcParams) -> Value {
    params.args.first().cloned().unwrap_or(Value::Null)
}

/// Resolves the instance addressed by the params and hands it to the body.
fn with_instance<F>(
    world: &mut ServerWorld,
    params: &RpcParams,
    connection: ConnectionId,
    f: F,
) -> Result<Value, GameError>
where
    F: FnOnce(&mut Match, NetworkAddress, Caller) -> Result<Value, GameError>,
{
    let caller = world.caller(connection)?;
    let network_id = params
        .network_id
        .ok_or_else(|| GameError::BadRequest("missing network id".into()))?;
    let (match_id, address) = world
        .resolve_instance(network_id)
        .ok_or_else(|| GameError::NotFound(format!("instance '{network_id}'")))?;
    let m = world
        .matches
        .get_mut(&match_id)
        .expect("resolved match exists");
    f(m, address, caller)
}

/// Registers every RPC handler once per world.
pub fn register_handlers(registry: &mut RpcRegistry<ServerWorld>) {
    registry.register(
        methods::USER_REGISTER,
        Box::new(|world, _params, connection| {
            let id = world.users.register(connection);
            Ok(json!({ "id": id }))
        }),
    );

    registry.register(
        methods::USER_ACKNOWLEDGE,
        Box::new(|world, params, connection| {
            let id: PlayerId = flotilla_shared::rpc::arg(&params, 0)?;
            let user = world.users.acknowledge(id, connection);
            Ok(json!({ "id": user.id }))
        }),
    );

    registry.register(
        methods::MATCH_CREATE,
        Box::new(|world, _params, connection| {
            let caller = world.caller(connection)?;
            let data = world.create_match(caller)?;
            Ok(serde_json::to_value(data).expect("serialize match"))
        }),
    );

    registry.register(
        methods::MATCH_LOAD,
        Box::new(|world, params, connection| {
            let alias: String = flotilla_shared::rpc::arg(&params, 0)?;
            let caller = world.caller(connection)?;
            let data = world.load_match(&alias, caller)?;
            Ok(serde_json::to_value(data).expect("serialize match"))
        }),
    );

    registry.register(
        methods::MATCH_START,
        Box::new(|world, params, connection| {
            with_instance(world, &params, connection, |m, _, caller| {
                m.start(first_arg(&params), Some(caller))
            })
        }),
    );

    registry.register(
        methods::MATCH_REGISTER_PLAYER,
        Box::new(|world, params, connection| {
            with_instance(world, &params, connection, |m, _, caller| {
                m.register_player(first_arg(&params), Some(caller))
            })
        }),
    );

    registry.register(
        methods::MATCH_UNREGISTER_PLAYER,
        Box::new(|world, params, connection| {
            with_instance(world, &params, connection, |m, _, caller| {
                m.unregister_player(first_arg(&params), Some(caller))
            })
        }),
    );

    registry.register(
        methods::MATCH_SPAWN_GAME_OBJECTS,
        Box::new(|world, params, connection| {
            with_instance(world, &params, connection, |m, _, caller| {
                m.request_spawn(first_arg(&params), Some(caller))
            })
        }),
    );

    registry.register(
        methods::MATCH_END_TURN,
        Box::new(|world, params, connection| {
            with_instance(world, &params, connection, |m, _, caller| {
                m.end_turn(first_arg(&params), Some(caller))
            })
        }),
    );

    registry.register(
        methods::PLAYER_READY,
        Box::new(|world, params, connection| {
            with_instance(world, &params, connection, |m, address, caller| {
                match address {
                    NetworkAddress::Player(id) => m.player_ready(id, Some(caller)),
                    _ => Err(GameError::BadRequest("expected a player instance".into())),
                }
            })
        }),
    );

    registry.register(
        methods::PLAYER_UNREADY,
        Box::new(|world, params, connection| {
            with_instance(world, &params, connection, |m, address, caller| {
                match address {
                    NetworkAddress::Player(id) => m.player_unready(id, Some(caller)),
                    _ => Err(GameError::BadRequest("expected a player instance".into())),
                }
            })
        }),
    );

    registry.register(
        methods::MOVEABLE_MOVE,
        Box::new(|world, params, connection| {
            with_instance(world, &params, connection, |m, address, caller| {
                match address {
                    NetworkAddress::Component { entity, .. } => {
                        m.move_action(entity, first_arg(&params), Some(caller))
                    }
                    _ => Err(GameError::BadRequest("expected a component instance".into())),
                }
            })
        }),
    );

    registry.register(
        methods::GUN_ATTACK_ATTACK,
        Box::new(|world, params, connection| {
            with_instance(world, &params, connection, |m, address, caller| {
                match address {
                    NetworkAddress::Component { entity, .. } => {
                        m.attack_action(entity, first_arg(&params), Some(caller))
                    }
                    _ => Err(GameError::BadRequest("expected a component instance".into())),
                }
            })
        }),
    );
}

/// Frames or lifecycle events arriving from a connection's reader task.
#[derive(Debug)]
enum InboundEvent {
    Frame(ClientFrame),
    Closed,
}

enum Step {
    Accept(anyhow::Result<(FrameReader, FrameWriter, SocketAddr)>),
    Inbound(ConnectionId, InboundEvent),
    Outbound(Outbound),
    Tick,
}

/// Authoritative game server.
pub struct GameServer {
    pub cfg: EngineConfig,
    listener: FrameListener,
    connections: HashMap<ConnectionId, ClientConnection>,
    next_connection_id: u32,
    world: ServerWorld,
    registry: RpcRegistry<ServerWorld>,
    inbound_tx: UnboundedSender<(ConnectionId, InboundEvent)>,
    inbound_rx: UnboundedReceiver<(ConnectionId, InboundEvent)>,
    outbound_rx: UnboundedReceiver<Outbound>,
}

impl GameServer {
    pub async fn new(cfg: EngineConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = FrameListener::bind(addr).await?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let mut registry = RpcRegistry::new();
        register_handlers(&mut registry);

        Ok(Self {
            world: ServerWorld::new(&cfg, outbound_tx),
            cfg,
            listener,
            connections: HashMap::new(),
            next_connection_id: 1,
            registry,
            inbound_tx,
            inbound_rx,
            outbound_rx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn world(&self) -> &ServerWorld {
        &self.world
    }

    /// Runs the accept/dispatch/tick loop until the task is cancelled.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let tick = Duration::from_secs_f64(1.0 / self.cfg.tick_hz as f64);
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                accepted = self.listener.accept() => Step::Accept(accepted),
                event = self.inbound_rx.recv() => match event {
                    Some((id, event)) => Step::Inbound(id, event),
                    None => continue,
                },
                outbound = self.outbound_rx.recv() => match outbound {
                    Some(outbound) => Step::Outbound(outbound),
                    None => continue,
                },
                _ = ticker.tick() => Step::Tick,
            };

            match step {
                Step::Accept(accepted) => {
                    let (reader, writer, peer) = accepted?;
                    self.on_accept(reader, writer, peer);
                }
                Step::Inbound(id, event) => self.on_inbound(id, event).await,
                Step::Outbound(outbound) => self.on_outbound(outbound).await,
                Step::Tick => self.on_tick(tick).await,
            }
        }
    }

    fn on_accept(&mut self, mut reader: FrameReader, writer: FrameWriter, peer: SocketAddr) {
        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;

        let kill_timeout = Duration::from_millis(self.cfg.kill_timeout_ms);
        self.connections
            .insert(id, ClientConnection::new(id, peer, writer, kill_timeout));

        let inbound = self.inbound_tx.clone();
        tokio::spawn(async move {
            loop {
                match reader.recv::<ClientFrame>().await {
                    Ok(frame) => {
                        if inbound.send((id, InboundEvent::Frame(frame))).is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        let _ = inbound.send((id, InboundEvent::Closed));
                        break;
                    }
                }
            }
        });

        info!(client_id = %id, %peer, "connection accepted");
    }

    async fn on_inbound(&mut self, id: ConnectionId, event: InboundEvent) {
        let frame = match event {
            InboundEvent::Frame(frame) => frame,
            InboundEvent::Closed => {
                self.disconnect(id, "connection closed").await;
                return;
            }
        };

        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };

        if !conn.is_ready() {
            match frame {
                ClientFrame::Hello { protocol } if protocol == PROTOCOL_VERSION => {
                    conn.mark_ready();
                    let welcome = ServerFrame::Welcome { connection_id: id };
                    if conn.send(&welcome).await.is_err() || conn.ping().await.is_err() {
                        self.disconnect(id, "handshake write failed").await;
                        return;
                    }
                    info!(client_id = %id, "client connected");
                }
                other => {
                    warn!(client_id = %id, frame = ?other, "unexpected handshake frame");
                    self.disconnect(id, "bad handshake").await;
                }
            }
            return;
        }

        match frame {
            ClientFrame::Hello { .. } => {
                debug!(client_id = %id, "duplicate hello ignored");
            }
            ClientFrame::Subscribe { event } => conn.subscribe(&event),
            ClientFrame::Unsubscribe { event } => conn.unsubscribe(&event),
            ClientFrame::Pong => {
                if conn.on_pong().await.is_err() {
                    self.disconnect(id, "heartbeat write failed").await;
                }
            }
            ClientFrame::Rpc {
                id: request,
                method,
                params,
            } => {
                let response = match self.registry.dispatch(&mut self.world, &method, params, id) {
                    Ok(value) => ServerFrame::RpcOk { id: request, value },
                    Err(err) => {
                        warn!(client_id = %id, method = %method, error = %err, "rpc failed");
                        ServerFrame::RpcError {
                            id: request,
                            error: RpcErrorBody::from(&err),
                        }
                    }
                };
                if let Some(conn) = self.connections.get_mut(&id) {
                    if conn.send(&response).await.is_err() {
                        self.disconnect(id, "rpc write failed").await;
                    }
                }
            }
            ClientFrame::Notify { method, params } => {
                if let Err(err) = self.registry.dispatch(&mut self.world, &method, params, id) {
                    warn!(client_id = %id, method = %method, error = %err, "notify failed");
                }
            }
        }
    }

    /// Fans one simulation message out to its target connections.
    async fn on_outbound(&mut self, outbound: Outbound) {
        let Some(m) = self.world.matches.get(&outbound.match_id) else {
            return;
        };

        let sends: Vec<(ConnectionId, String, Value)> = match outbound.message {
            OutboundMessage::MatchUpdate => {
                let payload = json!({ "store": m.to_data().store });
                m.net()
                    .connections()
                    .map(|c| (c, "match.update".to_string(), payload.clone()))
                    .collect()
            }
            OutboundMessage::PlayerUpdate { player } => match m.player(player) {
                Some(p) => {
                    let payload =
                        serde_json::to_value(p.to_data()).expect("serialize player");
                    let name = format!("player.{player}.update");
                    m.net()
                        .connections()
                        .map(|c| (c, name.clone(), payload.clone()))
                        .collect()
                }
                None => Vec::new(),
            },
            OutboundMessage::ComponentDiff {
                entity,
                component,
                state,
            } => {
                match m.net().update_channel_component(m.game().scene(), entity) {
                    Some(channel) => {
                        let name = format!("{}.update", channel.0);
                        let payload = json!({ "id": component, "state": state });
                        m.net()
                            .entity_subscribers(entity)
                            .into_iter()
                            .map(|c| (c, name.clone(), payload.clone()))
                            .collect()
                    }
                    None => Vec::new(),
                }
            }
            OutboundMessage::Spawn { target, entity } => {
                let Some(channel) =
                    m.net().update_channel_component(m.game().scene(), entity)
                else {
                    return;
                };
                // Flat per-entity snapshots; the client re-links parents.
                let Some(snapshot) =
                    m.game().scene().snapshot_entity(entity, false, Role::Server)
                else {
                    return;
                };

                self.resolve_targets(m, target)
                    .into_iter()
                    .map(|c| {
                        let payload = json!({
                            "gameObject": snapshot_with_owner(&snapshot, c),
                            "networkId": NetworkId(channel.0),
                        });
                        (c, GAMEOBJECT_SPAWN_EVENT.to_string(), payload)
                    })
                    .collect()
            }
            OutboundMessage::Event {
                target,
                name,
                payload,
            } => self
                .resolve_targets(m, target)
                .into_iter()
                .map(|c| (c, name.clone(), payload.clone()))
                .collect(),
        };

        let mut failed = Vec::new();
        for (cid, name, payload) in sends {
            if let Some(conn) = self.connections.get_mut(&cid) {
                if conn.emit(&name, &payload).await.is_err() {
                    failed.push(cid);
                }
            }
        }
        for cid in failed {
            self.disconnect(cid, "event write failed").await;
        }
    }

    fn resolve_targets(&self, m: &Match, target: EventTarget) -> Vec<ConnectionId> {
        match target {
            EventTarget::All => m.net().connections().collect(),
            EventTarget::One(c) => vec![c],
            EventTarget::Subscribers(entity) => m.net().entity_subscribers(entity),
        }
    }

    /// One fixed simulation step: advance every match and reap dead
    /// connections.
    async fn on_tick(&mut self, dt: Duration) {
        for m in self.world.matches.values_mut() {
            m.tick(dt);
        }

        let now = Instant::now();
        let expired: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.is_expired(now))
            .map(|c| c.id)
            .collect();
        for id in expired {
            info!(client_id = %id, "connection terminated, heartbeat expired");
            self.disconnect(id, "heartbeat timeout").await;
        }
    }

    async fn disconnect(&mut self, id: ConnectionId, reason: &str) {
        let Some(mut conn) = self.connections.remove(&id) else {
            return;
        };
        let _ = conn
            .send(&ServerFrame::Disconnect {
                reason: reason.to_string(),
            })
            .await;

        self.world.users.on_disconnect(id);
        for m in self.world.matches.values_mut() {
            m.on_client_disconnected(id);
        }
        info!(client_id = %id, reason, "client disconnected");
    }
}

/// Maps the authoritative `ownerId` in a snapshot to the receiving client's
/// `isOwner` view, recursively.
fn snapshot_with_owner(snapshot: &EntitySnapshot, client: ConnectionId) -> EntitySnapshot {
    let mut mapped = snapshot.clone();
    for component in mapped.components.iter_mut() {
        if let Some(owner) = component.owner_id.take() {
            component.is_owner = Some(owner == client);
        }
    }
    if let Some(children) = &snapshot.children {
        mapped.children = Some(
            children
                .iter()
                .map(|child| snapshot_with_owner(child, client))
                .collect(),
        );
    }
    mapped
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(mut cfg: EngineConfig) -> anyhow::Result<GameServer> {
    cfg.server_addr = "127.0.0.1:0".to_string();
    let mut server = GameServer::new(cfg).await?;
    server.cfg.server_addr = server.local_addr()?.to_string();
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> (ServerWorld, RpcRegistry<ServerWorld>) {
        let (tx, _rx) = mpsc::unbounded_channel();
        // The receiver is dropped; sends are best-effort no-ops in tests.
        let world = ServerWorld::new(&EngineConfig::default(), tx);
        let mut registry = RpcRegistry::new();
        register_handlers(&mut registry);
        (world, registry)
    }

    fn rpc_args(args: Vec<Value>, network_id: Option<NetworkId>) -> RpcParams {
        RpcParams { args, network_id }
    }

    #[test]
    fn user_registration_then_match_create_and_load() {
        let (mut world, registry) = world();
        let conn = ConnectionId(1);

        let user = registry
            .dispatch(&mut world, methods::USER_REGISTER, rpc_args(vec![], None), conn)
            .expect("register user");
        let user_id: PlayerId = serde_json::from_value(user["id"].clone()).expect("user id");

        let created = registry
            .dispatch(&mut world, methods::MATCH_CREATE, rpc_args(vec![], None), conn)
            .expect("create match");
        let data: MatchData = serde_json::from_value(created).expect("match data");
        assert_eq!(data.alias.len(), 7);
        assert_eq!(data.store.players[0].id, user_id);
        assert!(data.store.players[0].is_host);

        let loaded = registry
            .dispatch(
                &mut world,
                methods::MATCH_LOAD,
                rpc_args(vec![json!(data.alias)], None),
                conn,
            )
            .expect("load match");
        let loaded: MatchData = serde_json::from_value(loaded).expect("match data");
        assert_eq!(loaded.id, data.id);
    }

    #[test]
    fn rpc_without_registered_user_is_rejected() {
        let (mut world, registry) = world();
        let err = registry
            .dispatch(
                &mut world,
                methods::MATCH_CREATE,
                rpc_args(vec![], None),
                ConnectionId(9),
            )
            .unwrap_err();
        assert!(matches!(err, GameError::NotFound(_)));
    }

    #[test]
    fn instance_rpc_routes_through_the_identity_map() {
        let (mut world, registry) = world();
        let host_conn = ConnectionId(1);
        let guest_conn = ConnectionId(2);

        registry
            .dispatch(&mut world, methods::USER_REGISTER, rpc_args(vec![], None), host_conn)
            .expect("register host");
        let guest = registry
            .dispatch(&mut world, methods::USER_REGISTER, rpc_args(vec![], None), guest_conn)
            .expect("register guest");
        let guest_id: PlayerId = serde_json::from_value(guest["id"].clone()).expect("id");

        let created = registry
            .dispatch(&mut world, methods::MATCH_CREATE, rpc_args(vec![], None), host_conn)
            .expect("create");
        let data: MatchData = serde_json::from_value(created).expect("data");
        let match_nid = NetworkId(data.id.0);

        registry
            .dispatch(
                &mut world,
                methods::MATCH_LOAD,
                rpc_args(vec![json!(data.alias)], None),
                guest_conn,
            )
            .expect("guest load");

        let joined = registry
            .dispatch(
                &mut world,
                methods::MATCH_REGISTER_PLAYER,
                rpc_args(vec![json!(guest_id)], Some(match_nid)),
                guest_conn,
            )
            .expect("guest join");
        let joined: PlayerData = serde_json::from_value(joined).expect("player");
        assert_eq!(joined.id, guest_id);
        assert_eq!(joined.store.position, 1);

        // Player-instance RPC: ready via the player's own network id.
        registry
            .dispatch(
                &mut world,
                methods::PLAYER_READY,
                rpc_args(vec![], Some(NetworkId(guest_id.0))),
                guest_conn,
            )
            .expect("guest ready");

        let m = world.matches.values().next().expect("match");
        assert!(m.player(guest_id).unwrap().store.get().is_ready);
    }

    #[test]
    fn unknown_instance_produces_a_structured_error() {
        let (mut world, registry) = world();
        let conn = ConnectionId(1);
        registry
            .dispatch(&mut world, methods::USER_REGISTER, rpc_args(vec![], None), conn)
            .expect("register");

        let err = registry
            .dispatch(
                &mut world,
                methods::MATCH_END_TURN,
                rpc_args(vec![], Some(NetworkId::new_unique())),
                conn,
            )
            .unwrap_err();
        assert!(matches!(err, GameError::NotFound(_)));
    }
}
