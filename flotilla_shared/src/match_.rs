//! Match: the turn-based game-state machine built on the simulation core.
//!
//! One match owns one game world. On the server the match is authoritative:
//! RPC bodies validate every action against the world before mutating it.
//! On the client the same bodies run with the server-confirmed response as
//! their input and only maintain local mirror/selection state.
//!
//! State machine: Idle -> Started -> Running -> Finished. Started is the
//! transient countdown phase between `start` and the first turn; no state
//! is ever skipped.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::battlefield::{Battlefield, BattlefieldData, SHIPS_PER_PLAYER};
use crate::component::{Component, ComponentKind};
use crate::error::GameError;
use crate::event::SceneEvent;
use crate::field;
use crate::game::Game;
use crate::gameobject::{EntitySnapshot, GameObjectSeed};
use crate::gun_attack::{self, GunAttackState};
use crate::hitpoints::HitpointsState;
use crate::identity::{
    ComponentId, ConnectionId, EntityId, MatchId, NetworkAddress, NetworkId, PlayerId, Role,
    RuntimeContext,
};
use crate::inventory::InventoryState;
use crate::item;
use crate::moveable::{self, MoveableState};
use crate::net::{EventTarget, NetworkManager, Outbound, OutboundMessage};
use crate::network_component::NetworkObjectState;
use crate::player::{Player, PlayerColor, PlayerData};
use crate::position::PositionState;
use crate::rpc::{methods, RpcMode};
use crate::selectable::{self, SelectableState};
use crate::ship::{self, ShipState};
use crate::store::Store;
use crate::supply_crate::CrateState;
use crate::targetable::{self, TargetableState};
use crate::timer::Timer;

/// Crates rolled per board row.
const CRATES_PER_ROW: usize = 2;

/// Match lifecycle. Serialized as the numeric codes the wire has always
/// used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    Idle,
    Started,
    Running,
    Finished,
}

impl Serialize for MatchState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for MatchState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(MatchState::Idle),
            1 => Ok(MatchState::Started),
            2 => Ok(MatchState::Running),
            3 => Ok(MatchState::Finished),
            other => Err(D::Error::custom(format!("invalid match state {other}"))),
        }
    }
}

/// Reactive match state. The player list lives on the match itself; wire
/// serialization joins both.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchStore {
    pub active_player: Option<PlayerId>,
    pub can_start: bool,
    pub countdown: Option<u64>,
    pub current_turn: u32,
    pub state: MatchState,
    pub turn_ends_at: Option<DateTime<Utc>>,
}

impl Default for MatchStore {
    fn default() -> Self {
        Self {
            active_player: None,
            can_start: false,
            countdown: None,
            current_turn: 0,
            state: MatchState::Idle,
            turn_ends_at: None,
        }
    }
}

/// Wire shape of the match store, players included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStoreData {
    pub active_player: Option<PlayerId>,
    pub can_start: bool,
    pub countdown: Option<u64>,
    pub current_turn: u32,
    pub players: Vec<PlayerData>,
    pub state: MatchState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_ends_at: Option<DateTime<Utc>>,
}

/// Wire shape of a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchData {
    pub alias: String,
    pub battlefield: BattlefieldData,
    pub id: MatchId,
    pub store: MatchStoreData,
}

/// Who invoked an RPC body on the server: the transport connection plus the
/// user resolved from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub connection: ConnectionId,
    pub user: PlayerId,
}

/// A client-side request the transport layer should perform. Produced by
/// selection handling so the causal chain select -> RPC stays an explicit
/// command instead of a hidden listener.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcIntent {
    pub method: &'static str,
    pub mode: RpcMode,
    pub network_id: Option<NetworkId>,
    pub args: Vec<Value>,
}

/// Client-side in-progress action.
#[derive(Debug, Clone, PartialEq)]
enum PendingAction {
    Move {
        entity: EntityId,
        targets: Vec<EntityId>,
    },
    Attack {
        entity: EntityId,
        targets: Vec<EntityId>,
    },
}

/// A match instance; symmetric between the two roles.
pub struct Match {
    pub id: MatchId,
    pub alias: String,
    battlefield: Battlefield,
    board: Option<EntityId>,
    game: Game,
    net: NetworkManager,
    ctx: RuntimeContext,
    store: Store<MatchStore>,
    players: Vec<Player>,
    start_timer: Option<Timer>,
    start_countdown: Duration,
    turn_length: Duration,
    pending_action: Option<PendingAction>,
}

impl Match {
    /// Builds a match for either role from its wire shape.
    pub fn new(
        data: MatchData,
        role: Role,
        start_countdown: Duration,
        turn_length: Duration,
        outbound: Option<UnboundedSender<Outbound>>,
    ) -> Result<Self, GameError> {
        let battlefield = Battlefield::new(data.battlefield)?;

        let mut ctx = RuntimeContext::new(role);
        ctx.identities
            .register(NetworkId(data.id.0), NetworkAddress::Match);

        let mut game = Game::new(role);
        game.load_scene("Battlefield");
        game.start();

        let net = NetworkManager::new(data.id, outbound);

        let mut this = Self {
            id: data.id,
            alias: data.alias,
            battlefield,
            board: None,
            game,
            net,
            ctx,
            store: Store::new(MatchStore {
                active_player: data.store.active_player,
                can_start: data.store.can_start,
                countdown: data.store.countdown,
                current_turn: data.store.current_turn,
                state: data.store.state,
                turn_ends_at: data.store.turn_ends_at,
            }),
            players: Vec::new(),
            start_timer: None,
            start_countdown,
            turn_length,
            pending_action: None,
        };

        if role.is_server() {
            if let Some(tx) = this.net.outbound() {
                let match_id = this.id;
                this.store.subscribe(Box::new(move |_| {
                    let _ = tx.send(Outbound {
                        match_id,
                        message: OutboundMessage::MatchUpdate,
                    });
                }));
            }
        }

        for player in data.store.players {
            this.add_player(Player::new(player));
        }

        info!(alias = %this.alias, role = ?role, "match created");
        Ok(this)
    }

    /// Server factory: a fresh Idle match hosted by `creator`.
    pub fn host(
        alias: &str,
        battlefield: BattlefieldData,
        creator: Caller,
        start_countdown: Duration,
        turn_length: Duration,
        outbound: UnboundedSender<Outbound>,
    ) -> Result<Self, GameError> {
        let host = PlayerData {
            is_host: true,
            ..PlayerData::new(creator.user, "Player 1")
        };
        let data = MatchData {
            alias: alias.to_string(),
            battlefield,
            id: MatchId::new_unique(),
            store: MatchStoreData {
                active_player: None,
                can_start: false,
                countdown: None,
                current_turn: 0,
                players: vec![host],
                state: MatchState::Idle,
                turn_ends_at: None,
            },
        };

        let mut this = Self::new(data, Role::Server, start_countdown, turn_length, Some(outbound))?;
        if let Some(player) = this.players.first_mut() {
            player.connection = Some(creator.connection);
            player.store.set(|s| s.is_online = true);
        }
        this.net.register_client(creator.connection);
        Ok(this)
    }

    pub fn network_id(&self) -> NetworkId {
        NetworkId(self.id.0)
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut Game {
        &mut self.game
    }

    pub fn net(&self) -> &NetworkManager {
        &self.net
    }

    pub fn net_mut(&mut self) -> &mut NetworkManager {
        &mut self.net
    }

    pub fn ctx(&self) -> &RuntimeContext {
        &self.ctx
    }

    pub fn store(&self) -> &Store<MatchStore> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store<MatchStore> {
        &mut self.store
    }

    pub fn board(&self) -> Option<EntityId> {
        self.board
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    /// Resolves a network id against this match's identity map.
    pub fn resolve(&self, id: NetworkId) -> Option<NetworkAddress> {
        self.ctx.identities.resolve(id)
    }

    pub fn to_data(&self) -> MatchData {
        let store = self.store.get();
        MatchData {
            alias: self.alias.clone(),
            battlefield: self.battlefield.data().clone(),
            id: self.id,
            store: MatchStoreData {
                active_player: store.active_player,
                can_start: store.can_start,
                countdown: store.countdown,
                current_turn: store.current_turn,
                players: self.players.iter().map(|p| p.to_data()).collect(),
                state: store.state,
                turn_ends_at: store.turn_ends_at,
            },
        }
    }

    /// Enough players, all of them ready, and nothing started yet.
    pub fn can_start(&self) -> bool {
        let store = self.store.get();
        let count = self.players.len() as u32;
        let enough = count >= self.battlefield.min_players() && count <= self.battlefield.max_players();
        let ready = self.players.iter().all(|p| p.store.get().is_ready);
        store.state == MatchState::Idle && enough && ready
    }

    pub fn is_open(&self) -> bool {
        self.store.get().state == MatchState::Idle
            && (self.players.len() as u32) < self.battlefield.max_players()
    }

    // ─── Server lifecycle ───

    /// Server: re-binds a (possibly returning) user's connection: registers
    /// the client, marks the player online, and hands over ownerships from
    /// the previous connection.
    pub fn acknowledge_player(&mut self, caller: Caller, previous: Option<ConnectionId>) {
        self.net.register_client(caller.connection);

        let Some(player) = self.players.iter_mut().find(|p| p.id == caller.user) else {
            warn!(player = %caller.user, "acknowledged user is not a registered player");
            return;
        };
        player.connection = Some(caller.connection);
        player.store.set(|s| s.is_online = true);

        if let Some(previous) = previous {
            if previous != caller.connection {
                self.net.update_ownerships(
                    self.game.scene_mut(),
                    previous,
                    caller.connection,
                );
            }
        }
        self.send_match_update();
    }

    /// Server: a connection died. The player goes offline but keeps every
    /// ownership for a potential reconnect.
    pub fn on_client_disconnected(&mut self, connection: ConnectionId) {
        self.net.on_client_disconnected(connection);
        for player in self.players.iter_mut() {
            if player.connection == Some(connection) {
                player.store.set(|s| s.is_online = false);
            }
        }
    }

    /// RPC body `Match.start` (notify). Idle -> Started plus countdown; the
    /// world spawns and the first turn begins when the countdown completes.
    pub fn start(&mut self, _input: Value, _caller: Option<Caller>) -> Result<Value, GameError> {
        if self.ctx.role.is_server() {
            if self.store.get().state != MatchState::Idle {
                return Err(GameError::MatchNotJoinable);
            }

            let countdown_secs = self.start_countdown.as_secs();
            self.store.set(|s| {
                s.state = MatchState::Started;
                s.countdown = Some(countdown_secs);
            });
            self.start_timer = Some(Timer::countdown(self.start_countdown));
            info!(alias = %self.alias, "match started, countdown running");
        }
        Ok(Value::Null)
    }

    /// Advances timers and the per-frame component walk. Server only; the
    /// client's world moves through replication.
    pub fn tick(&mut self, dt: Duration) {
        self.game.update(dt);

        let Some(timer) = self.start_timer.as_mut() else {
            return;
        };
        let progress = timer.advance(dt);

        if progress.ticks > 0 && !progress.completed {
            let secs = timer.in_seconds();
            self.store.set(|s| s.countdown = Some(secs));
        }

        if progress.completed {
            self.start_timer = None;
            self.store.set(|s| s.countdown = None);
            if let Err(err) = self.spawn_battlefield() {
                error!(alias = %self.alias, error = %err, "failed to spawn battlefield");
                return;
            }
            self.next_turn();
        }
    }

    /// RPC body `Match.registerPlayer`. Server input: the joining player's
    /// id. Client input: the confirmed player record.
    pub fn register_player(
        &mut self,
        input: Value,
        caller: Option<Caller>,
    ) -> Result<Value, GameError> {
        if self.store.get().state != MatchState::Idle {
            return Err(GameError::MatchNotJoinable);
        }

        match self.ctx.role {
            Role::Server => {
                let caller = caller.ok_or_else(|| GameError::BadRequest("missing caller".into()))?;
                if !self.is_open() {
                    return Err(GameError::MatchFull);
                }

                let id: PlayerId = serde_json::from_value(input)
                    .map_err(|e| GameError::BadRequest(format!("player id: {e}")))?;
                if id != caller.user {
                    return Err(GameError::NotYourPlayer);
                }
                if self.players.iter().any(|p| p.id == id) {
                    return Err(GameError::PlayerExists(id.to_string()));
                }

                // Register the connection first so it receives the store
                // update caused by adding the player.
                self.net.register_client(caller.connection);

                let position = self.last_player_position() + 1;
                let mut player = Player::new(PlayerData {
                    id,
                    is_host: false,
                    name: format!("Player {}", self.players.len() + 1),
                    store: crate::player::PlayerStore {
                        color: PlayerColor::Blue,
                        is_online: true,
                        is_ready: false,
                        position,
                        score: 0,
                    },
                });
                player.connection = Some(caller.connection);
                let data = player.to_data();

                self.add_player(player);
                self.refresh_can_start();
                self.send_match_update();
                self.net.emit(
                    EventTarget::All,
                    "match.player-registered",
                    json!(id),
                );
                self.game
                    .scene_mut()
                    .dispatch(&SceneEvent::PlayerRegistered { player: id });

                Ok(serde_json::to_value(data).expect("serialize player"))
            }
            Role::Client => {
                // Input is the server-confirmed player record. The broadcast
                // reaches the other clients; this one applies it directly.
                let data: PlayerData = serde_json::from_value(input)
                    .map_err(|e| GameError::BadRequest(format!("player data: {e}")))?;
                let id = data.id;
                if self.players.iter().all(|p| p.id != id) {
                    self.add_player(Player::new(data));
                }
                self.game
                    .scene_mut()
                    .dispatch(&SceneEvent::PlayerRegistered { player: id });
                Ok(Value::Null)
            }
        }
    }

    /// RPC body `Match.unregisterPlayer`.
    pub fn unregister_player(
        &mut self,
        input: Value,
        caller: Option<Caller>,
    ) -> Result<Value, GameError> {
        if self.store.get().state != MatchState::Idle {
            return Err(GameError::MatchNotJoinable);
        }

        let id: PlayerId = serde_json::from_value(input)
            .map_err(|e| GameError::BadRequest(format!("player id: {e}")))?;

        match self.ctx.role {
            Role::Server => {
                let caller = caller.ok_or_else(|| GameError::BadRequest("missing caller".into()))?;
                let Some(player) = self.players.iter().find(|p| p.id == id) else {
                    return Err(GameError::NotFound(format!("player '{id}'")));
                };
                if player.id != caller.user {
                    return Err(GameError::NotYourPlayer);
                }
                let data = player.to_data();

                self.remove_player(id);
                self.net.unregister_client(caller.connection);
                self.refresh_can_start();
                self.send_match_update();
                self.net
                    .emit(EventTarget::All, "match.player-unregistered", json!(id));
                self.game
                    .scene_mut()
                    .dispatch(&SceneEvent::PlayerUnregistered { player: id });

                Ok(serde_json::to_value(data).expect("serialize player"))
            }
            Role::Client => {
                self.remove_player(id);
                self.game
                    .scene_mut()
                    .dispatch(&SceneEvent::PlayerUnregistered { player: id });
                Ok(Value::Null)
            }
        }
    }

    /// RPC body `Player.ready` (notify).
    pub fn player_ready(
        &mut self,
        player: PlayerId,
        caller: Option<Caller>,
    ) -> Result<Value, GameError> {
        self.set_player_ready(player, caller, true)
    }

    /// RPC body `Player.unready` (notify).
    pub fn player_unready(
        &mut self,
        player: PlayerId,
        caller: Option<Caller>,
    ) -> Result<Value, GameError> {
        self.set_player_ready(player, caller, false)
    }

    fn set_player_ready(
        &mut self,
        id: PlayerId,
        caller: Option<Caller>,
        ready: bool,
    ) -> Result<Value, GameError> {
        if let (Role::Server, Some(caller)) = (self.ctx.role, caller) {
            if caller.user != id {
                return Err(GameError::NotYourPlayer);
            }
        }

        let Some(player) = self.players.iter_mut().find(|p| p.id == id) else {
            return Err(GameError::NotFound(format!("player '{id}'")));
        };
        player.store.set(|s| s.is_ready = ready);

        self.refresh_can_start();
        Ok(Value::Null)
    }

    /// RPC body `Match.endTurn` (notify). Only the connection owning the
    /// active player may end the turn; the turn-end event fires before the
    /// rotation so per-turn counters reset against the leaving player.
    pub fn end_turn(&mut self, _input: Value, caller: Option<Caller>) -> Result<Value, GameError> {
        if self.ctx.role.is_client() {
            return Ok(Value::Null);
        }
        let caller = caller.ok_or_else(|| GameError::BadRequest("missing caller".into()))?;

        let Some(active) = self.store.get().active_player else {
            return Err(GameError::NotYourTurn);
        };
        let Some(player) = self.players.iter().find(|p| p.id == active) else {
            return Err(GameError::NotFound(format!("player '{active}'")));
        };
        if player.connection != Some(caller.connection) {
            return Err(GameError::NotYourTurn);
        }

        let connection = player.connection;
        self.game.scene_mut().dispatch(&SceneEvent::TurnEnded {
            player: active,
            connection,
        });
        self.next_turn();
        Ok(Value::Null)
    }

    /// RPC body `Match.spawnGameObjects` (notify): late-join/resync path.
    pub fn request_spawn(
        &mut self,
        _input: Value,
        caller: Option<Caller>,
    ) -> Result<Value, GameError> {
        if self.ctx.role.is_server() {
            let caller = caller.ok_or_else(|| GameError::BadRequest("missing caller".into()))?;
            self.net.request_spawn(self.game.scene(), caller.connection);
        }
        Ok(Value::Null)
    }

    /// Fires the despawn hook on every registered entity (client side of the
    /// `gameObject.despawn` broadcast).
    pub fn despawn_all(&mut self) {
        self.net.despawn_all(self.game.scene_mut());
    }

    /// RPC body `Moveable.move`. Server input: the chosen target field id.
    /// Client input: the server-confirmed field id.
    pub fn move_action(
        &mut self,
        entity: EntityId,
        input: Value,
        caller: Option<Caller>,
    ) -> Result<Value, GameError> {
        match self.ctx.role {
            Role::Server => {
                let caller = caller.ok_or_else(|| GameError::BadRequest("missing caller".into()))?;
                self.validate_actor(entity, caller)?;

                let scene = self.game.scene();
                let state = scene
                    .registry
                    .get(entity)
                    .and_then(|obj| obj.component(ComponentKind::Moveable))
                    .and_then(|c| c.as_moveable())
                    .map(|s| *s.get())
                    .ok_or_else(|| GameError::NotFound("moveable component".into()))?;
                if !moveable::can_move(&state) {
                    return Err(GameError::ActionUnavailable("movement".into()));
                }

                let target: EntityId = serde_json::from_value(input)
                    .map_err(|e| GameError::BadRequest(format!("target id: {e}")))?;

                // The legal target set is recomputed here; the client-side
                // computation was for responsiveness only.
                let targets = moveable::targets(scene, entity)?;
                if !targets.contains(&target) {
                    return Err(GameError::InvalidTarget(target.to_string()));
                }

                let from = moveable::current_field(scene, entity)?;
                let scene = self.game.scene_mut();
                field::leave(scene, from, entity);
                field::enter(scene, target, entity);
                self.emit_field_event("field.did-leave", from, entity);
                self.emit_field_event("field.did-enter", target, entity);

                let scene = self.game.scene_mut();
                let picked = if scene
                    .registry
                    .get(entity)
                    .is_some_and(|obj| obj.has_component(ComponentKind::Ship))
                {
                    ship::pick_up_crates(scene, entity, target)
                } else {
                    Vec::new()
                };
                for crate_entity in picked {
                    self.emit_entity_event(
                        crate_entity,
                        "crate.did-pickup",
                        json!({ "crate": crate_entity, "gameObject": entity }),
                    );
                }

                if let Some(store) = self
                    .game
                    .scene_mut()
                    .registry
                    .get_mut(entity)
                    .and_then(|obj| obj.component_mut(ComponentKind::Moveable))
                    .and_then(|c| c.as_moveable_mut())
                {
                    store.set(|s| {
                        s.movements_done += 1;
                        s.is_active = false;
                    });
                }

                Ok(json!(target))
            }
            Role::Client => {
                // A response that raced a cancel is ignored; the active-flag
                // gate already flipped.
                if !moveable::is_active(self.game.scene(), entity) {
                    return Ok(Value::Null);
                }
                moveable::cancel(self.game.scene_mut(), entity);
                self.pending_action = None;
                Ok(input)
            }
        }
    }

    /// RPC body `GunAttack.attack`. Server input: the chosen target entity
    /// id. Client input: the server-confirmed target id.
    pub fn attack_action(
        &mut self,
        entity: EntityId,
        input: Value,
        caller: Option<Caller>,
    ) -> Result<Value, GameError> {
        match self.ctx.role {
            Role::Server => {
                let caller = caller.ok_or_else(|| GameError::BadRequest("missing caller".into()))?;
                self.validate_actor(entity, caller)?;

                let state = gun_attack::gun_attack_state(self.game.scene(), entity)?;
                if !gun_attack::can_attack(&state) {
                    return Err(GameError::ActionUnavailable("attack".into()));
                }

                let target: EntityId = serde_json::from_value(input)
                    .map_err(|e| GameError::BadRequest(format!("target id: {e}")))?;

                let targets = gun_attack::targets(self.game.scene(), entity, Role::Server)?;
                if !targets.contains(&target) {
                    return Err(GameError::InvalidTarget(target.to_string()));
                }

                let scene = self.game.scene_mut();
                gun_attack::reset_targets(scene, entity);
                scene.dispatch(&SceneEvent::GunFired {
                    attacker: entity,
                    target,
                    damage: state.damage,
                });

                if let Some(store) = self
                    .game
                    .scene_mut()
                    .registry
                    .get_mut(entity)
                    .and_then(|obj| obj.component_mut(ComponentKind::GunAttack))
                    .and_then(|c| c.as_gun_attack_mut())
                {
                    store.set(|s| {
                        s.attacks_done += 1;
                        s.is_active = false;
                    });
                }

                Ok(json!(target))
            }
            Role::Client => {
                if !gun_attack::is_active(self.game.scene(), entity) {
                    return Ok(Value::Null);
                }
                let damage = gun_attack::gun_attack_state(self.game.scene(), entity)
                    .map(|s| s.damage)
                    .unwrap_or(0);

                gun_attack::cancel(self.game.scene_mut(), entity);
                self.pending_action = None;

                if let Ok(target) = serde_json::from_value::<EntityId>(input.clone()) {
                    self.game.scene_mut().dispatch(&SceneEvent::GunFired {
                        attacker: entity,
                        target,
                        damage,
                    });
                }
                Ok(input)
            }
        }
    }

    // ─── Client action flow ───

    /// Client: phase 1 of the move action on an owned entity.
    pub fn begin_move(&mut self, entity: EntityId) -> Result<(), GameError> {
        self.ensure_owned(entity)?;
        let targets = moveable::begin(self.game.scene_mut(), entity)?;
        self.pending_action = Some(PendingAction::Move { entity, targets });
        Ok(())
    }

    /// Client: phase 1 of the attack action on an owned entity.
    pub fn begin_attack(&mut self, entity: EntityId) -> Result<(), GameError> {
        self.ensure_owned(entity)?;
        let targets = gun_attack::begin(self.game.scene_mut(), entity, Role::Client)?;
        self.pending_action = Some(PendingAction::Attack { entity, targets });
        Ok(())
    }

    /// Client: reverts the in-progress action's selection state. Does not
    /// abort an RPC already in flight; its late response is ignored.
    pub fn cancel_action(&mut self) {
        match self.pending_action.take() {
            Some(PendingAction::Move { entity, .. }) => {
                moveable::cancel(self.game.scene_mut(), entity);
            }
            Some(PendingAction::Attack { entity, .. }) => {
                gun_attack::cancel(self.game.scene_mut(), entity);
            }
            None => {}
        }
    }

    /// Client: selects an entity. When a move action is pending and the
    /// selection hits one of its targets, returns the RPC the transport
    /// should perform.
    pub fn select_entity(&mut self, entity: EntityId) -> Option<RpcIntent> {
        if !selectable::select(self.game.scene_mut(), entity) {
            return None;
        }

        let Some(PendingAction::Move {
            entity: actor,
            targets,
        }) = &self.pending_action
        else {
            return None;
        };
        if !targets.contains(&entity) || !moveable::is_active(self.game.scene(), *actor) {
            return None;
        }

        let network_id = self
            .game
            .scene()
            .registry
            .get(*actor)
            .and_then(|obj| obj.component(ComponentKind::Moveable))
            .and_then(|c| c.network_id());
        Some(RpcIntent {
            method: methods::MOVEABLE_MOVE,
            mode: RpcMode::Call,
            network_id,
            args: vec![json!(entity)],
        })
    }

    /// Client: acquires an attack target. Returns the attack RPC when an
    /// attack action is pending and the target is legal.
    pub fn acquire_target(&mut self, entity: EntityId) -> Option<RpcIntent> {
        if !targetable::acquire(self.game.scene_mut(), entity) {
            return None;
        }

        let Some(PendingAction::Attack {
            entity: actor,
            targets,
        }) = &self.pending_action
        else {
            return None;
        };
        if !targets.contains(&entity) || !gun_attack::is_active(self.game.scene(), *actor) {
            return None;
        }

        let network_id = self
            .game
            .scene()
            .registry
            .get(*actor)
            .and_then(|obj| obj.component(ComponentKind::GunAttack))
            .and_then(|c| c.network_id());
        Some(RpcIntent {
            method: methods::GUN_ATTACK_ATTACK,
            mode: RpcMode::Call,
            network_id,
            args: vec![json!(entity)],
        })
    }

    // ─── Client replication handlers ───

    /// Applies a `match.update` broadcast.
    pub fn apply_match_update(&mut self, data: MatchStoreData) {
        for player in data.players {
            match self.players.iter_mut().find(|p| p.id == player.id) {
                Some(existing) => existing.store.replace(player.store),
                None => self.add_player(Player::new(player)),
            }
        }

        self.store.set(|s| {
            s.active_player = data.active_player;
            s.can_start = data.can_start;
            s.countdown = data.countdown;
            s.current_turn = data.current_turn;
            s.state = data.state;
            s.turn_ends_at = data.turn_ends_at;
        });
    }

    /// Applies a `player.<id>.update` broadcast.
    pub fn apply_player_update(&mut self, data: PlayerData) {
        match self.players.iter_mut().find(|p| p.id == data.id) {
            Some(player) => player.store.replace(data.store),
            None => self.add_player(Player::new(data)),
        }
    }

    /// Applies a `gameObject.spawn` event: resolves the snapshot into
    /// entities, registers them for replication, and spawns them. A known
    /// entity is refreshed in place (resync).
    pub fn apply_spawn(
        &mut self,
        snapshot: &EntitySnapshot,
        network_id: Option<NetworkId>,
    ) -> Result<EntityId, GameError> {
        let entity = self.resolve_snapshot(snapshot)?;
        self.net.register_game_objects(
            self.game.scene_mut(),
            &[entity],
            &mut self.ctx.identities,
        );
        self.net.spawn(self.game.scene_mut(), entity, network_id);
        if self.board.is_none()
            && self
                .game
                .scene()
                .registry
                .get(entity)
                .is_some_and(|obj| obj.has_component(ComponentKind::Board))
        {
            self.board = Some(entity);
        }
        Ok(entity)
    }

    fn resolve_snapshot(&mut self, snapshot: &EntitySnapshot) -> Result<EntityId, GameError> {
        if self.game.scene().registry.contains(snapshot.id) {
            // Resync: refresh component states instead of duplicating.
            if let Some(obj) = self.game.scene_mut().registry.get_mut(snapshot.id) {
                for component_snapshot in &snapshot.components {
                    if let Some(component) = obj.component_by_id_mut(component_snapshot.id) {
                        component.apply_state(&component_snapshot.state)?;
                        if let (Some(meta), Some(is_owner)) =
                            (component.net_mut(), component_snapshot.is_owner)
                        {
                            meta.set_is_owner(is_owner);
                        }
                    }
                }
            }
        } else {
            let components = snapshot
                .components
                .iter()
                .map(Component::from_snapshot)
                .collect::<Result<Vec<_>, _>>()?;
            self.game.scene_mut().create_game_object(
                GameObjectSeed {
                    id: Some(snapshot.id),
                    label: snapshot.label.clone(),
                    parent: snapshot.parent,
                    tags: snapshot.tags.clone(),
                },
                components,
            )?;
        }

        for child in snapshot.children.iter().flatten() {
            self.resolve_snapshot(child)?;
        }
        Ok(snapshot.id)
    }

    /// Applies a `<id>.update` component diff. The channel id is the
    /// entity's network object component id.
    pub fn apply_entity_update(
        &mut self,
        channel: ComponentId,
        component: ComponentId,
        state: &Value,
    ) -> Result<(), GameError> {
        let scene = self.game.scene_mut();
        let entity = scene
            .registry
            .ids()
            .into_iter()
            .find(|id| {
                scene
                    .registry
                    .get(*id)
                    .and_then(|obj| obj.component(ComponentKind::NetworkObject))
                    .is_some_and(|c| c.id() == channel)
            })
            .ok_or_else(|| GameError::NotFound(format!("update channel '{channel}'")))?;

        scene
            .registry
            .get_mut(entity)
            .and_then(|obj| obj.component_by_id_mut(component))
            .ok_or_else(|| GameError::NotFound(format!("component '{component}'")))?
            .apply_state(state)
    }

    /// Applies a `match.next-turn` broadcast.
    pub fn apply_next_turn(&mut self, player: PlayerId) {
        self.store.set(|s| s.active_player = Some(player));
    }

    /// Applies an ownership-transfer event for one entity channel.
    pub fn apply_ownership(&mut self, channel: ComponentId, received: bool) {
        let role = self.ctx.role;
        let scene = self.game.scene_mut();
        let Some(entity) = scene.registry.ids().into_iter().find(|id| {
            scene
                .registry
                .get(*id)
                .and_then(|obj| obj.component(ComponentKind::NetworkObject))
                .is_some_and(|c| c.id() == channel)
        }) else {
            return;
        };

        if let Some(obj) = scene.registry.get_mut(entity) {
            for component in obj.components_mut() {
                if let Some(meta) = component.net_mut() {
                    if received {
                        meta.receive_ownership(role);
                    } else {
                        meta.lose_ownership(role);
                    }
                }
            }
        }
    }

    // ─── Internals ───

    fn add_player(&mut self, player: Player) {
        self.ctx
            .identities
            .register(player.network_id(), NetworkAddress::Player(player.id));

        let mut player = player;
        if self.ctx.role.is_server() {
            if let Some(tx) = self.net.outbound() {
                let match_id = self.id;
                let id = player.id;
                player.store.subscribe(Box::new(move |_| {
                    let _ = tx.send(Outbound {
                        match_id,
                        message: OutboundMessage::PlayerUpdate { player: id },
                    });
                }));
            }
        }
        self.players.push(player);
    }

    fn remove_player(&mut self, id: PlayerId) {
        self.ctx.identities.unregister(NetworkId(id.0));
        self.players.retain(|p| p.id != id);
    }

    fn refresh_can_start(&mut self) {
        let can_start = self.can_start();
        if self.store.get().can_start != can_start {
            self.store.set(|s| s.can_start = can_start);
        }
    }

    fn send_match_update(&self) {
        self.net.send(OutboundMessage::MatchUpdate);
    }

    fn last_player_position(&self) -> u32 {
        self.players
            .iter()
            .map(|p| p.store.get().position)
            .max()
            .unwrap_or(0)
    }

    /// Round-robin over ascending player positions, wrapping past the
    /// maximum back to 0. Started -> Running on the first rotation.
    fn next_turn(&mut self) {
        let current = self
            .store
            .get()
            .active_player
            .and_then(|id| self.player(id))
            .map(|p| p.store.get().position);

        let position = match current {
            Some(position) if position < self.last_player_position() => position + 1,
            Some(_) => 0,
            None => 0,
        };

        let Some(next) = self
            .players
            .iter()
            .find(|p| p.store.get().position == position)
        else {
            // A hole in the position sequence is a wiring bug.
            panic!("no player found for position {position}");
        };
        let next_id = next.id;

        let turn_ends_at = Utc::now()
            + chrono::Duration::from_std(self.turn_length).unwrap_or_else(|_| chrono::Duration::seconds(30));
        self.store.set(|s| {
            s.active_player = Some(next_id);
            s.current_turn += 1;
            s.state = MatchState::Running;
            s.turn_ends_at = Some(turn_ends_at);
        });
        self.net
            .emit(EventTarget::All, "match.next-turn", json!(next_id));
        debug!(alias = %self.alias, player = %next_id, "next turn");
    }

    /// Server: board, crates with items, and per-player fleets, registered
    /// and spawned in a single pass.
    fn spawn_battlefield(&mut self) -> Result<(), GameError> {
        let scene = self.game.scene_mut();
        let board = self.battlefield.create_board(scene)?;
        self.board = Some(board);

        let starting = self.battlefield.starting_fields(scene, board);
        self.place_crates(board)?;

        let placements: Vec<(PlayerId, Option<ConnectionId>, u32)> = self
            .players
            .iter()
            .map(|p| (p.id, p.connection, p.store.get().position))
            .collect();
        let mut fleet_entities = Vec::new();
        for (_, connection, position) in &placements {
            let fields = starting
                .get(*position as usize)
                .cloned()
                .unwrap_or_default();
            let ships = self.create_fleet(board, fields)?;
            fleet_entities.push((ships, *connection));
        }

        let scene = self.game.scene_mut();
        scene.ensure_parents_resolved()?;
        self.net
            .register_game_objects(scene, &[board], &mut self.ctx.identities);

        for (ships, connection) in fleet_entities {
            if let Some(connection) = connection {
                for ship in ships {
                    self.net
                        .set_owner(self.game.scene_mut(), ship, Some(connection));
                }
            }
        }

        self.net.spawn_all(self.game.scene_mut());
        info!(alias = %self.alias, entities = self.game.scene().registry.len(), "battlefield spawned");
        Ok(())
    }

    /// Rolls up to two crates per board row onto item fields, each holding a
    /// random catalog item, plus a child entity carrying the item itself.
    fn place_crates(&mut self, board: EntityId) -> Result<(), GameError> {
        let mut rng = rand::thread_rng();
        let catalog = item::catalog();
        let item_fields = self.battlefield.item_fields(self.game.scene(), board);

        for row in 0..self.battlefield.y() {
            let row_fields: Vec<EntityId> = item_fields
                .iter()
                .copied()
                .filter(|id| {
                    self.game
                        .scene()
                        .registry
                        .get(*id)
                        .and_then(|obj| obj.component(ComponentKind::Position))
                        .and_then(|c| c.as_position())
                        .is_some_and(|s| s.get().y == row)
                })
                .collect();

            for field in row_fields.choose_multiple(&mut rng, CRATES_PER_ROW) {
                let position = self
                    .game
                    .scene()
                    .registry
                    .get(*field)
                    .and_then(|obj| obj.component(ComponentKind::Position))
                    .and_then(|c| c.as_position())
                    .map(|s| *s.get())
                    .ok_or_else(|| GameError::NotFound("field position".into()))?;

                let item_state = catalog[rng.gen_range(0..catalog.len())].clone();
                let scene = self.game.scene_mut();
                let crate_entity = scene.create_game_object(
                    GameObjectSeed::child_of(board, &["crate"]),
                    vec![
                        Component::supply_crate(CrateState::with_item(item_state.clone())),
                        Component::network_object(NetworkObjectState::default()),
                        Component::position(position),
                        Component::selectable(SelectableState::default()),
                    ],
                )?;
                scene.create_game_object(
                    GameObjectSeed::child_of(crate_entity, &["item"]),
                    vec![
                        Component::item(item_state),
                        Component::network_object(NetworkObjectState::default()),
                    ],
                )?;
            }
        }
        Ok(())
    }

    /// One player's fleet, placed on random distinct starting fields.
    fn create_fleet(
        &mut self,
        board: EntityId,
        mut fields: Vec<EntityId>,
    ) -> Result<Vec<EntityId>, GameError> {
        struct ShipSpec {
            tag: &'static str,
            name: &'static str,
            hitpoints: i32,
            slots: u32,
            has_gun: bool,
        }
        const FLEET: [ShipSpec; SHIPS_PER_PLAYER] = [
            ShipSpec { tag: "aircraftcarrier", name: "Aircraft Carrier", hitpoints: 12, slots: 3, has_gun: false },
            ShipSpec { tag: "battlecruiser", name: "Battlecruiser", hitpoints: 10, slots: 3, has_gun: true },
            ShipSpec { tag: "corvette", name: "Corvette", hitpoints: 5, slots: 1, has_gun: true },
            ShipSpec { tag: "frigate", name: "Frigate", hitpoints: 6, slots: 2, has_gun: true },
            ShipSpec { tag: "destroyer", name: "Destroyer", hitpoints: 8, slots: 2, has_gun: true },
        ];

        let mut rng = rand::thread_rng();
        fields.shuffle(&mut rng);
        if fields.len() < FLEET.len() {
            return Err(GameError::BadRequest(
                "not enough starting fields for a fleet".into(),
            ));
        }

        let mut ships = Vec::new();
        for (spec, field) in FLEET.iter().zip(fields) {
            let position = self
                .game
                .scene()
                .registry
                .get(field)
                .and_then(|obj| obj.component(ComponentKind::Position))
                .and_then(|c| c.as_position())
                .map(|s| *s.get())
                .ok_or_else(|| GameError::NotFound("field position".into()))?;

            let mut components = vec![
                Component::hitpoints(HitpointsState::new(spec.hitpoints, spec.hitpoints)),
                Component::inventory(InventoryState::new(spec.slots)),
                Component::moveable(MoveableState::default()),
                Component::network_object(NetworkObjectState::default()),
                Component::position(position),
                Component::selectable(SelectableState::default()),
                Component::ship(ShipState::new(spec.name)),
                Component::targetable(TargetableState::default()),
            ];
            if spec.has_gun {
                components.push(Component::gun_attack(GunAttackState::default()));
            }

            let entity = self.game.scene_mut().create_game_object(
                GameObjectSeed::child_of(board, &[spec.tag, "ship"]),
                components,
            )?;
            ships.push(entity);
        }
        Ok(ships)
    }

    /// Ownership + turn gate shared by the action RPCs: the caller must own
    /// the entity's network object and control the active player.
    fn validate_actor(&self, entity: EntityId, caller: Caller) -> Result<(), GameError> {
        let owner = self
            .game
            .scene()
            .registry
            .get(entity)
            .and_then(|obj| obj.owner_id());
        if owner != Some(caller.connection) {
            return Err(GameError::NotOwner);
        }

        let active = self.store.get().active_player;
        let is_active_player = active
            .and_then(|id| self.player(id))
            .is_some_and(|p| p.connection == Some(caller.connection));
        if !is_active_player {
            return Err(GameError::NotYourTurn);
        }
        Ok(())
    }

    fn ensure_owned(&self, entity: EntityId) -> Result<(), GameError> {
        if self.ctx.role.is_client() && !gun_attack::is_owned_locally(self.game.scene(), entity) {
            return Err(GameError::NotOwner);
        }
        Ok(())
    }

    /// Forwards a field event to the connections subscribed to the field's
    /// update channel.
    fn emit_field_event(&mut self, name: &str, field: EntityId, entity: EntityId) {
        let payload = json!({ "field": field, "gameObject": entity });
        self.emit_entity_event(field, name, payload);
    }

    fn emit_entity_event(&mut self, entity: EntityId, name: &str, payload: Value) {
        self.net
            .emit(EventTarget::Subscribers(entity), name, payload);
    }
}

impl std::fmt::Debug for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Match")
            .field("id", &self.id)
            .field("alias", &self.alias)
            .field("state", &self.store.get().state)
            .field("players", &self.players.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const COUNTDOWN: Duration = Duration::from_secs(3);
    const TURN: Duration = Duration::from_secs(30);

    fn caller(connection: u32) -> Caller {
        Caller {
            connection: ConnectionId(connection),
            user: PlayerId::new_unique(),
        }
    }

    fn server_match(host: Caller) -> (Match, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let battlefield = Battlefield::pacific_ocean().data().clone();
        let m = Match::host("fj6h5sP", battlefield, host, COUNTDOWN, TURN, tx).expect("host match");
        (m, rx)
    }

    /// Hosts, joins, readies and starts a two-player match, then runs the
    /// countdown down so the world spawns and the first turn begins.
    fn running_match() -> (Match, Caller, Caller, mpsc::UnboundedReceiver<Outbound>) {
        let host = caller(1);
        let guest = caller(2);
        let (mut m, rx) = server_match(host);

        m.register_player(json!(guest.user), Some(guest)).expect("join");
        m.player_ready(host.user, Some(host)).expect("ready host");
        m.player_ready(guest.user, Some(guest)).expect("ready guest");
        assert!(m.can_start());

        m.start(Value::Null, Some(host)).expect("start");
        assert_eq!(m.store().get().state, MatchState::Started);

        for _ in 0..3 {
            m.tick(Duration::from_secs(1));
        }
        assert_eq!(m.store().get().state, MatchState::Running);
        (m, host, guest, rx)
    }

    fn owned_ship_with(m: &Match, connection: ConnectionId, kind: ComponentKind) -> EntityId {
        let scene = m.game().scene();
        scene
            .registry
            .entities_with_tags(&["ship"])
            .into_iter()
            .find(|id| {
                let obj = scene.registry.get(*id).unwrap();
                obj.owner_id() == Some(connection) && obj.has_component(kind)
            })
            .expect("owned ship")
    }

    #[test]
    fn register_player_fails_outside_idle() {
        let host = caller(1);
        let guest = caller(2);
        let (mut m, _rx) = server_match(host);

        m.store_mut().set(|s| s.state = MatchState::Running);
        let err = m.register_player(json!(guest.user), Some(guest)).unwrap_err();
        assert_eq!(err, GameError::MatchNotJoinable);
    }

    #[test]
    fn register_player_rejects_impostors_and_duplicates() {
        let host = caller(1);
        let guest = caller(2);
        let (mut m, _rx) = server_match(host);

        // A user may only register themselves.
        let err = m
            .register_player(json!(host.user), Some(guest))
            .unwrap_err();
        assert_eq!(err, GameError::NotYourPlayer);

        m.register_player(json!(guest.user), Some(guest)).expect("join");
        let err = m.register_player(json!(guest.user), Some(guest)).unwrap_err();
        assert!(matches!(err, GameError::PlayerExists(_)));
    }

    #[test]
    fn ready_players_flip_can_start() {
        let host = caller(1);
        let guest = caller(2);
        let (mut m, _rx) = server_match(host);

        m.register_player(json!(guest.user), Some(guest)).expect("join");
        assert!(!m.can_start());

        m.player_ready(host.user, Some(host)).expect("ready");
        m.player_ready(guest.user, Some(guest)).expect("ready");
        assert!(m.can_start());
        assert!(m.store().get().can_start);

        m.player_unready(guest.user, Some(guest)).expect("unready");
        assert!(!m.store().get().can_start);

        let err = m.player_ready(host.user, Some(guest)).unwrap_err();
        assert_eq!(err, GameError::NotYourPlayer);
    }

    #[test]
    fn start_countdown_leads_into_the_first_turn() {
        let (m, host, _guest, _rx) = running_match();

        let store = m.store().get();
        assert_eq!(store.current_turn, 1);
        assert_eq!(store.active_player, Some(host.user));
        assert!(store.turn_ends_at.is_some());
        assert!(m.board().is_some());

        // Board + 24x16 fields + two fleets + crates/items.
        let entities = m.game().scene().registry.len();
        assert!(entities > 1 + 24 * 16 + 10, "got {entities}");

        let ships = m.game().scene().registry.entities_with_tags(&["ship"]);
        assert_eq!(ships.len(), 2 * SHIPS_PER_PLAYER);
    }

    #[test]
    fn turns_rotate_round_robin_over_positions() {
        let (mut m, host, guest, _rx) = running_match();

        assert_eq!(m.store().get().active_player, Some(host.user));
        m.end_turn(Value::Null, Some(host)).expect("end turn");
        assert_eq!(m.store().get().active_player, Some(guest.user));
        assert_eq!(m.store().get().current_turn, 2);

        m.end_turn(Value::Null, Some(guest)).expect("end turn");
        assert_eq!(m.store().get().active_player, Some(host.user));
        m.end_turn(Value::Null, Some(host)).expect("end turn");
        assert_eq!(m.store().get().active_player, Some(guest.user));
        assert_eq!(m.store().get().current_turn, 4);
    }

    #[test]
    fn end_turn_is_gated_on_the_active_player() {
        let (mut m, _host, guest, _rx) = running_match();
        let err = m.end_turn(Value::Null, Some(guest)).unwrap_err();
        assert_eq!(err, GameError::NotYourTurn);
    }

    #[test]
    fn turn_end_resets_action_counters_of_the_leaving_player() {
        let (mut m, host, _guest, _rx) = running_match();
        let ship = owned_ship_with(&m, host.connection, ComponentKind::Moveable);

        let target = moveable::targets(m.game().scene(), ship).expect("targets")[0];
        m.move_action(ship, json!(target), Some(host)).expect("move");

        let done = |m: &Match| {
            m.game()
                .scene()
                .registry
                .get(ship)
                .unwrap()
                .component(ComponentKind::Moveable)
                .unwrap()
                .as_moveable()
                .unwrap()
                .get()
                .movements_done
        };
        assert_eq!(done(&m), 1);

        m.end_turn(Value::Null, Some(host)).expect("end turn");
        assert_eq!(done(&m), 0);
    }

    #[test]
    fn move_applies_position_and_budget() {
        let (mut m, host, _guest, _rx) = running_match();
        let ship = owned_ship_with(&m, host.connection, ComponentKind::Moveable);

        let targets = moveable::targets(m.game().scene(), ship).expect("targets");
        let target = targets[0];
        let confirmed = m
            .move_action(ship, json!(target), Some(host))
            .expect("move");
        assert_eq!(confirmed, json!(target));

        let scene = m.game().scene();
        let ship_pos = scene
            .registry
            .get(ship)
            .unwrap()
            .component(ComponentKind::Position)
            .unwrap()
            .as_position()
            .unwrap()
            .cloned();
        let field_pos = scene
            .registry
            .get(target)
            .unwrap()
            .component(ComponentKind::Position)
            .unwrap()
            .as_position()
            .unwrap()
            .cloned();
        assert_eq!((ship_pos.x, ship_pos.y), (field_pos.x, field_pos.y));

        // The per-turn budget is spent.
        let err = m
            .move_action(ship, json!(targets.last().copied().unwrap()), Some(host))
            .unwrap_err();
        assert_eq!(err, GameError::ActionUnavailable("movement".into()));
    }

    #[test]
    fn move_rejects_targets_outside_the_server_set() {
        let (mut m, host, _guest, _rx) = running_match();
        let ship = owned_ship_with(&m, host.connection, ComponentKind::Moveable);

        // A field far outside movement range is never a legal target.
        let ship_pos = m
            .game()
            .scene()
            .registry
            .get(ship)
            .unwrap()
            .component(ComponentKind::Position)
            .unwrap()
            .as_position()
            .unwrap()
            .cloned();
        let scene = m.game().scene();
        let far_field = scene
            .registry
            .entities_with_component(ComponentKind::Field)
            .into_iter()
            .find(|id| {
                scene
                    .registry
                    .get(*id)
                    .and_then(|obj| obj.component(ComponentKind::Position))
                    .and_then(|c| c.as_position())
                    .is_some_and(|s| (s.get().y - ship_pos.y).abs() > 5)
            })
            .expect("far field");

        let err = m.move_action(ship, json!(far_field), Some(host)).unwrap_err();
        assert!(matches!(err, GameError::InvalidTarget(_)));
    }

    #[test]
    fn forged_rpc_from_non_owner_fails_ownership_validation() {
        let (mut m, host, guest, _rx) = running_match();
        let ship = owned_ship_with(&m, host.connection, ComponentKind::Moveable);

        // Simulates a client bypassing its local checks by invoking the
        // handler path directly with someone else's entity.
        let target = moveable::targets(m.game().scene(), ship).expect("targets")[0];
        let err = m.move_action(ship, json!(target), Some(guest)).unwrap_err();
        assert_eq!(err, GameError::NotOwner);
    }

    #[test]
    fn attack_hits_only_server_validated_targets() {
        let (mut m, host, guest, _rx) = running_match();
        let attacker = owned_ship_with(&m, host.connection, ComponentKind::GunAttack);

        let attacker_pos = m
            .game()
            .scene()
            .registry
            .get(attacker)
            .unwrap()
            .component(ComponentKind::Position)
            .unwrap()
            .as_position()
            .unwrap()
            .cloned();

        // Plant an enemy ship inside attack range and another far outside.
        let board = m.board().expect("board");
        let plant = |x: i32, y: i32, m: &mut Match| {
            let entity = m
                .game_mut()
                .scene_mut()
                .create_game_object(
                    GameObjectSeed::child_of(board, &["ship"]),
                    vec![
                        Component::ship(ShipState::default()),
                        Component::hitpoints(HitpointsState::new(10, 10)),
                        Component::position(PositionState::new(x, y)),
                        Component::targetable(TargetableState::default()),
                        Component::network_object(NetworkObjectState::default()),
                    ],
                )
                .expect("plant ship");
            let scene = m.game.scene_mut();
            m.net.register_game_objects(scene, &[entity], &mut m.ctx.identities);
            m.net.set_owner(m.game.scene_mut(), entity, Some(guest.connection));
            entity
        };
        let near = plant(attacker_pos.x, attacker_pos.y - 2, &mut m);
        let far = plant(attacker_pos.x, attacker_pos.y - 12, &mut m);

        let fired = Arc::new(AtomicUsize::new(0));
        let fired1 = fired.clone();
        m.game_mut().scene_mut().dispatcher.add_listener(
            EventKind::GunFired,
            Box::new(move |_| {
                fired1.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // Out-of-range target: validation error, no event dispatched.
        let err = m.attack_action(attacker, json!(far), Some(host)).unwrap_err();
        assert!(matches!(err, GameError::InvalidTarget(_)));
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // Legal target: event fires, damage lands, budget is spent.
        m.attack_action(attacker, json!(near), Some(host)).expect("attack");
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let hitpoints = m
            .game()
            .scene()
            .registry
            .get(near)
            .unwrap()
            .component(ComponentKind::Hitpoints)
            .unwrap()
            .as_hitpoints()
            .unwrap()
            .get()
            .current;
        assert_eq!(hitpoints, 8);

        let err = m.attack_action(attacker, json!(near), Some(host)).unwrap_err();
        assert_eq!(err, GameError::ActionUnavailable("attack".into()));
    }

    #[test]
    fn late_join_receives_one_snapshot_per_spawned_entity() {
        let (mut m, _host, guest, mut rx) = running_match();
        while rx.try_recv().is_ok() {}

        m.request_spawn(Value::Null, Some(guest)).expect("request spawn");

        let mut spawns = 0;
        while let Ok(outbound) = rx.try_recv() {
            if let OutboundMessage::Spawn { target, .. } = outbound.message {
                assert_eq!(target, EventTarget::One(guest.connection));
                spawns += 1;
            }
        }
        assert_eq!(spawns, m.net().registered_entities().len());
    }

    #[test]
    fn reconnect_hands_ownership_to_the_new_connection() {
        let (mut m, host, _guest, _rx) = running_match();
        let ship = owned_ship_with(&m, host.connection, ComponentKind::Moveable);

        let reconnected = Caller {
            connection: ConnectionId(7),
            user: host.user,
        };
        m.acknowledge_player(reconnected, Some(host.connection));

        let owner = m.game().scene().registry.get(ship).unwrap().owner_id();
        assert_eq!(owner, Some(ConnectionId(7)));
    }

    #[test]
    fn match_data_roundtrips_through_the_wire_shape() {
        let (m, _host, _guest, _rx) = running_match();
        let data = m.to_data();
        let json = serde_json::to_value(&data).expect("serialize");
        assert_eq!(json["store"]["state"], 2);

        let back: MatchData = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, data);

        let mirror = Match::new(back, Role::Client, COUNTDOWN, TURN, None).expect("mirror");
        assert_eq!(mirror.store().get().state, MatchState::Running);
        assert_eq!(mirror.players().len(), 2);
    }

    #[test]
    fn client_mirror_applies_spawn_and_updates() {
        let (server, host, _guest, _rx) = running_match();
        let mut client =
            Match::new(server.to_data(), Role::Client, COUNTDOWN, TURN, None).expect("mirror");

        // Full snapshot of the board subtree, as the late-join path sends it.
        let board = server.board().expect("board");
        let snapshot = server
            .game()
            .scene()
            .snapshot_entity(board, true, Role::Server)
            .expect("snapshot");
        let channel = server
            .net()
            .update_channel_component(server.game().scene(), board)
            .expect("channel");

        client.apply_spawn(&snapshot, Some(NetworkId(channel.0))).expect("spawn");
        assert_eq!(
            client.game().scene().registry.len(),
            server.game().scene().registry.len()
        );

        // A component diff reaches the same component on the mirror.
        let ship = owned_ship_with(&server, host.connection, ComponentKind::Moveable);
        let ship_channel = server
            .net()
            .update_channel_component(server.game().scene(), ship)
            .expect("ship channel");
        let moveable_id = server
            .game()
            .scene()
            .registry
            .get(ship)
            .unwrap()
            .component(ComponentKind::Moveable)
            .unwrap()
            .id();

        client
            .apply_entity_update(
                ship_channel,
                moveable_id,
                &json!({
                    "isDisabled": false,
                    "movementsDone": 1,
                    "movementsPerTurn": 1,
                    "range": [2, 2],
                    "isActive": false
                }),
            )
            .expect("diff");

        let done = client
            .game()
            .scene()
            .registry
            .get(ship)
            .unwrap()
            .component(ComponentKind::Moveable)
            .unwrap()
            .as_moveable()
            .unwrap()
            .get()
            .movements_done;
        assert_eq!(done, 1);
    }
}
