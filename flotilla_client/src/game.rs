//! Client session: the match mirror and its event plumbing.
//!
//! The session owns the client-side [`Match`] and keeps it in sync by
//! routing named server events into the shared replication handlers. Every
//! user action goes through the same RPC bodies the server runs; the
//! client invokes them with the server-confirmed response as input.

use anyhow::Context;
use flotilla_shared::match_::{MatchStoreData, RpcIntent};
use flotilla_shared::prelude::*;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::{GameClient, RpcOutcome};

/// One connected user and the match they are in.
pub struct ClientSession {
    pub client: GameClient,
    pub user_id: PlayerId,
    current_match: Option<Match>,
    cfg: EngineConfig,
}

impl ClientSession {
    /// Connects and registers a fresh user.
    pub async fn connect(cfg: EngineConfig) -> anyhow::Result<Self> {
        let mut client = GameClient::connect(&cfg).await?;

        let outcome = client
            .call(methods::USER_REGISTER, RpcParams::default())
            .await;
        let value = outcome
            .into_value()
            .context("user registration dropped or rejected")?;
        let user_id: PlayerId =
            serde_json::from_value(value["id"].clone()).context("user id in response")?;

        Ok(Self {
            client,
            user_id,
            current_match: None,
            cfg,
        })
    }

    pub fn current_match(&self) -> Option<&Match> {
        self.current_match.as_ref()
    }

    pub fn current_match_mut(&mut self) -> Option<&mut Match> {
        self.current_match.as_mut()
    }

    /// Creates a match on the server and mirrors it locally.
    pub async fn create_match(&mut self) -> anyhow::Result<String> {
        let outcome = self
            .client
            .call(methods::MATCH_CREATE, RpcParams::default())
            .await;
        self.adopt_match(outcome).await
    }

    /// Joins an existing match by alias.
    pub async fn load_match(&mut self, alias: &str) -> anyhow::Result<String> {
        let outcome = self
            .client
            .call(
                methods::MATCH_LOAD,
                RpcParams {
                    args: vec![json!(alias)],
                    network_id: None,
                },
            )
            .await;
        self.adopt_match(outcome).await
    }

    async fn adopt_match(&mut self, outcome: RpcOutcome) -> anyhow::Result<String> {
        let value = outcome
            .into_value()
            .context("match call dropped or rejected")?;
        let data: MatchData = serde_json::from_value(value).context("match data")?;
        let alias = data.alias.clone();

        self.subscribe_match_events(&data);
        let m = Match::new(
            data,
            Role::Client,
            std::time::Duration::from_millis(self.cfg.start_countdown_ms),
            std::time::Duration::from_millis(self.cfg.turn_ms),
            None,
        )
        .context("build match mirror")?;
        self.current_match = Some(m);
        Ok(alias)
    }

    fn subscribe_match_events(&self, data: &MatchData) {
        for event in [
            "match.update",
            "match.next-turn",
            "match.player-registered",
            "match.player-unregistered",
            "gameObject.spawn",
            "gameObject.despawn",
        ] {
            self.client.subscribe(event);
        }
        for player in &data.store.players {
            self.client.subscribe(&format!("player.{}.update", player.id));
        }
    }

    /// Registers this user as a player of the current match.
    pub async fn join(&mut self) -> anyhow::Result<()> {
        let (network_id, user_id) = {
            let m = self.require_match()?;
            (Some(m.network_id()), self.user_id)
        };

        let outcome = self
            .client
            .call(
                methods::MATCH_REGISTER_PLAYER,
                RpcParams {
                    args: vec![json!(user_id)],
                    network_id,
                },
            )
            .await;
        if let RpcOutcome::Ok(confirmed) = outcome {
            self.client
                .subscribe(&format!("player.{user_id}.update"));
            self.require_match_mut()?
                .register_player(confirmed, None)
                .map_err(|e| anyhow::anyhow!("apply joined player: {e}"))?;
        }
        Ok(())
    }

    /// Flags this user's player ready; optimistic, the broadcast confirms.
    pub fn ready(&mut self) -> anyhow::Result<()> {
        self.notify_player(methods::PLAYER_READY)
    }

    pub fn unready(&mut self) -> anyhow::Result<()> {
        self.notify_player(methods::PLAYER_UNREADY)
    }

    fn notify_player(&mut self, method: &'static str) -> anyhow::Result<()> {
        let user_id = self.user_id;
        self.client.notify(
            method,
            RpcParams {
                args: vec![],
                network_id: Some(NetworkId(user_id.0)),
            },
        );
        // The notify has no response; the body runs with an empty input.
        let m = self.require_match_mut()?;
        let result = if method == methods::PLAYER_READY {
            m.player_ready(user_id, None)
        } else {
            m.player_unready(user_id, None)
        };
        result.map_err(|e| anyhow::anyhow!("apply ready state: {e}"))?;
        Ok(())
    }

    /// Asks the server to start the match.
    pub fn start(&mut self) -> anyhow::Result<()> {
        let network_id = Some(self.require_match()?.network_id());
        self.client.notify(
            methods::MATCH_START,
            RpcParams {
                args: vec![],
                network_id,
            },
        );
        Ok(())
    }

    /// Requests the full entity snapshots (spawn/resync path).
    pub fn request_spawn(&mut self) -> anyhow::Result<()> {
        let network_id = Some(self.require_match()?.network_id());
        self.client.notify(
            methods::MATCH_SPAWN_GAME_OBJECTS,
            RpcParams {
                args: vec![],
                network_id,
            },
        );
        Ok(())
    }

    /// Ends this user's turn.
    pub fn end_turn(&mut self) -> anyhow::Result<()> {
        let network_id = Some(self.require_match()?.network_id());
        self.client.notify(
            methods::MATCH_END_TURN,
            RpcParams {
                args: vec![],
                network_id,
            },
        );
        Ok(())
    }

    /// Selects an entity; when the selection completes a pending move, the
    /// resulting RPC is performed and its confirmed result applied.
    pub async fn select_entity(&mut self, entity: EntityId) -> anyhow::Result<()> {
        let intent = self.require_match_mut()?.select_entity(entity);
        self.perform_intent(intent).await
    }

    /// Acquires an attack target; performs the attack RPC when legal.
    pub async fn acquire_target(&mut self, entity: EntityId) -> anyhow::Result<()> {
        let intent = self.require_match_mut()?.acquire_target(entity);
        self.perform_intent(intent).await
    }

    async fn perform_intent(&mut self, intent: Option<RpcIntent>) -> anyhow::Result<()> {
        let Some(intent) = intent else {
            return Ok(());
        };
        let Some(network_id) = intent.network_id else {
            warn!(method = intent.method, "intent without network id dropped");
            return Ok(());
        };

        let params = RpcParams {
            args: intent.args.clone(),
            network_id: Some(network_id),
        };
        let outcome = match intent.mode {
            RpcMode::Call => self.client.call(intent.method, params).await,
            RpcMode::Notify => {
                self.client.notify(intent.method, params);
                RpcOutcome::Ok(Value::Null)
            }
        };

        let RpcOutcome::Ok(confirmed) = outcome else {
            // Validation failures just warn; the action stays active so the
            // user can retry or cancel.
            return Ok(());
        };

        let m = self.require_match_mut()?;
        let Some(NetworkAddress::Component { entity, .. }) = m.resolve(network_id) else {
            warn!(method = intent.method, "confirmed rpc target is unknown locally");
            return Ok(());
        };

        let result = match intent.method {
            methods::MOVEABLE_MOVE => m.move_action(entity, confirmed, None),
            methods::GUN_ATTACK_ATTACK => m.attack_action(entity, confirmed, None),
            other => {
                warn!(method = other, "unexpected intent method");
                return Ok(());
            }
        };
        if let Err(err) = result {
            warn!(method = intent.method, error = %err, "applying confirmed action failed");
        }
        Ok(())
    }

    /// Processes buffered server events until none is immediately pending.
    pub fn pump(&mut self) -> anyhow::Result<usize> {
        let mut handled = 0;
        while let Some((name, payload)) = self.client.try_next_event() {
            self.process_event(&name, payload)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Waits for and processes one server event.
    pub async fn pump_one(&mut self) -> anyhow::Result<bool> {
        match self.client.next_event().await {
            Some((name, payload)) => {
                self.process_event(&name, payload)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn process_event(&mut self, name: &str, payload: Value) -> anyhow::Result<()> {
        match name {
            "match.update" => {
                let store: MatchStoreData = serde_json::from_value(payload["store"].clone())
                    .context("match store payload")?;
                for player in &store.players {
                    self.client.subscribe(&format!("player.{}.update", player.id));
                }
                self.require_match_mut()?.apply_match_update(store);
            }
            "match.next-turn" => {
                let player: PlayerId =
                    serde_json::from_value(payload).context("next-turn payload")?;
                self.require_match_mut()?.apply_next_turn(player);
            }
            "match.player-registered" => {
                let player: PlayerId =
                    serde_json::from_value(payload).context("player-registered payload")?;
                self.require_match_mut()?
                    .game_mut()
                    .scene_mut()
                    .dispatch(&SceneEvent::PlayerRegistered { player });
            }
            "match.player-unregistered" => {
                let player: PlayerId =
                    serde_json::from_value(payload).context("player-unregistered payload")?;
                self.require_match_mut()?
                    .game_mut()
                    .scene_mut()
                    .dispatch(&SceneEvent::PlayerUnregistered { player });
            }
            "gameObject.spawn" => {
                let snapshot: EntitySnapshot =
                    serde_json::from_value(payload["gameObject"].clone())
                        .context("spawn snapshot")?;
                let network_id: Option<NetworkId> =
                    serde_json::from_value(payload["networkId"].clone()).unwrap_or(None);

                if let Some(network_id) = network_id {
                    for suffix in ["update", "ownership-received", "ownership-lost"] {
                        self.client.subscribe(&format!("{}.{suffix}", network_id.0));
                    }
                }
                self.require_match_mut()?
                    .apply_spawn(&snapshot, network_id)
                    .map_err(|e| anyhow::anyhow!("apply spawn: {e}"))?;
            }
            "gameObject.despawn" => {
                self.require_match_mut()?.despawn_all();
            }
            other => {
                if let Some(rest) = other.strip_prefix("player.") {
                    if let Some(id) = rest.strip_suffix(".update") {
                        if Uuid::parse_str(id).is_ok() {
                            let player: PlayerData =
                                serde_json::from_value(payload).context("player update")?;
                            self.require_match_mut()?.apply_player_update(player);
                            return Ok(());
                        }
                    }
                }
                if let Some((channel, suffix)) = parse_channel(other) {
                    self.process_channel_event(channel, suffix, payload)?;
                } else {
                    debug!(event = other, "unhandled event");
                }
            }
        }
        Ok(())
    }

    fn process_channel_event(
        &mut self,
        channel: Uuid,
        suffix: &str,
        payload: Value,
    ) -> anyhow::Result<()> {
        match suffix {
            "update" => {
                let component: ComponentId =
                    serde_json::from_value(payload["id"].clone()).context("diff component id")?;
                if let Err(err) = self.require_match_mut()?.apply_entity_update(
                    ComponentId(channel),
                    component,
                    &payload["state"],
                ) {
                    debug!(error = %err, "component diff for unknown entity");
                }
            }
            "ownership-received" => {
                self.require_match_mut()?
                    .apply_ownership(ComponentId(channel), true);
            }
            "ownership-lost" => {
                self.require_match_mut()?
                    .apply_ownership(ComponentId(channel), false);
            }
            other => debug!(channel = %channel, event = other, "unhandled channel event"),
        }
        Ok(())
    }

    fn require_match(&self) -> anyhow::Result<&Match> {
        self.current_match
            .as_ref()
            .context("no match loaded in this session")
    }

    fn require_match_mut(&mut self) -> anyhow::Result<&mut Match> {
        self.current_match
            .as_mut()
            .context("no match loaded in this session")
    }
}

/// Splits `<uuid>.<suffix>` channel event names.
fn parse_channel(name: &str) -> Option<(Uuid, &str)> {
    let (head, tail) = name.split_once('.')?;
    Uuid::parse_str(head).ok().map(|id| (id, tail))
}
