//! Per-connection server state: framed writer, event subscriptions, and the
//! heartbeat.
//!
//! The heartbeat keeps dead sessions from lingering: the server sends a
//! ping and arms a kill deadline; the client's pong re-arms the deadline
//! and triggers the next ping. A connection that stays silent past the
//! deadline is reaped, never retried; its user simply shows up offline
//! until a reconnect.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use flotilla_shared::prelude::{ConnectionId, FrameWriter, ServerFrame};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

/// One live transport session.
pub struct ClientConnection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    writer: FrameWriter,
    /// Event names this connection has subscribed to; only these are
    /// forwarded.
    events: HashSet<String>,
    /// Handshake completed.
    ready: bool,
    kill_deadline: Instant,
    kill_timeout: Duration,
}

impl ClientConnection {
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        writer: FrameWriter,
        kill_timeout: Duration,
    ) -> Self {
        Self {
            id,
            peer,
            writer,
            events: HashSet::new(),
            ready: false,
            kill_deadline: Instant::now() + kill_timeout,
            kill_timeout,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn subscribe(&mut self, event: &str) {
        self.events.insert(event.to_string());
    }

    pub fn unsubscribe(&mut self, event: &str) {
        self.events.remove(event);
    }

    pub fn is_subscribed(&self, event: &str) -> bool {
        self.events.contains(event)
    }

    pub async fn send(&mut self, frame: &ServerFrame) -> anyhow::Result<()> {
        self.writer.send(frame).await
    }

    /// Sends the event if the connection subscribed to it.
    pub async fn emit(&mut self, name: &str, payload: &Value) -> anyhow::Result<()> {
        if !self.is_subscribed(name) {
            return Ok(());
        }
        debug!(client_id = %self.id, event = name, "emit");
        self.send(&ServerFrame::Event {
            name: name.to_string(),
            payload: payload.clone(),
        })
        .await
    }

    /// Emits a ping and arms the kill deadline.
    pub async fn ping(&mut self) -> anyhow::Result<()> {
        self.kill_deadline = Instant::now() + self.kill_timeout;
        self.send(&ServerFrame::Ping).await
    }

    /// A pong re-arms the deadline and immediately schedules the next ping;
    /// the client paces the exchange by delaying its pong.
    pub async fn on_pong(&mut self) -> anyhow::Result<()> {
        self.ping().await
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.kill_deadline
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("ready", &self.ready)
            .field("events", &self.events.len())
            .finish()
    }
}
