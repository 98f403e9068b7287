//! Client transport: handshake, correlated calls, subscriptions, heartbeat.
//!
//! Calls made while the connection is not open are dropped with a warning,
//! not queued; the only waiting that happens is the initial handshake.
//! There is no automatic retry anywhere. A dead connection surfaces as a
//! disconnect, nothing more.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Context;
use flotilla_shared::prelude::*;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Result of a request/response RPC from the caller's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcOutcome {
    /// The connection was not open (or died mid-call); the call was dropped.
    Dropped,
    /// The server confirmed the call.
    Ok(Value),
    /// The server rejected the call with a structured error.
    Err(RpcErrorBody),
}

impl RpcOutcome {
    pub fn into_value(self) -> Option<Value> {
        match self {
            RpcOutcome::Ok(value) => Some(value),
            _ => None,
        }
    }
}

/// Low-level game client over one reliable connection.
pub struct GameClient {
    pub connection_id: ConnectionId,
    writer_tx: UnboundedSender<ClientFrame>,
    inbound_rx: UnboundedReceiver<ServerFrame>,
    /// Events received while waiting for an RPC response, replayed in order.
    buffered: VecDeque<(String, Value)>,
    next_request: RequestId,
    open: bool,
    heartbeat_delay: Duration,
}

impl GameClient {
    /// Connects and performs the `Hello`/`Welcome` handshake.
    pub async fn connect(cfg: &EngineConfig) -> anyhow::Result<Self> {
        let addr: std::net::SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        info!(server = %addr, "Connecting to server");

        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        let (mut reader, mut writer) = flotilla_shared::protocol::framed(stream);

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<ClientFrame>();
        tokio::spawn(async move {
            while let Some(frame) = writer_rx.recv().await {
                if writer.send(&frame).await.is_err() {
                    break;
                }
            }
        });

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match reader.recv::<ServerFrame>().await {
                    Ok(frame) => {
                        if inbound_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        writer_tx
            .send(ClientFrame::Hello {
                protocol: PROTOCOL_VERSION,
            })
            .context("send hello")?;

        let mut client = Self {
            connection_id: ConnectionId(0),
            writer_tx,
            inbound_rx,
            buffered: VecDeque::new(),
            next_request: 1,
            open: false,
            heartbeat_delay: Duration::from_millis(cfg.heartbeat_interval_ms),
        };

        // The welcome is the one frame worth blocking on.
        loop {
            let frame = client
                .inbound_rx
                .recv()
                .await
                .context("connection closed during handshake")?;
            match frame {
                ServerFrame::Welcome { connection_id } => {
                    client.connection_id = connection_id;
                    client.open = true;
                    info!(connection_id = %connection_id, "Connected to server");
                    return Ok(client);
                }
                other => client.absorb(other),
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Advertises interest in a named event.
    pub fn subscribe(&self, event: &str) {
        let _ = self.writer_tx.send(ClientFrame::Subscribe {
            event: event.to_string(),
        });
    }

    pub fn unsubscribe(&self, event: &str) {
        let _ = self.writer_tx.send(ClientFrame::Unsubscribe {
            event: event.to_string(),
        });
    }

    /// Request/response RPC. Events arriving while waiting are buffered and
    /// replayed by [`GameClient::next_event`] in arrival order.
    pub async fn call(&mut self, method: &str, params: RpcParams) -> RpcOutcome {
        if !self.open {
            warn!(method, "rpc dropped, connection not open");
            return RpcOutcome::Dropped;
        }

        let id = self.next_request;
        self.next_request += 1;
        if self
            .writer_tx
            .send(ClientFrame::Rpc {
                id,
                method: method.to_string(),
                params,
            })
            .is_err()
        {
            self.open = false;
            return RpcOutcome::Dropped;
        }

        loop {
            let Some(frame) = self.inbound_rx.recv().await else {
                self.open = false;
                return RpcOutcome::Dropped;
            };
            match frame {
                ServerFrame::RpcOk { id: rid, value } if rid == id => {
                    return RpcOutcome::Ok(value);
                }
                ServerFrame::RpcError { id: rid, error } if rid == id => {
                    warn!(method, code = error.code, message = %error.message, "rpc error");
                    return RpcOutcome::Err(error);
                }
                other => {
                    self.absorb(other);
                    if !self.open {
                        return RpcOutcome::Dropped;
                    }
                }
            }
        }
    }

    /// Fire-and-forget RPC; dropped with a warning when not open.
    pub fn notify(&self, method: &str, params: RpcParams) {
        if !self.open {
            warn!(method, "notify dropped, connection not open");
            return;
        }
        let _ = self.writer_tx.send(ClientFrame::Notify {
            method: method.to_string(),
            params,
        });
    }

    /// Next named event, in arrival order. Returns `None` once the
    /// connection is gone.
    pub async fn next_event(&mut self) -> Option<(String, Value)> {
        loop {
            if let Some(event) = self.buffered.pop_front() {
                return Some(event);
            }
            if !self.open {
                return None;
            }
            let frame = self.inbound_rx.recv().await?;
            self.absorb(frame);
        }
    }

    /// Like [`GameClient::next_event`] but returns `None` once nothing is
    /// immediately available.
    pub fn try_next_event(&mut self) -> Option<(String, Value)> {
        loop {
            if let Some(event) = self.buffered.pop_front() {
                return Some(event);
            }
            match self.inbound_rx.try_recv() {
                Ok(frame) => self.absorb(frame),
                Err(_) => return None,
            }
        }
    }

    /// Routes a frame: events buffer, pings schedule a delayed pong,
    /// disconnects close the client.
    fn absorb(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Event { name, payload } => {
                self.buffered.push_back((name, payload));
            }
            ServerFrame::Ping => {
                let writer = self.writer_tx.clone();
                let delay = self.heartbeat_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = writer.send(ClientFrame::Pong);
                });
            }
            ServerFrame::Disconnect { reason } => {
                info!(reason = %reason, "server closed the connection");
                self.open = false;
            }
            ServerFrame::Welcome { .. } => {
                debug!("duplicate welcome ignored");
            }
            ServerFrame::RpcOk { id, .. } | ServerFrame::RpcError { id, .. } => {
                // A response nobody waits for: its call raced a cancel.
                debug!(request = id, "late rpc response ignored");
            }
        }
    }
}
