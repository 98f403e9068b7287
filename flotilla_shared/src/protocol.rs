//! Networking primitives.
//!
//! Goals:
//! - Provide one reliable (TCP) channel with length-prefixed JSON frames.
//! - Provide the RPC/event/heartbeat message types used by client/server.
//! - Keep serialization explicit and versionable.
//!
//! There is no unreliable channel: replication is a diff stream over the
//! reliable channel, so a dropped diff would mean permanent desync.

use anyhow::Context;
use bytes::{BufMut, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::error::RpcErrorBody;
use crate::identity::{ConnectionId, NetworkId};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Correlates an RPC request with its response.
pub type RequestId = u64;

/// Parameters of an RPC call.
///
/// `network_id` routes the call to "the" instance on the server; it is
/// absent for static-like calls (e.g. user registration).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RpcParams {
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<NetworkId>,
}

/// Messages sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientFrame {
    /// Connection handshake.
    Hello { protocol: u32 },
    /// Advertise interest in a named event; the server forwards only
    /// subscribed events to this connection.
    Subscribe { event: String },
    Unsubscribe { event: String },
    /// Request/response RPC.
    Rpc {
        id: RequestId,
        method: String,
        params: RpcParams,
    },
    /// Fire-and-forget RPC.
    Notify { method: String, params: RpcParams },
    /// Heartbeat answer.
    Pong,
}

/// Messages sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServerFrame {
    /// Handshake acknowledgement.
    Welcome { connection_id: ConnectionId },
    /// Successful RPC response.
    RpcOk { id: RequestId, value: Value },
    /// Structured RPC failure.
    RpcError { id: RequestId, error: RpcErrorBody },
    /// Named event with payload, e.g. `match.update` or `<id>.update`.
    Event { name: String, payload: Value },
    /// Heartbeat probe; arms the kill timer on the server side.
    Ping,
    Disconnect { reason: String },
}

/// Writes length-prefixed JSON frames to the write half of a TCP stream.
#[derive(Debug)]
pub struct FrameWriter {
    stream: OwnedWriteHalf,
}

impl FrameWriter {
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(msg).context("serialize frame")?;
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(&payload);
        self.stream.write_all(&buf).await.context("tcp write")?;
        Ok(())
    }
}

/// Reads length-prefixed JSON frames from the read half of a TCP stream.
#[derive(Debug)]
pub struct FrameReader {
    stream: OwnedReadHalf,
}

impl FrameReader {
    pub async fn recv<T: DeserializeOwned>(&mut self) -> anyhow::Result<T> {
        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .context("tcp read len")?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        serde_json::from_slice(&payload).context("deserialize frame")
    }
}

/// Splits a connected stream into framed halves.
pub fn framed(stream: TcpStream) -> (FrameReader, FrameWriter) {
    let (read, write) = stream.into_split();
    (FrameReader { stream: read }, FrameWriter { stream: write })
}

/// TCP server listener.
pub struct FrameListener {
    listener: TcpListener,
}

impl FrameListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(FrameReader, FrameWriter, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        let (reader, writer) = framed(stream);
        Ok((reader, writer, addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes<T: Serialize>(msg: &T) -> anyhow::Result<Vec<u8>> {
    serde_json::to_vec(msg).context("serialize")
}

pub fn decode_from_bytes<T: DeserializeOwned>(b: &[u8]) -> anyhow::Result<T> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_roundtrip_bytes() {
        let msg = ClientFrame::Rpc {
            id: 9,
            method: "Match.registerPlayer".into(),
            params: RpcParams {
                args: vec![Value::String("abc".into())],
                network_id: Some(NetworkId::new_unique()),
            },
        };
        let bytes = encode_to_bytes(&msg).unwrap();
        let back: ClientFrame = decode_from_bytes(&bytes).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn server_frame_roundtrip_bytes() {
        let msg = ServerFrame::RpcError {
            id: 4,
            error: RpcErrorBody {
                code: 3000,
                message: "validation failed".into(),
                data: Value::Object(Default::default()),
            },
        };
        let bytes = encode_to_bytes(&msg).unwrap();
        let back: ServerFrame = decode_from_bytes(&bytes).unwrap();
        assert_eq!(msg, back);
    }

    #[tokio::test]
    async fn framed_send_recv_over_socket() -> anyhow::Result<()> {
        let listener = FrameListener::bind("127.0.0.1:0".parse()?).await?;
        let addr = listener.local_addr()?;

        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await?;
            let (_, mut writer) = framed(stream);
            writer
                .send(&ClientFrame::Hello {
                    protocol: PROTOCOL_VERSION,
                })
                .await?;
            Ok::<_, anyhow::Error>(())
        });

        let (mut reader, _, _) = listener.accept().await?;
        let frame: ClientFrame = reader.recv().await?;
        assert_eq!(
            frame,
            ClientFrame::Hello {
                protocol: PROTOCOL_VERSION
            }
        );

        client.await??;
        Ok(())
    }
}
