//! In-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use blive::packet::{self, Packet, op, ver};
use blive::transport::{AuthInfo, FrameSink, FrameStream, LiveTransport};
use blive::{DanmakuError, Event, EventHandler, Result};
use bytes::Bytes;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

pub const SHORT_ROOM: u64 = 1;
pub const ROOM: u64 = 5050;

/// Server side of one opened connection.
pub struct Conn {
    pub to_client: fmpsc::UnboundedSender<Result<Bytes>>,
    pub from_client: fmpsc::UnboundedReceiver<Bytes>,
}

impl Conn {
    pub async fn next_packet(&mut self) -> Option<Packet> {
        let frame = self.from_client.next().await?;
        Some(packet::decode(&frame).expect("client sent a malformed frame"))
    }

    pub fn send(&self, frame: Bytes) {
        self.to_client
            .unbounded_send(Ok(frame))
            .expect("client stream dropped");
    }

    /// Reply to the auth frame with the given sequence number.
    pub fn ack(&self, sequence: u32) {
        self.send(server_packet(ver::POPULARITY, op::AUTH_REPLY, sequence, br#"{"code":0}"#));
    }

    pub fn command(&self, body: Value) {
        self.send(server_packet(
            ver::RAW_JSON,
            op::COMMAND,
            0,
            body.to_string().as_bytes(),
        ));
    }
}

pub fn server_packet(version: u16, operation: u32, sequence: u32, body: &[u8]) -> Bytes {
    Packet {
        header_len: packet::HEADER_LEN as u16,
        version,
        operation,
        sequence,
        body: Bytes::copy_from_slice(body),
    }
    .encode()
}

#[derive(Default)]
pub struct MockCounters {
    pub resolves: AtomicUsize,
    pub opens: AtomicUsize,
}

pub struct MockTransport {
    pub counters: Arc<MockCounters>,
    conns: mpsc::UnboundedSender<Conn>,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Conn>) {
        let (conns, rx) = mpsc::unbounded_channel();
        (
            Self {
                counters: Arc::default(),
                conns,
            },
            rx,
        )
    }
}

#[async_trait]
impl LiveTransport for MockTransport {
    async fn resolve_room(&self, room_id: u64) -> Result<u64> {
        self.counters.resolves.fetch_add(1, Ordering::SeqCst);
        Ok(if room_id == SHORT_ROOM { ROOM } else { room_id })
    }

    async fn authenticate(&self, room_id: u64) -> Result<AuthInfo> {
        Ok(AuthInfo {
            room_id,
            uid: 42,
            buvid: "TEST-infoc".to_string(),
            token: "token".to_string(),
            host: "localhost".to_string(),
            port: 443,
        })
    }

    async fn open(&self, _auth: &AuthInfo) -> Result<(FrameSink, FrameStream)> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let (client_tx, server_rx) = fmpsc::unbounded::<Bytes>();
        let (server_tx, client_rx) = fmpsc::unbounded::<Result<Bytes>>();
        self.conns
            .send(Conn {
                to_client: server_tx,
                from_client: server_rx,
            })
            .map_err(|_| DanmakuError::connection("test dropped the connection receiver"))?;

        let sink = client_tx.sink_map_err(|e| DanmakuError::connection(e.to_string()));
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }
}

pub struct Collect(pub mpsc::UnboundedSender<(String, Event)>);

#[async_trait]
impl EventHandler for Collect {
    async fn handle_event(&self, self_id: &str, event: Event) {
        let _ = self.0.send((self_id.to_string(), event));
    }
}

pub fn collector() -> (Arc<Collect>, mpsc::UnboundedReceiver<(String, Event)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Collect(tx)), rx)
}
