//! One live connection per (identity, room).
//!
//! A session cycles through
//! `Resolving → Authenticating → Connecting → AwaitingAuthAck → Active → Closing`
//! and back to `Resolving` after the reconnect delay. It never gives up; only
//! cancellation ends it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::{DanmakuError, Result};
use crate::event::Event;
use crate::normalize::Normalizer;
use crate::packet::{Packet, Packets, op};
use crate::transport::{FrameSink, FrameStream, LiveTransport, heartbeat_packet};

/// Receives every event produced by a session.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// `self_id` identifies the receiving identity.
    async fn handle_event(&self, self_id: &str, event: Event);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Resolving,
    Authenticating,
    Connecting,
    AwaitingAuthAck,
    Active,
    Closing,
}

/// Parameters for creating a session.
pub struct SessionParams<T> {
    /// Room id as configured; may be a short id.
    pub room_id: u64,
    /// Receiving identity's uid, 0 when anonymous.
    pub uid: i64,
    pub transport: Arc<T>,
    pub handler: Arc<dyn EventHandler>,
    pub normalizer: Normalizer,
    pub config: SessionConfig,
    pub cancel: CancellationToken,
    /// Dispatch tasks are spawned here.
    pub tracker: TaskTracker,
}

pub struct Session<T> {
    room_id: u64,
    uid: i64,
    self_id: String,
    transport: Arc<T>,
    handler: Arc<dyn EventHandler>,
    normalizer: Normalizer,
    config: SessionConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
    state: watch::Sender<SessionState>,
}

impl<T: LiveTransport> Session<T> {
    pub fn new(params: SessionParams<T>) -> Self {
        let SessionParams {
            room_id,
            uid,
            transport,
            handler,
            normalizer,
            config,
            cancel,
            tracker,
        } = params;
        let (state, _) = watch::channel(SessionState::Resolving);
        Self {
            room_id,
            uid,
            self_id: uid.to_string(),
            transport,
            handler,
            normalizer,
            config,
            cancel,
            tracker,
            state,
        }
    }

    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            trace!("[{}] {:?} -> {:?}", self.room_id, previous, state);
        }
    }

    /// Run until cancelled.
    pub async fn run(self) {
        let delay = self.config.reconnect_interval;
        info!("[{}] Session started for identity {}", self.room_id, self.self_id);

        loop {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = self.connect_once() => outcome,
            };

            match outcome {
                Ok(()) => info!("[{}] Connection closed, reconnecting in {:?}", self.room_id, delay),
                Err(DanmakuError::InteractionInterrupt { game_id, timestamp }) => info!(
                    "[{}] Interaction {} ended at {}, reconnecting in {:?}",
                    self.room_id, game_id, timestamp, delay
                ),
                Err(e) if e.is_fatal_to_connection() => error!(
                    "[{}] Connection attempt failed: {}, retrying in {:?}",
                    self.room_id, e, delay
                ),
                Err(e) => warn!(
                    "[{}] Connection cycle ended: {}, reconnecting in {:?}",
                    self.room_id, e, delay
                ),
            }
            self.set_state(SessionState::Closing);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(SessionState::Closing);
        info!("[{}] Session stopped", self.room_id);
    }

    /// One full cycle: handshake, then read until the socket ends.
    async fn connect_once(&self) -> Result<()> {
        self.set_state(SessionState::Resolving);
        let room_id = self.transport.resolve_room(self.room_id).await?;

        self.set_state(SessionState::Authenticating);
        let auth = self.transport.authenticate(room_id).await?;

        self.set_state(SessionState::Connecting);
        let (mut sink, mut stream) = self.transport.open(&auth).await?;
        sink.send(auth.auth_packet()?.encode()).await?;

        self.set_state(SessionState::AwaitingAuthAck);
        let sequence = tokio::time::timeout(
            self.config.connect_timeout,
            self.await_auth_ack(&mut stream, room_id),
        )
        .await
        .map_err(|_| DanmakuError::handshake("timed out waiting for auth reply"))??;

        self.set_state(SessionState::Active);
        info!("[{}] Connected to {}:{}", room_id, auth.host, auth.port);

        // The heartbeat owns the sink; leaving this function stops it.
        let heartbeat = self.cancel.child_token();
        let _heartbeat_guard = heartbeat.clone().drop_guard();
        tokio::spawn(heartbeat_loop(
            sink,
            sequence,
            self.config.heartbeat_interval,
            heartbeat,
            room_id,
        ));

        while let Some(frame) = stream.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) if e.is_fatal_to_connection() => return Err(e),
                Err(e) => {
                    warn!("[{}] Dropping socket message: {}", room_id, e);
                    continue;
                }
            };
            self.handle_packets(&mut Packets::new(frame), room_id)?;
        }
        Ok(())
    }

    /// Wait for the auth reply and return its sequence number.
    async fn await_auth_ack(&self, stream: &mut FrameStream, room_id: u64) -> Result<u32> {
        let frame = stream
            .next()
            .await
            .ok_or_else(|| DanmakuError::SocketClosed("closed before auth reply".to_string()))??;
        let mut packets = Packets::new(frame);
        let ack = packets
            .next()
            .ok_or_else(|| DanmakuError::handshake("empty auth reply"))?
            .map_err(|e| DanmakuError::handshake(format!("unreadable auth reply: {e}")))?;

        if ack.operation != op::AUTH_REPLY {
            return Err(DanmakuError::handshake(format!(
                "expected auth reply, got operation {}",
                ack.operation
            )));
        }
        if let Ok(body) = serde_json::from_slice::<Value>(&ack.body)
            && let Some(code) = body.get("code").and_then(Value::as_i64)
            && code != 0
        {
            return Err(DanmakuError::handshake(format!("auth rejected with code {code}")));
        }
        debug!("[{}] Auth reply, sequence {}", room_id, ack.sequence);

        self.handle_packets(&mut packets, room_id)?;
        Ok(ack.sequence)
    }

    /// Walk the frames of one socket message. Interaction interrupts and
    /// connection-fatal errors escape; everything else is logged and dropped.
    fn handle_packets(&self, packets: &mut Packets, room_id: u64) -> Result<()> {
        loop {
            let offset = packets.offset();
            let Some(result) = packets.next() else {
                return Ok(());
            };
            match result {
                Ok(packet) => self.handle_packet(&packet, offset, room_id)?,
                Err(e) => warn!(
                    "[{}] Dropping frame at offset {} of {} bytes: {}",
                    room_id,
                    offset,
                    packets.buffer_len(),
                    e
                ),
            }
        }
    }

    fn handle_packet(&self, packet: &Packet, offset: usize, room_id: u64) -> Result<()> {
        if packet.operation == op::AUTH_REPLY {
            debug!("[{}] Extra auth reply at offset {}", room_id, offset);
            return Ok(());
        }

        let body = match packet.decode_body() {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    "[{}] Dropping frame at offset {} (length {}, version {}): {}",
                    room_id,
                    offset,
                    packet.total_len(),
                    packet.version,
                    e
                );
                return Ok(());
            }
        };

        let (messages, errors) = body.into_messages();
        for e in errors {
            warn!(
                "[{}] Dropping nested frame in frame at offset {} (length {}): {}",
                room_id,
                offset,
                packet.total_len(),
                e
            );
        }

        for msg in &messages {
            match self.normalizer.normalize_message(msg, room_id) {
                Ok(events) => {
                    for mut event in events {
                        event.mark_to_me(self.uid);
                        self.dispatch(event);
                    }
                }
                Err(e @ DanmakuError::InteractionInterrupt { .. }) => return Err(e),
                Err(e) if e.is_fatal_to_connection() => return Err(e),
                Err(DanmakuError::UnknownCommand(_)) => {}
                Err(e) => warn!(
                    "[{}] Dropping message in frame at offset {}: {}",
                    room_id, offset, e
                ),
            }
        }
        Ok(())
    }

    fn dispatch(&self, event: Event) {
        let handler = Arc::clone(&self.handler);
        let self_id = self.self_id.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            cancel
                .run_until_cancelled(handler.handle_event(&self_id, event))
                .await;
        });
    }
}

async fn heartbeat_loop(
    mut sink: FrameSink,
    seed: u32,
    period: Duration,
    cancel: CancellationToken,
    room_id: u64,
) {
    let mut sequence = seed;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    cancel
        .run_until_cancelled(async move {
            loop {
                ticker.tick().await;
                if let Err(e) = sink.send(heartbeat_packet(sequence).encode()).await {
                    warn!("[{}] Failed to send heartbeat: {}", room_id, e);
                }
                sequence = sequence.wrapping_add(1);
            }
        })
        .await;
    trace!("[{}] Heartbeat stopped", room_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::tests::{server_frame, zlib};
    use crate::packet::ver;
    use crate::transport::AuthInfo;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Offline {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl LiveTransport for Offline {
        async fn resolve_room(&self, _room_id: u64) -> Result<u64> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(DanmakuError::handshake("offline"))
        }

        async fn authenticate(&self, _room_id: u64) -> Result<AuthInfo> {
            Err(DanmakuError::handshake("offline"))
        }

        async fn open(&self, _auth: &AuthInfo) -> Result<(FrameSink, FrameStream)> {
            Err(DanmakuError::connection("offline"))
        }
    }

    struct Collect(mpsc::UnboundedSender<(String, Event)>);

    #[async_trait]
    impl EventHandler for Collect {
        async fn handle_event(&self, self_id: &str, event: Event) {
            let _ = self.0.send((self_id.to_string(), event));
        }
    }

    fn session(uid: i64) -> (Session<Offline>, mpsc::UnboundedReceiver<(String, Event)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(SessionParams {
            room_id: 1,
            uid,
            transport: Arc::new(Offline::default()),
            handler: Arc::new(Collect(tx)),
            normalizer: Normalizer::builtin().unwrap(),
            config: SessionConfig::default(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });
        (session, rx)
    }

    fn command(body: serde_json::Value) -> Vec<u8> {
        server_frame(ver::RAW_JSON, op::COMMAND, body.to_string().as_bytes())
    }

    fn feed(session: &Session<Offline>, frame: Vec<u8>) -> Result<()> {
        session.handle_packets(&mut Packets::new(Bytes::from(frame)), 5050)
    }

    #[tokio::test]
    async fn test_dispatches_events_with_identity() {
        let (session, mut rx) = session(42);
        feed(
            &session,
            command(json!({"cmd": "ONLINE_RANK_COUNT", "data": {"count": 10}})),
        )
        .unwrap();

        let (self_id, event) = rx.recv().await.unwrap();
        assert_eq!(self_id, "42");
        assert_eq!(event.room_id(), 5050);
        assert_eq!(event.event_name(), "online_rank_count");
    }

    #[tokio::test]
    async fn test_heartbeat_reply_and_batch() {
        let (session, mut rx) = session(0);

        let mut inner = command(json!({"cmd": "WATCHED_CHANGE", "data": {"num": 3}}));
        inner.extend(command(json!({"cmd": "ONLINE_RANK_COUNT", "data": {"count": 1}})));
        let mut frame = server_frame(ver::POPULARITY, op::HEARTBEAT_REPLY, &1234u32.to_be_bytes());
        frame.extend(server_frame(ver::ZLIB, op::COMMAND, &zlib(&inner)));
        feed(&session, frame).unwrap();

        let mut names = Vec::new();
        for _ in 0..3 {
            names.push(rx.recv().await.unwrap().1.event_name().to_string());
        }
        names.sort();
        assert_eq!(names, ["heartbeat", "online_rank_count", "watched_change"]);
    }

    #[tokio::test]
    async fn test_contained_errors_keep_going() {
        let (session, mut rx) = session(0);

        let mut frame = command(json!({"cmd": "SOMETHING_NEW", "data": {}}));
        frame.extend(server_frame(ver::ZLIB, op::COMMAND, b"not zlib"));
        frame.extend(command(json!({"cmd": "ONLINE_RANK_COUNT", "data": {"count": 2}})));
        // Truncated trailing frame.
        frame.extend_from_slice(&[0, 0, 0, 64, 0, 16]);
        feed(&session, frame).unwrap();

        let (_, event) = rx.recv().await.unwrap();
        assert_eq!(event.event_name(), "online_rank_count");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_interaction_end_interrupts() {
        let (session, _rx) = session(0);
        let err = feed(
            &session,
            command(json!({
                "cmd": "LIVE_OPEN_PLATFORM_INTERACTION_END",
                "data": {"game_id": "g-1", "timestamp": 1700000000}
            })),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DanmakuError::InteractionInterrupt { ref game_id, timestamp: 1700000000 } if game_id == "g-1"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_starts_at_auth_sequence() {
        let (tx, mut rx) = futures::channel::mpsc::unbounded::<Bytes>();
        let sink: FrameSink = Box::pin(tx.sink_map_err(|e| DanmakuError::connection(e.to_string())));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(heartbeat_loop(
            sink,
            7,
            Duration::from_secs(30),
            cancel.clone(),
            1,
        ));

        let mut sequences = Vec::new();
        for _ in 0..3 {
            let frame = rx.next().await.unwrap();
            let packet = crate::packet::decode(&frame).unwrap();
            assert_eq!(packet.operation, op::HEARTBEAT);
            sequences.push(packet.sequence);
        }
        assert_eq!(sequences, [7, 8, 9]);

        cancel.cancel();
        task.await.unwrap();
        assert!(rx.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempts_retry_until_cancelled() {
        let (session, _rx) = session(0);
        let cancel = session.cancel.clone();
        let transport = Arc::clone(&session.transport);
        let state = session.subscribe();
        let task = tokio::spawn(session.run());

        // Attempts at 0s, 5s and 10s.
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(*state.borrow(), SessionState::Closing);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }
}
