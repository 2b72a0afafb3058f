//! Socket transport.
//!
//! [`LiveTransport`] covers the three network steps of a connection attempt:
//! resolving the canonical room id, fetching socket credentials, and opening
//! the binary frame socket. [`WebTransport`] implements them against the
//! public web endpoints; tests substitute an in-memory transport.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use serde::Serialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, ORIGIN, USER_AGENT};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, trace};

use crate::client::{Bot, DEFAULT_UA, LIVE_ORIGIN};
use crate::error::{DanmakuError, Result};
use crate::packet::{Packet, op};

/// Outbound half: whole frames.
pub type FrameSink = Pin<Box<dyn Sink<Bytes, Error = DanmakuError> + Send>>;
/// Inbound half: one item per socket message, possibly several frames each.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Body sent by the client as heartbeat.
pub const HEARTBEAT_BODY: &[u8] = b"[object Object]";

/// Compression the client asks the server to use (brotli).
const PROTOVER: u8 = 3;

/// Credentials for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfo {
    /// Canonical room id.
    pub room_id: u64,
    pub uid: i64,
    pub buvid: String,
    pub token: String,
    pub host: String,
    pub port: u16,
}

#[derive(Serialize)]
struct AuthBody<'a> {
    uid: i64,
    roomid: u64,
    protover: u8,
    buvid: &'a str,
    platform: &'a str,
    #[serde(rename = "type")]
    kind: u8,
    key: &'a str,
}

impl AuthInfo {
    pub fn url(&self) -> String {
        format!("wss://{}:{}/sub", self.host, self.port)
    }

    /// First outbound frame of a connection.
    pub fn auth_packet(&self) -> Result<Packet> {
        let body = serde_json::to_vec(&AuthBody {
            uid: self.uid,
            roomid: self.room_id,
            protover: PROTOVER,
            buvid: &self.buvid,
            platform: "web",
            kind: 2,
            key: &self.token,
        })?;
        Ok(Packet::new(op::AUTH, 1, body))
    }
}

/// Heartbeat frame with the given sequence number.
pub fn heartbeat_packet(sequence: u32) -> Packet {
    Packet::new(op::HEARTBEAT, sequence, Bytes::from_static(HEARTBEAT_BODY))
}

#[async_trait]
pub trait LiveTransport: Send + Sync + 'static {
    /// Map a short or canonical room id to the canonical one.
    async fn resolve_room(&self, room_id: u64) -> Result<u64>;

    /// Fetch fresh socket credentials for a canonical room id.
    async fn authenticate(&self, room_id: u64) -> Result<AuthInfo>;

    /// Open the frame socket.
    async fn open(&self, auth: &AuthInfo) -> Result<(FrameSink, FrameStream)>;
}

/// Transport over the public web endpoints and a TLS websocket.
#[derive(Debug, Clone)]
pub struct WebTransport {
    bot: Arc<Bot>,
    connect_timeout: Duration,
}

impl WebTransport {
    pub fn new(bot: Arc<Bot>, connect_timeout: Duration) -> Self {
        Self {
            bot,
            connect_timeout,
        }
    }
}

#[async_trait]
impl LiveTransport for WebTransport {
    async fn resolve_room(&self, room_id: u64) -> Result<u64> {
        let info = self
            .bot
            .get_room_info(room_id)
            .await
            .map_err(|e| DanmakuError::handshake(format!("get_info for room {room_id}: {e}")))?;
        if info.room_id != room_id {
            debug!("Resolved room {} to {}", room_id, info.room_id);
        }
        Ok(info.room_id)
    }

    async fn authenticate(&self, room_id: u64) -> Result<AuthInfo> {
        let buvid = self.bot.refresh_buvid3().await?;
        let info = self.bot.get_danmu_info(room_id).await.map_err(|e| {
            DanmakuError::handshake(format!("getDanmuInfo for room {room_id}: {e}"))
        })?;
        let (host, port) = info.endpoint()?;
        Ok(AuthInfo {
            room_id,
            uid: self.bot.uid(),
            buvid,
            token: info.token.clone(),
            host: host.to_string(),
            port,
        })
    }

    async fn open(&self, auth: &AuthInfo) -> Result<(FrameSink, FrameStream)> {
        let url = auth.url();
        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_UA));
        headers.insert(ORIGIN, HeaderValue::from_static(LIVE_ORIGIN));
        let cookies = self.bot.cookie_header();
        if !cookies.is_empty() {
            let value = HeaderValue::from_str(&cookies)
                .map_err(|e| DanmakuError::connection(format!("invalid cookie header: {e}")))?;
            headers.insert(COOKIE, value);
        }

        info!("Connecting to WebSocket: {}", url);
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                DanmakuError::connection(format!(
                    "connect to {url} timed out after {:?}",
                    self.connect_timeout
                ))
            })??;

        let (write, read) = ws_stream.split();
        let sink = write
            .sink_map_err(DanmakuError::from)
            .with(|frame: Bytes| future::ok::<_, DanmakuError>(Message::Binary(frame)));
        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Binary(data)) => Some(Ok(data)),
                Ok(Message::Close(frame)) => Some(Err(DanmakuError::SocketClosed(
                    frame
                        .map(|f| format!("{} {}", f.code, f.reason))
                        .unwrap_or_else(|| "close frame".to_string()),
                ))),
                Ok(Message::Text(text)) => {
                    trace!("Ignoring text message: {}", text.as_str());
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
