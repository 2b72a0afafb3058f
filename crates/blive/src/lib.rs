//! blive: client for the Bilibili live danmaku (live comment) socket.
//!
//! ## Protocol
//!
//! - [`packet`] - Binary frame codec, including zlib / brotli nested frames
//! - [`Normalizer`] - Turns decoded business messages into [`Event`]s through a
//!   [`CommandRegistry`]
//! - [`Message`] - Chat content segmented into text and emoticons
//!
//! ## Connections
//!
//! - [`Session`] - One self-healing connection per (identity, room)
//! - [`Supervisor`] - Starts and stops sessions, routes outward operations
//! - [`LiveTransport`] - Network seam; [`WebTransport`] talks to the real service
//!
//! ## Identities
//!
//! - [`Bot`] - Cookie-based identity with WBI request signing
//! - [`ApiTable`] - Named operations callable through [`Supervisor::dispatch`]

pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod model;
pub mod normalize;
pub mod packet;
pub mod proto;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use client::{ApiTable, Bot, CookieJar};
pub use command::{CommandRegistry, Registration};
pub use config::{BotConfig, Config, SessionConfig};
pub use error::{DanmakuError, Result};
pub use event::{Event, EventType};
pub use message::{Emoticon, Message, Segment};
pub use normalize::Normalizer;
pub use session::{EventHandler, Session, SessionParams, SessionState};
pub use supervisor::Supervisor;
pub use transport::{AuthInfo, FrameSink, FrameStream, LiveTransport, WebTransport};
