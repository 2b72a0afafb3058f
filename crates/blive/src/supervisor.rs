//! Owns every identity and session.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::client::{ApiTable, Bot, default_client};
use crate::config::{BotConfig, Config, SessionConfig};
use crate::error::{DanmakuError, Result};
use crate::normalize::Normalizer;
use crate::session::{EventHandler, Session, SessionParams, SessionState};
use crate::transport::{LiveTransport, WebTransport};

struct SessionEntry {
    task: JoinHandle<()>,
    state: watch::Receiver<SessionState>,
}

/// Starts, tracks and stops sessions, and routes outward operations to the
/// owning identity.
pub struct Supervisor {
    config: SessionConfig,
    http_timeout: Duration,
    handler: Arc<dyn EventHandler>,
    normalizer: Normalizer,
    api: ApiTable,
    bots: DashMap<String, Arc<Bot>>,
    sessions: DashMap<(String, u64), SessionEntry>,
    cancel: Mutex<CancellationToken>,
    tracker: TaskTracker,
}

impl Supervisor {
    /// Fails only when the built-in command table does not validate.
    pub fn new(config: &Config, handler: Arc<dyn EventHandler>) -> Result<Self> {
        Ok(Self {
            config: config.session(),
            http_timeout: config.http_timeout(),
            handler,
            normalizer: Normalizer::builtin()?,
            api: ApiTable::builtin(),
            bots: DashMap::new(),
            sessions: DashMap::new(),
            cancel: Mutex::new(CancellationToken::new()),
            tracker: TaskTracker::new(),
        })
    }

    pub fn with_api(mut self, api: ApiTable) -> Self {
        self.api = api;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Log every identity in and start one session per room.
    ///
    /// An identity that fails to log in is skipped; the others still start.
    pub async fn start(&self, bots: &[BotConfig]) -> Result<()> {
        let client = default_client(self.http_timeout)?;

        let logins = bots.iter().map(|bot| {
            let client = client.clone();
            async move {
                (
                    bot,
                    Bot::login(client, &bot.cookie, bot.room_ids.clone()).await,
                )
            }
        });

        for (config, result) in join_all(logins).await {
            match result {
                Ok(bot) => {
                    let bot = Arc::new(bot);
                    let transport = Arc::new(WebTransport::new(
                        Arc::clone(&bot),
                        self.config.connect_timeout,
                    ));
                    if let Err(e) = self.register(bot, transport) {
                        error!("Skipping identity for rooms {:?}: {}", config.room_ids, e);
                    }
                }
                Err(e) => error!(
                    "Failed to log in identity for rooms {:?}: {}",
                    config.room_ids, e
                ),
            }
        }

        info!(
            "Supervisor started {} sessions for {} identities",
            self.sessions.len(),
            self.bots.len()
        );
        Ok(())
    }

    /// Register a logged-in identity and start a session for each of its rooms.
    ///
    /// Identities are keyed by uid, so a second identity with the same uid is
    /// refused. That includes a second anonymous (uid 0) identity.
    pub fn register<T: LiveTransport>(&self, bot: Arc<Bot>, transport: Arc<T>) -> Result<()> {
        let self_id = bot.self_id();
        match self.bots.entry(self_id) {
            Entry::Occupied(entry) => {
                return Err(DanmakuError::config(format!(
                    "identity {} is already registered, list its rooms under one bot",
                    entry.key()
                )));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&bot));
            }
        }
        for &room_id in bot.rooms() {
            self.attach(Arc::clone(&bot), room_id, Arc::clone(&transport));
        }
        Ok(())
    }

    /// Register `bot` and spawn a session for `room_id` over `transport`.
    ///
    /// A session already running for the same identity and room is replaced.
    pub fn attach<T: LiveTransport>(&self, bot: Arc<Bot>, room_id: u64, transport: Arc<T>) {
        let self_id = bot.self_id();
        let session = Session::new(SessionParams {
            room_id,
            uid: bot.uid(),
            transport,
            handler: Arc::clone(&self.handler),
            normalizer: self.normalizer.clone(),
            config: self.config,
            cancel: self.cancel.lock().child_token(),
            tracker: self.tracker.clone(),
        });
        let state = session.subscribe();
        let task = tokio::spawn(session.run());

        self.bots.insert(self_id.clone(), bot);
        if let Some(old) = self.sessions.insert((self_id, room_id), SessionEntry { task, state }) {
            warn!("[{}] Replacing running session", room_id);
            old.task.abort();
        }
    }

    /// Cancel every session and in-flight dispatch, then forget them.
    /// Safe to call repeatedly.
    pub async fn stop(&self) {
        let cancel = std::mem::replace(&mut *self.cancel.lock(), CancellationToken::new());
        cancel.cancel();

        let keys: Vec<_> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        let entries: Vec<_> = keys
            .iter()
            .filter_map(|key| self.sessions.remove(key))
            .collect();
        for (_, entry) in &entries {
            entry.task.abort();
        }
        for (_, entry) in entries {
            let _ = entry.task.await;
        }
        self.bots.clear();

        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
        info!("Supervisor stopped");
    }

    /// Invoke a named operation on an identity.
    pub async fn dispatch(&self, self_id: &str, api: &str, args: Value) -> Result<Value> {
        if !self.api.contains(api) {
            return Err(DanmakuError::ApiNotAvailable(api.to_string()));
        }
        let bot = self
            .bots
            .get(self_id)
            .map(|bot| Arc::clone(bot.value()))
            .ok_or_else(|| DanmakuError::ApiNotAvailable(format!("{api} (no identity {self_id})")))?;
        self.api.call(bot, api, args).await
    }

    pub fn bot(&self, self_id: &str) -> Option<Arc<Bot>> {
        self.bots.get(self_id).map(|bot| Arc::clone(bot.value()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_state(&self, self_id: &str, room_id: u64) -> Option<SessionState> {
        self.sessions
            .get(&(self_id.to_string(), room_id))
            .map(|entry| *entry.state.borrow())
    }

    /// Watch one session's state.
    pub fn watch_session(&self, self_id: &str, room_id: u64) -> Option<watch::Receiver<SessionState>> {
        self.sessions
            .get(&(self_id.to_string(), room_id))
            .map(|entry| entry.state.clone())
    }
}
