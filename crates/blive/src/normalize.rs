//! Turns decoded business messages into typed events.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use tracing::{debug, trace};

use crate::command::{CommandPayload, CommandRegistry, Rejection};
use crate::error::{DanmakuError, Result};
use crate::event::{Event, HeartbeatEvent};
use crate::packet::{BusinessMessage, Payload, op};
use crate::proto::{Schema, SchemaMessage};

/// Control command ending an open platform interaction session.
pub const INTERACTION_END: &str = "LIVE_OPEN_PLATFORM_INTERACTION_END";

/// Strip protocol suffixes such as `DANMU_MSG:4:0:2:2:2:0`.
pub fn base_command(cmd: &str) -> &str {
    cmd.split(':').next().unwrap_or(cmd)
}

/// Applies a [`CommandRegistry`] to business messages.
#[derive(Debug, Clone)]
pub struct Normalizer {
    registry: Arc<CommandRegistry>,
}

impl Normalizer {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    /// Normalizer over the built-in command table.
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(Arc::new(CommandRegistry::builtin()?)))
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Normalize one business message.
    ///
    /// Heartbeat replies become [`Event::Heartbeat`]; command frames go
    /// through the registry. Other operations yield nothing.
    pub fn normalize_message(&self, msg: &BusinessMessage, room_id: u64) -> Result<Vec<Event>> {
        match (&msg.payload, msg.operation) {
            (Payload::Popularity(popularity), _) => Ok(vec![Event::Heartbeat(HeartbeatEvent {
                room_id,
                popularity: *popularity,
            })]),
            (Payload::Json(json), op::COMMAND) => {
                let cmd = json
                    .get("cmd")
                    .and_then(Value::as_str)
                    .ok_or_else(|| DanmakuError::decode("command frame without `cmd`"))?;
                self.normalize(cmd, json, room_id)
            }
            (Payload::Json(_), operation) => {
                trace!("Ignoring JSON payload for operation {}", operation);
                Ok(Vec::new())
            }
        }
    }

    /// Run every constructor registered for `cmd` over `payload`.
    ///
    /// Returns [`DanmakuError::InteractionInterrupt`] for the interaction end
    /// control command and [`DanmakuError::UnknownCommand`] for unregistered
    /// names. A payload every constructor declines as a mismatch yields no
    /// events; a payload that is invalid for all of them is a decode error.
    pub fn normalize(&self, cmd: &str, payload: &Value, room_id: u64) -> Result<Vec<Event>> {
        let cmd = base_command(cmd);

        if cmd == INTERACTION_END {
            let data = payload.get("data").unwrap_or(&Value::Null);
            return Err(DanmakuError::InteractionInterrupt {
                game_id: match data.get("game_id") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) if !other.is_null() => other.to_string(),
                    _ => String::new(),
                },
                timestamp: data.get("timestamp").and_then(Value::as_i64).unwrap_or(0),
            });
        }

        let Some(registrations) = self.registry.lookup(cmd) else {
            debug!("[{}] Unknown command {}", room_id, cmd);
            return Err(DanmakuError::UnknownCommand(cmd.to_string()));
        };

        trace!("[{}] [{}] Receive: {}", room_id, cmd, payload);

        let mut events = Vec::with_capacity(1);
        let mut invalid = Vec::new();
        let mut decoded: Vec<(Schema, SchemaMessage)> = Vec::new();

        for registration in registrations {
            let schema_message = match (registration.schema_descriptor(), schema_blob(payload)) {
                (Some(schema), Some(blob)) => {
                    if let Some((_, msg)) = decoded.iter().find(|(s, _)| *s == schema) {
                        Some(msg.clone())
                    } else {
                        let bytes = BASE64.decode(blob)?;
                        let msg = schema.decode(&bytes)?;
                        decoded.push((schema, msg.clone()));
                        Some(msg)
                    }
                }
                _ => None,
            };

            let input = match &schema_message {
                Some(msg) => CommandPayload::Schema(msg),
                None => CommandPayload::Json(payload),
            };

            match (registration.constructor())(input, room_id) {
                Ok(event) => events.push(event),
                Err(Rejection::Mismatch) => {}
                Err(Rejection::Invalid(reason)) => invalid.push(reason),
            }
        }

        if events.is_empty() && !invalid.is_empty() {
            return Err(DanmakuError::decode(format!(
                "{cmd}: {}",
                invalid.join("; ")
            )));
        }
        if events.is_empty() {
            trace!("[{}] No constructor accepted {}", room_id, cmd);
        }

        Ok(events)
    }
}

fn schema_blob(payload: &Value) -> Option<&str> {
    payload.get("data")?.get("pb")?.as_str()
}
