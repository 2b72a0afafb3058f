//! Command registry.
//!
//! Maps wire command names to event constructors. A name may carry several
//! constructors (fan-out); each one inspects a discriminant in the payload and
//! rejects the variants that are not its own.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{DanmakuError, Result};
use crate::event::{self, Event};
use crate::proto::{Schema, SchemaMessage};

/// Payload handed to a constructor.
#[derive(Debug, Clone, Copy)]
pub enum CommandPayload<'a> {
    /// The loose JSON tree of the command.
    Json(&'a Value),
    /// The command's `data.pb` blob decoded against the registered schema.
    Schema(&'a SchemaMessage),
}

impl<'a> CommandPayload<'a> {
    /// The JSON tree, rejecting schema payloads.
    pub fn json(self) -> std::result::Result<&'a Value, Rejection> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Schema(_) => Err(Rejection::invalid("expected a JSON payload")),
        }
    }
}

/// Why a constructor declined a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The discriminant belongs to a sibling constructor.
    Mismatch,
    /// The payload is structurally wrong for this constructor.
    Invalid(String),
}

impl Rejection {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

impl From<serde_json::Error> for Rejection {
    fn from(err: serde_json::Error) -> Self {
        Self::Invalid(err.to_string())
    }
}

/// Event constructor signature.
pub type Constructor = fn(CommandPayload<'_>, u64) -> std::result::Result<Event, Rejection>;

/// Payload field a constructor discriminates on, and the value it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discriminant {
    pub field: &'static str,
    pub value: i64,
}

/// One constructor registered under a command name.
#[derive(Debug, Clone)]
pub struct Registration {
    constructor: Constructor,
    schema: Option<Schema>,
    discriminant: Option<Discriminant>,
}

impl Registration {
    pub fn new(constructor: Constructor) -> Self {
        Self {
            constructor,
            schema: None,
            discriminant: None,
        }
    }

    /// Decode `data.pb` against `schema` before construction.
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Declare the discriminant separating this constructor from its siblings.
    pub fn discriminant(mut self, field: &'static str, value: i64) -> Self {
        self.discriminant = Some(Discriminant { field, value });
        self
    }

    pub fn constructor(&self) -> Constructor {
        self.constructor
    }

    pub fn schema_descriptor(&self) -> Option<Schema> {
        self.schema
    }

    pub fn discriminant_field(&self) -> Option<Discriminant> {
        self.discriminant
    }
}

/// Accumulates registrations before freezing them into a [`CommandRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: HashMap<String, Vec<Registration>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constructor under `command`. Repeated names accumulate.
    pub fn register(mut self, command: impl Into<String>, registration: Registration) -> Self {
        self.entries
            .entry(command.into())
            .or_default()
            .push(registration);
        self
    }

    /// Validate and freeze.
    ///
    /// Every name with more than one constructor must give each of them a
    /// discriminant, all on the same field and with distinct values.
    pub fn build(self) -> Result<CommandRegistry> {
        for (command, registrations) in &self.entries {
            if registrations.len() < 2 {
                continue;
            }

            let mut field = None;
            let mut seen = Vec::with_capacity(registrations.len());
            for registration in registrations {
                let Some(d) = registration.discriminant else {
                    return Err(DanmakuError::config(format!(
                        "command {command} has {} constructors but one lacks a discriminant",
                        registrations.len()
                    )));
                };
                if *field.get_or_insert(d.field) != d.field {
                    return Err(DanmakuError::config(format!(
                        "command {command} mixes discriminant fields"
                    )));
                }
                if seen.contains(&d.value) {
                    return Err(DanmakuError::config(format!(
                        "command {command} registers {}={} twice",
                        d.field, d.value
                    )));
                }
                seen.push(d.value);
            }
        }

        Ok(CommandRegistry {
            entries: self.entries,
        })
    }
}

/// Immutable command table, built once at startup.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    entries: HashMap<String, Vec<Registration>>,
}

impl CommandRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registry with every built-in event, validated like any other build.
    pub fn builtin() -> Result<Self> {
        builtin_builder().build()
    }

    /// Constructors registered under `command`.
    pub fn lookup(&self, command: &str) -> Option<&[Registration]> {
        self.entries.get(command).map(Vec::as_slice)
    }

    pub fn contains(&self, command: &str) -> bool {
        self.entries.contains_key(command)
    }

    /// Registered command names.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

fn builtin_builder() -> RegistryBuilder {
    let interact = |builder: RegistryBuilder, command: &str, schema: Option<Schema>| {
        let with_schema = |r: Registration| match schema {
            Some(s) => r.schema(s),
            None => r,
        };
        builder
            .register(
                command,
                with_schema(Registration::new(event::user_enter).discriminant("msg_type", 1)),
            )
            .register(
                command,
                with_schema(Registration::new(event::user_follow).discriminant("msg_type", 2)),
            )
            .register(
                command,
                with_schema(Registration::new(event::user_share).discriminant("msg_type", 3)),
            )
    };

    let mut builder = RegistryBuilder::new();
    for command in ["DANMU_MSG", "DANMU_MSG_MIRROR", "LIVE_OPEN_PLATFORM_DM"] {
        builder = builder.register(command, Registration::new(event::danmaku));
    }
    for command in [
        "SUPER_CHAT_MESSAGE",
        "SUPER_CHAT_MSG",
        "SUPER_CHAT_MESSAGE_JPN",
        "LIVE_OPEN_PLATFORM_SUPER_CHAT",
    ] {
        builder = builder.register(command, Registration::new(event::super_chat));
    }

    builder = interact(builder, "INTERACT_WORD", None);
    builder = interact(builder, "INTERACT_WORD_V2", Some(Schema::InteractWord));

    builder
        .register(
            "LIVE_OPEN_PLATFORM_LIVE_ROOM_ENTER",
            Registration::new(event::user_enter),
        )
        .register("GUARD_BUY", Registration::new(event::guard_buy))
        .register("LIVE_OPEN_PLATFORM_GUARD", Registration::new(event::guard_buy))
        .register("GUARD_BUY_TOAST", Registration::new(event::guard_buy_toast))
        .register("SEND_GIFT", Registration::new(event::send_gift))
        .register(
            "LIVE_OPEN_PLATFORM_SEND_GIFT",
            Registration::new(event::send_gift),
        )
        .register(
            "GIFT_STAR_PROCESS",
            Registration::new(event::gift_star_process),
        )
        .register("SPECIAL_GIFT", Registration::new(event::special_gift))
        .register("LIVE", Registration::new(event::live_start))
        .register(
            "LIVE_OPEN_PLATFORM_LIVE_START",
            Registration::new(event::open_live_start),
        )
        .register(
            "LIVE_OPEN_PLATFORM_LIVE_END",
            Registration::new(event::open_live_end),
        )
        .register("ONLINE_RANK_V2", Registration::new(event::online_rank))
        .register(
            "ONLINE_RANK_V3",
            Registration::new(event::online_rank).schema(Schema::GoldRankBroadcast),
        )
        .register(
            "ONLINE_RANK_COUNT",
            Registration::new(event::online_rank_count),
        )
        .register("ONLINE_RANK_TOP3", Registration::new(event::online_rank_top))
        .register(
            "LIKE_INFO_V3_UPDATE",
            Registration::new(event::like_info_update),
        )
        .register("WATCHED_CHANGE", Registration::new(event::watched_change))
        .register(
            "STOP_LIVE_ROOM_LIST",
            Registration::new(event::stop_live_room_list),
        )
        .register("ROOM_CHANGE", Registration::new(event::room_change))
        .register("ROOM_LOCK", Registration::new(event::room_lock))
        .register("CUT_OFF", Registration::new(event::room_lock))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::HeartbeatEvent;

    fn tagged_event(
        payload: CommandPayload<'_>,
        room_id: u64,
        tag: i64,
    ) -> std::result::Result<Event, Rejection> {
        let v = payload.json()?;
        if v["tag"].as_i64() != Some(tag) {
            return Err(Rejection::Mismatch);
        }
        Ok(Event::Heartbeat(HeartbeatEvent {
            room_id,
            popularity: tag as u32,
        }))
    }

    fn tag_one(payload: CommandPayload<'_>, room_id: u64) -> std::result::Result<Event, Rejection> {
        tagged_event(payload, room_id, 1)
    }

    fn tag_two(payload: CommandPayload<'_>, room_id: u64) -> std::result::Result<Event, Rejection> {
        tagged_event(payload, room_id, 2)
    }

    fn tagged(tag: i64) -> Constructor {
        if tag == 1 { tag_one } else { tag_two }
    }

    #[test]
    fn test_builtin_registry_is_valid() {
        let registry = CommandRegistry::builtin().unwrap();
        assert!(registry.contains("DANMU_MSG"));
        assert_eq!(registry.lookup("INTERACT_WORD").unwrap().len(), 3);
        assert_eq!(
            registry.lookup("INTERACT_WORD_V2").unwrap()[0].schema_descriptor(),
            Some(Schema::InteractWord)
        );
        assert!(!registry.contains("LIVE_OPEN_PLATFORM_INTERACTION_END"));
    }

    #[test]
    fn test_fan_out_requires_discriminants() {
        let err = RegistryBuilder::new()
            .register("X", Registration::new(tagged(1)).discriminant("tag", 1))
            .register("X", Registration::new(tagged(2)))
            .build()
            .unwrap_err();
        assert!(matches!(err, DanmakuError::Config(_)));
    }

    #[test]
    fn test_fan_out_rejects_duplicate_values() {
        let err = RegistryBuilder::new()
            .register("X", Registration::new(tagged(1)).discriminant("tag", 1))
            .register("X", Registration::new(tagged(2)).discriminant("tag", 1))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_fan_out_accepts_distinct_tags() {
        let registry = RegistryBuilder::new()
            .register("X", Registration::new(tagged(1)).discriminant("tag", 1))
            .register("X", Registration::new(tagged(2)).discriminant("tag", 2))
            .build()
            .unwrap();
        assert_eq!(registry.lookup("X").unwrap().len(), 2);
        assert!(registry.lookup("Y").is_none());
    }
}
