//! Data shapes shared by several events.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Guard (captain) tier of a viewer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum GuardLevel {
    #[default]
    None,
    /// 总督
    Governor,
    /// 提督
    Admiral,
    /// 舰长
    Captain,
}

impl From<i64> for GuardLevel {
    fn from(value: i64) -> Self {
        match value {
            1 => Self::Governor,
            2 => Self::Admiral,
            3 => Self::Captain,
            _ => Self::None,
        }
    }
}

impl From<GuardLevel> for i64 {
    fn from(level: GuardLevel) -> Self {
        match level {
            GuardLevel::None => 0,
            GuardLevel::Governor => 1,
            GuardLevel::Admiral => 2,
            GuardLevel::Captain => 3,
        }
    }
}

impl GuardLevel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Governor => "Governor",
            Self::Admiral => "Admiral",
            Self::Captain => "Captain",
        }
    }
}

/// Fan medal worn by a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Medal {
    pub name: String,
    pub level: i64,
    pub id: i64,
    pub typ: i64,
    pub is_light: i64,
    pub ruid: i64,
    pub guard_level: GuardLevel,
    pub score: i64,
    pub guard_icon: String,
    pub honor_icon: String,
    pub user_receive_count: i64,
    pub color_start: i64,
    pub color_end: i64,
    pub color_border: i64,
    pub color: i64,
}

/// A user as seen by a room. Open platform users carry an `open_id` instead of
/// (or in addition to) a meaningful `uid`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: i64,
    pub name: String,
    #[serde(default)]
    pub face: String,
    #[serde(default)]
    pub open_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_color: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medal: Option<Medal>,
}

impl User {
    /// The id used to address this user: `open_id` when present, else `uid`.
    pub fn user_id(&self) -> String {
        if self.open_id.is_empty() {
            self.uid.to_string()
        } else {
            self.open_id.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialGift {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "de::bool_from_any")]
    pub has_join: bool,
    #[serde(default, deserialize_with = "de::string_from_any")]
    pub id: String,
    #[serde(default)]
    pub num: i64,
    #[serde(default)]
    pub storm_gif: String,
    #[serde(default)]
    pub time: i64,
}

/// One entry of the online (gold) rank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rank {
    pub uid: i64,
    #[serde(default)]
    pub face: String,
    #[serde(default, deserialize_with = "de::string_from_any")]
    pub score: String,
    #[serde(default)]
    pub uname: String,
    pub rank: i64,
    #[serde(default)]
    pub guard_level: GuardLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankChangeMsg {
    pub msg: String,
    pub rank: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchComboSend {
    pub action: String,
    pub batch_combo_id: String,
    pub batch_combo_num: i64,
    pub gift_id: i64,
    pub gift_name: String,
    pub gift_num: i64,
    pub uid: i64,
    pub uname: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComboInfo {
    pub combo_base_num: i64,
    pub combo_count: i64,
    pub combo_id: String,
    pub combo_timeout: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlindGift {
    pub blind_gift_id: i64,
    #[serde(deserialize_with = "de::bool_from_any")]
    pub status: bool,
}

/// Lenient deserializers for fields whose wire type drifts between numbers,
/// strings and booleans.
pub(crate) mod de {
    use super::*;

    pub fn bool_from_any<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Bool(b) => b,
            Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            Value::String(s) => !s.is_empty() && s != "0" && s != "false",
            _ => false,
        })
    }

    pub fn string_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }
}
