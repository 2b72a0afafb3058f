//! Protobuf messages carried base64-encoded under `data.pb`.
//!
//! Only the fields the events consume are declared; prost skips the rest.

use prost::Message as ProstMessage;

use crate::error::Result;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InteractWord {
    #[prost(int64, tag = "1")]
    pub uid: i64,
    #[prost(string, tag = "2")]
    pub uname: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub uname_color: ::prost::alloc::string::String,
    #[prost(int64, repeated, tag = "4")]
    pub identities: ::prost::alloc::vec::Vec<i64>,
    #[prost(int64, tag = "5")]
    pub msg_type: i64,
    #[prost(int64, tag = "6")]
    pub roomid: i64,
    #[prost(int64, tag = "7")]
    pub timestamp: i64,
    #[prost(int64, tag = "8")]
    pub score: i64,
    #[prost(int64, tag = "15")]
    pub trigger_time: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GoldRankBroadcast {
    #[prost(string, tag = "1")]
    pub rank_type: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub list: ::prost::alloc::vec::Vec<GoldRankBroadcastItem>,
    #[prost(message, repeated, tag = "3")]
    pub online_list: ::prost::alloc::vec::Vec<GoldRankBroadcastItem>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GoldRankBroadcastItem {
    #[prost(int64, tag = "1")]
    pub uid: i64,
    #[prost(string, tag = "2")]
    pub face: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub score: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub uname: ::prost::alloc::string::String,
    #[prost(int64, tag = "5")]
    pub rank: i64,
    #[prost(int64, tag = "6")]
    pub guard_level: i64,
    #[prost(bool, tag = "7")]
    pub is_mystery: bool,
}

/// Binary schema a command's `data.pb` blob is encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    InteractWord,
    GoldRankBroadcast,
}

/// A decoded schema message.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaMessage {
    InteractWord(InteractWord),
    GoldRankBroadcast(GoldRankBroadcast),
}

impl Schema {
    /// Decode raw protobuf bytes.
    pub fn decode(self, bytes: &[u8]) -> Result<SchemaMessage> {
        Ok(match self {
            Self::InteractWord => SchemaMessage::InteractWord(InteractWord::decode(bytes)?),
            Self::GoldRankBroadcast => {
                SchemaMessage::GoldRankBroadcast(GoldRankBroadcast::decode(bytes)?)
            }
        })
    }
}
