//! Typed events.
//!
//! Events fall into three families: meta (connection health), message (chat and
//! paid messages with a renderable body) and notice (state-change broadcasts).
//! Every event carries the id of the room it came from.
//!
//! The constructors at the bottom of this module are registered in
//! [`crate::command::CommandRegistry`]; each handles both the web and the open
//! platform shape of its commands.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::{CommandPayload, Rejection};
use crate::message::{Emoticon, EmoticonTable, Message};
use crate::model::{
    BatchComboSend, BlindGift, ComboInfo, GuardLevel, Medal, Rank, RankChangeMsg, SpecialGift,
    User,
};
use crate::proto::SchemaMessage;

/// Event family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MetaEvent,
    Message,
    Notice,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MetaEvent => "meta_event",
            Self::Message => "message",
            Self::Notice => "notice",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized room event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_name", rename_all = "snake_case")]
pub enum Event {
    Heartbeat(HeartbeatEvent),
    Danmaku(DanmakuEvent),
    SuperChat(SuperChatEvent),
    UserEnter(InteractWordEvent),
    UserFollow(InteractWordEvent),
    UserShare(InteractWordEvent),
    GuardBuy(GuardBuyEvent),
    GuardBuyToast(GuardBuyToastEvent),
    SendGift(SendGiftEvent),
    GiftStarProcess(GiftStarProcessEvent),
    SpecialGift(SpecialGiftEvent),
    LiveStart(LiveStartEvent),
    OpenLiveStart(OpenLiveEvent),
    OpenLiveEnd(OpenLiveEvent),
    OnlineRank(OnlineRankEvent),
    OnlineRankCount(OnlineRankCountEvent),
    OnlineRankTop(OnlineRankTopEvent),
    LikeInfoUpdate(LikeInfoUpdateEvent),
    WatchedChange(WatchedChangeEvent),
    #[serde(rename = "stop_room_list")]
    StopLiveRoomList(StopLiveRoomListEvent),
    RoomChange(RoomChangeEvent),
    RoomLock(RoomLockEvent),
}

impl Event {
    pub fn room_id(&self) -> u64 {
        match self {
            Self::Heartbeat(e) => e.room_id,
            Self::Danmaku(e) => e.room_id,
            Self::SuperChat(e) => e.room_id,
            Self::UserEnter(e) | Self::UserFollow(e) | Self::UserShare(e) => e.room_id,
            Self::GuardBuy(e) => e.room_id,
            Self::GuardBuyToast(e) => e.room_id,
            Self::SendGift(e) => e.room_id,
            Self::GiftStarProcess(e) => e.room_id,
            Self::SpecialGift(e) => e.room_id,
            Self::LiveStart(e) => e.room_id,
            Self::OpenLiveStart(e) | Self::OpenLiveEnd(e) => e.room_id,
            Self::OnlineRank(e) => e.room_id,
            Self::OnlineRankCount(e) => e.room_id,
            Self::OnlineRankTop(e) => e.room_id,
            Self::LikeInfoUpdate(e) => e.room_id,
            Self::WatchedChange(e) => e.room_id,
            Self::StopLiveRoomList(e) => e.room_id,
            Self::RoomChange(e) => e.room_id,
            Self::RoomLock(e) => e.room_id,
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::Heartbeat(_) => EventType::MetaEvent,
            Self::Danmaku(_) | Self::SuperChat(_) => EventType::Message,
            _ => EventType::Notice,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Heartbeat(_) => "heartbeat",
            Self::Danmaku(_) => "danmaku",
            Self::SuperChat(_) => "super_chat",
            Self::UserEnter(_) => "user_enter",
            Self::UserFollow(_) => "user_follow",
            Self::UserShare(_) => "user_share",
            Self::GuardBuy(_) => "guard_buy",
            Self::GuardBuyToast(_) => "guard_buy_toast",
            Self::SendGift(_) => "send_gift",
            Self::GiftStarProcess(_) => "gift_star_process",
            Self::SpecialGift(_) => "special_gift",
            Self::LiveStart(_) => "live_start",
            Self::OpenLiveStart(_) => "open_live_start",
            Self::OpenLiveEnd(_) => "open_live_end",
            Self::OnlineRank(_) => "online_rank",
            Self::OnlineRankCount(_) => "online_rank_count",
            Self::OnlineRankTop(_) => "online_rank_top",
            Self::LikeInfoUpdate(_) => "like_info_update",
            Self::WatchedChange(_) => "watched_change",
            Self::StopLiveRoomList(_) => "stop_room_list",
            Self::RoomChange(_) => "room_change",
            Self::RoomLock(_) => "room_lock",
        }
    }

    /// Human readable one-line summary.
    pub fn description(&self) -> String {
        match self {
            Self::Heartbeat(e) => format!("[{}] ACK, popularity: {}", e.room_id, e.popularity),
            Self::Danmaku(e) => {
                let reply = if e.reply_uname.is_empty() {
                    String::new()
                } else {
                    format!("@{} ", e.reply_uname)
                };
                format!(
                    "[Room@{}] {}: {}{}",
                    e.room_id, e.sender.name, reply, e.content
                )
            }
            Self::SuperChat(e) => format!(
                "[Room@{}] [￥{}] {}: {}",
                e.room_id, e.price, e.sender.name, e.message
            ),
            Self::UserEnter(e) => format!("[Room@{}] {} Entered the room", e.room_id, e.uname),
            Self::UserFollow(e) => format!("[Room@{}] {} Followed the room", e.room_id, e.uname),
            Self::UserShare(e) => format!("[Room@{}] {} Shared the room", e.room_id, e.uname),
            Self::GuardBuy(e) => format!(
                "[Room@{}] [￥{}] {} bought {} {} guard(s)",
                e.room_id,
                e.price,
                e.username,
                e.num,
                e.guard_level.name()
            ),
            Self::GuardBuyToast(e) => {
                format!("[Room@{}] [￥{}] {}", e.room_id, e.price, e.toast_msg)
            }
            Self::SendGift(e) => format!(
                "[Room@{}] [￥{}] {} sent {} {}(s)",
                e.room_id, e.price, e.uname, e.num, e.gift_name
            ),
            Self::GiftStarProcess(e) => format!("[Room@{}] {}", e.room_id, e.tip),
            Self::LiveStart(e) => format!("[Room@{}] Live started", e.room_id),
            Self::OpenLiveStart(e) => format!(
                "[Room@{}] Live started in {}: {}",
                e.room_id, e.area_name, e.title
            ),
            Self::OpenLiveEnd(e) => format!(
                "[Room@{}] Live ended in {}: {}",
                e.room_id, e.area_name, e.title
            ),
            Self::OnlineRank(e) => format!("[Room@{}] Rank updated", e.room_id),
            Self::OnlineRankTop(e) => {
                let msgs: Vec<String> = e
                    .top
                    .iter()
                    .map(|d| format!("{} #{}", d.msg, d.rank))
                    .collect();
                format!("[Room@{}] {}", e.room_id, msgs.join(" + "))
            }
            Self::LikeInfoUpdate(e) => format!(
                "[Room@{}] Click count updated: {}",
                e.room_id, e.click_count
            ),
            Self::WatchedChange(e) => format!(
                "[Room@{}] Watched people count change: {}",
                e.room_id, e.num
            ),
            Self::RoomChange(e) => {
                format!("[Room@{}] Room info changed: {}", e.room_id, e.title)
            }
            Self::RoomLock(e) => format!("[Room@{}] Stream closed: {}", e.room_id, e.message),
            Self::SpecialGift(_) | Self::OnlineRankCount(_) | Self::StopLiveRoomList(_) => {
                serde_json::to_string(self).unwrap_or_else(|_| self.event_name().to_string())
            }
        }
    }

    /// Id of the user the event is about, if any.
    pub fn user_id(&self) -> Option<String> {
        match self {
            Self::Danmaku(e) => Some(e.sender.user_id()),
            Self::SuperChat(e) => Some(e.sender.user_id()),
            Self::UserEnter(e) | Self::UserFollow(e) | Self::UserShare(e) => {
                Some(prefer_open_id(&e.open_id, e.uid))
            }
            Self::GuardBuy(e) => Some(prefer_open_id(&e.open_id, e.uid)),
            Self::GuardBuyToast(e) => Some(e.uid.to_string()),
            Self::SendGift(e) => Some(prefer_open_id(&e.open_id, e.uid)),
            _ => None,
        }
    }

    /// Conversation key for message events.
    pub fn session_id(&self) -> Option<String> {
        match self {
            Self::Danmaku(e) => Some(format!("{}_{}", e.room_id, e.sender.uid)),
            Self::SuperChat(e) => Some(format!("{}_{}_{}", e.room_id, e.sender.uid, e.id)),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Danmaku(e) => Some(&e.message),
            Self::SuperChat(e) => Some(&e.message),
            _ => None,
        }
    }

    /// Whether the event addresses the receiving identity.
    pub fn is_tome(&self) -> bool {
        match self {
            Self::Danmaku(e) => e.to_me,
            Self::SuperChat(e) => e.to_me,
            _ => false,
        }
    }

    /// Flag chat replies addressed to `uid`.
    pub fn mark_to_me(&mut self, uid: i64) {
        if let Self::Danmaku(e) = self
            && uid != 0
            && e.reply_mid == uid
        {
            e.to_me = true;
        }
    }
}

fn prefer_open_id(open_id: &str, uid: i64) -> String {
    if open_id.is_empty() {
        uid.to_string()
    } else {
        open_id.to_string()
    }
}

/// Heartbeat acknowledgement carrying the room popularity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    pub room_id: u64,
    pub popularity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DanmakuEvent {
    pub room_id: u64,
    /// Send time in seconds.
    pub time: f64,
    pub mode: i64,
    pub color: i64,
    pub font_size: i64,
    pub content: String,
    pub emots: EmoticonTable,
    pub send_from_me: bool,
    pub reply_mid: i64,
    pub reply_open_id: String,
    pub reply_uname: String,
    pub reply_uname_color: String,
    pub to_me: bool,
    pub msg_id: String,
    pub message: Message,
    pub sender: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperChatEvent {
    pub room_id: u64,
    pub id: i64,
    pub price: f64,
    pub message_font_color: String,
    pub start_time: f64,
    pub end_time: f64,
    pub message_trans: Option<String>,
    pub message_jpn: Option<String>,
    pub msg_id: String,
    pub message_id: String,
    pub to_me: bool,
    pub message: Message,
    pub sender: User,
}

/// Enter / follow / share notice. `msg_type` is 1, 2 or 3 respectively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractWordEvent {
    pub room_id: u64,
    pub msg_type: i64,
    pub timestamp: i64,
    pub trigger_time: i64,
    pub uid: i64,
    pub uname: String,
    pub uname_color: String,
    pub open_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardBuyEvent {
    pub room_id: u64,
    pub uid: i64,
    pub open_id: String,
    pub face: String,
    pub username: String,
    pub guard_level: GuardLevel,
    pub guard_unit: String,
    pub num: i64,
    pub price: f64,
    pub gift_id: i64,
    pub gift_name: String,
    pub time: i64,
    pub msg_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardBuyToastEvent {
    pub room_id: u64,
    pub color: String,
    pub guard_level: GuardLevel,
    pub num: i64,
    pub price: f64,
    pub role_name: String,
    pub uid: i64,
    pub username: String,
    pub toast_msg: String,
    pub gift_id: i64,
    pub time: i64,
}

/// Gift notice.
///
/// Web gifts report `price` as delivered; open platform gifts report it in
/// 1/1000 units and are scaled down on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendGiftEvent {
    pub room_id: u64,
    pub gift_id: i64,
    pub gift_name: String,
    pub num: i64,
    pub price: f64,
    pub timestamp: i64,
    pub uid: i64,
    pub uname: String,
    pub face: String,
    pub guard_level: Option<i64>,
    pub receive_user_info: Option<User>,
    pub action: Option<String>,
    pub batch_combo_id: Option<String>,
    pub batch_combo_send: Option<BatchComboSend>,
    pub coin_type: Option<String>,
    pub original_gift_name: Option<String>,
    pub rnd: Option<String>,
    pub tid: Option<String>,
    pub total_coin: Option<i64>,
    pub open_id: String,
    pub r_price: Option<i64>,
    pub paid: Option<bool>,
    pub msg_id: String,
    pub gift_icon: String,
    pub combo_gift: Option<bool>,
    pub combo_info: Option<ComboInfo>,
    pub blind_gift: Option<BlindGift>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftStarProcessEvent {
    #[serde(default)]
    pub room_id: u64,
    pub status: i64,
    pub tip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialGiftEvent {
    pub room_id: u64,
    pub gifts: HashMap<String, SpecialGift>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStartEvent {
    #[serde(default)]
    pub room_id: u64,
    #[serde(default)]
    pub live_time: i64,
    #[serde(default)]
    pub live_platform: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenLiveEvent {
    #[serde(default)]
    pub room_id: u64,
    #[serde(default)]
    pub open_id: String,
    pub area_name: String,
    pub title: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineRankEvent {
    pub room_id: u64,
    pub online_list: Vec<Rank>,
    pub rank_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineRankCountEvent {
    #[serde(default)]
    pub room_id: u64,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineRankTopEvent {
    #[serde(default)]
    pub room_id: u64,
    pub top: Vec<RankChangeMsg>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeInfoUpdateEvent {
    #[serde(default)]
    pub room_id: u64,
    pub click_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedChangeEvent {
    #[serde(default)]
    pub room_id: u64,
    pub num: i64,
    #[serde(default)]
    pub text_small: String,
    #[serde(default)]
    pub text_large: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopLiveRoomListEvent {
    #[serde(default)]
    pub room_id: u64,
    pub room_id_list: Vec<u64>,
}

/// Title or area change pushed while the room is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomChangeEvent {
    pub room_id: u64,
    pub title: String,
    pub area_name: String,
    pub parent_area_name: String,
}

/// The room was locked or the stream was cut off by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomLockEvent {
    pub room_id: u64,
    pub command: String,
    pub message: String,
}

type Built = std::result::Result<Event, Rejection>;

pub(crate) fn danmaku(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let json = payload.json()?;
    let event = match json.get("data") {
        Some(data) => open_danmaku(data, room_id)?,
        None => web_danmaku(json, room_id)?,
    };
    Ok(Event::Danmaku(event))
}

fn web_danmaku(json: &Value, room_id: u64) -> std::result::Result<DanmakuEvent, Rejection> {
    let info = field::get(json, "info")?;
    let meta = info
        .get(0)
        .filter(|v| v.is_array())
        .ok_or_else(|| Rejection::invalid("info[0] is not an array"))?;
    let content = info
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| Rejection::invalid("info[1] is not a string"))?
        .to_string();

    let ext = meta.get(15);
    let extra: Value = match ext.and_then(|e| e.get("extra")).and_then(Value::as_str) {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
        _ => Value::Null,
    };

    let mut emots: EmoticonTable = field::object(&extra, "emots").unwrap_or_default();
    if let Some(upower) = meta.get(13).filter(|v| v.is_object()) {
        let unique = field::text_or_default(upower, "emoticon_unique");
        let emoji = unique
            .strip_prefix("upower_")
            .unwrap_or(&unique)
            .to_string();
        emots = HashMap::from([(
            emoji.clone(),
            Emoticon {
                descript: String::new(),
                emoji,
                emoticon_id: -1,
                emoticon_unique: unique.clone(),
                height: field::int_or(upower, "height", 0),
                width: field::int_or(upower, "width", 0),
                url: field::text_or_default(upower, "url"),
            },
        )]);
    }

    let sender = match ext.and_then(|e| e.get("user")).filter(|u| u.is_object()) {
        Some(user) => {
            let base = user.get("base").unwrap_or(&Value::Null);
            User {
                uid: field::int(user, "uid")?,
                name: field::text_or_default(base, "name"),
                face: field::text_or_default(base, "face"),
                name_color: base.get("name_color").and_then(field::as_int),
                medal: field::object::<Medal>(user, "medal"),
                ..Default::default()
            }
        }
        // Older frames only carry [uid, name, is_admin, ..] in info[2].
        None => {
            let legacy = info
                .get(2)
                .filter(|v| v.is_array())
                .ok_or_else(|| Rejection::invalid("no sender in info[0][15] or info[2]"))?;
            User {
                uid: legacy.get(0).and_then(field::as_int).unwrap_or_default(),
                name: legacy
                    .get(1)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                is_admin: legacy.get(2).and_then(field::as_int).map(|v| v != 0),
                ..Default::default()
            }
        }
    };

    let message = Message::construct(&content, Some(&emots));
    Ok(DanmakuEvent {
        room_id,
        time: field::float_at(meta, 4)? / 1000.0,
        mode: field::int_at(meta, 1)?,
        color: field::int_at(meta, 3)?,
        font_size: field::int_at(meta, 2)?,
        content,
        emots,
        send_from_me: extra
            .get("send_from_me")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        reply_mid: field::int_or(&extra, "reply_mid", 0),
        reply_open_id: String::new(),
        reply_uname: field::text_or_default(&extra, "reply_uname"),
        reply_uname_color: field::text_or_default(&extra, "reply_uname_color"),
        to_me: false,
        msg_id: String::new(),
        message,
        sender,
    })
}

fn open_danmaku(data: &Value, room_id: u64) -> std::result::Result<DanmakuEvent, Rejection> {
    let content = field::text(data, "msg")?;
    let mode = field::int_or(data, "dm_type", 0);

    let emots = if mode == 1 {
        HashMap::from([(
            content.clone(),
            Emoticon {
                descript: String::new(),
                emoji: content.clone(),
                emoticon_id: -1,
                emoticon_unique: format!("upower_{content}"),
                height: 0,
                width: 0,
                url: field::text_or_default(data, "emoji_img_url"),
            },
        )])
    } else {
        EmoticonTable::new()
    };

    let sender = User {
        uid: field::int_or(data, "uid", 0),
        name: field::text(data, "uname")?,
        face: field::text_or_default(data, "uface"),
        open_id: field::text_or_default(data, "open_id"),
        is_admin: Some(
            data.get("is_admin")
                .and_then(field::as_int)
                .is_some_and(|v| v != 0),
        ),
        ..Default::default()
    };

    let message = Message::construct(&content, Some(&emots));
    Ok(DanmakuEvent {
        room_id,
        time: field::float(data, "timestamp")?,
        mode,
        color: 0,
        font_size: 0,
        content,
        emots,
        send_from_me: false,
        reply_mid: 0,
        reply_open_id: field::text_or_default(data, "reply_open_id"),
        reply_uname: field::text_or_default(data, "reply_uname"),
        reply_uname_color: String::new(),
        to_me: false,
        msg_id: field::text_or_default(data, "msg_id"),
        message,
        sender,
    })
}

pub(crate) fn super_chat(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let json = payload.json()?;
    let data = field::get(json, "data")?;

    let id = data
        .get("id")
        .and_then(field::as_int)
        .or_else(|| data.get("message_id").and_then(field::as_int))
        .ok_or_else(|| Rejection::invalid("missing field `id`"))?;
    let price = data
        .get("price")
        .and_then(field::as_float)
        .or_else(|| json.get("rmb").and_then(field::as_float))
        .ok_or_else(|| Rejection::invalid("missing field `price`"))?;
    let message = Message::construct(&field::text(data, "message")?, None);

    let event = if data.get("open_id").is_some() {
        SuperChatEvent {
            room_id,
            id,
            price,
            message_font_color: String::new(),
            start_time: field::float(data, "start_time")?,
            end_time: field::float(data, "end_time")?,
            message_trans: None,
            message_jpn: None,
            msg_id: field::text_or_default(data, "msg_id"),
            message_id: data
                .get("message_id")
                .map(field::to_text)
                .unwrap_or_default(),
            to_me: false,
            message,
            sender: User {
                uid: field::int_or(data, "uid", 0),
                name: field::text(data, "uname")?,
                face: field::text_or_default(data, "uface"),
                open_id: field::text_or_default(data, "open_id"),
                ..Default::default()
            },
        }
    } else {
        let user = field::get(data, "user_info")?;
        SuperChatEvent {
            room_id,
            id,
            price,
            message_font_color: field::text_or_default(data, "message_font_color"),
            start_time: field::float(data, "start_time")? / 1000.0,
            end_time: field::float(data, "end_time")? / 1000.0,
            message_trans: field::opt_text(data, "message_trans"),
            message_jpn: field::opt_text(data, "message_jpn"),
            msg_id: String::new(),
            message_id: String::new(),
            to_me: false,
            message,
            sender: User {
                uid: field::int(data, "uid")?,
                name: field::text(user, "uname")?,
                face: field::text_or_default(user, "face"),
                name_color: user.get("name_color").and_then(field::as_int),
                medal: field::object::<Medal>(user, "medal"),
                ..Default::default()
            },
        }
    };

    Ok(Event::SuperChat(event))
}

fn interact_word(
    payload: CommandPayload<'_>,
    room_id: u64,
    expected: i64,
) -> std::result::Result<InteractWordEvent, Rejection> {
    let event = match payload {
        CommandPayload::Schema(SchemaMessage::InteractWord(p)) => InteractWordEvent {
            room_id,
            msg_type: p.msg_type,
            timestamp: p.timestamp,
            trigger_time: p.trigger_time,
            uid: p.uid,
            uname: p.uname.clone(),
            uname_color: p.uname_color.clone(),
            open_id: String::new(),
        },
        CommandPayload::Schema(other) => {
            return Err(Rejection::invalid(format!(
                "unexpected schema message {other:?}"
            )));
        }
        CommandPayload::Json(json) => {
            let data = field::get(json, "data")?;
            if data.get("open_id").is_some() {
                // Open platform only reports room entries.
                let timestamp = field::int(data, "timestamp")?;
                InteractWordEvent {
                    room_id,
                    msg_type: 1,
                    timestamp,
                    trigger_time: timestamp,
                    uid: field::int_or(data, "uid", 0),
                    uname: field::text(data, "uname")?,
                    uname_color: String::new(),
                    open_id: field::text_or_default(data, "open_id"),
                }
            } else {
                let msg_type = field::int(data, "msg_type")?;
                if msg_type != expected {
                    return Err(Rejection::Mismatch);
                }
                InteractWordEvent {
                    room_id,
                    msg_type,
                    timestamp: field::int(data, "timestamp")?,
                    trigger_time: field::int_or(data, "trigger_time", 0),
                    uid: field::int(data, "uid")?,
                    uname: field::text(data, "uname")?,
                    uname_color: field::text_or_default(data, "uname_color"),
                    open_id: String::new(),
                }
            }
        }
    };

    if event.msg_type != expected {
        return Err(Rejection::Mismatch);
    }
    Ok(event)
}

pub(crate) fn user_enter(payload: CommandPayload<'_>, room_id: u64) -> Built {
    interact_word(payload, room_id, 1).map(Event::UserEnter)
}

pub(crate) fn user_follow(payload: CommandPayload<'_>, room_id: u64) -> Built {
    interact_word(payload, room_id, 2).map(Event::UserFollow)
}

pub(crate) fn user_share(payload: CommandPayload<'_>, room_id: u64) -> Built {
    interact_word(payload, room_id, 3).map(Event::UserShare)
}

pub(crate) fn guard_buy(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let data = field::get(payload.json()?, "data")?;

    let (uid, face, username, open_id, num) = match data.get("user_info") {
        Some(info) => (
            field::int_or(info, "uid", 0),
            field::text_or_default(info, "uface"),
            field::text(info, "uname")?,
            field::text_or_default(info, "open_id"),
            field::int_or(data, "guard_num", 1),
        ),
        None => (
            field::int(data, "uid")?,
            field::text_or_default(data, "face"),
            field::text(data, "username")?,
            String::new(),
            field::int_or(data, "num", 1),
        ),
    };

    let time = data
        .get("start_time")
        .and_then(field::as_int)
        .or_else(|| data.get("timestamp").and_then(field::as_int))
        .unwrap_or_default();

    Ok(Event::GuardBuy(GuardBuyEvent {
        room_id,
        uid,
        open_id,
        face,
        username,
        guard_level: GuardLevel::from(field::int(data, "guard_level")?),
        guard_unit: field::text_or_default(data, "guard_unit"),
        num,
        price: field::float(data, "price")?,
        gift_id: field::int_or(data, "gift_id", 0),
        gift_name: field::text_or_default(data, "gift_name"),
        time,
        msg_id: field::text_or_default(data, "msg_id"),
    }))
}

pub(crate) fn guard_buy_toast(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let data = field::get(payload.json()?, "data")?;
    Ok(Event::GuardBuyToast(GuardBuyToastEvent {
        room_id,
        color: field::text_or_default(data, "color"),
        guard_level: GuardLevel::from(field::int(data, "guard_level")?),
        num: field::int_or(data, "num", 1),
        price: field::float(data, "price")?,
        role_name: field::text_or_default(data, "role_name"),
        uid: field::int(data, "uid")?,
        username: field::text(data, "username")?,
        toast_msg: field::text_or_default(data, "toast_msg"),
        gift_id: field::int_or(data, "gift_id", 0),
        time: field::int_or(data, "start_time", 0),
    }))
}

pub(crate) fn send_gift(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let data = field::get(payload.json()?, "data")?;

    let event = if data.get("open_id").is_some() {
        let anchor = data.get("anchor_info").filter(|v| v.is_object());
        SendGiftEvent {
            room_id,
            gift_id: field::int_or(data, "gift_id", 0),
            gift_name: field::text(data, "gift_name")?,
            num: field::int_or(data, "gift_num", 1),
            price: field::float(data, "price")? / 1000.0,
            timestamp: field::int_or(data, "timestamp", 0),
            uid: field::int_or(data, "uid", 0),
            uname: field::text(data, "uname")?,
            face: field::text_or_default(data, "uface"),
            guard_level: data.get("guard_level").and_then(field::as_int),
            receive_user_info: anchor.map(|a| User {
                uid: field::int_or(a, "uid", 0),
                name: field::text_or_default(a, "uname"),
                face: field::text_or_default(a, "uface"),
                open_id: field::text_or_default(a, "open_id"),
                ..Default::default()
            }),
            action: None,
            batch_combo_id: None,
            batch_combo_send: None,
            coin_type: None,
            original_gift_name: None,
            rnd: None,
            tid: None,
            total_coin: None,
            open_id: field::text_or_default(data, "open_id"),
            r_price: data.get("r_price").and_then(field::as_int),
            paid: data.get("paid").and_then(Value::as_bool),
            msg_id: field::text_or_default(data, "msg_id"),
            gift_icon: field::text_or_default(data, "gift_icon"),
            combo_gift: data.get("combo_gift").and_then(Value::as_bool),
            combo_info: field::object(data, "combo_info"),
            blind_gift: field::object(data, "blind_gift"),
        }
    } else {
        let gift_name = field::opt_text(data, "giftName")
            .or_else(|| field::opt_text(data, "gift_name"))
            .ok_or_else(|| Rejection::invalid("missing field `giftName`"))?;
        SendGiftEvent {
            room_id,
            gift_id: field::int_or(data, "giftId", field::int_or(data, "gift_id", 0)),
            gift_name,
            num: field::int_or(data, "num", 1),
            price: field::float(data, "price")?,
            timestamp: field::int_or(data, "timestamp", 0),
            uid: field::int(data, "uid")?,
            uname: field::text(data, "uname")?,
            face: field::text_or_default(data, "face"),
            guard_level: data.get("guard_level").and_then(field::as_int),
            receive_user_info: data
                .get("receive_user_info")
                .filter(|v| v.is_object())
                .map(|r| User {
                    uid: field::int_or(r, "uid", 0),
                    name: field::text_or_default(r, "uname"),
                    ..Default::default()
                }),
            action: field::opt_text(data, "action"),
            batch_combo_id: field::opt_text(data, "batch_combo_id"),
            batch_combo_send: field::object(data, "batch_combo_send"),
            coin_type: field::opt_text(data, "coin_type"),
            original_gift_name: field::opt_text(data, "original_gift_name"),
            rnd: data.get("rnd").filter(|v| !v.is_null()).map(field::to_text),
            tid: data.get("tid").filter(|v| !v.is_null()).map(field::to_text),
            total_coin: data.get("total_coin").and_then(field::as_int),
            open_id: String::new(),
            r_price: None,
            paid: None,
            msg_id: String::new(),
            gift_icon: String::new(),
            combo_gift: None,
            combo_info: field::object(data, "combo_info"),
            blind_gift: field::object(data, "blind_gift"),
        }
    };

    Ok(Event::SendGift(event))
}

pub(crate) fn gift_star_process(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let mut event: GiftStarProcessEvent = field::data_as(payload)?;
    event.room_id = room_id;
    Ok(Event::GiftStarProcess(event))
}

pub(crate) fn special_gift(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let gifts = field::data_as(payload)?;
    Ok(Event::SpecialGift(SpecialGiftEvent { room_id, gifts }))
}

pub(crate) fn live_start(payload: CommandPayload<'_>, room_id: u64) -> Built {
    // LIVE puts its fields at the top level, some variants nest them in `data`.
    let json = payload.json()?;
    let source = json.get("data").filter(|d| d.is_object()).unwrap_or(json);
    Ok(Event::LiveStart(LiveStartEvent {
        room_id,
        live_time: field::int_or(source, "live_time", 0),
        live_platform: field::text_or_default(source, "live_platform"),
    }))
}

fn open_live(payload: CommandPayload<'_>, room_id: u64) -> std::result::Result<OpenLiveEvent, Rejection> {
    let mut event: OpenLiveEvent = field::data_as(payload)?;
    event.room_id = room_id;
    Ok(event)
}

pub(crate) fn open_live_start(payload: CommandPayload<'_>, room_id: u64) -> Built {
    open_live(payload, room_id).map(Event::OpenLiveStart)
}

pub(crate) fn open_live_end(payload: CommandPayload<'_>, room_id: u64) -> Built {
    open_live(payload, room_id).map(Event::OpenLiveEnd)
}

pub(crate) fn online_rank(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let event = match payload {
        CommandPayload::Schema(SchemaMessage::GoldRankBroadcast(p)) => {
            let items = if p.online_list.is_empty() {
                &p.list
            } else {
                &p.online_list
            };
            OnlineRankEvent {
                room_id,
                online_list: items
                    .iter()
                    .map(|item| Rank {
                        uid: item.uid,
                        face: item.face.clone(),
                        score: item.score.clone(),
                        uname: item.uname.clone(),
                        rank: item.rank,
                        guard_level: GuardLevel::from(item.guard_level),
                    })
                    .collect(),
                rank_type: p.rank_type.clone(),
            }
        }
        CommandPayload::Schema(other) => {
            return Err(Rejection::invalid(format!(
                "unexpected schema message {other:?}"
            )));
        }
        CommandPayload::Json(json) => {
            let data = field::get(json, "data")?;
            let list = data
                .get("list")
                .or_else(|| data.get("online_list"))
                .ok_or_else(|| Rejection::invalid("missing field `list`"))?;
            OnlineRankEvent {
                room_id,
                online_list: Vec::<Rank>::deserialize(list)?,
                rank_type: field::text_or_default(data, "rank_type"),
            }
        }
    };
    Ok(Event::OnlineRank(event))
}

pub(crate) fn online_rank_count(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let mut event: OnlineRankCountEvent = field::data_as(payload)?;
    event.room_id = room_id;
    Ok(Event::OnlineRankCount(event))
}

pub(crate) fn online_rank_top(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let mut event: OnlineRankTopEvent = field::data_as(payload)?;
    event.room_id = room_id;
    Ok(Event::OnlineRankTop(event))
}

pub(crate) fn like_info_update(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let mut event: LikeInfoUpdateEvent = field::data_as(payload)?;
    event.room_id = room_id;
    Ok(Event::LikeInfoUpdate(event))
}

pub(crate) fn watched_change(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let mut event: WatchedChangeEvent = field::data_as(payload)?;
    event.room_id = room_id;
    Ok(Event::WatchedChange(event))
}

pub(crate) fn stop_live_room_list(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let mut event: StopLiveRoomListEvent = field::data_as(payload)?;
    event.room_id = room_id;
    Ok(Event::StopLiveRoomList(event))
}

pub(crate) fn room_change(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let data = field::get(payload.json()?, "data")?;
    Ok(Event::RoomChange(RoomChangeEvent {
        room_id,
        title: field::text_or_default(data, "title"),
        area_name: field::text_or_default(data, "area_name"),
        parent_area_name: field::text_or_default(data, "parent_area_name"),
    }))
}

pub(crate) fn room_lock(payload: CommandPayload<'_>, room_id: u64) -> Built {
    let json = payload.json()?;
    let command = field::text_or_default(json, "cmd");
    let message = json
        .get("data")
        .and_then(|d| {
            ["message", "msg", "reason", "text"]
                .iter()
                .find_map(|key| d.get(*key).and_then(Value::as_str))
        })
        .or_else(|| json.get("msg").and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| command.clone());
    Ok(Event::RoomLock(RoomLockEvent {
        room_id,
        command,
        message,
    }))
}

/// Lenient field access over loose JSON trees.
mod field {
    use super::*;

    type Res<T> = std::result::Result<T, Rejection>;

    pub fn get<'a>(v: &'a Value, key: &str) -> Res<&'a Value> {
        v.get(key)
            .filter(|v| !v.is_null())
            .ok_or_else(|| Rejection::invalid(format!("missing field `{key}`")))
    }

    pub fn as_int(v: &Value) -> Option<i64> {
        v.as_i64()
            .or_else(|| v.as_f64().map(|f| f as i64))
            .or_else(|| v.as_str()?.trim().parse().ok())
    }

    pub fn as_float(v: &Value) -> Option<f64> {
        v.as_f64().or_else(|| v.as_str()?.trim().parse().ok())
    }

    pub fn int(v: &Value, key: &str) -> Res<i64> {
        as_int(get(v, key)?)
            .ok_or_else(|| Rejection::invalid(format!("field `{key}` is not an integer")))
    }

    /// Integer at a position of a positional array.
    pub fn int_at(v: &Value, index: usize) -> Res<i64> {
        v.get(index)
            .and_then(as_int)
            .ok_or_else(|| Rejection::invalid(format!("index {index} is not an integer")))
    }

    pub fn float_at(v: &Value, index: usize) -> Res<f64> {
        v.get(index)
            .and_then(as_float)
            .ok_or_else(|| Rejection::invalid(format!("index {index} is not a number")))
    }

    pub fn int_or(v: &Value, key: &str, default: i64) -> i64 {
        v.get(key).and_then(as_int).unwrap_or(default)
    }

    pub fn float(v: &Value, key: &str) -> Res<f64> {
        as_float(get(v, key)?)
            .ok_or_else(|| Rejection::invalid(format!("field `{key}` is not a number")))
    }

    pub fn text(v: &Value, key: &str) -> Res<String> {
        get(v, key)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Rejection::invalid(format!("field `{key}` is not a string")))
    }

    pub fn opt_text(v: &Value, key: &str) -> Option<String> {
        v.get(key).and_then(Value::as_str).map(str::to_string)
    }

    pub fn text_or_default(v: &Value, key: &str) -> String {
        opt_text(v, key).unwrap_or_default()
    }

    /// Render any scalar as text.
    pub fn to_text(v: &Value) -> String {
        match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Deserialize an optional nested object, ignoring absent or ill-shaped ones.
    pub fn object<T: DeserializeOwned>(v: &Value, key: &str) -> Option<T> {
        v.get(key)
            .filter(|o| o.is_object())
            .and_then(|o| T::deserialize(o).ok())
    }

    /// Deserialize the `data` object of a JSON payload.
    pub fn data_as<T: DeserializeOwned>(payload: CommandPayload<'_>) -> Res<T> {
        let data = get(payload.json()?, "data")?;
        Ok(T::deserialize(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{GoldRankBroadcast, GoldRankBroadcastItem, InteractWord};
    use serde_json::json;

    fn build(ctor: fn(CommandPayload<'_>, u64) -> Built, payload: Value) -> Built {
        ctor(CommandPayload::Json(&payload), 1000)
    }

    fn web_danmaku_payload() -> Value {
        let extra = json!({
            "send_from_me": false,
            "emots": {"[dog]": {"emoji": "[dog]", "descript": "dog", "url": "http://i0/dog.png"}},
            "reply_mid": 42,
            "reply_uname": "anchor",
            "reply_uname_color": "#FB7299"
        })
        .to_string();
        json!({
            "cmd": "DANMU_MSG",
            "info": [
                [0, 1, 25, 16777215, 1700000000123i64, 0, 0, "", 0, 0, 0, "", 0, "{}", "{}",
                 {"extra": extra, "user": {"uid": 12345, "base": {"name": "TestUser", "face": "f.jpg", "name_color": 0},
                  "medal": {"name": "fan", "level": 21, "guard_level": 3}}}],
                "hello [dog]",
                [12345, "TestUser", 0]
            ]
        })
    }

    #[test]
    fn test_web_danmaku() {
        let event = build(danmaku, web_danmaku_payload()).unwrap();
        let Event::Danmaku(dm) = &event else {
            panic!("Unexpected event: {event:?}");
        };

        assert_eq!(dm.room_id, 1000);
        assert_eq!(dm.content, "hello [dog]");
        assert_eq!(dm.sender.uid, 12345);
        assert_eq!(dm.sender.name, "TestUser");
        assert_eq!(dm.sender.medal.as_ref().unwrap().guard_level, GuardLevel::Captain);
        assert_eq!(dm.color, 16777215);
        assert_eq!(dm.font_size, 25);
        assert_eq!(dm.mode, 1);
        assert!((dm.time - 1_700_000_000.123).abs() < 1e-6);
        assert_eq!(dm.reply_uname, "anchor");
        assert_eq!(dm.message.emoticons().count(), 1);
        assert_eq!(dm.message.to_string(), "hello [dog]");

        assert_eq!(event.event_type(), EventType::Message);
        assert_eq!(event.user_id().as_deref(), Some("12345"));
        assert_eq!(event.session_id().as_deref(), Some("1000_12345"));
        assert_eq!(event.description(), "[Room@1000] TestUser: @anchor hello [dog]");
    }

    #[test]
    fn test_mark_to_me_on_reply() {
        let mut event = build(danmaku, web_danmaku_payload()).unwrap();
        event.mark_to_me(7);
        assert!(!event.is_tome());
        event.mark_to_me(42);
        assert!(event.is_tome());
    }

    #[test]
    fn test_web_danmaku_legacy_sender() {
        let payload = json!({
            "cmd": "DANMU_MSG",
            "info": [[0, 1, 25, 255, 1000], "hi", [777, "Legacy", 1]]
        });
        let Event::Danmaku(dm) = build(danmaku, payload).unwrap() else {
            panic!("expected danmaku");
        };
        assert_eq!(dm.sender.uid, 777);
        assert_eq!(dm.sender.name, "Legacy");
        assert_eq!(dm.sender.is_admin, Some(true));
        assert!(dm.emots.is_empty());
    }

    #[test]
    fn test_upower_emoticon_replaces_table() {
        let mut payload = web_danmaku_payload();
        payload["info"][0][13] = json!({
            "emoticon_unique": "upower_[wave]", "url": "http://i0/wave.png", "width": 20, "height": 20
        });
        payload["info"][1] = json!("[wave]");

        let Event::Danmaku(dm) = build(danmaku, payload).unwrap() else {
            panic!("expected danmaku");
        };
        let emoticon = &dm.emots["[wave]"];
        assert_eq!(emoticon.emoticon_id, -1);
        assert_eq!(emoticon.width, 20);
        assert_eq!(dm.message.emoticons().count(), 1);
    }

    #[test]
    fn test_open_platform_danmaku() {
        let payload = json!({
            "cmd": "LIVE_OPEN_PLATFORM_DM",
            "data": {
                "msg": "[doge]", "dm_type": 1, "emoji_img_url": "http://i0/doge.png",
                "timestamp": 1700000000, "uid": 0, "uface": "u.jpg", "uname": "Open",
                "open_id": "oid-1", "msg_id": "m-1", "reply_uname": ""
            }
        });
        let event = build(danmaku, payload).unwrap();
        let Event::Danmaku(dm) = &event else {
            panic!("expected danmaku");
        };

        assert_eq!(dm.msg_id, "m-1");
        assert_eq!(dm.sender.open_id, "oid-1");
        assert_eq!(dm.emots["[doge]"].emoticon_unique, "upower_[doge]");
        assert_eq!(dm.message.emoticons().count(), 1);
        assert_eq!(event.user_id().as_deref(), Some("oid-1"));
    }

    #[test]
    fn test_danmaku_missing_info_is_invalid() {
        let err = build(danmaku, json!({"cmd": "DANMU_MSG"})).unwrap_err();
        assert!(matches!(err, Rejection::Invalid(_)));
    }

    #[test]
    fn test_danmaku_short_meta_is_invalid() {
        // No timestamp at info[0][4].
        let payload = json!({
            "cmd": "DANMU_MSG",
            "info": [[0, 1, 25, 255], "hi", [777, "Legacy", 1]]
        });
        let err = build(danmaku, payload).unwrap_err();
        assert!(matches!(err, Rejection::Invalid(ref msg) if msg.contains("index 4")));

        let payload = json!({
            "cmd": "DANMU_MSG",
            "info": [[0, "x", 25, 255, 1000], "hi", [777, "Legacy", 1]]
        });
        assert!(matches!(build(danmaku, payload), Err(Rejection::Invalid(_))));
    }

    #[test]
    fn test_web_super_chat() {
        let payload = json!({
            "cmd": "SUPER_CHAT_MESSAGE",
            "data": {
                "id": 9, "uid": 99, "price": 30, "message": "Hello",
                "message_font_color": "#A3F6FF", "message_trans": "こんにちは",
                "start_time": 1700000000000i64, "end_time": 1700000060000i64,
                "user_info": {"uname": "SCUser", "face": "f.jpg"}
            }
        });
        let event = build(super_chat, payload).unwrap();
        let Event::SuperChat(sc) = &event else {
            panic!("expected super chat");
        };
        assert_eq!(sc.id, 9);
        assert_eq!(sc.price, 30.0);
        assert_eq!(sc.start_time, 1_700_000_000.0);
        assert_eq!(sc.message_trans.as_deref(), Some("こんにちは"));
        assert_eq!(event.session_id().as_deref(), Some("1000_99_9"));
        assert_eq!(event.description(), "[Room@1000] [￥30] SCUser: Hello");
    }

    #[test]
    fn test_open_super_chat_falls_back_to_message_id_and_rmb() {
        let payload = json!({
            "cmd": "LIVE_OPEN_PLATFORM_SUPER_CHAT",
            "rmb": 50,
            "data": {
                "message_id": 77, "uid": 0, "open_id": "o", "uname": "Open", "uface": "",
                "message": "hi", "start_time": 1, "end_time": 61, "msg_id": "m"
            }
        });
        let Event::SuperChat(sc) = build(super_chat, payload).unwrap() else {
            panic!("expected super chat");
        };
        assert_eq!(sc.id, 77);
        assert_eq!(sc.price, 50.0);
        assert_eq!(sc.message_id, "77");
        assert_eq!(sc.end_time, 61.0);
    }

    #[test]
    fn test_interact_word_routes_by_msg_type() {
        let payload = json!({
            "cmd": "INTERACT_WORD",
            "data": {"msg_type": 2, "timestamp": 1, "trigger_time": 2, "uid": 5, "uname": "u", "uname_color": ""}
        });
        assert_eq!(
            build(user_enter, payload.clone()).unwrap_err(),
            Rejection::Mismatch
        );
        assert!(matches!(
            build(user_follow, payload.clone()).unwrap(),
            Event::UserFollow(_)
        ));
        assert_eq!(build(user_share, payload).unwrap_err(), Rejection::Mismatch);
    }

    #[test]
    fn test_interact_word_from_schema() {
        let word = SchemaMessage::InteractWord(InteractWord {
            uid: 5,
            uname: "pb".into(),
            msg_type: 3,
            timestamp: 10,
            ..Default::default()
        });
        let event = user_share(CommandPayload::Schema(&word), 1).unwrap();
        assert_eq!(event.description(), "[Room@1] pb Shared the room");
        assert_eq!(
            user_enter(CommandPayload::Schema(&word), 1).unwrap_err(),
            Rejection::Mismatch
        );
    }

    #[test]
    fn test_open_room_enter() {
        let payload = json!({
            "cmd": "LIVE_OPEN_PLATFORM_LIVE_ROOM_ENTER",
            "data": {"open_id": "o1", "uname": "guest", "uface": "", "timestamp": 123}
        });
        let event = build(user_enter, payload).unwrap();
        assert_eq!(event.user_id().as_deref(), Some("o1"));
    }

    #[test]
    fn test_guard_buy_both_shapes() {
        let web = json!({"data": {
            "uid": 1, "username": "Cap", "guard_level": 3, "num": 1, "price": 198000,
            "gift_id": 10003, "gift_name": "舰长", "start_time": 1700000000
        }});
        let Event::GuardBuy(guard) = build(guard_buy, web).unwrap() else {
            panic!("expected guard buy");
        };
        assert_eq!(guard.guard_level, GuardLevel::Captain);
        assert_eq!(guard.time, 1_700_000_000);

        let open = json!({"data": {
            "user_info": {"uid": 0, "uface": "f", "uname": "OpenCap", "open_id": "o"},
            "guard_level": 2, "guard_num": 3, "guard_unit": "月", "price": 1998000,
            "timestamp": 1700000001, "msg_id": "m"
        }});
        let event = build(guard_buy, open).unwrap();
        let Event::GuardBuy(guard) = &event else {
            panic!("expected guard buy");
        };
        assert_eq!(guard.num, 3);
        assert_eq!(guard.time, 1_700_000_001);
        assert_eq!(event.user_id().as_deref(), Some("o"));
    }

    #[test]
    fn test_send_gift_price_units() {
        let web = json!({"data": {
            "giftName": "Rocket", "giftId": 1, "num": 5, "price": 1000, "timestamp": 1,
            "uid": 42, "uname": "GiftUser", "face": "", "receive_user_info": {"uid": 7, "uname": "anchor"},
            "batch_combo_send": null, "rnd": "123", "tid": "456"
        }});
        let Event::SendGift(gift) = build(send_gift, web).unwrap() else {
            panic!("expected gift");
        };
        assert_eq!(gift.gift_name, "Rocket");
        assert_eq!(gift.price, 1000.0);
        assert_eq!(gift.receive_user_info.unwrap().name, "anchor");
        assert_eq!(gift.rnd.as_deref(), Some("123"));

        let open = json!({"data": {
            "open_id": "o", "uid": 0, "uname": "Open", "uface": "", "gift_id": 1,
            "gift_name": "Rocket", "gift_num": 2, "price": 1000, "r_price": 1000, "paid": true,
            "guard_level": 0, "timestamp": 1, "msg_id": "m",
            "anchor_info": {"uid": 7, "uname": "anchor", "uface": "", "open_id": "a"}
        }});
        let Event::SendGift(gift) = build(send_gift, open).unwrap() else {
            panic!("expected gift");
        };
        assert_eq!(gift.price, 1.0);
        assert_eq!(gift.num, 2);
        assert_eq!(gift.paid, Some(true));
    }

    #[test]
    fn test_online_rank_json_and_schema() {
        let json_payload = json!({"data": {
            "rank_type": "gold-rank",
            "list": [{"uid": 1, "face": "", "score": "100", "uname": "a", "rank": 1, "guard_level": 3}]
        }});
        let Event::OnlineRank(rank) = build(online_rank, json_payload).unwrap() else {
            panic!("expected rank");
        };
        assert_eq!(rank.online_list[0].score, "100");

        let pb = SchemaMessage::GoldRankBroadcast(GoldRankBroadcast {
            rank_type: "gold-rank".into(),
            list: vec![],
            online_list: vec![GoldRankBroadcastItem {
                uid: 2,
                uname: "b".into(),
                score: "5".into(),
                rank: 1,
                guard_level: 1,
                ..Default::default()
            }],
        });
        let Event::OnlineRank(rank) = online_rank(CommandPayload::Schema(&pb), 1).unwrap() else {
            panic!("expected rank");
        };
        assert_eq!(rank.online_list[0].guard_level, GuardLevel::Governor);
    }

    #[test]
    fn test_simple_notices() {
        let top = build(
            online_rank_top,
            json!({"data": {"top": [{"msg": "first", "rank": 1}, {"msg": "second", "rank": 2}]}}),
        )
        .unwrap();
        assert_eq!(top.description(), "[Room@1000] first #1 + second #2");

        let watched = build(
            watched_change,
            json!({"data": {"num": 5, "text_small": "5", "text_large": "5人看过"}}),
        )
        .unwrap();
        assert_eq!(watched.room_id(), 1000);
        assert_eq!(watched.event_type(), EventType::Notice);

        let stop = build(stop_live_room_list, json!({"data": {"room_id_list": [1, 2, 3]}})).unwrap();
        assert_eq!(stop.event_name(), "stop_room_list");
        assert!(stop.description().contains("room_id_list"));
    }

    #[test]
    fn test_live_start_top_level_fields() {
        let event = build(
            live_start,
            json!({"cmd": "LIVE", "live_time": 1700000000, "live_platform": "pc", "roomid": 1}),
        )
        .unwrap();
        let Event::LiveStart(live) = event else {
            panic!("expected live start");
        };
        assert_eq!(live.live_platform, "pc");
    }

    #[test]
    fn test_room_lock_message_fallback() {
        let event = build(room_lock, json!({"cmd": "CUT_OFF", "msg": "违规"})).unwrap();
        assert_eq!(event.description(), "[Room@1000] Stream closed: 违规");

        let event = build(room_lock, json!({"cmd": "ROOM_LOCK", "data": {}})).unwrap();
        assert_eq!(event.description(), "[Room@1000] Stream closed: ROOM_LOCK");
    }

    #[test]
    fn test_event_serializes_with_name_tag() {
        let event = Event::Heartbeat(HeartbeatEvent {
            room_id: 1,
            popularity: 1234,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_name"], "heartbeat");
        assert_eq!(value["popularity"], 1234);
        assert_eq!(event.description(), "[1] ACK, popularity: 1234");
    }
}
