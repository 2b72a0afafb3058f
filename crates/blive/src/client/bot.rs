//! A logged-in identity.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use reqwest::header::COOKIE;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::cookie::{BUVID3_COOKIE, CookieJar, generate_fake_buvid3, parse_set_cookies};
use super::wbi::WbiKeys;
use super::{parse_response, with_browser_headers};
use crate::error::{DanmakuError, Result};

pub const NAV_API: &str = "https://api.bilibili.com/x/web-interface/nav";
pub const DANMU_INFO_API: &str =
    "https://api.live.bilibili.com/xlive/web-room/v1/index/getDanmuInfo";
pub const BUVID3_URL: &str = "https://www.bilibili.com";
pub const ROOM_INFO_API: &str = "https://api.live.bilibili.com/room/v1/Room/get_info";
pub const SEND_MSG_API: &str = "https://api.live.bilibili.com/msg/send";

/// Upstream code for a failed CSRF check.
const CSRF_FAILED: i64 = -111;

/// Subset of `Room/get_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: u64,
    #[serde(default)]
    pub short_id: u64,
    #[serde(default)]
    pub uid: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub live_status: i64,
    #[serde(default)]
    pub area_name: String,
    #[serde(default)]
    pub parent_area_name: String,
    #[serde(default)]
    pub online: i64,
    #[serde(default)]
    pub live_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanmuHost {
    pub host: String,
    #[serde(default)]
    pub port: u16,
    pub wss_port: u16,
    #[serde(default)]
    pub ws_port: u16,
}

/// Socket credentials from `getDanmuInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanmuInfo {
    pub token: String,
    #[serde(default)]
    pub host_list: Vec<DanmuHost>,
}

impl DanmuInfo {
    /// First advertised host as `(host, wss_port)`.
    pub fn endpoint(&self) -> Result<(&str, u16)> {
        self.host_list
            .first()
            .map(|h| (h.host.as_str(), h.wss_port))
            .ok_or_else(|| DanmakuError::handshake("getDanmuInfo returned an empty host_list"))
    }
}

#[derive(Debug, Deserialize)]
struct WbiImg {
    img_url: String,
    sub_url: String,
}

#[derive(Debug, Deserialize)]
struct NavData {
    wbi_img: WbiImg,
    #[serde(default)]
    mid: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct NavResponse {
    #[serde(default)]
    code: i64,
    data: Option<NavData>,
}

/// Parse a nav response into WBI keys and the account id (0 when anonymous).
///
/// Nav answers `-101` for anonymous sessions but still carries the keys.
fn parse_nav(body: &str) -> Result<(WbiKeys, i64)> {
    let resp: NavResponse = serde_json::from_str(body)?;
    let data = resp
        .data
        .ok_or_else(|| DanmakuError::handshake(format!("nav returned code {} without data", resp.code)))?;
    let keys = WbiKeys::from_urls(&data.wbi_img.img_url, &data.wbi_img.sub_url)?;
    Ok((keys, data.mid.unwrap_or(0)))
}

/// One configured account and the rooms it watches.
#[derive(Debug)]
pub struct Bot {
    client: Client,
    uid: i64,
    rooms: Vec<u64>,
    cookies: RwLock<CookieJar>,
    keys: Mutex<WbiKeys>,
}

impl Bot {
    pub fn new(client: Client, cookies: CookieJar, uid: i64, keys: WbiKeys, rooms: Vec<u64>) -> Self {
        Self {
            client,
            uid,
            rooms,
            cookies: RwLock::new(cookies),
            keys: Mutex::new(keys),
        }
    }

    /// Log in with a cookie string: fetch the account id and signing keys.
    pub async fn login(client: Client, cookie: &str, rooms: Vec<u64>) -> Result<Self> {
        let cookies = CookieJar::parse(cookie);
        let (keys, uid) = Self::fetch_nav(&client, &cookies).await?;
        if uid == 0 {
            warn!("Cookie is not logged in, listening anonymously");
        } else {
            info!("[{}] Logged in", uid);
        }
        Ok(Self::new(client, cookies, uid, keys, rooms))
    }

    async fn fetch_nav(client: &Client, cookies: &CookieJar) -> Result<(WbiKeys, i64)> {
        let mut req = with_browser_headers(client.get(NAV_API));
        if !cookies.is_empty() {
            req = req.header(COOKIE, cookies.header_value());
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(DanmakuError::handshake(format!(
                "Failed to login: {status}, {body}"
            )));
        }
        parse_nav(&body)
    }

    /// Identity key used by the supervisor.
    pub fn self_id(&self) -> String {
        self.uid.to_string()
    }

    pub fn uid(&self) -> i64 {
        self.uid
    }

    pub fn rooms(&self) -> &[u64] {
        &self.rooms
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Snapshot of the current cookies.
    pub fn cookies(&self) -> CookieJar {
        self.cookies.read().clone()
    }

    pub fn cookie_header(&self) -> String {
        self.cookies.read().header_value()
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.authed(self.client.get(url))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        let req = with_browser_headers(req);
        let cookies = self.cookie_header();
        if cookies.is_empty() {
            req
        } else {
            req.header(COOKIE, cookies)
        }
    }

    async fn call(&self, req: RequestBuilder) -> Result<Value> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        parse_response(status, &body)
    }

    /// Refresh the buvid3 cookie from the bootstrap page, generating one when
    /// the page does not hand one out.
    pub async fn refresh_buvid3(&self) -> Result<String> {
        let fetched = match with_browser_headers(self.client.get(BUVID3_URL)).send().await {
            Ok(resp) => parse_set_cookies(resp.headers()).remove(BUVID3_COOKIE),
            Err(e) => {
                warn!("Failed to fetch buvid3: {}", e);
                None
            }
        };

        let buvid3 = fetched.filter(|v| !v.is_empty()).unwrap_or_else(|| {
            debug!("Using generated buvid3");
            generate_fake_buvid3()
        });
        self.cookies.write().set(BUVID3_COOKIE, buvid3.clone());
        Ok(buvid3)
    }

    /// Sign query parameters, refreshing stale keys first.
    pub async fn wbi_sign(&self, params: Vec<(&str, String)>) -> Result<String> {
        let mut keys = self.keys.lock().await;
        if keys.is_stale() {
            debug!("[{}] Refreshing WBI keys", self.uid);
            let (fresh, _) = Self::fetch_nav(&self.client, &self.cookies()).await?;
            *keys = fresh;
        }
        keys.sign(params)
    }

    /// Room metadata; `room_id` may be a short id.
    pub async fn get_room_info(&self, room_id: u64) -> Result<RoomInfo> {
        let data = self
            .call(self.get(ROOM_INFO_API).query(&[("room_id", room_id)]))
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Socket token and hosts for a canonical room id.
    pub async fn get_danmu_info(&self, room_id: u64) -> Result<DanmuInfo> {
        let query = self
            .wbi_sign(vec![("id", room_id.to_string()), ("type", "0".to_string())])
            .await?;
        let data = self.call(self.get(&format!("{DANMU_INFO_API}?{query}"))).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Post a chat message to a room.
    pub async fn send_danmaku(&self, room_id: u64, msg: &str) -> Result<Value> {
        let csrf = self
            .cookies
            .read()
            .csrf()
            .map(str::to_string)
            .ok_or_else(|| DanmakuError::ActionFailed {
                code: CSRF_FAILED,
                message: "missing bili_jct cookie".to_string(),
            })?;
        let rnd = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let form = [
            ("bubble", "0".to_string()),
            ("msg", msg.to_string()),
            ("color", "16777215".to_string()),
            ("mode", "1".to_string()),
            ("fontsize", "25".to_string()),
            ("rnd", rnd.to_string()),
            ("roomid", room_id.to_string()),
            ("csrf", csrf.clone()),
            ("csrf_token", csrf),
        ];
        self.call(self.authed(self.client.post(SEND_MSG_API)).form(&form))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bot(cookie: &str) -> Bot {
        Bot::new(
            Client::new(),
            CookieJar::parse(cookie),
            42,
            WbiKeys::new(
                "7cd084941338484aae1ad9425b84077c",
                "4932caff0ff746eab6f01bf08b70ac45",
            ),
            vec![1, 2],
        )
    }

    #[test]
    fn test_parse_nav_logged_in() {
        let body = json!({
            "code": 0,
            "data": {
                "isLogin": true, "mid": 42,
                "wbi_img": {
                    "img_url": "https://i0.hdslb.com/bfs/wbi/7cd084941338484aae1ad9425b84077c.png",
                    "sub_url": "https://i0.hdslb.com/bfs/wbi/4932caff0ff746eab6f01bf08b70ac45.png"
                }
            }
        })
        .to_string();
        let (_, uid) = parse_nav(&body).unwrap();
        assert_eq!(uid, 42);
    }

    #[test]
    fn test_parse_nav_anonymous() {
        let body = json!({
            "code": -101,
            "data": {
                "isLogin": false,
                "wbi_img": {"img_url": "https://x/a/img.png", "sub_url": "https://x/a/sub.png"}
            }
        })
        .to_string();
        let (_, uid) = parse_nav(&body).unwrap();
        assert_eq!(uid, 0);
    }

    #[test]
    fn test_parse_nav_without_data() {
        let err = parse_nav(r#"{"code":-412,"data":null}"#).unwrap_err();
        assert!(matches!(err, DanmakuError::HandshakeFailed(_)));
    }

    #[test]
    fn test_danmu_info_endpoint() {
        let info: DanmuInfo = serde_json::from_value(json!({
            "token": "tok",
            "host_list": [{"host": "a.chat.bilibili.com", "port": 2243, "wss_port": 443, "ws_port": 2244}]
        }))
        .unwrap();
        assert_eq!(info.endpoint().unwrap(), ("a.chat.bilibili.com", 443));

        let empty = DanmuInfo {
            token: "tok".into(),
            host_list: vec![],
        };
        assert!(matches!(empty.endpoint(), Err(DanmakuError::HandshakeFailed(_))));
    }

    #[test]
    fn test_room_info_lenient() {
        let info: RoomInfo =
            serde_json::from_value(json!({"room_id": 5050, "short_id": 1, "title": "t"})).unwrap();
        assert_eq!(info.room_id, 5050);
        assert_eq!(info.live_status, 0);
    }

    #[tokio::test]
    async fn test_send_danmaku_requires_csrf() {
        let bot = bot("SESSDATA=abc");
        let err = bot.send_danmaku(1, "hi").await.unwrap_err();
        assert!(matches!(err, DanmakuError::ActionFailed { code: CSRF_FAILED, .. }));
    }

    #[test]
    fn test_identity_accessors() {
        let bot = bot("SESSDATA=abc; bili_jct=x");
        assert_eq!(bot.self_id(), "42");
        assert_eq!(bot.rooms(), &[1, 2]);
        assert_eq!(bot.cookie_header(), "SESSDATA=abc; bili_jct=x");
    }

    #[tokio::test]
    #[ignore]
    async fn test_real_room_info() {
        let client = crate::client::default_client(std::time::Duration::from_secs(10)).unwrap();
        let bot = Bot::login(client, "", vec![]).await.unwrap();
        let info = bot.get_room_info(1).await.unwrap();
        println!("{info:?}");
        assert_ne!(info.room_id, 1);
    }
}
