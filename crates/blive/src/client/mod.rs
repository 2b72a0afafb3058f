//! REST side of an identity: login, room resolution, socket credentials and
//! outward operations.

pub mod api;
pub mod bot;
pub mod cookie;
pub mod wbi;

use std::time::Duration;

use reqwest::header::{ORIGIN, REFERER, USER_AGENT};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

use crate::error::{DanmakuError, Result};

pub use api::{ApiTable, SendDanmakuArgs, RoomArgs};
pub use bot::{Bot, DanmuHost, DanmuInfo, RoomInfo};
pub use cookie::CookieJar;
pub use wbi::WbiKeys;

pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
pub const LIVE_REFERER: &str = "https://live.bilibili.com/";
pub const LIVE_ORIGIN: &str = "https://live.bilibili.com";

/// Build the shared HTTP client.
pub fn default_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .use_rustls_tls()
        .user_agent(DEFAULT_UA)
        .timeout(timeout)
        .build()?)
}

/// Attach the browser-like header set every upstream call carries.
pub fn with_browser_headers(req: RequestBuilder) -> RequestBuilder {
    req.header(USER_AGENT, DEFAULT_UA)
        .header(REFERER, LIVE_REFERER)
        .header(ORIGIN, LIVE_ORIGIN)
}

/// Check the HTTP status, then unwrap the envelope.
///
/// A non-success status becomes [`DanmakuError::ActionFailed`] carrying the
/// status code and the response body.
pub fn parse_response(status: StatusCode, body: &str) -> Result<Value> {
    if !status.is_success() {
        let message = match body.trim() {
            "" => status.canonical_reason().unwrap_or("unknown").to_string(),
            text => text.to_string(),
        };
        return Err(DanmakuError::ActionFailed {
            code: i64::from(status.as_u16()),
            message,
        });
    }
    parse_envelope(body)
}

/// Unwrap the standard `{code, message, data}` envelope.
///
/// A non-zero `code` becomes [`DanmakuError::ActionFailed`].
pub fn parse_envelope(body: &str) -> Result<Value> {
    let mut json: Value = serde_json::from_str(body)?;
    let code = json.get("code").and_then(Value::as_i64).unwrap_or(-1);
    if code != 0 {
        let message = json
            .get("message")
            .or_else(|| json.get("msg"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        return Err(DanmakuError::ActionFailed { code, message });
    }
    Ok(json.get_mut("data").map(Value::take).unwrap_or(Value::Null))
}
