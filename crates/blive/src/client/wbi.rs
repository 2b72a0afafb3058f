//! WBI request signing.
//!
//! Query parameters are signed with a mixin key derived from the two image
//! file names returned by the nav endpoint: add `wts`, sort, percent-encode,
//! then append `w_rid = md5(query + mixin_key)`.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use md5::Digest;

use crate::error::{DanmakuError, Result};

/// Keys are rotated upstream roughly daily; refresh well before that.
const CACHE_EXPIRATION: Duration = Duration::from_secs(2 * 60 * 60);

const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

#[derive(Clone, Debug)]
pub struct WbiKeys {
    img_key: String,
    sub_key: String,
    fetched_at: Instant,
}

impl WbiKeys {
    pub fn new(img_key: impl Into<String>, sub_key: impl Into<String>) -> Self {
        Self {
            img_key: img_key.into(),
            sub_key: sub_key.into(),
            fetched_at: Instant::now(),
        }
    }

    /// Build keys from the `wbi_img.img_url` / `wbi_img.sub_url` pair.
    pub fn from_urls(img_url: &str, sub_url: &str) -> Result<Self> {
        let img_key = take_filename(img_url)
            .ok_or_else(|| DanmakuError::handshake(format!("bad wbi img_url: {img_url}")))?;
        let sub_key = take_filename(sub_url)
            .ok_or_else(|| DanmakuError::handshake(format!("bad wbi sub_url: {sub_url}")))?;
        Ok(Self::new(img_key, sub_key))
    }

    pub fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() > CACHE_EXPIRATION
    }

    fn mixin_key(&self) -> String {
        get_mixin_key((self.img_key.clone() + &self.sub_key).as_bytes())
    }

    /// Sign `params` with the current time.
    pub fn sign(&self, params: Vec<(&str, String)>) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| DanmakuError::handshake("SystemTime before UNIX EPOCH!"))?
            .as_secs();
        Ok(self.sign_at(params, now))
    }

    /// Sign `params` as of `timestamp` (seconds).
    pub fn sign_at(&self, mut params: Vec<(&str, String)>, timestamp: u64) -> String {
        let mixin_key = self.mixin_key();
        params.push(("wts", timestamp.to_string()));
        params.sort_by(|a, b| a.0.cmp(b.0));

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", url_encode(k), url_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let mut hasher = md5::Md5::new();
        hasher.update(query.clone() + &mixin_key);
        let w_rid = format!("{:x}", hasher.finalize());

        query + &format!("&w_rid={w_rid}")
    }
}

fn get_mixin_key(orig: &[u8]) -> String {
    MIXIN_KEY_ENC_TAB
        .iter()
        .take(32)
        .filter_map(|&i| orig.get(i).map(|&b| b as char))
        .collect()
}

fn url_encode(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            // Dropped entirely before signing.
            '!' | '\'' | '(' | ')' | '*' => {}
            _ => {
                let mut buf = [0; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    encoded.push_str(&format!("%{b:02X}"));
                }
            }
        }
    }
    encoded
}

fn take_filename(url: &str) -> Option<String> {
    url.rsplit_once('/')
        .and_then(|(_, s)| s.rsplit_once('.'))
        .map(|(s, _)| s.to_string())
}
