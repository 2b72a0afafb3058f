//! Cookie handling for an identity.

use std::collections::HashMap;
use std::fmt;

use reqwest::header::{HeaderMap, SET_COOKIE};

/// Cookie holding the account id.
pub const UID_COOKIE: &str = "DedeUserID";
/// Cookie holding the CSRF token required by write operations.
pub const CSRF_COOKIE: &str = "bili_jct";
/// Anti-forgery device cookie required by the message socket.
pub const BUVID3_COOKIE: &str = "buvid3";

/// Ordered cookie map. Insertion order is kept so the rendered header is
/// stable; setting an existing name replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    entries: Vec<(String, String)>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `name=value; name2=value2` cookie string.
    ///
    /// Fragments without `=` are ignored; surrounding quotes on values are
    /// stripped.
    pub fn parse(cookies: &str) -> Self {
        let mut jar = Self::new();
        for part in cookies.split(';') {
            let Some((name, value)) = part.trim().split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim().trim_matches('"');
            jar.set(name, value);
        }
        jar
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Account id from `DedeUserID`, if logged in.
    pub fn uid(&self) -> Option<i64> {
        self.get(UID_COOKIE)?.parse().ok()
    }

    /// CSRF token from `bili_jct`.
    pub fn csrf(&self) -> Option<&str> {
        self.get(CSRF_COOKIE).filter(|v| !v.is_empty())
    }

    pub fn buvid3(&self) -> Option<&str> {
        self.get(BUVID3_COOKIE).filter(|v| !v.is_empty())
    }

    /// Render as a `Cookie` header value.
    pub fn header_value(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

/// Parse cookies from `Set-Cookie` response headers.
pub fn parse_set_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();

    for value in headers.get_all(SET_COOKIE) {
        if let Ok(cookie_str) = value.to_str()
            && let Some((name, value)) = cookie_str.split(';').next().and_then(|kv| kv.split_once('='))
        {
            cookies.insert(name.trim().to_string(), value.trim().to_string());
        }
    }

    cookies
}

/// Generate a fake buvid3 value.
///
/// Format: `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXXinfoc` with uppercase hex digits.
pub fn generate_fake_buvid3() -> String {
    let u = uuid::Uuid::new_v4();
    let u_str = u.to_string().to_uppercase().replace('-', "");
    format!(
        "{}-{}-{}-{}-{}infoc",
        &u_str[0..8],
        &u_str[8..12],
        &u_str[12..16],
        &u_str[16..20],
        &u_str[20..]
    )
}
