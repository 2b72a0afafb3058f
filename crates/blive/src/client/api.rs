//! Named outward operations.
//!
//! Hosts call operations by name with JSON arguments. The table is built once
//! and maps each public name to a typed async function on [`Bot`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::bot::Bot;
use crate::error::{DanmakuError, Result};

/// Type-erased operation.
pub type ApiFn = Arc<dyn Fn(Arc<Bot>, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

#[derive(Debug, Clone, Deserialize)]
pub struct RoomArgs {
    pub room_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendDanmakuArgs {
    pub room_id: u64,
    #[serde(alias = "msg", alias = "message")]
    pub content: String,
}

/// Operation table.
#[derive(Clone, Default)]
pub struct ApiTable {
    ops: HashMap<String, ApiFn>,
}

impl std::fmt::Debug for ApiTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ApiTable").field("ops", &names).finish()
    }
}

impl ApiTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in operation.
    pub fn builtin() -> Self {
        Self::new()
            .register("get_room_info", |bot, args: RoomArgs| async move {
                bot.get_room_info(args.room_id).await.and_then(to_json)
            })
            .register("get_danmu_info", |bot, args: RoomArgs| async move {
                bot.get_danmu_info(args.room_id).await.and_then(to_json)
            })
            .register("send_danmaku", |bot, args: SendDanmakuArgs| async move {
                bot.send_danmaku(args.room_id, &args.content).await
            })
    }

    /// Register a typed operation. Arguments are deserialized from the JSON
    /// value passed to [`ApiTable::call`].
    pub fn register<A, F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(Arc<Bot>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let f = Arc::new(f);
        let op: ApiFn = Arc::new(move |bot, args| {
            let f = Arc::clone(&f);
            Box::pin(async move {
                let args: A = serde_json::from_value(args)?;
                f(bot, args).await
            })
        });
        self.ops.insert(name.into(), op);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        !name.starts_with('_') && self.ops.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ops.keys().map(String::as_str)
    }

    /// Invoke `name`. Private (`_`-prefixed) and unknown names fail with
    /// [`DanmakuError::ApiNotAvailable`].
    pub async fn call(&self, bot: Arc<Bot>, name: &str, args: Value) -> Result<Value> {
        if name.starts_with('_') {
            return Err(DanmakuError::ApiNotAvailable(name.to_string()));
        }
        let op = self
            .ops
            .get(name)
            .cloned()
            .ok_or_else(|| DanmakuError::ApiNotAvailable(name.to_string()))?;
        op(bot, args).await
    }
}

fn to_json<T: serde::Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
