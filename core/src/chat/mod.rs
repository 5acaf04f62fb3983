pub mod slack;

pub use slack::SlackClient;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::pagination::{fetch_all, Page};
use crate::core::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
}

/// A message in block form, with a plain-text fallback for notifications.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatMessage {
    pub text: String,
    pub blocks: Vec<Value>,
}

impl ChatMessage {
    pub fn new(text: impl Into<String>, blocks: Vec<Value>) -> Self {
        Self { text: text.into(), blocks }
    }
}

/// Raw chat platform API. Implementations map throttling onto
/// [`RateLimited`](crate::core::retry::RateLimited).
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Posts to a channel id and returns the message timestamp, which doubles
    /// as the thread reference for replies.
    async fn post_message(
        &self,
        channel_id: &str,
        message: &ChatMessage,
        thread_ts: Option<&str>,
    ) -> anyhow::Result<String>;

    async fn list_channels(&self, cursor: Option<String>) -> anyhow::Result<Page<Channel, String>>;
}

/// Channel-name addressing and retries on top of a [`ChatClient`].
///
/// Name resolution lists every channel once and caches the whole mapping;
/// the cache is shared by all concurrent publish calls.
pub struct ChatService {
    client: Arc<dyn ChatClient>,
    retry: RetryPolicy,
    channels: RwLock<HashMap<String, String>>,
}

impl ChatService {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self::with_retry_policy(client, RetryPolicy::default())
    }

    pub fn with_retry_policy(client: Arc<dyn ChatClient>, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub async fn channel_id(&self, name: &str) -> anyhow::Result<String> {
        if let Some(id) = self.channels.read().await.get(name) {
            return Ok(id.clone());
        }

        let mut cache = self.channels.write().await;
        // Another caller may have filled the cache while we waited for the lock.
        if let Some(id) = cache.get(name) {
            return Ok(id.clone());
        }

        debug!("Resolving channel #{}: listing all channels", name);
        let channels = fetch_all(|cursor: Option<String>| async move {
            self.retry
                .run(|| self.client.list_channels(cursor.clone()))
                .await
        })
        .await?;

        cache.extend(channels.into_iter().map(|c| (c.name, c.id)));
        cache
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("channel #{} not found", name))
    }

    /// Posts to a channel by name; returns the message reference.
    pub async fn post_message(
        &self,
        channel_name: &str,
        message: &ChatMessage,
        thread_ts: Option<&str>,
    ) -> anyhow::Result<String> {
        let channel_id = self.channel_id(channel_name).await?;
        self.retry
            .run(|| self.client.post_message(&channel_id, message, thread_ts))
            .await
    }
}
