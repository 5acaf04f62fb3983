use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::chat::{Channel, ChatClient, ChatMessage};
use crate::core::pagination::Page;
use crate::core::retry::RateLimited;
use crate::http::{header_u64, ApiClient, Auth};

pub const SLACK_API_URL: &str = "https://slack.com/api";
const CHANNELS_PAGE_LIMIT: &str = "1000";
/// Used when a 429 comes without a usable `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ts: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct ConversationsListResponse {
    #[serde(default)]
    channels: Vec<Channel>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

/// Slack Web API client authenticated with a bot token.
pub struct SlackClient {
    client: ApiClient,
}

impl SlackClient {
    pub fn new(token: &str) -> anyhow::Result<Self> {
        Self::with_base_url(SLACK_API_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: &str) -> anyhow::Result<Self> {
        let client = ApiClient::new(base_url, Auth::Bearer(token.to_string()))?;
        Ok(Self { client })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, request: RequestBuilder) -> anyhow::Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Slack {} request failed", method))?;

        let status = response.status();
        if let Some(limited) = rate_limit_error(status, response.headers()) {
            return Err(anyhow::Error::new(limited).context(format!("Slack {} was rate limited", method)));
        }
        if !status.is_success() {
            bail!("Slack {} returned HTTP {}", method, status);
        }

        let body: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to decode Slack {} response", method))?;
        let body = check_envelope(method, body)?;
        serde_json::from_value(body).with_context(|| format!("Unexpected Slack {} response", method))
    }
}

#[async_trait]
impl ChatClient for SlackClient {
    async fn post_message(
        &self,
        channel_id: &str,
        message: &ChatMessage,
        thread_ts: Option<&str>,
    ) -> anyhow::Result<String> {
        let mut payload = json!({
            "channel": channel_id,
            "text": message.text,
            "blocks": message.blocks,
        });
        if let Some(ts) = thread_ts {
            payload["thread_ts"] = json!(ts);
        }

        let request = self.client.post("chat.postMessage")?.json(&payload);
        let response: PostMessageResponse = self.call("chat.postMessage", request).await?;
        Ok(response.ts)
    }

    async fn list_channels(&self, cursor: Option<String>) -> anyhow::Result<Page<Channel, String>> {
        let mut query = vec![
            ("exclude_archived", "true".to_string()),
            ("types", "public_channel,private_channel".to_string()),
            ("limit", CHANNELS_PAGE_LIMIT.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }

        let request = self.client.get("conversations.list")?.query(&query);
        let response: ConversationsListResponse = self.call("conversations.list", request).await?;
        Ok(Page::with_cursor(
            response.channels,
            response.response_metadata.next_cursor,
        ))
    }
}

fn rate_limit_error(status: StatusCode, headers: &HeaderMap) -> Option<RateLimited> {
    if status != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    let retry_after = header_u64(headers, "retry-after")
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER);
    Some(RateLimited { retry_after })
}

/// Slack answers HTTP 200 with `"ok": false` for application errors.
fn check_envelope(method: &str, body: Value) -> anyhow::Result<Value> {
    match body.get("ok").and_then(Value::as_bool) {
        Some(true) => Ok(body),
        _ => {
            let error = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            Err(anyhow!("Slack {} failed: {}", method, error))
        }
    }
}
