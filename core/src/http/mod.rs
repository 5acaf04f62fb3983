pub mod client;

pub use client::{send_checked, send_json, ApiClient};

use std::time::Duration;

use reqwest::header::HeaderMap;

/// Fixed per-call timeout for every platform API call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How an API expects its token.
#[derive(Debug, Clone)]
pub enum Auth {
    /// `Authorization: Bearer <token>` (GitHub, Slack).
    Bearer(String),
    /// Custom header, e.g. GitLab's `PRIVATE-TOKEN`.
    Header(String, String),
    None,
}

/// Reads a numeric response header such as `x-next-page` or `retry-after`.
pub fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
