use anyhow::{bail, Context};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, ClientBuilder, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use super::{Auth, DEFAULT_TIMEOUT};

const SHERIFF_USER_AGENT: &str = concat!("sheriff/", env!("CARGO_PKG_VERSION"));

/// Thin JSON client for one platform API: base URL, auth header, timeout.
pub struct ApiClient {
    inner: Client,
    base_url: Url,
    default_headers: HeaderMap,
}

impl ApiClient {
    pub fn new(base_url: &str, auth: Auth) -> anyhow::Result<Self> {
        Self::with_timeout(base_url, auth, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, auth: Auth, timeout: Duration) -> anyhow::Result<Self> {
        let inner = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        // Url::join drops the last segment of a base without trailing slash.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .with_context(|| format!("Invalid API base URL: {}", base_url))?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(SHERIFF_USER_AGENT));
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        match auth {
            Auth::Bearer(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .context("Token contains invalid header characters")?;
                default_headers.insert(AUTHORIZATION, value);
            }
            Auth::Header(name, token) => {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .context("Invalid auth header name")?;
                let value = HeaderValue::from_str(&token)
                    .context("Token contains invalid header characters")?;
                default_headers.insert(name, value);
            }
            Auth::None => {}
        }

        Ok(Self { inner, base_url, default_headers })
    }

    pub fn url(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("Invalid API path: {}", path))
    }

    pub fn request(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        let url = self.url(path)?;
        Ok(self.request_url(method, url))
    }

    /// Request against an absolute URL (redirects, archive links).
    pub fn request_url(&self, method: Method, url: Url) -> RequestBuilder {
        let mut builder = self.inner.request(method, url);
        for (name, value) in self.default_headers.iter() {
            builder = builder.header(name, value);
        }
        builder
    }

    pub fn get(&self, path: &str) -> anyhow::Result<RequestBuilder> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> anyhow::Result<RequestBuilder> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> anyhow::Result<RequestBuilder> {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> anyhow::Result<RequestBuilder> {
        self.request(Method::PATCH, path)
    }
}

/// Sends a request and fails on any non-2xx status, keeping the body in the error.
pub async fn send_checked(builder: RequestBuilder) -> anyhow::Result<Response> {
    let response = builder.send().await.context("HTTP request failed")?;
    let status = response.status();
    if !status.is_success() {
        let url = response.url().clone();
        let body = response.text().await.unwrap_or_default();
        bail!("{} returned HTTP {}: {}", url, status, body.trim());
    }
    Ok(response)
}

/// Sends a request and decodes the JSON body, returning the response headers too.
pub async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> anyhow::Result<(T, HeaderMap)> {
    let response = send_checked(builder).await?;
    let headers = response.headers().clone();
    let body = response
        .json::<T>()
        .await
        .context("Failed to decode JSON response")?;
    Ok((body, headers))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_under_base_path() {
        let client = ApiClient::new("https://gitlab.example.com/api/v4", Auth::None).unwrap();
        let url = client.url("/groups/a%2Fb/projects").unwrap();
        assert_eq!(url.as_str(), "https://gitlab.example.com/api/v4/groups/a%2Fb/projects");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ApiClient::new("not a url", Auth::None).is_err());
    }

    #[test]
    fn test_bad_token_is_rejected() {
        assert!(ApiClient::new("https://api.github.com", Auth::Bearer("bad\ntoken".into())).is_err());
    }
}
