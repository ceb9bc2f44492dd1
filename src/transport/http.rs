//! HTTP transport over `reqwest`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::debug;

use super::{Method, RawResponse, Request, Transport};
use crate::error::TransportError;
use crate::{HeimdallError, Result};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// [`Transport`] that talks JSON over HTTP to a fixed base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a new builder for `base_url`.
    pub fn builder(base_url: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Builder for [`HttpTransport`].
pub struct HttpTransportBuilder {
    base_url: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

impl HttpTransportBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            headers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Send this header with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn bearer_auth(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.header("authorization", value)
    }

    /// Set the per-request timeout (default: 60s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpTransport> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                HeimdallError::Configuration(format!("invalid header name '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                HeimdallError::Configuration(format!("invalid value for header '{name}': {e}"))
            })?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(self.timeout)
            .build()
            .map_err(|e| HeimdallError::Configuration(format!("HTTP client: {e}")))?;

        Ok(HttpTransport {
            client,
            base_url: self.base_url,
        })
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

fn from_reqwest(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::timeout(err.to_string())
    } else if err.is_decode() {
        TransportError::decode(err.to_string())
    } else {
        TransportError::connection(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, request: &Request) -> std::result::Result<RawResponse, TransportError> {
        let url = self.url(&request.path);
        debug!(method = %request.method, %url, "sending request");

        let mut builder = self.client.request(request.method.into(), &url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(from_reqwest)?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let bytes = response.bytes().await.map_err(from_reqwest)?;
        debug!(status, bytes = bytes.len(), "received response");

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(body) => body,
                Err(e) if (200..300).contains(&status) => {
                    return Err(TransportError::decode(format!("response body: {e}")));
                }
                // error pages are often not JSON; keep the text as the message
                Err(_) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            }
        };

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
