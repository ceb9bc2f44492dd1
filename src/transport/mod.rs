//! Transport seam between the governor and the remote service.
//!
//! The governance layer does not know the remote schema. It sees a
//! [`Request`] descriptor going out and a [`RawResponse`] (status, headers,
//! JSON body) or a [`TransportError`] coming back.
//! [`RawResponse::into_result`] turns non-success statuses into classified
//! errors, reading the service's `code`/`message` error body and its
//! `Retry-After` header.

#[cfg(feature = "http")]
pub mod http;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

#[cfg(feature = "http")]
pub use http::{HttpTransport, HttpTransportBuilder};

/// HTTP-equivalent request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Whether requests with this method change remote state.
    pub fn is_write(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of one remote operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Endpoint path relative to the transport's base URL.
    pub path: String,
    pub body: Option<Value>,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Patch,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            body: None,
        }
    }
}

/// What came back from the service, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl RawResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The service's wait hint, from a `Retry-After` header in seconds.
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get("retry-after")
            .and_then(|raw| parse_retry_after(raw))
    }

    /// Success body, or a classified error built from status, body and headers.
    pub fn into_result(self) -> Result<Value, TransportError> {
        if self.is_success() {
            return Ok(self.body);
        }

        let retry_after = self.retry_after();
        let code = self.body.get("code").and_then(Value::as_str).map(str::to_string);
        let message = match self.body.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => match &self.body {
                Value::String(text) if !text.is_empty() => text.clone(),
                _ => format!("request failed with status {}", self.status),
            },
        };

        let mut err = TransportError::status(self.status, message);
        err.code = code;
        err.retry_after = retry_after;
        Err(err)
    }
}

/// Parse a `Retry-After` value expressed in (possibly fractional) seconds.
///
/// HTTP-date values, negative numbers and values too large for a
/// `Duration` yield `None`, which makes the executor fall back to
/// exponential backoff.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Capability to send a request to the remote service.
///
/// Implementations return `Ok` for any response the service produced
/// (whatever its status) and `Err` only when no usable response arrived.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name for logging/debugging.
    fn name(&self) -> &str;

    /// Send one request.
    async fn send(&self, request: &Request) -> Result<RawResponse, TransportError>;

    /// Send one request and classify the response.
    async fn invoke(&self, request: &Request) -> Result<Value, TransportError> {
        self.send(request).await?.into_result()
    }
}
