//! Heimdall - request governance for rate-limited record APIs
//!
//! This crate sits between an application and a remote service that enforces
//! a request quota. Every call goes through three concerns:
//!
//! - a token-bucket [`RateLimiter`] that keeps outbound traffic under the
//!   service's average rate while allowing short bursts;
//! - a TTL + LRU [`ResponseCache`] that answers repeated reads locally and
//!   is invalidated by writes;
//! - a [`RetryExecutor`] that classifies failures and retries throttled or
//!   transient ones with backoff, honouring the service's retry-after hint.
//!
//! [`Governor`] wires them together behind two entry points,
//! [`execute_read`](Governor::execute_read) and
//! [`execute_write`](Governor::execute_write).
//!
//! # Example
//!
//! ```rust,no_run
//! use heimdall::{CacheKey, Heimdall, HttpTransport, Request};
//!
//! #[tokio::main]
//! async fn main() -> heimdall::Result<()> {
//!     let governor = Heimdall::builder().build()?;
//!     let transport = HttpTransport::builder("https://api.example.com/v1")
//!         .bearer_auth("secret-token")
//!         .build()?;
//!
//!     let key = CacheKey::new("database").with("abc123");
//!     let page = governor
//!         .fetch(&transport, key.clone(), &Request::get("/databases/abc123"))
//!         .await?;
//!     println!("cached: {}, attempts: {}", page.cached, page.attempt_count());
//!
//!     governor
//!         .submit(
//!             &transport,
//!             &Request::patch("/databases/abc123", serde_json::json!({"title": "New"})),
//!             &[key.exact()],
//!         )
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Custom fetchers
//!
//! Any async closure returning `Result<T, TransportError>` can be governed;
//! the HTTP transport is only a convenience.
//!
//! ```rust
//! use heimdall::{Heimdall, TransportError};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> heimdall::Result<()> {
//! let governor = Heimdall::builder().build()?;
//! let first = governor
//!     .execute_read("answer", || async { Ok::<_, TransportError>(42u32) })
//!     .await?;
//! let second = governor
//!     .execute_read("answer", || async { Ok::<_, TransportError>(0u32) })
//!     .await?;
//! assert_eq!(first.value, 42);
//! assert!(second.cached);
//! assert_eq!(second.value, 42);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod limiter;
pub mod retry;
pub mod telemetry;
pub mod transport;

// Re-export main types at crate root
pub use error::{ErrorKind, Fault, HeimdallError, Result, TransportError};
pub use gateway::{Governor, Heimdall, HeimdallBuilder};

pub use cache::{CacheConfig, CacheKey, CacheStats, KeyPredicate, ResponseCache};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::GovernorConfig;
pub use limiter::{RateLimitConfig, RateLimiter};
pub use retry::{Attempt, AttemptOutcome, Completed, Disposition, RetryConfig, RetryExecutor};
pub use transport::{Method, RawResponse, Request, Transport};

#[cfg(feature = "http")]
pub use transport::http::{HttpTransport, HttpTransportBuilder};
