//! Caching subsystem.
//!
//! - [`ResponseCache`]: TTL + LRU cache of read results, consulted by
//!   [`Governor::execute_read`](crate::Governor::execute_read) before any
//!   remote call and invalidated by
//!   [`Governor::execute_write`](crate::Governor::execute_write).
//! - [`CacheKey`] / [`KeyPredicate`]: namespaced keys and the predicates a
//!   write uses to declare which cached reads it makes stale.

pub mod predicate;
pub mod response;

pub use predicate::{CacheKey, KeyPredicate};
pub use response::{CacheConfig, CacheStats, ResponseCache};
