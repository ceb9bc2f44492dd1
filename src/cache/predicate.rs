//! Cache keys and invalidation predicates.
//!
//! Keys are opaque strings. By convention they are namespaced with `:`
//! separators (`tasks:<database>:<flag>`), so a write can invalidate a whole
//! family of cached reads with a prefix such as `tasks:<database>:`.

use std::fmt;
use std::sync::Arc;

/// Builder for namespaced cache keys.
///
/// ```rust
/// # use heimdall::cache::CacheKey;
/// let key = CacheKey::new("tasks").with("db-42").with(false);
/// assert_eq!(key.to_string(), "tasks:db-42:false");
/// assert!(CacheKey::new("tasks").with("db-42").family().matches("tasks:db-42:false"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    rendered: String,
}

impl CacheKey {
    /// Start a key in `namespace`.
    pub fn new(namespace: impl fmt::Display) -> Self {
        Self {
            rendered: namespace.to_string(),
        }
    }

    /// Append a component.
    pub fn with(mut self, part: impl fmt::Display) -> Self {
        self.rendered.push(':');
        self.rendered.push_str(&part.to_string());
        self
    }

    /// Predicate matching every key that extends this one.
    pub fn family(&self) -> KeyPredicate {
        KeyPredicate::Prefix(format!("{}:", self.rendered))
    }

    /// Predicate matching exactly this key.
    pub fn exact(&self) -> KeyPredicate {
        KeyPredicate::Exact(self.rendered.clone())
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.rendered
    }
}

/// Selects cache entries to drop after a write.
#[derive(Clone)]
pub enum KeyPredicate {
    /// Exactly this key.
    Exact(String),
    /// Every key starting with this prefix.
    Prefix(String),
    /// Every key containing this substring.
    Contains(String),
    /// Arbitrary test on the key.
    Matching(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl KeyPredicate {
    pub fn exact(key: impl Into<String>) -> Self {
        KeyPredicate::Exact(key.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        KeyPredicate::Prefix(prefix.into())
    }

    pub fn contains(fragment: impl Into<String>) -> Self {
        KeyPredicate::Contains(fragment.into())
    }

    pub fn matching(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        KeyPredicate::Matching(Arc::new(f))
    }

    /// Whether `key` is selected by this predicate.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPredicate::Exact(k) => key == k,
            KeyPredicate::Prefix(p) => key.starts_with(p.as_str()),
            KeyPredicate::Contains(s) => key.contains(s.as_str()),
            KeyPredicate::Matching(f) => f(key),
        }
    }
}

impl fmt::Debug for KeyPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPredicate::Exact(k) => f.debug_tuple("Exact").field(k).finish(),
            KeyPredicate::Prefix(p) => f.debug_tuple("Prefix").field(p).finish(),
            KeyPredicate::Contains(s) => f.debug_tuple("Contains").field(s).finish(),
            KeyPredicate::Matching(_) => f.write_str("Matching(..)"),
        }
    }
}

impl From<&str> for KeyPredicate {
    fn from(key: &str) -> Self {
        KeyPredicate::Exact(key.to_string())
    }
}

impl From<String> for KeyPredicate {
    fn from(key: String) -> Self {
        KeyPredicate::Exact(key)
    }
}

impl From<&CacheKey> for KeyPredicate {
    fn from(key: &CacheKey) -> Self {
        key.exact()
    }
}
