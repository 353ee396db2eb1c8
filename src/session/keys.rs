//! Thread keys and their resolution from user identifiers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{OracleError, Result};

/// Index handed out when no thread is selected and no allocator is configured.
pub const DEFAULT_THREAD_INDEX: u64 = 42;

/// Stable key of one conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadKey(String);

impl ThreadKey {
    /// Key for thread `index` of `user_id`.
    #[must_use]
    pub fn for_user(user_id: &str, index: u64) -> Self {
        Self(format!("{user_id}_{index}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ThreadKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chooses a thread index for users that did not select one.
pub trait ThreadIndexAllocator: Send + Sync + std::fmt::Debug {
    fn allocate(&self, user_id: &str) -> u64;
}

/// Allocator that hands every user the same index.
#[derive(Debug, Clone, Copy)]
pub struct FixedThreadIndex(pub u64);

impl Default for FixedThreadIndex {
    fn default() -> Self {
        Self(DEFAULT_THREAD_INDEX)
    }
}

impl ThreadIndexAllocator for FixedThreadIndex {
    fn allocate(&self, _user_id: &str) -> u64 {
        self.0
    }
}

/// Maps user identifiers to thread keys.
#[derive(Debug, Clone)]
pub struct SessionKeyResolver {
    allocator: Arc<dyn ThreadIndexAllocator>,
}

impl Default for SessionKeyResolver {
    fn default() -> Self {
        Self::new(Arc::new(FixedThreadIndex::default()))
    }
}

impl SessionKeyResolver {
    #[must_use]
    pub fn new(allocator: Arc<dyn ThreadIndexAllocator>) -> Self {
        Self { allocator }
    }

    /// Resolve the thread key for a user.
    ///
    /// An explicit index is used as is; otherwise the allocator picks one.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::InvalidUser`] for an empty user identifier.
    pub fn resolve(&self, user_id: &str, thread_index: Option<u64>) -> Result<ThreadKey> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(OracleError::InvalidUser);
        }

        let index = thread_index.unwrap_or_else(|| self.allocator.allocate(user_id));
        Ok(ThreadKey::for_user(user_id, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_index_is_deterministic() {
        let resolver = SessionKeyResolver::default();
        let a = resolver.resolve("alice", Some(1)).unwrap();
        let b = resolver.resolve("alice", Some(1)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "alice_1");
    }

    #[test]
    fn test_allocated_index() {
        let resolver = SessionKeyResolver::default();
        assert_eq!(resolver.resolve("bob", None).unwrap().as_str(), "bob_42");

        let resolver = SessionKeyResolver::new(Arc::new(FixedThreadIndex(7)));
        assert_eq!(resolver.resolve(" bob ", None).unwrap().as_str(), "bob_7");
    }

    #[test]
    fn test_empty_user_rejected() {
        let resolver = SessionKeyResolver::default();
        assert!(matches!(
            resolver.resolve("   ", Some(1)),
            Err(OracleError::InvalidUser)
        ));
    }
}
