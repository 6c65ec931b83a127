//! Durable mirror: origin-scoped key/value cache used to bootstrap state.
//!
//! ```text
//! reducer ──► Mirror (best effort) ──► dyn DurableMirror
//!                 │                        ├── MemoryMirror (shared map)
//!                 │ failures logged,       └── RocksMirror  (RocksDB + LZ4)
//!                 ▼ never propagated
//!             in-memory state stays authoritative
//! ```
//!
//! Keys used by the domains:
//!
//! | Key            | Value                               |
//! |----------------|-------------------------------------|
//! | `chat`         | JSON array of chat messages         |
//! | `counter`      | stringified integer                 |
//! | `last-clicked` | identity id of the last counter op  |
//! | `users`        | JSON map of identity id → identity  |

pub mod memory;
pub mod rocks;

pub use memory::MemoryMirror;
pub use rocks::{RocksMirror, RocksMirrorConfig};

use std::sync::Arc;
use thiserror::Error;

pub const KEY_CHAT: &str = "chat";
pub const KEY_COUNTER: &str = "counter";
pub const KEY_LAST_CLICKED: &str = "last-clicked";
pub const KEY_USERS: &str = "users";

/// Mirror errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Value for '{0}' is not valid UTF-8")]
    InvalidUtf8(String),
}

impl From<rocksdb::Error> for MirrorError {
    fn from(e: rocksdb::Error) -> Self {
        MirrorError::Database(e.to_string())
    }
}

/// Synchronous string key/value store shared by all contexts of a profile.
pub trait DurableMirror: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, MirrorError>;
    fn set(&self, key: &str, value: &str) -> Result<(), MirrorError>;
    fn remove(&self, key: &str) -> Result<(), MirrorError>;
}

/// Best-effort front for a [`DurableMirror`].
///
/// Every failure is logged and swallowed; callers carry on with their
/// in-memory state.
#[derive(Clone)]
pub struct Mirror {
    inner: Arc<dyn DurableMirror>,
}

impl Mirror {
    pub fn new(inner: Arc<dyn DurableMirror>) -> Self {
        Self { inner }
    }

    pub fn load(&self, key: &str) -> Option<String> {
        match self.inner.get(key) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Mirror read of '{key}' failed: {e}");
                None
            }
        }
    }

    /// Returns whether the write reached the store.
    pub fn store(&self, key: &str, value: &str) -> bool {
        match self.inner.set(key, value) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Mirror write of '{key}' failed: {e}");
                false
            }
        }
    }

    pub fn clear(&self, key: &str) -> bool {
        match self.inner.remove(key) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Mirror remove of '{key}' failed: {e}");
                false
            }
        }
    }
}

impl std::fmt::Debug for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mirror").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl DurableMirror for Broken {
        fn get(&self, _key: &str) -> Result<Option<String>, MirrorError> {
            Err(MirrorError::Unavailable("quota exceeded".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), MirrorError> {
            Err(MirrorError::Unavailable("quota exceeded".into()))
        }
        fn remove(&self, _key: &str) -> Result<(), MirrorError> {
            Err(MirrorError::Unavailable("quota exceeded".into()))
        }
    }

    #[test]
    fn test_failures_are_swallowed() {
        let mirror = Mirror::new(Arc::new(Broken));
        assert_eq!(mirror.load(KEY_CHAT), None);
        assert!(!mirror.store(KEY_CHAT, "[]"));
        assert!(!mirror.clear(KEY_CHAT));
    }

    #[test]
    fn test_passes_through_to_store() {
        let mirror = Mirror::new(Arc::new(MemoryMirror::new()));
        assert!(mirror.store(KEY_COUNTER, "7"));
        assert_eq!(mirror.load(KEY_COUNTER).as_deref(), Some("7"));
        assert!(mirror.clear(KEY_COUNTER));
        assert_eq!(mirror.load(KEY_COUNTER), None);
    }

    #[test]
    fn test_error_display() {
        let e = MirrorError::InvalidUtf8("users".into());
        assert_eq!(e.to_string(), "Value for 'users' is not valid UTF-8");
    }
}
