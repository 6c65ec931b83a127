//! Per-context identity.
//!
//! One identity is generated when a context starts and handed explicitly to
//! every domain that needs to stamp or filter by it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one context sharing the profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

impl Identity {
    /// Generate a fresh identity with a random v4 id.
    pub fn generate() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// Create with an explicit id (for testing and restored sessions).
    pub fn with_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let name = default_name(&id);
        Self { id, name }
    }
}

/// Display name derived from an id: `User-` plus its first four characters.
pub fn default_name(id: &str) -> String {
    let prefix: String = id.chars().take(4).collect();
    format!("User-{prefix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_derives_name_from_id() {
        let identity = Identity::generate();
        assert_eq!(identity.id.len(), 36);
        assert_eq!(identity.name, format!("User-{}", &identity.id[..4]));
    }

    #[test]
    fn test_with_id_is_stable() {
        let a = Identity::with_id("abcdef");
        let b = Identity::with_id("abcdef");
        assert_eq!(a, b);
        assert_eq!(a.name, "User-abcd");
    }

    #[test]
    fn test_default_name_short_id() {
        assert_eq!(default_name("ab"), "User-ab");
        assert_eq!(default_name(""), "User-");
    }
}
