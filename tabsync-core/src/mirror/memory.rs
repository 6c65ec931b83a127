//! In-memory mirror. Clones share one map, the way same-origin contexts
//! share one store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{DurableMirror, MirrorError};

#[derive(Debug, Clone, Default)]
pub struct MemoryMirror {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DurableMirror for MemoryMirror {
    fn get(&self, key: &str) -> Result<Option<String>, MirrorError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), MirrorError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), MirrorError> {
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_entries() {
        let a = MemoryMirror::new();
        let b = a.clone();
        a.set("counter", "3").unwrap();
        assert_eq!(b.get("counter").unwrap().as_deref(), Some("3"));
        assert_eq!(b.len(), 1);

        b.remove("counter").unwrap();
        assert!(a.is_empty());
    }

    #[test]
    fn test_remove_missing_key_is_ok() {
        let mirror = MemoryMirror::new();
        assert!(mirror.remove("nope").is_ok());
        assert_eq!(mirror.get("nope").unwrap(), None);
    }
}
