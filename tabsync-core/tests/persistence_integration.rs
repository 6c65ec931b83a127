//! Integration tests for sessions backed by a real or failing mirror.

use std::sync::Arc;
use std::time::Duration;

use tabsync_core::mirror::{DurableMirror, MirrorError, RocksMirror, RocksMirrorConfig, KEY_USERS};
use tabsync_core::{Identity, LocalHub, Session, SessionConfig};

/// A mirror whose storage is permanently gone.
struct BrokenMirror;

impl DurableMirror for BrokenMirror {
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

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test(start_paused = true)]
async fn test_sessions_share_rocksdb_mirror() {
    let dir = tempfile::tempdir().unwrap();
    let mirror = Arc::new(RocksMirror::open(RocksMirrorConfig::for_testing(dir.path())).unwrap());
    let hub = LocalHub::default();

    let alice = Session::start(
        Identity::with_id("alice"),
        Arc::new(hub.clone()),
        mirror.clone(),
        SessionConfig::default(),
    );
    let bob = Session::start(
        Identity::with_id("bob"),
        Arc::new(hub.clone()),
        mirror.clone(),
        SessionConfig::default(),
    );
    settle().await;

    alice.increment().await;
    alice.increment().await;
    alice.send_message("kept on disk", None).await;
    settle().await;
    drop(alice);
    drop(bob);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let users: std::collections::BTreeMap<String, Identity> =
        serde_json::from_str(&mirror.get(KEY_USERS).unwrap().unwrap()).unwrap();
    assert!(users.contains_key("alice") && users.contains_key("bob"));

    let carol = Session::start(
        Identity::with_id("carol"),
        Arc::new(hub.clone()),
        mirror.clone(),
        SessionConfig::default(),
    );
    let snapshot = carol.snapshot().await;
    assert_eq!(snapshot.count, 2);
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].text, "kept on disk");
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_degrades_to_memory() {
    let hub = LocalHub::default();
    let alice = Session::start(
        Identity::with_id("alice"),
        Arc::new(hub.clone()),
        Arc::new(BrokenMirror),
        SessionConfig::default(),
    );
    let bob = Session::start(
        Identity::with_id("bob"),
        Arc::new(hub.clone()),
        Arc::new(BrokenMirror),
        SessionConfig::default(),
    );
    settle().await;

    alice.increment().await;
    alice.send_message("memory only", None).await;
    settle().await;

    for session in [&alice, &bob] {
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.messages.len(), 1);
        assert!(snapshot.users.contains_key("alice"));
        assert!(snapshot.users.contains_key("bob"));
    }
}
