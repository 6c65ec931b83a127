//! Shared counter, replicated by broadcasting the absolute value.
//!
//! Local operations compute the next value from the previous one, persist it
//! and broadcast `CounterUpdate{action, count}`. Peers adopt `count`
//! verbatim, so the counter is last-write-wins on the value: two concurrent
//! increments from different contexts can collapse into one.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::channel::{ChannelEndpoint, Inbound};
use crate::mirror::{Mirror, KEY_COUNTER, KEY_LAST_CLICKED};
use crate::notify::ChangeNotifier;
use crate::protocol::{CounterAction, CounterUpdate, Envelope, Message};
use crate::task::TaskHandle;

/// Value plus who applied the last change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterState {
    pub value: i64,
    pub last_modified_by: Option<String>,
}

// ───────────────────────────────────────────────────────────────────
// Reducer
// ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct CounterReducer {
    local_id: String,
    state: CounterState,
    mirror: Mirror,
}

impl CounterReducer {
    /// Restore value and last modifier from the mirror.
    pub fn load(local_id: impl Into<String>, mirror: Mirror) -> Self {
        let value = mirror
            .load(KEY_COUNTER)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(0);
        let last_modified_by = mirror.load(KEY_LAST_CLICKED).filter(|id| !id.is_empty());
        Self {
            local_id: local_id.into(),
            state: CounterState {
                value,
                last_modified_by,
            },
            mirror,
        }
    }

    pub fn increment(&mut self) -> Message {
        let next = self.state.value.saturating_add(1);
        self.local_change(CounterAction::Increment, next)
    }

    pub fn decrement(&mut self) -> Message {
        let next = self.state.value.saturating_sub(1);
        self.local_change(CounterAction::Decrement, next)
    }

    pub fn reset(&mut self) -> Message {
        self.local_change(CounterAction::Set, 0)
    }

    fn local_change(&mut self, action: CounterAction, next: i64) -> Message {
        let local_id = self.local_id.clone();
        self.adopt(next, local_id.clone());
        Message::Counter(CounterUpdate {
            user_id: local_id,
            action,
            count: Some(next),
        })
    }

    fn adopt(&mut self, value: i64, by: String) {
        self.state.value = value;
        self.mirror.store(KEY_COUNTER, &value.to_string());
        self.mirror.store(KEY_LAST_CLICKED, &by);
        self.state.last_modified_by = Some(by);
    }

    /// Apply a peer envelope. Returns whether the state changed.
    pub fn apply(&mut self, envelope: &Envelope) -> bool {
        if envelope.source == self.local_id {
            return false;
        }
        let value = match &envelope.message {
            Message::Counter(CounterUpdate { count: Some(count), .. }) => *count,
            Message::Counter(CounterUpdate { count: None, .. }) => {
                log::debug!("counter update from {} carries no count", envelope.source);
                return false;
            }
            Message::ClearCounter => 0,
            _ => return false,
        };
        let before = self.state.clone();
        self.adopt(value, envelope.source.clone());
        self.state != before
    }

    pub fn state(&self) -> &CounterState {
        &self.state
    }
}

// ───────────────────────────────────────────────────────────────────
// Live domain
// ───────────────────────────────────────────────────────────────────

/// Counter reducer wired to the `counter` channel.
pub struct SharedCounter {
    state: Arc<RwLock<CounterReducer>>,
    endpoint: ChannelEndpoint,
    notifier: ChangeNotifier,
    listener: TaskHandle,
}

impl SharedCounter {
    pub fn start(endpoint: ChannelEndpoint, local_id: &str, mirror: Mirror, notifier: ChangeNotifier) -> Self {
        let state = Arc::new(RwLock::new(CounterReducer::load(local_id, mirror)));
        let listener = TaskHandle::spawn(Self::listen(endpoint.subscribe(), state.clone(), notifier.clone()));
        Self {
            state,
            endpoint,
            notifier,
            listener,
        }
    }

    async fn listen(mut inbound: Inbound, state: Arc<RwLock<CounterReducer>>, notifier: ChangeNotifier) {
        while let Some(envelope) = inbound.next().await {
            if state.write().await.apply(&envelope) {
                notifier.bump();
            }
        }
        log::debug!("counter listener stopped: medium closed");
    }

    pub async fn increment(&self) {
        let message = self.state.write().await.increment();
        self.publish(message);
    }

    pub async fn decrement(&self) {
        let message = self.state.write().await.decrement();
        self.publish(message);
    }

    pub async fn reset(&self) {
        let message = self.state.write().await.reset();
        self.publish(message);
    }

    fn publish(&self, message: Message) {
        self.endpoint.post(message);
        self.notifier.bump();
    }

    pub async fn snapshot(&self) -> CounterState {
        self.state.read().await.state().clone()
    }

    pub fn shutdown(&mut self) {
        self.listener.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::{DurableMirror, MemoryMirror};

    fn reducer(id: &str) -> (MemoryMirror, CounterReducer) {
        let store = MemoryMirror::new();
        let r = CounterReducer::load(id, Mirror::new(Arc::new(store.clone())));
        (store, r)
    }

    fn update(from: &str, action: CounterAction, count: Option<i64>) -> Envelope {
        Envelope::new(
            from,
            0,
            None,
            Message::Counter(CounterUpdate {
                user_id: from.into(),
                action,
                count,
            }),
        )
    }

    #[test]
    fn test_local_ops_step_by_one() {
        let (store, mut counter) = reducer("me");
        counter.increment();
        counter.increment();
        counter.decrement();
        counter.increment();
        assert_eq!(counter.state().value, 2);
        assert_eq!(counter.state().last_modified_by.as_deref(), Some("me"));
        assert_eq!(store.get(KEY_COUNTER).unwrap().as_deref(), Some("2"));
        assert_eq!(store.get(KEY_LAST_CLICKED).unwrap().as_deref(), Some("me"));
    }

    #[test]
    fn test_local_op_broadcasts_absolute_value() {
        let (_store, mut counter) = reducer("me");
        assert_eq!(
            counter.decrement(),
            Message::Counter(CounterUpdate {
                user_id: "me".into(),
                action: CounterAction::Decrement,
                count: Some(-1),
            })
        );
        assert_eq!(
            counter.reset(),
            Message::Counter(CounterUpdate {
                user_id: "me".into(),
                action: CounterAction::Set,
                count: Some(0),
            })
        );
    }

    #[test]
    fn test_remote_update_adopts_count_not_action() {
        let (store, mut counter) = reducer("me");
        for _ in 0..10 {
            counter.increment();
        }
        assert!(counter.apply(&update("peer", CounterAction::Increment, Some(5))));
        assert_eq!(counter.state().value, 5);
        assert_eq!(counter.state().last_modified_by.as_deref(), Some("peer"));
        assert_eq!(store.get(KEY_COUNTER).unwrap().as_deref(), Some("5"));
    }

    #[test]
    fn test_update_without_count_ignored() {
        let (_store, mut counter) = reducer("me");
        counter.increment();
        assert!(!counter.apply(&update("peer", CounterAction::Increment, None)));
        assert_eq!(counter.state().value, 1);
        assert_eq!(counter.state().last_modified_by.as_deref(), Some("me"));
    }

    #[test]
    fn test_self_echo_ignored() {
        let (_store, mut counter) = reducer("me");
        assert!(!counter.apply(&update("me", CounterAction::Set, Some(99))));
        assert_eq!(counter.state(), &CounterState::default());
    }

    #[test]
    fn test_clear_counter_resets_to_zero() {
        let (_store, mut counter) = reducer("me");
        counter.increment();
        let clear = Envelope::new("peer", 0, None, Message::ClearCounter);
        assert!(counter.apply(&clear));
        assert_eq!(counter.state().value, 0);
        assert_eq!(counter.state().last_modified_by.as_deref(), Some("peer"));
    }

    #[test]
    fn test_load_restores_and_tolerates_garbage() {
        let store = MemoryMirror::new();
        store.set(KEY_COUNTER, " 12 ").unwrap();
        store.set(KEY_LAST_CLICKED, "peer").unwrap();
        let counter = CounterReducer::load("me", Mirror::new(Arc::new(store.clone())));
        assert_eq!(counter.state().value, 12);
        assert_eq!(counter.state().last_modified_by.as_deref(), Some("peer"));

        store.set(KEY_COUNTER, "twelve").unwrap();
        let counter = CounterReducer::load("me", Mirror::new(Arc::new(store)));
        assert_eq!(counter.state().value, 0);
    }

    #[test]
    fn test_redelivered_update_reports_no_change() {
        let (_store, mut counter) = reducer("me");
        let envelope = update("peer", CounterAction::Increment, Some(3));
        assert!(counter.apply(&envelope));
        assert!(!counter.apply(&envelope));
        assert_eq!(counter.state().value, 3);
    }
}
