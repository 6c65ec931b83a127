//! Chat log with optional per-message expiry and transient typing state.
//!
//! Messages are keyed by id (`<userId>-<timestamp>`), so redelivery is a
//! no-op. The log is persisted under the `chat` key only on the receive path;
//! local sends and deletes only change memory, and peers write them to the
//! shared mirror when they apply them. Typing indicators are never persisted.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::channel::{ChannelEndpoint, Inbound};
use crate::mirror::{Mirror, KEY_CHAT};
use crate::notify::ChangeNotifier;
use crate::protocol::{ChatMessage, DeleteMessage, Envelope, Message, TypingIndicator};
use crate::task::TaskHandle;

// ───────────────────────────────────────────────────────────────────
// Reducer
// ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ChatLog {
    local_id: String,
    messages: Vec<ChatMessage>,
    typing: BTreeMap<String, TypingIndicator>,
    mirror: Mirror,
}

impl ChatLog {
    /// Restore the log from the mirror, dropping anything already expired.
    pub fn load(local_id: impl Into<String>, mirror: Mirror, now: u64) -> Self {
        let mut messages = match mirror.load(KEY_CHAT) {
            Some(raw) => serde_json::from_str::<Vec<ChatMessage>>(&raw).unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable chat snapshot: {e}");
                Vec::new()
            }),
            None => Vec::new(),
        };
        let stored = messages.len();
        messages.retain(|m| !m.is_expired(now));
        let log = Self {
            local_id: local_id.into(),
            messages,
            typing: BTreeMap::new(),
            mirror,
        };
        if log.messages.len() != stored {
            log.persist();
        }
        log
    }

    fn persist(&self) {
        match serde_json::to_string(&self.messages) {
            Ok(json) => {
                self.mirror.store(KEY_CHAT, &json);
            }
            Err(e) => log::warn!("Could not serialize chat log: {e}"),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Append a message authored here and return the broadcast for it.
    ///
    /// A zero `ttl` means the message never expires.
    pub fn send(&mut self, text: impl Into<String>, ttl: Option<Duration>, now: u64) -> Message {
        let mut timestamp = now;
        let mut id = format!("{}-{timestamp}", self.local_id);
        while self.contains(&id) {
            timestamp += 1;
            id = format!("{}-{timestamp}", self.local_id);
        }
        let expires_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| timestamp.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)));

        let message = ChatMessage {
            id,
            user_id: self.local_id.clone(),
            text: text.into(),
            timestamp,
            expires_at,
        };
        self.messages.push(message.clone());
        Message::Chat(message)
    }

    /// Remove one of our own messages. Anyone else's is refused.
    pub fn delete(&mut self, message_id: &str) -> Option<Message> {
        let index = self
            .messages
            .iter()
            .position(|m| m.id == message_id && m.user_id == self.local_id)?;
        self.messages.remove(index);
        Some(Message::Delete(DeleteMessage {
            message_id: message_id.to_string(),
            user_id: self.local_id.clone(),
        }))
    }

    pub fn typing(&self, is_typing: bool, now: u64) -> Message {
        Message::Typing(TypingIndicator {
            user_id: self.local_id.clone(),
            is_typing,
            timestamp: now,
        })
    }

    /// Apply a peer envelope. Returns whether anything visible changed.
    pub fn apply(&mut self, envelope: &Envelope, now: u64) -> bool {
        if envelope.source == self.local_id {
            return false;
        }
        match &envelope.message {
            Message::Chat(message) => {
                if message.is_expired(now) {
                    log::debug!("dropping expired chat message {}", message.id);
                    return false;
                }
                if self.contains(&message.id) {
                    return false;
                }
                self.messages.push(message.clone());
                self.persist();
                true
            }
            Message::Delete(delete) => {
                let before = self.messages.len();
                self.messages.retain(|m| m.id != delete.message_id);
                self.persist();
                self.messages.len() != before
            }
            Message::Typing(indicator) => {
                // Keyed by the typist named in the payload, not the relay.
                if indicator.is_typing {
                    let previous = self.typing.insert(indicator.user_id.clone(), indicator.clone());
                    !matches!(previous, Some(p) if p.is_typing)
                } else {
                    self.typing.remove(&indicator.user_id).is_some()
                }
            }
            Message::ClearChat => {
                let changed = !self.messages.is_empty();
                self.messages.clear();
                self.mirror.clear(KEY_CHAT);
                changed
            }
            _ => false,
        }
    }

    /// Drop expired messages. Persists only if something was removed.
    pub fn sweep(&mut self, now: u64) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !m.is_expired(now));
        let removed = before - self.messages.len();
        if removed > 0 {
            self.persist();
        }
        removed
    }

    /// Clear the log and its storage, returning the `ClearChat` for peers.
    pub fn reset(&mut self) -> Message {
        self.messages.clear();
        self.mirror.clear(KEY_CHAT);
        Message::ClearChat
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Peers currently typing, never including this context.
    pub fn typing_users(&self) -> Vec<TypingIndicator> {
        self.typing
            .values()
            .filter(|t| t.is_typing && t.user_id != self.local_id)
            .cloned()
            .collect()
    }
}

// ───────────────────────────────────────────────────────────────────
// Live domain
// ───────────────────────────────────────────────────────────────────

/// Read model of the chat domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub messages: Vec<ChatMessage>,
    pub typing_users: Vec<TypingIndicator>,
}

/// Chat log wired to the `chat` channel, with its sweep and typing timers.
pub struct SharedChat {
    state: Arc<RwLock<ChatLog>>,
    endpoint: ChannelEndpoint,
    notifier: ChangeNotifier,
    typing_timeout: Duration,
    listener: TaskHandle,
    sweeper: TaskHandle,
    typing_clear: Mutex<TaskHandle>,
}

impl SharedChat {
    pub fn start(
        endpoint: ChannelEndpoint,
        local_id: &str,
        mirror: Mirror,
        notifier: ChangeNotifier,
        typing_timeout: Duration,
        sweep_interval: Duration,
    ) -> Self {
        let log = ChatLog::load(local_id, mirror, endpoint.now_ms());
        let state = Arc::new(RwLock::new(log));

        let listener = TaskHandle::spawn(Self::listen(
            endpoint.subscribe(),
            state.clone(),
            endpoint.clone(),
            notifier.clone(),
        ));

        let sweeper = {
            let state = state.clone();
            let endpoint = endpoint.clone();
            let notifier = notifier.clone();
            TaskHandle::every(sweep_interval, move || {
                let state = state.clone();
                let now = endpoint.now_ms();
                let notifier = notifier.clone();
                async move {
                    let removed = state.write().await.sweep(now);
                    if removed > 0 {
                        log::debug!("swept {removed} expired chat messages");
                        notifier.bump();
                    }
                }
            })
        };

        Self {
            state,
            endpoint,
            notifier,
            typing_timeout,
            listener,
            sweeper,
            typing_clear: Mutex::new(TaskHandle::idle()),
        }
    }

    async fn listen(
        mut inbound: Inbound,
        state: Arc<RwLock<ChatLog>>,
        endpoint: ChannelEndpoint,
        notifier: ChangeNotifier,
    ) {
        while let Some(envelope) = inbound.next().await {
            let now = endpoint.now_ms();
            if state.write().await.apply(&envelope, now) {
                notifier.bump();
            }
        }
        log::debug!("chat listener stopped: medium closed");
    }

    /// Append locally and broadcast. Returns the new message id.
    pub async fn send_message(&self, text: impl Into<String>, ttl: Option<Duration>) -> String {
        let now = self.endpoint.now_ms();
        let message = self.state.write().await.send(text, ttl, now);
        let id = match &message {
            Message::Chat(chat) => chat.id.clone(),
            _ => String::new(),
        };
        self.endpoint.post(message);
        self.notifier.bump();
        id
    }

    /// Delete one of our own messages. Returns false when refused.
    pub async fn delete_message(&self, message_id: &str) -> bool {
        let Some(message) = self.state.write().await.delete(message_id) else {
            log::debug!("refusing to delete {message_id}: not ours or absent");
            return false;
        };
        self.endpoint.post(message);
        self.notifier.bump();
        true
    }

    /// Broadcast typing state. `true` arms an auto-clear that posts `false`
    /// after the typing timeout unless another call supersedes it.
    pub async fn mark_typing(&self, is_typing: bool) {
        let message = self.state.read().await.typing(is_typing, self.endpoint.now_ms());
        self.endpoint.post(message);

        let Ok(mut slot) = self.typing_clear.lock() else {
            log::warn!("typing timer slot poisoned");
            return;
        };
        slot.cancel();
        if is_typing {
            let state = self.state.clone();
            let endpoint = self.endpoint.clone();
            *slot = TaskHandle::after(self.typing_timeout, async move {
                let message = state.read().await.typing(false, endpoint.now_ms());
                endpoint.post(message);
            });
        }
    }

    pub async fn reset(&self) {
        let message = self.state.write().await.reset();
        self.endpoint.post(message);
        self.notifier.bump();
    }

    pub async fn snapshot(&self) -> ChatSnapshot {
        let log = self.state.read().await;
        ChatSnapshot {
            messages: log.messages().to_vec(),
            typing_users: log.typing_users(),
        }
    }

    /// Whether an auto-clear is pending.
    pub fn typing_timer_armed(&self) -> bool {
        self.typing_clear.lock().is_ok_and(|slot| slot.is_armed())
    }

    pub fn shutdown(&mut self) {
        self.listener.cancel();
        self.sweeper.cancel();
        if let Ok(slot) = self.typing_clear.get_mut() {
            slot.cancel();
        }
    }
}
