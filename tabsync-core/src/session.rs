//! Session facade: one context's view of every domain.
//!
//! Composes users/presence, counter and chat into a single read model and a
//! flat set of actions. It holds no state of its own beyond the identity.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::channel::ChannelEndpoint;
use crate::chat::SharedChat;
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::counter::SharedCounter;
use crate::identity::{default_name, Identity};
use crate::medium::BroadcastMedium;
use crate::mirror::{DurableMirror, Mirror};
use crate::notify::ChangeNotifier;
use crate::protocol::{ChannelName, ChatMessage, TypingIndicator};
use crate::users::SharedUsers;

/// Everything a presentation layer needs to render one context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub current_user: Identity,
    /// Presence set, including the local id
    pub active_ids: Vec<String>,
    /// Live identities, local first
    pub active_users: Vec<Identity>,
    /// Every identity the registry knows
    pub users: BTreeMap<String, Identity>,
    pub count: i64,
    pub last_modified_by: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Peers currently typing (never the local context)
    pub typing_users: Vec<TypingIndicator>,
}

impl SessionSnapshot {
    /// "You" for the local identity, the registered name when known,
    /// otherwise a name derived from the id.
    pub fn display_name(&self, user_id: &str) -> String {
        if user_id == self.current_user.id {
            return "You".to_string();
        }
        match self.users.get(user_id) {
            Some(user) => user.name.clone(),
            None => default_name(user_id),
        }
    }
}

/// One context sharing the profile.
pub struct Session {
    /// Our identity, fixed for the session's lifetime
    identity: Identity,

    /// Registry and presence on the `users` channel
    users: SharedUsers,

    /// Shared counter on the `counter` channel
    counter: SharedCounter,

    /// Chat log on the `chat` channel
    chat: SharedChat,

    /// Revision bumped by every domain on change
    notifier: ChangeNotifier,
}

impl Session {
    /// Start a context with the wall clock.
    pub fn start(
        identity: Identity,
        medium: Arc<dyn BroadcastMedium>,
        mirror: Arc<dyn DurableMirror>,
        config: SessionConfig,
    ) -> Self {
        Self::start_with_clock(identity, medium, mirror, Arc::new(SystemClock::new()), config)
    }

    /// Start a context with an explicit clock.
    ///
    /// Must be called inside a Tokio runtime: every domain spawns its
    /// listener and timers immediately.
    pub fn start_with_clock(
        identity: Identity,
        medium: Arc<dyn BroadcastMedium>,
        mirror: Arc<dyn DurableMirror>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        let mirror = Mirror::new(mirror);
        let notifier = ChangeNotifier::new();
        let endpoint = |channel| {
            ChannelEndpoint::new(
                channel,
                identity.id.clone(),
                medium.clone(),
                clock.clone(),
                config.envelope_ttl,
            )
        };

        let counter = SharedCounter::start(
            endpoint(ChannelName::Counter),
            &identity.id,
            mirror.clone(),
            notifier.clone(),
        );
        let chat = SharedChat::start(
            endpoint(ChannelName::Chat),
            &identity.id,
            mirror.clone(),
            notifier.clone(),
            config.typing_timeout,
            config.sweep_interval,
        );
        let users = SharedUsers::start(
            identity.clone(),
            endpoint(ChannelName::Users),
            mirror,
            notifier.clone(),
            config.presence_interval,
            config.probe_window,
        );

        log::info!("Session {} started ({})", identity.id, identity.name);
        Self {
            identity,
            users,
            counter,
            chat,
            notifier,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    // ── counter ──────────────────────────────────────────────────

    pub async fn increment(&self) {
        self.counter.increment().await;
    }

    pub async fn decrement(&self) {
        self.counter.decrement().await;
    }

    pub async fn reset_counter(&self) {
        self.counter.reset().await;
    }

    // ── chat ─────────────────────────────────────────────────────

    /// Send a chat message, optionally expiring after `ttl` (any length,
    /// including under a minute). Returns the new message id.
    pub async fn send_message(&self, text: impl Into<String>, ttl: Option<Duration>) -> String {
        self.chat.send_message(text, ttl).await
    }

    /// Delete one of our own messages. Returns false when refused.
    pub async fn delete_message(&self, message_id: &str) -> bool {
        self.chat.delete_message(message_id).await
    }

    pub async fn mark_typing(&self, is_typing: bool) {
        self.chat.mark_typing(is_typing).await;
    }

    pub async fn reset_chat(&self) {
        self.chat.reset().await;
    }

    // ── users ────────────────────────────────────────────────────

    pub async fn reset_users(&self) {
        self.users.reset().await;
    }

    /// Clear users, chat and counter in one action.
    pub async fn reset_all(&self) {
        self.users.reset().await;
        self.chat.reset().await;
        self.counter.reset().await;
    }

    // ── read model ───────────────────────────────────────────────

    pub async fn snapshot(&self) -> SessionSnapshot {
        let users = self.users.snapshot().await;
        let counter = self.counter.snapshot().await;
        let chat = self.chat.snapshot().await;
        SessionSnapshot {
            current_user: self.identity.clone(),
            active_ids: users.active_ids,
            active_users: users.active_users,
            users: users.users,
            count: counter.value,
            last_modified_by: counter.last_modified_by,
            messages: chat.messages,
            typing_users: chat.typing_users,
        }
    }

    /// Observe state changes. Dropping the receiver unsubscribes.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.notifier.subscribe()
    }

    /// Whether a typing auto-clear is pending.
    pub fn typing_timer_armed(&self) -> bool {
        self.chat.typing_timer_armed()
    }

    /// Disarm every listener and timer. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        self.disarm();
        log::info!("Session {} stopped", self.identity.id);
    }

    fn disarm(&mut self) {
        self.users.shutdown();
        self.chat.shutdown();
        self.counter.shutdown();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disarm();
    }
}
