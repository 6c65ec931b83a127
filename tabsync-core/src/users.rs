//! User registry: every identity seen on the profile, and the live subset.
//!
//! Identities arrive through `SayHello` broadcasts and are mirrored under the
//! `users` key. The registry only shrinks through a clear, which reduces it
//! to the contexts the presence tracker currently considers live. The local
//! identity is always present and always wins over a stored entry with the
//! same id.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::channel::{ChannelEndpoint, Inbound};
use crate::identity::Identity;
use crate::mirror::{Mirror, KEY_USERS};
use crate::notify::ChangeNotifier;
use crate::presence::PresenceTracker;
use crate::protocol::{Envelope, Message, SayHello};
use crate::task::TaskHandle;

// ───────────────────────────────────────────────────────────────────
// Reducer
// ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct UserRegistry {
    identity: Identity,
    users: BTreeMap<String, Identity>,
    mirror: Mirror,
}

impl UserRegistry {
    /// Restore from the mirror and overlay the local identity.
    pub fn load(identity: Identity, mirror: Mirror) -> Self {
        let mut users = match mirror.load(KEY_USERS) {
            Some(raw) => serde_json::from_str::<BTreeMap<String, Identity>>(&raw).unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable user snapshot: {e}");
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };
        users.insert(identity.id.clone(), identity.clone());

        let registry = Self {
            identity,
            users,
            mirror,
        };
        registry.persist();
        registry
    }

    fn persist(&self) {
        match serde_json::to_string(&self.users) {
            Ok(json) => {
                self.mirror.store(KEY_USERS, &json);
            }
            Err(e) => log::warn!("Could not serialize users: {e}"),
        }
    }

    /// The `SayHello` this context broadcasts once at startup.
    pub fn announce(&self) -> Message {
        Message::Hello(SayHello {
            user: self.identity.clone(),
        })
    }

    /// Apply a peer envelope. Returns whether the registry changed.
    pub fn apply(&mut self, envelope: &Envelope, live: &BTreeSet<String>) -> bool {
        if envelope.source == self.identity.id {
            return false;
        }
        match &envelope.message {
            Message::Hello(hello) => self.upsert(hello.user.clone()),
            Message::ClearUsers => {
                let changed = self.retain_live(live);
                self.persist();
                changed
            }
            _ => false,
        }
    }

    fn upsert(&mut self, user: Identity) -> bool {
        if user.id == self.identity.id {
            return false;
        }
        if self.users.get(&user.id) == Some(&user) {
            return false;
        }
        self.users.insert(user.id.clone(), user);
        self.persist();
        true
    }

    /// Drop every identity that is not live. The local one always stays.
    pub fn retain_live(&mut self, live: &BTreeSet<String>) -> bool {
        let own = &self.identity.id;
        let before = self.users.len();
        self.users.retain(|id, _| id == own || live.contains(id));
        self.users.len() != before
    }

    /// Reduce locally and return the `ClearUsers` peers should apply.
    pub fn reset(&mut self, live: &BTreeSet<String>) -> Message {
        self.retain_live(live);
        self.persist();
        Message::ClearUsers
    }

    /// Live identities, local first, each once.
    pub fn active_users(&self, live: &BTreeSet<String>) -> Vec<Identity> {
        let own = &self.identity.id;
        std::iter::once(self.identity.clone())
            .chain(
                live.iter()
                    .filter(|id| *id != own)
                    .filter_map(|id| self.users.get(id).cloned()),
            )
            .collect()
    }

    pub fn users(&self) -> &BTreeMap<String, Identity> {
        &self.users
    }

    pub fn get(&self, id: &str) -> Option<&Identity> {
        self.users.get(id)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

// ───────────────────────────────────────────────────────────────────
// Live domain
// ───────────────────────────────────────────────────────────────────

struct UsersState {
    registry: UserRegistry,
    presence: PresenceTracker,
}

/// Read model of the users domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsersSnapshot {
    pub active_ids: Vec<String>,
    pub active_users: Vec<Identity>,
    pub users: BTreeMap<String, Identity>,
}

/// Registry plus presence, wired to the `users` channel.
pub struct SharedUsers {
    state: Arc<RwLock<UsersState>>,
    endpoint: ChannelEndpoint,
    notifier: ChangeNotifier,
    listener: TaskHandle,
    cadence: TaskHandle,
}

impl SharedUsers {
    /// Restore, start listening, announce, and start presence rounds.
    pub fn start(
        identity: Identity,
        endpoint: ChannelEndpoint,
        mirror: Mirror,
        notifier: ChangeNotifier,
        presence_interval: Duration,
        probe_window: Duration,
    ) -> Self {
        let presence = PresenceTracker::new(identity.id.clone());
        let registry = UserRegistry::load(identity, mirror);
        let announce = registry.announce();
        let state = Arc::new(RwLock::new(UsersState { registry, presence }));

        let inbound = endpoint.subscribe();
        let listener = TaskHandle::spawn(Self::listen(
            inbound,
            state.clone(),
            endpoint.clone(),
            notifier.clone(),
        ));
        endpoint.post(announce);

        let cadence = {
            let state = state.clone();
            let endpoint = endpoint.clone();
            let notifier = notifier.clone();
            TaskHandle::every(presence_interval, move || {
                Self::presence_round(state.clone(), endpoint.clone(), notifier.clone(), probe_window)
            })
        };

        Self {
            state,
            endpoint,
            notifier,
            listener,
            cadence,
        }
    }

    async fn listen(
        mut inbound: Inbound,
        state: Arc<RwLock<UsersState>>,
        endpoint: ChannelEndpoint,
        notifier: ChangeNotifier,
    ) {
        while let Some(envelope) = inbound.next().await {
            let mut s = state.write().await;
            if let Some(reply) = s.presence.reply_to(&envelope) {
                endpoint.post(reply);
                continue;
            }
            if s.presence.record_reply(&envelope) {
                continue;
            }
            let live = s.presence.live().clone();
            if s.registry.apply(&envelope, &live) {
                notifier.bump();
            }
        }
        log::debug!("users listener stopped: medium closed");
    }

    async fn presence_round(
        state: Arc<RwLock<UsersState>>,
        endpoint: ChannelEndpoint,
        notifier: ChangeNotifier,
        window: Duration,
    ) {
        let (round, probe) = state.write().await.presence.begin_round();
        endpoint.post(probe);
        tokio::time::sleep(window).await;
        if state.write().await.presence.finish_round(round) {
            notifier.bump();
        }
    }

    /// Reduce to the live set and ask peers to do the same.
    pub async fn reset(&self) {
        let message = {
            let mut s = self.state.write().await;
            let live = s.presence.live().clone();
            s.registry.reset(&live)
        };
        self.endpoint.post(message);
        self.notifier.bump();
    }

    pub async fn snapshot(&self) -> UsersSnapshot {
        let s = self.state.read().await;
        let live = s.presence.live();
        UsersSnapshot {
            active_ids: live.iter().cloned().collect(),
            active_users: s.registry.active_users(live),
            users: s.registry.users().clone(),
        }
    }

    /// Stop presence rounds and the listener. An open window is abandoned.
    pub fn shutdown(&mut self) {
        self.cadence.cancel();
        self.listener.cancel();
        if let Ok(mut s) = self.state.try_write() {
            s.presence.cancel();
        }
    }
}

impl Drop for SharedUsers {
    fn drop(&mut self) {
        self.shutdown();
    }
}
