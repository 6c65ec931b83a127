//! Presence tracking: which contexts are live right now.
//!
//! Heartbeat-style, not leader election. Each round the tracker probes the
//! `users` channel and collects replies for a bounded window:
//!
//! ```text
//!        begin_round()                      finish_round(round)
//! IDLE ─────────────────► COLLECTING ──────────────────────────► IDLE
//!   ▲   PresenceProbe{n}      │  record_reply(PresenceReply{to: me, n})
//!   │                         │  (dedup by source)
//!   └──────── cancel() ◄──────┘
//! ```
//!
//! When a round finishes, its candidates plus the local id replace the live
//! set in one step. A peer that misses a round simply looks absent until
//! the next successful one.

use std::collections::BTreeSet;

use crate::protocol::{Envelope, Message, PresenceProbe, PresenceReply};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresencePhase {
    Idle,
    Collecting {
        round: u64,
        candidates: BTreeSet<String>,
    },
}

#[derive(Debug, Clone)]
pub struct PresenceTracker {
    local_id: String,
    live: BTreeSet<String>,
    phase: PresencePhase,
    next_round: u64,
}

impl PresenceTracker {
    /// Start with only the local context live.
    pub fn new(local_id: impl Into<String>) -> Self {
        let local_id = local_id.into();
        Self {
            live: BTreeSet::from([local_id.clone()]),
            local_id,
            phase: PresencePhase::Idle,
            next_round: 1,
        }
    }

    /// Open a collection window. Returns the round id and the probe to post.
    ///
    /// A round still collecting is abandoned without touching the live set.
    pub fn begin_round(&mut self) -> (u64, Message) {
        let round = self.next_round;
        self.next_round += 1;
        self.phase = PresencePhase::Collecting {
            round,
            candidates: BTreeSet::new(),
        };
        (round, Message::Probe(PresenceProbe { round }))
    }

    /// Record a reply to the current round. Returns whether it was new.
    pub fn record_reply(&mut self, envelope: &Envelope) -> bool {
        let Message::Reply(reply) = &envelope.message else {
            return false;
        };
        if reply.to != self.local_id || envelope.source == self.local_id {
            return false;
        }
        match &mut self.phase {
            PresencePhase::Collecting { round, candidates } if *round == reply.round => {
                candidates.insert(envelope.source.clone())
            }
            _ => false,
        }
    }

    /// Close the window for `round` and publish its candidates.
    ///
    /// Returns whether the live set changed. A stale round id is ignored.
    pub fn finish_round(&mut self, round: u64) -> bool {
        let candidates = match &mut self.phase {
            PresencePhase::Collecting {
                round: current,
                candidates,
            } if *current == round => std::mem::take(candidates),
            _ => return false,
        };
        self.phase = PresencePhase::Idle;

        let mut live = candidates;
        live.insert(self.local_id.clone());
        let changed = live != self.live;
        if changed {
            log::debug!("Presence round {round}: {} live", live.len());
        }
        self.live = live;
        changed
    }

    /// Abandon any open window. The live set is left as it was.
    pub fn cancel(&mut self) {
        self.phase = PresencePhase::Idle;
    }

    /// The reply owed to a peer's probe, if `envelope` is one.
    pub fn reply_to(&self, envelope: &Envelope) -> Option<Message> {
        match &envelope.message {
            Message::Probe(probe) if envelope.source != self.local_id => {
                Some(Message::Reply(PresenceReply {
                    to: envelope.source.clone(),
                    round: probe.round,
                }))
            }
            _ => None,
        }
    }

    pub fn live(&self) -> &BTreeSet<String> {
        &self.live
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.live.contains(id)
    }

    pub fn phase(&self) -> &PresencePhase {
        &self.phase
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }
}
