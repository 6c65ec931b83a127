//! Per-context view of one named channel.
//!
//! [`ChannelEndpoint`] stamps outgoing messages with the local identity and
//! the current time. [`Inbound`] turns raw frames back into validated
//! envelopes and drops anything malformed or self-originated, so reducers
//! only ever see well-formed envelopes from peers. Replayed envelopes whose
//! own TTL has lapsed on the local clock are dropped as well.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::clock::Clock;
use crate::medium::{BroadcastMedium, Frame};
use crate::protocol::{ChannelName, Envelope, Message};

#[derive(Clone)]
pub struct ChannelEndpoint {
    channel: ChannelName,
    source: String,
    medium: Arc<dyn BroadcastMedium>,
    clock: Arc<dyn Clock>,
    ttl: Option<Duration>,
}

impl ChannelEndpoint {
    pub fn new(
        channel: ChannelName,
        source: impl Into<String>,
        medium: Arc<dyn BroadcastMedium>,
        clock: Arc<dyn Clock>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            channel,
            source: source.into(),
            medium,
            clock,
            ttl,
        }
    }

    pub fn channel(&self) -> ChannelName {
        self.channel
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Wrap `message` in an envelope from this context, stamped now.
    pub fn envelope(&self, message: Message) -> Envelope {
        Envelope::new(
            self.source.clone(),
            self.clock.now_ms(),
            self.ttl
                .map(|ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
            message,
        )
    }

    /// Fire-and-forget send. Encoding failures are logged and dropped.
    pub fn post(&self, message: Message) {
        let envelope = self.envelope(message);
        match envelope.encode() {
            Ok(bytes) => {
                let reached = self.medium.post(self.channel, Arc::new(bytes), self.ttl);
                log::debug!(
                    "[{}] posted {} ({} receivers)",
                    self.channel.as_str(),
                    envelope.kind().as_str(),
                    reached
                );
            }
            Err(e) => log::warn!(
                "[{}] dropping outgoing {}: {e}",
                self.channel.as_str(),
                envelope.kind().as_str()
            ),
        }
    }

    pub fn subscribe(&self) -> Inbound {
        let subscription = self.medium.subscribe(self.channel);
        Inbound {
            channel: self.channel,
            own_id: self.source.clone(),
            clock: self.clock.clone(),
            replay: subscription.replay.into(),
            receiver: subscription.receiver,
        }
    }
}

/// Validated inbound envelopes from peers, in arrival order.
pub struct Inbound {
    channel: ChannelName,
    own_id: String,
    clock: Arc<dyn Clock>,
    replay: VecDeque<Frame>,
    receiver: broadcast::Receiver<Frame>,
}

impl Inbound {
    /// Next acceptable envelope, or `None` once the medium is gone.
    pub async fn next(&mut self) -> Option<Envelope> {
        loop {
            let (frame, replayed) = match self.replay.pop_front() {
                Some(frame) => (frame, true),
                None => match self.receiver.recv().await {
                    Ok(frame) => (frame, false),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("[{}] lagging, skipped {skipped} frames", self.channel.as_str());
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                },
            };
            let Some(envelope) = self.accept(&frame) else {
                continue;
            };
            if replayed && !envelope.is_live(self.clock.now_ms()) {
                log::debug!(
                    "[{}] skipping stale replayed {}",
                    self.channel.as_str(),
                    envelope.kind().as_str()
                );
                continue;
            }
            return Some(envelope);
        }
    }

    /// Decode and filter one frame.
    pub fn accept(&self, frame: &[u8]) -> Option<Envelope> {
        match Envelope::decode(frame) {
            Ok(envelope) if envelope.source == self.own_id => None,
            Ok(envelope) => Some(envelope),
            Err(e) => {
                log::warn!("[{}] dropping invalid envelope: {e}", self.channel.as_str());
                None
            }
        }
    }
}
