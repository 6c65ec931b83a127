//! Broadcast medium: fire-and-forget fan-out per named channel.
//!
//! The core only depends on the [`BroadcastMedium`] trait. [`LocalHub`] is
//! the in-process implementation: one tokio broadcast channel per channel
//! name, shared by every context that holds the hub.
//!
//! ```text
//! Session A ──post──┐                      ┌──► Session A (self-echo, filtered)
//!                   ├── ChannelGroup ──────┼──► Session B
//! Session B ──post──┘   (+ TTL retention)  └──► Session C
//! ```
//!
//! Frames posted with a TTL are retained until they expire and replayed to
//! contexts that subscribe in the meantime.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::protocol::ChannelName;

/// Encoded envelope as it travels over the medium.
pub type Frame = Arc<Vec<u8>>;

/// A subscription to one channel.
pub struct Subscription {
    /// Still-live frames posted before the subscription existed.
    pub replay: Vec<Frame>,
    /// Frames posted from now on.
    pub receiver: broadcast::Receiver<Frame>,
}

/// Same-origin publish/subscribe transport.
///
/// Delivery is best-effort and unordered across senders. Implementations may
/// or may not echo a frame back to its sender; receivers filter by source.
pub trait BroadcastMedium: Send + Sync {
    /// Post a frame. Returns how many subscribers it reached (informational).
    fn post(&self, channel: ChannelName, frame: Frame, ttl: Option<Duration>) -> usize;

    fn subscribe(&self, channel: ChannelName) -> Subscription;
}

/// Statistics snapshot for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub frames_sent: u64,
    pub frames_replayed: u64,
    pub retained: usize,
    pub subscribers: usize,
}

struct Retained {
    frame: Frame,
    expires: Instant,
}

/// Fan-out group for a single channel.
struct ChannelGroup {
    sender: broadcast::Sender<Frame>,
    retained: Mutex<VecDeque<Retained>>,
    frames_sent: AtomicU64,
    frames_replayed: AtomicU64,
}

impl ChannelGroup {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            retained: Mutex::new(VecDeque::new()),
            frames_sent: AtomicU64::new(0),
            frames_replayed: AtomicU64::new(0),
        }
    }

    fn prune(retained: &mut VecDeque<Retained>, now: Instant) {
        retained.retain(|r| r.expires > now);
    }

    fn post(&self, frame: Frame, ttl: Option<Duration>) -> usize {
        // A retained frame is pushed and sent under one lock hold, so a
        // concurrent subscribe sees it in exactly one of replay or receiver.
        let _guard = ttl.map(|ttl| {
            let now = Instant::now();
            let mut retained = self.retained.lock().unwrap_or_else(|e| e.into_inner());
            Self::prune(&mut retained, now);
            retained.push_back(Retained {
                frame: frame.clone(),
                expires: now + ttl,
            });
            retained
        });
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.sender.send(frame).unwrap_or(0)
    }

    fn subscribe(&self) -> Subscription {
        let mut retained = self.retained.lock().unwrap_or_else(|e| e.into_inner());
        Self::prune(&mut retained, Instant::now());
        let receiver = self.sender.subscribe();
        let replay: Vec<Frame> = retained.iter().map(|r| r.frame.clone()).collect();
        self.frames_replayed
            .fetch_add(replay.len() as u64, Ordering::Relaxed);
        Subscription { replay, receiver }
    }

    fn stats(&self) -> HubStats {
        let mut retained = self.retained.lock().unwrap_or_else(|e| e.into_inner());
        Self::prune(&mut retained, Instant::now());
        HubStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_replayed: self.frames_replayed.load(Ordering::Relaxed),
            retained: retained.len(),
            subscribers: self.sender.receiver_count(),
        }
    }
}

/// In-process broadcast medium shared by all contexts of one profile.
///
/// Cheap to clone; clones share the same channels.
#[derive(Clone)]
pub struct LocalHub {
    groups: Arc<HashMap<ChannelName, ChannelGroup>>,
    capacity: usize,
}

impl LocalHub {
    /// Create a hub whose channels buffer up to `capacity` frames per
    /// receiver before lagging receivers start skipping.
    pub fn new(capacity: usize) -> Self {
        let groups = ChannelName::ALL
            .into_iter()
            .map(|name| (name, ChannelGroup::new(capacity)))
            .collect();
        Self {
            groups: Arc::new(groups),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self, channel: ChannelName) -> HubStats {
        self.group(channel).stats()
    }

    fn group(&self, channel: ChannelName) -> &ChannelGroup {
        // Every ChannelName is inserted in `new`.
        &self.groups[&channel]
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastMedium for LocalHub {
    fn post(&self, channel: ChannelName, frame: Frame, ttl: Option<Duration>) -> usize {
        self.group(channel).post(frame, ttl)
    }

    fn subscribe(&self, channel: ChannelName) -> Subscription {
        self.group(channel).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bytes: &[u8]) -> Frame {
        Arc::new(bytes.to_vec())
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let hub = LocalHub::new(16);
        let mut a = hub.subscribe(ChannelName::Chat);
        let mut b = hub.subscribe(ChannelName::Chat);

        let reached = hub.post(ChannelName::Chat, frame(&[1, 2, 3]), None);
        assert_eq!(reached, 2);

        assert_eq!(*a.receiver.recv().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(*b.receiver.recv().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let hub = LocalHub::new(16);
        let mut users = hub.subscribe(ChannelName::Users);
        hub.post(ChannelName::Counter, frame(&[9]), None);
        assert!(users.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_post_without_subscribers_is_not_an_error() {
        let hub = LocalHub::new(16);
        assert_eq!(hub.post(ChannelName::Users, frame(&[1]), None), 0);
        assert_eq!(hub.stats(ChannelName::Users).frames_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_frames_replayed_to_late_subscriber() {
        let hub = LocalHub::new(16);
        hub.post(ChannelName::Chat, frame(&[1]), Some(Duration::from_millis(250)));
        hub.post(ChannelName::Chat, frame(&[2]), None);

        let late = hub.subscribe(ChannelName::Chat);
        assert_eq!(late.replay.len(), 1);
        assert_eq!(*late.replay[0], vec![1]);

        tokio::time::advance(Duration::from_millis(251)).await;
        let later = hub.subscribe(ChannelName::Chat);
        assert!(later.replay.is_empty());

        let stats = hub.stats(ChannelName::Chat);
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.frames_replayed, 1);
        assert_eq!(stats.retained, 0);
        assert_eq!(stats.subscribers, 2);
    }

    #[test]
    fn test_concurrent_subscribe_sees_each_retained_frame_once() {
        const FRAMES: u32 = 500;
        let hub = LocalHub::new(1024);
        let poster = {
            let hub = hub.clone();
            std::thread::spawn(move || {
                for i in 0..FRAMES {
                    hub.post(
                        ChannelName::Chat,
                        frame(&i.to_le_bytes()),
                        Some(Duration::from_secs(60)),
                    );
                }
            })
        };

        let mut subscriptions = Vec::new();
        while !poster.is_finished() {
            subscriptions.push(hub.subscribe(ChannelName::Chat));
        }
        poster.join().unwrap();
        subscriptions.push(hub.subscribe(ChannelName::Chat));

        for mut subscription in subscriptions {
            let mut seen: Vec<Vec<u8>> = subscription.replay.iter().map(|f| f.to_vec()).collect();
            while let Ok(f) = subscription.receiver.try_recv() {
                seen.push(f.to_vec());
            }
            let expected: Vec<Vec<u8>> = (0..FRAMES).map(|i| i.to_le_bytes().to_vec()).collect();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn test_clones_share_channels() {
        let hub = LocalHub::default();
        let clone = hub.clone();
        let _sub = clone.subscribe(ChannelName::Counter);
        assert_eq!(hub.stats(ChannelName::Counter).subscribers, 1);
        assert_eq!(hub.capacity(), 256);
    }
}
