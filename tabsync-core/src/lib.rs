//! # tabsync-core: Serverless state sync between contexts of one profile
//!
//! Several independent contexts (tabs) share users, presence, a counter and a
//! chat log without a server. They talk only by broadcasting envelopes over a
//! per-channel medium and bootstrap from a shared durable mirror.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   users / counter / chat   ┌──────────────┐
//! │  Session A   │ ◄────────────────────────► │  Session B   │
//! │  (context)   │   BroadcastMedium frames   │  (context)   │
//! └──────┬───────┘                            └──────┬───────┘
//!        │  reducer per domain                       │
//!        ▼                                           ▼
//! ┌──────────────┐                            ┌──────────────┐
//! │ UserRegistry │                            │ UserRegistry │
//! │ Presence     │                            │ Presence     │
//! │ Counter      │                            │ Counter      │
//! │ ChatLog      │                            │ ChatLog      │
//! └──────┬───────┘                            └──────┬───────┘
//!        │           best-effort writes              │
//!        └──────────────► DurableMirror ◄────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Envelope kinds, payloads and the binary frame codec
//! - [`medium`]: Broadcast medium trait and the in-process [`LocalHub`]
//! - [`channel`]: Per-context channel endpoint with self-echo filtering
//! - [`mirror`]: Durable key/value mirror (memory or RocksDB)
//! - [`presence`]: Probe/reply liveness rounds
//! - [`users`]: User registry and live users domain
//! - [`counter`]: Last-write-wins shared counter
//! - [`chat`]: Chat log with expiry sweep and typing indicators
//! - [`session`]: Facade composing every domain for one context
//!
//! ## Consistency
//!
//! | Domain   | Merge rule                          | Persisted |
//! |----------|-------------------------------------|-----------|
//! | Users    | upsert by id, clear to presence set | yes       |
//! | Presence | replaced each round                 | no        |
//! | Counter  | last write wins on absolute value   | yes       |
//! | Chat     | dedup by id, expiry by `expiresAt`  | yes       |
//! | Typing   | last indicator per sender           | no        |

pub mod identity;
pub mod clock;
pub mod protocol;
pub mod medium;
pub mod channel;
pub mod mirror;
pub mod task;
pub mod notify;
pub mod config;
pub mod presence;
pub mod users;
pub mod counter;
pub mod chat;
pub mod session;

// Re-exports for convenience
pub use identity::Identity;
pub use clock::{Clock, SystemClock};
pub use protocol::{
    ChannelName, ChatMessage, CounterAction, CounterUpdate, DeleteMessage, Envelope, Message,
    MessageKind, ProtocolError, RawEnvelope, SayHello, TypingIndicator,
};
pub use medium::{BroadcastMedium, HubStats, LocalHub};
pub use channel::{ChannelEndpoint, Inbound};
pub use mirror::{DurableMirror, MemoryMirror, Mirror, MirrorError, RocksMirror, RocksMirrorConfig};
pub use task::TaskHandle;
pub use notify::ChangeNotifier;
pub use config::{load_config, parse_config, SessionConfig};
pub use presence::{PresencePhase, PresenceTracker};
pub use users::{SharedUsers, UserRegistry, UsersSnapshot};
pub use counter::{CounterReducer, CounterState, SharedCounter};
pub use chat::{ChatLog, ChatSnapshot, SharedChat};
pub use session::{Session, SessionSnapshot};
