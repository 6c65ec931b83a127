//! Envelope protocol shared by every channel.
//!
//! Wire format (bincode-encoded raw envelope, JSON payload):
//! ```text
//! ┌──────────┬──────────┬───────────┬──────────┬──────────────────────┐
//! │ kind     │ source   │ timestamp │ ttl?     │ payload              │
//! │ string   │ string   │ u64 (ms)  │ u64 (ms) │ JSON text, per kind  │
//! └──────────┴──────────┴───────────┴──────────┴──────────────────────┘
//! ```
//!
//! A [`RawEnvelope`] is whatever came off the medium. It only becomes an
//! [`Envelope`] once [`RawEnvelope::validate`] has checked the payload
//! against the shape its `kind` declares.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::Identity;

/// Named channels on the broadcast medium, one per domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelName {
    Users,
    Counter,
    Chat,
}

impl ChannelName {
    pub const ALL: [ChannelName; 3] = [ChannelName::Users, ChannelName::Counter, ChannelName::Chat];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelName::Users => "users",
            ChannelName::Counter => "counter",
            ChannelName::Chat => "chat",
        }
    }
}

/// Envelope kinds and their wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    SayHello,
    CounterUpdate,
    ChatMessage,
    DeleteMessage,
    TypingIndicator,
    ClearChat,
    ClearUsers,
    ClearCounter,
    /// Liveness request, answered by every live context on `users`.
    PresenceProbe,
    /// Liveness answer addressed to the prober.
    PresenceReply,
}

impl MessageKind {
    pub const ALL: [MessageKind; 10] = [
        MessageKind::SayHello,
        MessageKind::CounterUpdate,
        MessageKind::ChatMessage,
        MessageKind::DeleteMessage,
        MessageKind::TypingIndicator,
        MessageKind::ClearChat,
        MessageKind::ClearUsers,
        MessageKind::ClearCounter,
        MessageKind::PresenceProbe,
        MessageKind::PresenceReply,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::SayHello => "say-hello",
            MessageKind::CounterUpdate => "counter-update",
            MessageKind::ChatMessage => "chat-message",
            MessageKind::DeleteMessage => "delete-message",
            MessageKind::TypingIndicator => "typing-indicator",
            MessageKind::ClearChat => "clear-chat",
            MessageKind::ClearUsers => "clear-users",
            MessageKind::ClearCounter => "clear-counter",
            MessageKind::PresenceProbe => "presence-probe",
            MessageKind::PresenceReply => "presence-reply",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

// ───────────────────────────────────────────────────────────────────
// Payloads
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SayHello {
    pub user: Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterAction {
    Increment,
    Decrement,
    Set,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterUpdate {
    pub user_id: String,
    pub action: CounterAction,
    /// Absolute value after the action. Receivers adopt this, not the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
}

/// One chat log entry. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    pub text: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl ChatMessage {
    /// A message whose expiry is at or before `now` is no longer in the log.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessage {
    pub message_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub user_id: String,
    pub is_typing: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceProbe {
    pub round: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceReply {
    /// Id of the context that sent the probe.
    pub to: String,
    pub round: u64,
}

/// Validated, typed payload of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(SayHello),
    Counter(CounterUpdate),
    Chat(ChatMessage),
    Delete(DeleteMessage),
    Typing(TypingIndicator),
    ClearChat,
    ClearUsers,
    ClearCounter,
    Probe(PresenceProbe),
    Reply(PresenceReply),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Hello(_) => MessageKind::SayHello,
            Message::Counter(_) => MessageKind::CounterUpdate,
            Message::Chat(_) => MessageKind::ChatMessage,
            Message::Delete(_) => MessageKind::DeleteMessage,
            Message::Typing(_) => MessageKind::TypingIndicator,
            Message::ClearChat => MessageKind::ClearChat,
            Message::ClearUsers => MessageKind::ClearUsers,
            Message::ClearCounter => MessageKind::ClearCounter,
            Message::Probe(_) => MessageKind::PresenceProbe,
            Message::Reply(_) => MessageKind::PresenceReply,
        }
    }

    fn payload_json(&self) -> Result<String, ProtocolError> {
        let json = match self {
            Message::Hello(p) => serde_json::to_string(p),
            Message::Counter(p) => serde_json::to_string(p),
            Message::Chat(p) => serde_json::to_string(p),
            Message::Delete(p) => serde_json::to_string(p),
            Message::Typing(p) => serde_json::to_string(p),
            Message::Probe(p) => serde_json::to_string(p),
            Message::Reply(p) => serde_json::to_string(p),
            Message::ClearUsers => Ok("null".to_string()),
            Message::ClearChat | Message::ClearCounter => Ok("{}".to_string()),
        };
        json.map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    fn from_payload(kind: MessageKind, payload: &str) -> Result<Self, ProtocolError> {
        Ok(match kind {
            MessageKind::SayHello => Message::Hello(parse_payload(kind, payload)?),
            MessageKind::CounterUpdate => Message::Counter(parse_payload(kind, payload)?),
            MessageKind::ChatMessage => Message::Chat(parse_payload(kind, payload)?),
            MessageKind::DeleteMessage => Message::Delete(parse_payload(kind, payload)?),
            MessageKind::TypingIndicator => Message::Typing(parse_payload(kind, payload)?),
            MessageKind::PresenceProbe => Message::Probe(parse_payload(kind, payload)?),
            MessageKind::PresenceReply => Message::Reply(parse_payload(kind, payload)?),
            MessageKind::ClearChat => {
                parse_empty(kind, payload)?;
                Message::ClearChat
            }
            MessageKind::ClearUsers => {
                parse_empty(kind, payload)?;
                Message::ClearUsers
            }
            MessageKind::ClearCounter => {
                parse_empty(kind, payload)?;
                Message::ClearCounter
            }
        })
    }
}

fn parse_payload<T: DeserializeOwned>(kind: MessageKind, payload: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(payload).map_err(|e| ProtocolError::InvalidPayload {
        kind: kind.as_str(),
        reason: e.to_string(),
    })
}

/// Clear kinds carry `{}` or `null`.
fn parse_empty(kind: MessageKind, payload: &str) -> Result<(), ProtocolError> {
    match parse_payload::<serde_json::Value>(kind, payload)? {
        serde_json::Value::Null | serde_json::Value::Object(_) => Ok(()),
        other => Err(ProtocolError::InvalidPayload {
            kind: kind.as_str(),
            reason: format!("expected {{}} or null, got {other}"),
        }),
    }
}

// ───────────────────────────────────────────────────────────────────
// Envelopes
// ───────────────────────────────────────────────────────────────────

/// Envelope exactly as carried on the medium, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub kind: String,
    pub source: String,
    pub timestamp: u64,
    pub ttl: Option<u64>,
    pub payload: String,
}

impl RawEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (raw, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
        Ok(raw)
    }

    /// Check the payload against the shape declared by `kind`.
    pub fn validate(self) -> Result<Envelope, ProtocolError> {
        let kind = MessageKind::from_wire(&self.kind)
            .ok_or_else(|| ProtocolError::UnknownKind(self.kind.clone()))?;
        if self.source.is_empty() {
            return Err(ProtocolError::MissingSource);
        }
        let message = Message::from_payload(kind, &self.payload)?;
        Ok(Envelope {
            source: self.source,
            timestamp: self.timestamp,
            ttl: self.ttl,
            message,
        })
    }
}

/// A validated envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Identity id of the sending context.
    pub source: String,
    /// Send time in milliseconds since the epoch.
    pub timestamp: u64,
    /// How long the envelope stays live for late subscribers, in ms.
    pub ttl: Option<u64>,
    pub message: Message,
}

impl Envelope {
    pub fn new(source: impl Into<String>, timestamp: u64, ttl: Option<u64>, message: Message) -> Self {
        Self {
            source: source.into(),
            timestamp,
            ttl,
            message,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    pub fn to_raw(&self) -> Result<RawEnvelope, ProtocolError> {
        Ok(RawEnvelope {
            kind: self.kind().as_str().to_string(),
            source: self.source.clone(),
            timestamp: self.timestamp,
            ttl: self.ttl,
            payload: self.message.payload_json()?,
        })
    }

    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        self.to_raw()?.encode()
    }

    /// Decode and validate a frame from the wire.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        RawEnvelope::decode(bytes)?.validate()
    }

    /// Instant after which the envelope is no longer authoritative.
    pub fn expires_at(&self) -> Option<u64> {
        self.ttl.map(|ttl| self.timestamp.saturating_add(ttl))
    }

    pub fn is_live(&self, now: u64) -> bool {
        !self.expires_at().is_some_and(|at| now >= at)
    }
}

/// Protocol errors. None of these are fatal to a receiver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Unknown message kind: {0}")]
    UnknownKind(String),
    #[error("Envelope has no source")]
    MissingSource,
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: &str, payload: &str) -> RawEnvelope {
        RawEnvelope {
            kind: kind.to_string(),
            source: "peer-a".to_string(),
            timestamp: 1_000,
            ttl: Some(250),
            payload: payload.to_string(),
        }
    }

    #[test]
    fn test_chat_envelope_survives_the_wire() {
        let msg = ChatMessage {
            id: "peer-a-1000".into(),
            user_id: "peer-a".into(),
            text: "hi".into(),
            timestamp: 1_000,
            expires_at: Some(61_000),
        };
        let envelope = Envelope::new("peer-a", 1_000, Some(250), Message::Chat(msg));

        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.kind(), MessageKind::ChatMessage);
    }

    #[test]
    fn test_payload_uses_camel_case_and_omits_missing_expiry() {
        let msg = Message::Chat(ChatMessage {
            id: "x".into(),
            user_id: "u".into(),
            text: "t".into(),
            timestamp: 5,
            expires_at: None,
        });
        let json = msg.payload_json().unwrap();
        assert_eq!(json, r#"{"id":"x","userId":"u","text":"t","timestamp":5}"#);
    }

    #[test]
    fn test_counter_update_validation() {
        let ok = raw("counter-update", r#"{"userId":"peer-a","action":"set","count":0}"#)
            .validate()
            .unwrap();
        assert_eq!(
            ok.message,
            Message::Counter(CounterUpdate {
                user_id: "peer-a".into(),
                action: CounterAction::Set,
                count: Some(0),
            })
        );

        let no_count = raw("counter-update", r#"{"userId":"peer-a","action":"increment"}"#)
            .validate()
            .unwrap();
        assert!(matches!(no_count.message, Message::Counter(CounterUpdate { count: None, .. })));

        let fractional = raw("counter-update", r#"{"userId":"peer-a","action":"increment","count":1.5}"#);
        assert!(matches!(
            fractional.validate(),
            Err(ProtocolError::InvalidPayload { kind: "counter-update", .. })
        ));

        let bad_action = raw("counter-update", r#"{"userId":"peer-a","action":"double","count":2}"#);
        assert!(bad_action.validate().is_err());
    }

    #[test]
    fn test_clear_payloads_accept_empty_object_or_null() {
        assert_eq!(raw("clear-chat", "{}").validate().unwrap().message, Message::ClearChat);
        assert_eq!(raw("clear-users", "null").validate().unwrap().message, Message::ClearUsers);
        assert_eq!(raw("clear-counter", "{}").validate().unwrap().message, Message::ClearCounter);
        assert!(raw("clear-chat", "[]").validate().is_err());
        assert!(raw("clear-users", "not json").validate().is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert_eq!(
            raw("theme-update", "{}").validate(),
            Err(ProtocolError::UnknownKind("theme-update".into()))
        );
    }

    #[test]
    fn test_missing_source_rejected() {
        let mut envelope = raw("clear-chat", "{}");
        envelope.source.clear();
        assert_eq!(envelope.validate(), Err(ProtocolError::MissingSource));
    }

    #[test]
    fn test_wrong_shape_for_kind_rejected() {
        // A typing payload declared as a chat message.
        let envelope = raw("chat-message", r#"{"userId":"a","isTyping":true,"timestamp":1}"#);
        assert!(matches!(
            envelope.validate(),
            Err(ProtocolError::InvalidPayload { kind: "chat-message", .. })
        ));
    }

    #[test]
    fn test_decode_garbage_bytes() {
        assert!(matches!(
            Envelope::decode(&[0xFF, 0xFE, 0xFD]),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(Envelope::decode(&[]).is_err());
    }

    #[test]
    fn test_kind_wire_names_are_unique() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::from_wire("say-hello"), Some(MessageKind::SayHello));
        assert_eq!(MessageKind::from_wire("SayHello"), None);
    }

    #[test]
    fn test_envelope_liveness_window() {
        let envelope = Envelope::new("a", 1_000, Some(250), Message::ClearChat);
        assert_eq!(envelope.expires_at(), Some(1_250));
        assert!(envelope.is_live(1_249));
        assert!(!envelope.is_live(1_250));

        let forever = Envelope::new("a", 1_000, None, Message::ClearChat);
        assert!(forever.is_live(u64::MAX));
    }

    #[test]
    fn test_chat_message_expiry_boundary() {
        let msg = ChatMessage {
            id: "m".into(),
            user_id: "u".into(),
            text: "t".into(),
            timestamp: 0,
            expires_at: Some(100),
        };
        assert!(!msg.is_expired(99));
        assert!(msg.is_expired(100));
    }
}
