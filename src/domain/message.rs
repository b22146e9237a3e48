//! The message envelope carried through every hub path.
//!
//! A [`Message`] is what business services hand to the hub, what goes over
//! the broker, and what a WebSocket client receives. The hub never looks
//! inside `data`; only the reserved `ping`/`pong` types are interpreted.
//!
//! Wire format:
//!
//! ```json
//! {
//!   "type": "nudge",
//!   "user_id": "6f1c...",
//!   "data": { "id": "n1" },
//!   "timestamp": "2026-01-01T12:00:00Z"
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{InstanceId, UserId};

/// Opaque structured payload of a message.
pub type Payload = serde_json::Map<String, Value>;

/// Hub message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Application tag, e.g. `"nudge"`. Opaque to the hub apart from
    /// `"ping"`/`"pong"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Recipient user. `None` (or the nil UUID) means global broadcast.
    #[serde(rename = "user_id", default, skip_serializing_if = "Option::is_none")]
    pub target_user: Option<UserId>,

    /// Application payload.
    #[serde(default)]
    pub data: Payload,

    /// Creation time, RFC 3339 on the wire.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Hub instance that published this message to the broker. Only ever
    /// set on broker traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<InstanceId>,
}

impl Message {
    /// Builds a message stamped with the current time.
    #[must_use]
    pub fn new(kind: impl Into<String>, target_user: Option<UserId>, data: Payload) -> Self {
        Self {
            kind: kind.into(),
            target_user,
            data,
            timestamp: Utc::now(),
            origin: None,
        }
    }

    /// Builds the keepalive reply sent in answer to a client `ping`.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(EventKind::Pong.as_str(), None, Payload::new())
    }

    /// Effective recipient: `None` for a global broadcast.
    #[must_use]
    pub fn target(&self) -> Option<UserId> {
        self.target_user.filter(|user| !user.is_nil())
    }

    /// Returns `true` if this is a client keepalive ping.
    #[must_use]
    pub fn is_ping(&self) -> bool {
        self.kind == EventKind::Ping.as_str()
    }
}

/// A message serialized once and shared by every recipient.
///
/// Cloning a `Frame` is two reference-count bumps, so fan-out to many
/// clients never re-serializes or copies the JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: Arc<str>,
    json: Arc<str>,
}

impl Frame {
    /// Serializes a message into a frame.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] if the payload cannot be encoded.
    pub fn encode(message: &Message) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(message)?;
        Ok(Self {
            kind: Arc::from(message.kind.as_str()),
            json: Arc::from(json),
        })
    }

    /// The message type, used as the SSE event name.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The serialized JSON envelope.
    #[must_use]
    pub fn json(&self) -> &str {
        &self.json
    }
}

/// Message types known to the surrounding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A nudge was generated for the user.
    Nudge,
    /// An interaction was logged.
    Interaction,
    /// A tracked person changed.
    PersonUpdate,
    /// A reflection became available.
    Reflection,
    /// Streak counters changed.
    StreakUpdate,
    /// A relationship health score was recomputed.
    HealthScore,
    /// Generic user notification.
    Notification,
    /// Client keepalive ping.
    Ping,
    /// Reply to [`EventKind::Ping`].
    Pong,
}

impl EventKind {
    /// Wire tag for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nudge => "nudge",
            Self::Interaction => "interaction",
            Self::PersonUpdate => "person_update",
            Self::Reflection => "reflection",
            Self::StreakUpdate => "streak_update",
            Self::HealthScore => "health_score",
            Self::Notification => "notification",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed events for call sites that originate broadcasts.
///
/// Converted into an opaque `(type, data)` pair by
/// [`HubEvent::into_parts`] before it enters the hub.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// A nudge was created.
    Nudge {
        /// Nudge identifier.
        id: uuid::Uuid,
        /// Short headline.
        title: String,
        /// Body text.
        message: String,
        /// `high`, `medium` or `low`.
        priority: String,
        /// Person the nudge is about, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        person_id: Option<uuid::Uuid>,
    },
    /// An interaction was recorded.
    Interaction {
        /// Interaction identifier.
        id: uuid::Uuid,
        /// Person the interaction was with.
        person_id: uuid::Uuid,
    },
    /// A person record changed.
    PersonUpdate {
        /// Person identifier.
        person_id: uuid::Uuid,
    },
    /// A reflection is ready.
    Reflection {
        /// Reflection identifier.
        id: uuid::Uuid,
    },
    /// Streak counters changed.
    StreakUpdate {
        /// Current streak in days.
        current: u32,
        /// Longest streak in days.
        longest: u32,
    },
    /// A health score was recomputed.
    HealthScore {
        /// Person the score belongs to.
        person_id: uuid::Uuid,
        /// New score.
        score: f64,
    },
    /// Generic notification.
    Notification {
        /// Headline.
        title: String,
        /// Body text.
        body: String,
    },
}

impl HubEvent {
    /// The wire tag of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Nudge { .. } => EventKind::Nudge,
            Self::Interaction { .. } => EventKind::Interaction,
            Self::PersonUpdate { .. } => EventKind::PersonUpdate,
            Self::Reflection { .. } => EventKind::Reflection,
            Self::StreakUpdate { .. } => EventKind::StreakUpdate,
            Self::HealthScore { .. } => EventKind::HealthScore,
            Self::Notification { .. } => EventKind::Notification,
        }
    }

    /// Splits the event into its wire tag and payload map.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] if a field cannot be encoded.
    pub fn into_parts(self) -> Result<(EventKind, Payload), serde_json::Error> {
        let kind = self.kind();
        let mut data = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        data.remove("type");
        Ok((kind, data))
    }
}
