use chrono::{DateTime, Utc};
use protocol::{FlightOption, Place, Source, Usage, WriteActionResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation. User turns are immutable once created;
/// assistant turns accumulate merges until finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub places: Vec<Place>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flights: Vec<FlightOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<WriteActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_widget: Option<serde_json::Value>,
    /// For an assistant turn, the user turn that caused it. Drives the
    /// paired-delete rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), None)
    }

    /// Empty assistant shell. The id is fixed here; every later merge
    /// targets it regardless of which event kind arrives first.
    pub fn assistant(id: Uuid, in_reply_to: Option<Uuid>) -> Self {
        let mut t = Self::new(Role::Assistant, String::new(), in_reply_to);
        t.id = id;
        t
    }

    fn new(role: Role, content: String, in_reply_to: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            places: Vec::new(),
            flights: Vec::new(),
            actions: Vec::new(),
            usage: None,
            sources: Vec::new(),
            map_widget: None,
            in_reply_to,
            created_at: Utc::now(),
        }
    }

    pub fn has_payloads(&self) -> bool {
        !self.places.is_empty() || !self.flights.is_empty() || !self.actions.is_empty()
    }
}

/// A single merge step against an in-flight assistant turn. Lists are
/// appended onto the turn, never substituted; scalar metadata is
/// last-writer-wins.
#[derive(Debug, Clone, Default)]
pub struct TurnPatch {
    pub places: Vec<Place>,
    pub flights: Vec<FlightOption>,
    pub actions: Vec<WriteActionResult>,
    pub usage: Option<Usage>,
    pub sources: Vec<Source>,
    pub map_widget: Option<serde_json::Value>,
}

impl TurnPatch {
    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
            && self.flights.is_empty()
            && self.actions.is_empty()
            && self.usage.is_none()
            && self.sources.is_empty()
            && self.map_widget.is_none()
    }
}
