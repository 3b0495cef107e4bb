use serde::{Deserialize, Serialize};

/// Protocol version (bumped when breaking changes are introduced)
pub const VERSION: u8 = 1;

/// One unit of the concierge stream for an in-flight assistant turn.
///
/// Events arrive in channel order, but the semantic kinds are not ordered
/// relative to each other: a tool result may land before the first text
/// chunk. Consumers must not assume `Chunk` comes first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamEvent {
    Chunk(Chunk),
    ToolResult(ToolResult),
    Metadata(Metadata),
    Error(StreamError),
    Done,
}

/// Incremental assistant text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
}

/// Structured side-effect emitted when the model invoked a named capability.
/// The payload shape is tool-specific; classification happens downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub payload: serde_json::Value,
}

/// Trailing usage/source/widget metadata for the turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_widget: Option<serde_json::Value>,
}

/// Abnormal stream termination reported by the remote side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamError {
    pub message: String,
}

impl StreamEvent {
    pub fn chunk<S: Into<String>>(text: S) -> Self {
        StreamEvent::Chunk(Chunk { text: text.into() })
    }

    pub fn tool_result<S: Into<String>>(name: S, payload: serde_json::Value) -> Self {
        StreamEvent::ToolResult(ToolResult { name: name.into(), payload })
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        StreamEvent::Error(StreamError { message: message.into() })
    }
}

/// Token accounting reported by the remote model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Citation attached to an assistant turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A place returned by search or detail lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
}

/// A flight option returned by flight search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightOption {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub airline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_number: Option<String>,
    pub departure: String,
    pub arrival: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

/// Which side-effecting capability a write tool result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteActionType {
    Poll,
    Task,
    CalendarEvent,
    SavedPlace,
    Link,
    AgendaItem,
}

/// Normalized outcome of a write-action tool call. The remote side names
/// the created entity differently per action type; the router resolves
/// that into `entity_id`/`entity_name` here so the UI never has to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteActionResult {
    pub action_type: WriteActionType,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// One prior message included in the outbound request for model context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String, // "user" | "assistant"
    pub content: String,
}

/// The outbound request envelope for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v: Option<u8>,
    pub trip_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

impl TurnRequest {
    pub fn new<T: Into<String>, M: Into<String>>(trip_id: T, message: M) -> Self {
        Self {
            v: Some(VERSION),
            trip_id: trip_id.into(),
            message: message.into(),
            history: Vec::new(),
            attachments: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stream_event_tags_round_trip() {
        let ev = StreamEvent::chunk("hello");
        let s = serde_json::to_string(&ev).unwrap();
        assert!(s.contains("\"type\":\"chunk\""));

        let ev = StreamEvent::tool_result("searchPlaces", json!({"places": []}));
        let s = serde_json::to_string(&ev).unwrap();
        assert!(s.contains("\"type\":\"toolResult\""));

        let done: StreamEvent = serde_json::from_str("{\"type\":\"done\"}").unwrap();
        assert!(matches!(done, StreamEvent::Done));
    }

    #[test]
    fn metadata_omits_empty_fields() {
        let s = serde_json::to_string(&StreamEvent::Metadata(Metadata::default())).unwrap();
        assert_eq!(s, "{\"type\":\"metadata\"}");
    }
}
