use protocol::{FlightOption, Place, WriteActionResult, WriteActionType};
use serde_json::Value;
use tracing::debug;

use crate::session::turn::TurnPatch;

/// How a known tool name merges into the in-flight turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Search results merged as display payload.
    PlaceSearch,
    FlightSearch,
    /// Single-entity enrichment appended to the existing list.
    PlaceDetails,
    /// Side-effecting action normalized to a success/failure record.
    Write(WriteActionType),
}

/// Classify a tool by name. Unknown names return `None`; the router is
/// forward-compatible and never rejects a stream over a new tool.
pub fn classify(name: &str) -> Option<ToolKind> {
    match name {
        "searchPlaces" => Some(ToolKind::PlaceSearch),
        "searchFlights" => Some(ToolKind::FlightSearch),
        "getPlaceDetails" => Some(ToolKind::PlaceDetails),
        "createPoll" => Some(ToolKind::Write(WriteActionType::Poll)),
        "createTask" => Some(ToolKind::Write(WriteActionType::Task)),
        "createCalendarEvent" => Some(ToolKind::Write(WriteActionType::CalendarEvent)),
        "savePlace" => Some(ToolKind::Write(WriteActionType::SavedPlace)),
        "addLink" => Some(ToolKind::Write(WriteActionType::Link)),
        "addAgendaItem" => Some(ToolKind::Write(WriteActionType::AgendaItem)),
        _ => None,
    }
}

/// Which payload field holds the created entity, declared per action type.
/// The remote side returns a different field name for each action.
fn entity_field(action: WriteActionType) -> &'static str {
    match action {
        WriteActionType::Poll => "poll",
        WriteActionType::Task => "task",
        WriteActionType::CalendarEvent => "event",
        WriteActionType::SavedPlace => "place",
        WriteActionType::Link => "link",
        WriteActionType::AgendaItem => "agendaItem",
    }
}

fn action_noun(action: WriteActionType) -> &'static str {
    match action {
        WriteActionType::Poll => "poll",
        WriteActionType::Task => "task",
        WriteActionType::CalendarEvent => "calendar event",
        WriteActionType::SavedPlace => "saved place",
        WriteActionType::Link => "link",
        WriteActionType::AgendaItem => "agenda item",
    }
}

/// Turn a tool result into a merge patch for the in-flight turn.
/// Returns `None` for unrecognized names.
pub fn route(name: &str, payload: &Value) -> Option<TurnPatch> {
    let kind = classify(name)?;
    let mut patch = TurnPatch::default();
    match kind {
        ToolKind::PlaceSearch => {
            patch.places = parse_list(payload.get("places"));
        }
        ToolKind::FlightSearch => {
            patch.flights = parse_list(payload.get("flights"));
        }
        ToolKind::PlaceDetails => {
            // A detail result appends one enriched entry; it must not
            // erase an earlier search list.
            if let Some(place) = payload
                .get("place")
                .cloned()
                .and_then(|v| serde_json::from_value::<Place>(v).ok())
            {
                patch.places.push(place);
            }
        }
        ToolKind::Write(action) => {
            patch.actions.push(normalize_write(action, payload));
        }
    }
    if patch.is_empty() {
        debug!(name, "tool result carried no mergeable payload");
    }
    Some(patch)
}

fn parse_list<T: serde::de::DeserializeOwned>(value: Option<&Value>) -> Vec<T> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn normalize_write(action: WriteActionType, payload: &Value) -> WriteActionResult {
    let success = payload
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let entity = payload.get(entity_field(action));
    let entity_id = entity
        .and_then(|e| e.get("id"))
        .and_then(value_as_id_string);
    let entity_name = entity.and_then(|e| {
        e.get("name")
            .or_else(|| e.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let noun = action_noun(action);
            if success {
                match &entity_name {
                    Some(n) => format!("Created {noun} \"{n}\""),
                    None => format!("Created {noun}"),
                }
            } else {
                format!("Couldn't create {noun}")
            }
        });
    WriteActionResult {
        action_type: action,
        success,
        message,
        entity_id,
        entity_name,
        scope: payload
            .get("scope")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn value_as_id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
