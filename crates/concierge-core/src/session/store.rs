use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::session::turn::{Role, Turn, TurnPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// No turn submitted yet this session.
    Idle,
    /// An assistant turn is in flight.
    Streaming,
    /// Last turn completed with genuine model output.
    Ready,
    /// Last turn fell back to cached or synthesized content.
    Degraded,
    /// Last turn's stream produced nothing within the watchdog window.
    Timeout,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationStatus::Idle => write!(f, "idle"),
            ConversationStatus::Streaming => write!(f, "streaming"),
            ConversationStatus::Ready => write!(f, "ready"),
            ConversationStatus::Degraded => write!(f, "degraded"),
            ConversationStatus::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub at: DateTime<Utc>,
}

/// Append-only turn sequence for one trip's concierge chat, plus the
/// merge primitives the stream side uses to build the in-flight
/// assistant turn exactly once per event.
pub struct Conversation {
    trip_id: String,
    turns: Vec<Turn>,
    /// Assistant turns frozen by `finalize`; merges against them are
    /// dropped as late network artifacts.
    finalized: HashSet<Uuid>,
    /// Assistant turns that have received at least one text chunk. The
    /// first chunk replaces whatever placeholder content exists; only
    /// subsequent chunks append.
    chunk_seen: HashSet<Uuid>,
    status: ConversationStatus,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<LastError>,
}

impl Conversation {
    pub fn new(trip_id: impl Into<String>) -> Self {
        Self {
            trip_id: trip_id.into(),
            turns: Vec::new(),
            finalized: HashSet::new(),
            chunk_seen: HashSet::new(),
            status: ConversationStatus::Idle,
            last_success: None,
            last_error: None,
        }
    }

    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn turn(&self, id: Uuid) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == id)
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.last_error
    }

    /// One-time hydration from persisted history. A no-op unless the
    /// conversation is still empty, so a just-submitted turn is never
    /// clobbered by stale history arriving late.
    pub fn hydrate(&mut self, turns: Vec<Turn>) -> bool {
        if !self.turns.is_empty() {
            return false;
        }
        for t in &turns {
            if t.role == Role::Assistant {
                self.finalized.insert(t.id);
                self.chunk_seen.insert(t.id);
            }
        }
        self.turns = turns;
        true
    }

    pub fn append_user(&mut self, turn: Turn) -> Uuid {
        debug_assert_eq!(turn.role, Role::User);
        let id = turn.id;
        self.turns.push(turn);
        self.status = ConversationStatus::Streaming;
        id
    }

    /// Create the assistant shell for `id` if it does not exist yet, and
    /// return its position. Whichever event kind arrives first is the one
    /// that materializes the turn; later callers see the same index.
    pub fn ensure_assistant(&mut self, id: Uuid, in_reply_to: Option<Uuid>) -> usize {
        if let Some(pos) = self.turns.iter().position(|t| t.id == id) {
            return pos;
        }
        self.turns.push(Turn::assistant(id, in_reply_to));
        self.turns.len() - 1
    }

    /// Merge one text chunk. Returns false if the turn was already
    /// finalized (the chunk is dropped).
    pub fn apply_chunk(&mut self, id: Uuid, text: &str, in_reply_to: Option<Uuid>) -> bool {
        if self.finalized.contains(&id) {
            return false;
        }
        let pos = self.ensure_assistant(id, in_reply_to);
        if self.chunk_seen.insert(id) {
            // First real text wins over any placeholder set by an earlier
            // tool result; appending here would double the content.
            self.turns[pos].content = text.to_string();
        } else {
            self.turns[pos].content.push_str(text);
        }
        true
    }

    /// Merge structured payloads and metadata. List fields append onto
    /// the turn; an earlier search result list is never erased by a later
    /// detail lookup. Returns false if the turn was already finalized.
    pub fn merge_into_assistant(
        &mut self,
        id: Uuid,
        patch: TurnPatch,
        in_reply_to: Option<Uuid>,
    ) -> bool {
        if self.finalized.contains(&id) {
            return false;
        }
        let pos = self.ensure_assistant(id, in_reply_to);
        let turn = &mut self.turns[pos];
        turn.places.extend(patch.places);
        turn.flights.extend(patch.flights);
        turn.actions.extend(patch.actions);
        turn.sources.extend(patch.sources);
        if patch.usage.is_some() {
            turn.usage = patch.usage;
        }
        if patch.map_widget.is_some() {
            turn.map_widget = patch.map_widget;
        }
        true
    }

    /// Replace the turn's text outright, respecting finalize. Used by the
    /// terminal paths that substitute fallback or timeout text.
    pub fn set_content(&mut self, id: Uuid, text: &str, in_reply_to: Option<Uuid>) -> bool {
        if self.finalized.contains(&id) {
            return false;
        }
        let pos = self.ensure_assistant(id, in_reply_to);
        self.turns[pos].content = text.to_string();
        self.chunk_seen.insert(id);
        true
    }

    /// Freeze the turn. Idempotent; all later merges for this id drop.
    pub fn finalize(&mut self, id: Uuid) {
        self.finalized.insert(id);
    }

    pub fn is_finalized(&self, id: Uuid) -> bool {
        self.finalized.contains(&id)
    }

    /// True while an assistant turn exists that has not been finalized.
    pub fn has_inflight(&self) -> bool {
        self.turns
            .iter()
            .any(|t| t.role == Role::Assistant && !self.finalized.contains(&t.id))
    }

    pub fn record_success(&mut self) {
        self.status = ConversationStatus::Ready;
        self.last_success = Some(Utc::now());
    }

    pub fn record_error(&mut self, kind: ErrorKind, status: ConversationStatus) {
        self.status = status;
        self.last_error = Some(LastError { kind, at: Utc::now() });
    }

    /// Record a pre-submission rejection. Status is untouched: no turn
    /// was created, so nothing is streaming or degraded.
    pub fn note_rejection(&mut self, kind: ErrorKind) {
        self.last_error = Some(LastError { kind, at: Utc::now() });
    }

    /// Explicit user delete: removes the turn and, for a user turn, the
    /// assistant turn it caused. The only supported mutation after
    /// finalize.
    pub fn delete_turn(&mut self, id: Uuid) -> bool {
        let Some(pos) = self.turns.iter().position(|t| t.id == id) else {
            return false;
        };
        let was_user = self.turns[pos].role == Role::User;
        self.turns.remove(pos);
        if was_user {
            self.turns.retain(|t| t.in_reply_to != Some(id));
        }
        self.finalized.remove(&id);
        self.chunk_seen.remove(&id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::Place;

    fn place(name: &str) -> Place {
        Place {
            id: None,
            name: name.to_string(),
            address: None,
            lat: None,
            lng: None,
            rating: None,
        }
    }

    #[test]
    fn first_chunk_replaces_then_appends() {
        let mut conv = Conversation::new("trip-1");
        let id = Uuid::new_v4();

        // Tool result materializes the turn before any text.
        let mut patch = TurnPatch::default();
        patch.places.push(place("Hilton"));
        assert!(conv.merge_into_assistant(id, patch, None));
        assert_eq!(conv.turn(id).unwrap().content, "");

        assert!(conv.apply_chunk(id, "I'm at ", None));
        assert!(conv.apply_chunk(id, "the Hilton", None));
        let turn = conv.turn(id).unwrap();
        assert_eq!(turn.content, "I'm at the Hilton");
        assert_eq!(turn.places.len(), 1);
    }

    #[test]
    fn merges_after_finalize_are_dropped() {
        let mut conv = Conversation::new("trip-1");
        let id = Uuid::new_v4();
        assert!(conv.apply_chunk(id, "done deal", None));
        conv.finalize(id);

        assert!(!conv.apply_chunk(id, " late chunk", None));
        let mut patch = TurnPatch::default();
        patch.places.push(place("Late Cafe"));
        assert!(!conv.merge_into_assistant(id, patch, None));
        assert!(!conv.set_content(id, "overwrite", None));

        let turn = conv.turn(id).unwrap();
        assert_eq!(turn.content, "done deal");
        assert!(turn.places.is_empty());
    }

    #[test]
    fn structured_lists_append_never_replace() {
        let mut conv = Conversation::new("trip-1");
        let id = Uuid::new_v4();
        for i in 0..3 {
            let mut patch = TurnPatch::default();
            patch.places.push(place(&format!("p{i}")));
            conv.merge_into_assistant(id, patch, None);
        }
        let names: Vec<_> = conv
            .turn(id)
            .unwrap()
            .places
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(names, vec!["p0", "p1", "p2"]);
    }

    #[test]
    fn delete_user_turn_removes_paired_assistant() {
        let mut conv = Conversation::new("trip-1");
        let user_id = conv.append_user(Turn::user("where is the hotel"));
        let assistant_id = Uuid::new_v4();
        conv.apply_chunk(assistant_id, "At the Hilton", Some(user_id));
        conv.finalize(assistant_id);
        assert_eq!(conv.turns().len(), 2);

        assert!(conv.delete_turn(user_id));
        assert!(conv.turns().is_empty());
    }

    #[test]
    fn hydrate_only_into_empty_conversation() {
        let mut conv = Conversation::new("trip-1");
        assert!(conv.hydrate(vec![Turn::user("old question")]));
        assert_eq!(conv.turns().len(), 1);

        assert!(!conv.hydrate(vec![Turn::user("stale history")]));
        assert_eq!(conv.turns().len(), 1);
        assert_eq!(conv.turns()[0].content, "old question");
    }

    #[test]
    fn hydrated_assistant_turns_are_frozen() {
        let mut conv = Conversation::new("trip-1");
        let assistant = Turn::assistant(Uuid::new_v4(), None);
        let id = assistant.id;
        conv.hydrate(vec![assistant]);
        assert!(!conv.apply_chunk(id, "ghost text", None));
    }
}
