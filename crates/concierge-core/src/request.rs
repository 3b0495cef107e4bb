use protocol::{HistoryMessage, TurnRequest};

use crate::session::turn::{Role, Turn};

/// Most recent turns carried as model context.
pub const HISTORY_TURNS: usize = 6;
/// Per-turn content cap in the outbound request.
pub const MAX_TURN_CHARS: usize = 3000;
pub const TRUNCATION_MARKER: &str = " …[truncated]";

/// Build the outbound envelope for one turn. History is bounded to the
/// most recent [`HISTORY_TURNS`] turns, each capped at [`MAX_TURN_CHARS`]
/// characters, so request size stays bounded no matter how long the
/// conversation runs.
pub fn build_request(
    trip_id: &str,
    message: &str,
    prior_turns: &[Turn],
    attachments: Vec<String>,
) -> TurnRequest {
    let mut request = TurnRequest::new(trip_id, message);
    request.attachments = attachments;
    let skip = prior_turns.len().saturating_sub(HISTORY_TURNS);
    request.history = prior_turns[skip..]
        .iter()
        .map(|t| HistoryMessage {
            role: match t.role {
                Role::User => "user".to_string(),
                Role::Assistant => "assistant".to_string(),
            },
            content: truncate(&t.content),
        })
        .collect();
    request
}

fn truncate(content: &str) -> String {
    if content.chars().count() <= MAX_TURN_CHARS {
        return content.to_string();
    }
    let mut out: String = content.chars().take(MAX_TURN_CHARS).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded_to_most_recent_turns() {
        let turns: Vec<Turn> = (0..10).map(|i| Turn::user(format!("message {i}"))).collect();
        let req = build_request("trip-1", "latest", &turns, Vec::new());
        assert_eq!(req.history.len(), HISTORY_TURNS);
        assert_eq!(req.history[0].content, "message 4");
        assert_eq!(req.history.last().unwrap().content, "message 9");
    }

    #[test]
    fn long_turns_are_capped_with_a_marker() {
        let long = "x".repeat(MAX_TURN_CHARS + 100);
        let turns = vec![Turn::user(long)];
        let req = build_request("trip-1", "q", &turns, Vec::new());
        let content = &req.history[0].content;
        assert!(content.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            content.chars().count(),
            MAX_TURN_CHARS + TRUNCATION_MARKER.chars().count()
        );
    }

    #[test]
    fn short_history_passes_through_unchanged() {
        let turns = vec![Turn::user("hi")];
        let req = build_request("trip-1", "q", &turns, Vec::new());
        assert_eq!(req.history.len(), 1);
        assert_eq!(req.history[0].content, "hi");
        assert_eq!(req.history[0].role, "user");
    }
}
