use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a turn submission is rejected before any network attempt.
///
/// Everything that happens after the stream opens is represented as a
/// terminal turn state, never as an error out of the event loop — the
/// caller's draft input is only at risk before a user turn exists.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("quota exceeded: {remaining} of {limit} turns remaining")]
    QuotaExceeded { remaining: u32, limit: u32 },

    /// The allowance check itself failed. Treated as a deny, but kept
    /// distinct so the UI can say "couldn't verify" instead of "over limit".
    #[error("quota check unavailable: {0}")]
    QuotaUnavailable(String),
}

/// Conversation-level record of the last abnormal termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransportFailure,
    StreamTimeout,
    PartialStreamFailure,
    QuotaExceeded,
    QuotaUnavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TransportFailure => write!(f, "transport failure"),
            ErrorKind::StreamTimeout => write!(f, "stream timeout"),
            ErrorKind::PartialStreamFailure => write!(f, "partial stream failure"),
            ErrorKind::QuotaExceeded => write!(f, "quota exceeded"),
            ErrorKind::QuotaUnavailable => write!(f, "quota unavailable"),
        }
    }
}
