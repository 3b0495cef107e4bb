use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use protocol::{StreamEvent, TurnRequest};
use tokio::sync::mpsc;

use crate::session::turn::Turn;

/// Billing's answer to "may this user send another turn".
#[derive(Debug, Clone, Copy)]
pub struct Allowance {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
}

/// External billing/quota boundary, consulted before any network call.
/// An `Err` here is treated as a deny, never as an allow.
#[async_trait]
pub trait QuotaGate: Send + Sync {
    async fn check_allowance(&self) -> Result<Allowance>;
}

/// Synchronous abort for an open stream. Implementations must tolerate
/// being called more than once and after the stream has already ended.
pub trait StreamAbort: Send + Sync {
    fn abort(&self);
}

/// One open stream: its event channel plus the handle that tears it down.
pub struct StreamConnection {
    pub events: mpsc::Receiver<StreamEvent>,
    pub abort: Arc<dyn StreamAbort>,
}

/// Opens exactly one network stream per turn.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, request: TurnRequest) -> Result<StreamConnection>;
}

/// Persisted turn history, read once at session start to hydrate a
/// conversation.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn load(&self, trip_id: &str) -> Result<Vec<Turn>>;
}
