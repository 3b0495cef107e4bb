use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protocol::StreamEvent;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::SimilarityCache;
use crate::error::{ErrorKind, TurnError};
use crate::fallback::{self, FallbackContext};
use crate::ports::{HistorySource, QuotaGate, StreamAbort, StreamTransport};
use crate::request::build_request;
use crate::router;
use crate::session::store::{Conversation, ConversationStatus};
use crate::session::turn::{Turn, TurnPatch};

/// Watchdog window for a stream that has produced nothing at all.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(60);
/// Extra grace before the outer watchdog force-finalizes a stuck turn.
pub const DEFAULT_WATCHDOG_GRACE: Duration = Duration::from_secs(5);

/// Prefix that distinguishes a timeout answer from ordinary fallback text.
pub const TIMEOUT_NOTICE: &str = "No response arrived in time.";

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub stream_timeout: Duration,
    pub watchdog_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            watchdog_grace: DEFAULT_WATCHDOG_GRACE,
        }
    }
}

/// How one turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Clean `done`; genuine model output (cached when non-empty).
    Completed,
    /// Nothing arrived within the watchdog window.
    TimedOut,
    /// No usable model text; answer is cached or synthesized.
    Degraded,
    /// Stream ended abnormally after real content arrived; content kept.
    Partial,
}

/// One user submission.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub text: String,
    pub attachments: Vec<String>,
    /// Structured local context for offline answers.
    pub context: FallbackContext,
}

impl TurnInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: FallbackContext) -> Self {
        self.context = context;
        self
    }
}

struct NoopAbort;

impl StreamAbort for NoopAbort {
    fn abort(&self) {}
}

/// Caller-side handle for one in-flight turn.
pub struct TurnHandle {
    pub user_turn_id: Uuid,
    pub assistant_turn_id: Uuid,
    aborted: Arc<AtomicBool>,
    abort: Arc<dyn StreamAbort>,
    task: JoinHandle<TurnOutcome>,
}

impl std::fmt::Debug for TurnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnHandle")
            .field("user_turn_id", &self.user_turn_id)
            .field("assistant_turn_id", &self.assistant_turn_id)
            .finish_non_exhaustive()
    }
}

impl TurnHandle {
    /// Tear down the stream. Idempotent: a second call is a no-op. The
    /// event loop observes the closed stream and finalizes under the
    /// partial rules, so accumulated content survives.
    pub fn abort(&self) {
        if !self.aborted.swap(true, Ordering::SeqCst) {
            self.abort.abort();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Wait for the turn to reach a terminal state. Call at most once.
    pub async fn join(&mut self) -> TurnOutcome {
        (&mut self.task).await.unwrap_or(TurnOutcome::Degraded)
    }
}

/// Drives one conversation's turns: quota check, stream lifecycle,
/// watchdogs, terminal-path finalization and cache writes.
pub struct ConciergeSession<T: StreamTransport, Q: QuotaGate> {
    transport: Arc<T>,
    quota: Arc<Q>,
    conversation: Arc<Mutex<Conversation>>,
    cache: Arc<Mutex<SimilarityCache>>,
    config: OrchestratorConfig,
}

impl<T, Q> ConciergeSession<T, Q>
where
    T: StreamTransport + 'static,
    Q: QuotaGate + 'static,
{
    pub fn new(transport: Arc<T>, quota: Arc<Q>, conversation: Arc<Mutex<Conversation>>) -> Self {
        Self {
            transport,
            quota,
            conversation,
            cache: Arc::new(Mutex::new(SimilarityCache::new())),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a cache with another session (or the hosting UI) instead of
    /// starting empty.
    pub fn with_cache(mut self, cache: Arc<Mutex<SimilarityCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn conversation(&self) -> Arc<Mutex<Conversation>> {
        self.conversation.clone()
    }

    /// Shared cache handle, also consumed by the hosting UI for offline
    /// display.
    pub fn cache(&self) -> Arc<Mutex<SimilarityCache>> {
        self.cache.clone()
    }

    /// One-time hydration from persisted history. Returns false if the
    /// conversation already has turns (stale history never clobbers a
    /// just-submitted turn).
    pub async fn hydrate<H: HistorySource>(&self, source: &H) -> anyhow::Result<bool> {
        let trip_id = self.conversation.lock().await.trip_id().to_string();
        let turns = source.load(&trip_id).await?;
        Ok(self.conversation.lock().await.hydrate(turns))
    }

    /// Explicit user delete; pairs a user turn with the assistant turn it
    /// caused.
    pub async fn delete_turn(&self, id: Uuid) -> bool {
        self.conversation.lock().await.delete_turn(id)
    }

    /// Submit one turn. Rejections happen before any turn is created, so
    /// the caller's draft input is preserved on error.
    pub async fn begin_turn(&self, input: TurnInput) -> Result<TurnHandle, TurnError> {
        let allowance = match self.quota.check_allowance().await {
            Ok(allowance) => allowance,
            Err(e) => {
                self.conversation
                    .lock()
                    .await
                    .note_rejection(ErrorKind::QuotaUnavailable);
                return Err(TurnError::QuotaUnavailable(e.to_string()));
            }
        };
        if !allowance.allowed {
            self.conversation
                .lock()
                .await
                .note_rejection(ErrorKind::QuotaExceeded);
            return Err(TurnError::QuotaExceeded {
                remaining: allowance.remaining,
                limit: allowance.limit,
            });
        }

        let query = input.text.clone();
        let (trip_id, user_id, request) = {
            let mut conv = self.conversation.lock().await;
            let request = build_request(
                conv.trip_id(),
                &input.text,
                conv.turns(),
                input.attachments.clone(),
            );
            let trip_id = conv.trip_id().to_string();
            let user_id = conv.append_user(Turn::user(input.text.clone()));
            (trip_id, user_id, request)
        };
        let assistant_id = Uuid::new_v4();

        let connection = match self.transport.open(request).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, trip_id, "stream never opened");
                let (text, snapshot) =
                    offline_answer(&self.cache, &trip_id, &query, &input.context).await;
                let mut conv = self.conversation.lock().await;
                if let Some(hit) = snapshot {
                    conv.merge_into_assistant(assistant_id, cached_patch(hit), Some(user_id));
                }
                conv.set_content(assistant_id, &text, Some(user_id));
                conv.finalize(assistant_id);
                conv.record_error(ErrorKind::TransportFailure, ConversationStatus::Degraded);
                return Ok(TurnHandle {
                    user_turn_id: user_id,
                    assistant_turn_id: assistant_id,
                    aborted: Arc::new(AtomicBool::new(true)),
                    abort: Arc::new(NoopAbort),
                    task: tokio::spawn(async { TurnOutcome::Degraded }),
                });
            }
        };

        let (done_tx, done_rx) = oneshot::channel();
        let first_event = Arc::new(AtomicBool::new(false));
        let stream_task = StreamTask {
            conversation: self.conversation.clone(),
            cache: self.cache.clone(),
            events: connection.events,
            abort: connection.abort.clone(),
            trip_id,
            query: query.clone(),
            context: input.context.clone(),
            user_id,
            assistant_id,
            timeout: self.config.stream_timeout,
            first_event: first_event.clone(),
            done_tx: Some(done_tx),
        };
        let task = tokio::spawn(stream_task.run());

        // Second line of defense: if the primary finalize path itself
        // never runs, unstick the conversation after the grace window.
        tokio::spawn(outer_watchdog(
            self.conversation.clone(),
            assistant_id,
            user_id,
            query,
            input.context,
            self.config.stream_timeout + self.config.watchdog_grace,
            first_event,
            done_rx,
        ));

        Ok(TurnHandle {
            user_turn_id: user_id,
            assistant_turn_id: assistant_id,
            aborted: Arc::new(AtomicBool::new(false)),
            abort: connection.abort,
            task,
        })
    }
}

struct StreamTask {
    conversation: Arc<Mutex<Conversation>>,
    cache: Arc<Mutex<SimilarityCache>>,
    events: mpsc::Receiver<StreamEvent>,
    abort: Arc<dyn StreamAbort>,
    trip_id: String,
    query: String,
    context: FallbackContext,
    user_id: Uuid,
    assistant_id: Uuid,
    timeout: Duration,
    /// Shared with the outer watchdog, which stands down once the stream
    /// has shown life.
    first_event: Arc<AtomicBool>,
    done_tx: Option<oneshot::Sender<()>>,
}

impl StreamTask {
    async fn run(mut self) -> TurnOutcome {
        let outcome = loop {
            // The watchdog races only the first event. Tool calls often
            // precede the first text chunk by seconds, so any sign of
            // life suppresses the timer outright instead of extending it.
            let next = if self.first_event.load(Ordering::SeqCst) {
                self.events.recv().await
            } else {
                match tokio::time::timeout(self.timeout, self.events.recv()).await {
                    Ok(next) => next,
                    Err(_) => break self.finish_timeout().await,
                }
            };
            match next {
                Some(StreamEvent::Chunk(chunk)) => {
                    self.first_event.store(true, Ordering::SeqCst);
                    let mut conv = self.conversation.lock().await;
                    if !conv.apply_chunk(self.assistant_id, &chunk.text, Some(self.user_id)) {
                        debug!("chunk after finalize dropped");
                    }
                }
                Some(StreamEvent::ToolResult(tr)) => {
                    self.first_event.store(true, Ordering::SeqCst);
                    let mut conv = self.conversation.lock().await;
                    match router::route(&tr.name, &tr.payload) {
                        Some(patch) => {
                            conv.merge_into_assistant(self.assistant_id, patch, Some(self.user_id));
                        }
                        None => {
                            debug!(name = %tr.name, "unrecognized tool result ignored");
                            // Still materializes the turn: the stream is alive.
                            conv.ensure_assistant(self.assistant_id, Some(self.user_id));
                        }
                    }
                }
                Some(StreamEvent::Metadata(md)) => {
                    self.first_event.store(true, Ordering::SeqCst);
                    let patch = TurnPatch {
                        usage: md.usage,
                        sources: md.sources,
                        map_widget: md.map_widget,
                        ..TurnPatch::default()
                    };
                    self.conversation.lock().await.merge_into_assistant(
                        self.assistant_id,
                        patch,
                        Some(self.user_id),
                    );
                }
                Some(StreamEvent::Error(err)) => {
                    warn!(message = %err.message, "stream reported an error");
                    let saw = self.first_event.load(Ordering::SeqCst);
                    break self.finish_abnormal(saw).await;
                }
                Some(StreamEvent::Done) => break self.finish_done().await,
                // Channel closed without `done`: transport died or the
                // caller aborted. Same rules either way.
                None => {
                    let saw = self.first_event.load(Ordering::SeqCst);
                    break self.finish_abnormal(saw).await;
                }
            }
        };
        if let Some(tx) = self.done_tx.take() {
            let _ = tx.send(());
        }
        outcome
    }

    /// Clean end of stream. Genuine non-empty output is snapshotted into
    /// the similarity cache; synthesized stand-ins never are.
    async fn finish_done(&mut self) -> TurnOutcome {
        let snapshot = {
            let mut conv = self.conversation.lock().await;
            // A watchdog may have force-finalized this turn already; a
            // late `done` must not resurrect it as a success or cache
            // whatever text it froze with.
            if conv.is_finalized(self.assistant_id) {
                return TurnOutcome::TimedOut;
            }
            conv.ensure_assistant(self.assistant_id, Some(self.user_id));
            let empty = conv
                .turn(self.assistant_id)
                .map_or(true, |t| t.content.trim().is_empty());
            if empty {
                let text = fallback::synthesize(&self.query, &self.context);
                conv.set_content(self.assistant_id, &text, Some(self.user_id));
            }
            conv.finalize(self.assistant_id);
            conv.record_success();
            if empty {
                None
            } else {
                conv.turn(self.assistant_id).cloned()
            }
        };
        if let Some(snapshot) = snapshot {
            self.cache
                .lock()
                .await
                .put(&self.trip_id, &self.query, snapshot);
        }
        TurnOutcome::Completed
    }

    /// Stream ended abnormally. Before any event this is a transport
    /// failure answered offline; after one, whatever arrived is kept.
    async fn finish_abnormal(&mut self, saw_event: bool) -> TurnOutcome {
        if self.conversation.lock().await.is_finalized(self.assistant_id) {
            return TurnOutcome::TimedOut;
        }
        if !saw_event {
            let (text, snapshot) =
                offline_answer(&self.cache, &self.trip_id, &self.query, &self.context).await;
            let mut conv = self.conversation.lock().await;
            if let Some(hit) = snapshot {
                conv.merge_into_assistant(self.assistant_id, cached_patch(hit), Some(self.user_id));
            }
            conv.set_content(self.assistant_id, &text, Some(self.user_id));
            conv.finalize(self.assistant_id);
            conv.record_error(ErrorKind::TransportFailure, ConversationStatus::Degraded);
            return TurnOutcome::Degraded;
        }

        let mut conv = self.conversation.lock().await;
        conv.ensure_assistant(self.assistant_id, Some(self.user_id));
        let empty = conv
            .turn(self.assistant_id)
            .map_or(true, |t| t.content.trim().is_empty());
        if empty {
            let text = fallback::synthesize(&self.query, &self.context);
            conv.set_content(self.assistant_id, &text, Some(self.user_id));
            conv.finalize(self.assistant_id);
            conv.record_error(ErrorKind::PartialStreamFailure, ConversationStatus::Degraded);
            TurnOutcome::Degraded
        } else {
            conv.finalize(self.assistant_id);
            conv.record_error(ErrorKind::PartialStreamFailure, ConversationStatus::Ready);
            TurnOutcome::Partial
        }
    }

    /// The watchdog fired with no event at all. Abort the stream and
    /// answer with a distinctly prefixed timeout message. Partial content
    /// is never discarded here, even though the timer cannot normally
    /// fire once content exists.
    async fn finish_timeout(&mut self) -> TurnOutcome {
        self.abort.abort();
        let mut conv = self.conversation.lock().await;
        if conv.is_finalized(self.assistant_id) {
            return TurnOutcome::TimedOut;
        }
        conv.ensure_assistant(self.assistant_id, Some(self.user_id));
        let empty = conv
            .turn(self.assistant_id)
            .map_or(true, |t| t.content.trim().is_empty());
        if empty {
            let text = format!(
                "{TIMEOUT_NOTICE} {}",
                fallback::synthesize(&self.query, &self.context)
            );
            conv.set_content(self.assistant_id, &text, Some(self.user_id));
        }
        conv.finalize(self.assistant_id);
        conv.record_error(ErrorKind::StreamTimeout, ConversationStatus::Timeout);
        TurnOutcome::TimedOut
    }
}

/// Offline substitution: a cached genuine answer beats canned text.
/// Returns the text plus, on a cache hit, the snapshot whose payloads
/// should be merged back in.
async fn offline_answer(
    cache: &Arc<Mutex<SimilarityCache>>,
    trip_id: &str,
    query: &str,
    context: &FallbackContext,
) -> (String, Option<Turn>) {
    if let Some(hit) = cache.lock().await.get(trip_id, query) {
        if !hit.content.trim().is_empty() {
            return (hit.content.clone(), Some(hit));
        }
    }
    (fallback::synthesize(query, context), None)
}

/// Display payloads from a cached snapshot. Write-action records are not
/// replayed; a cached "created poll" receipt would misreport history.
fn cached_patch(hit: Turn) -> TurnPatch {
    TurnPatch {
        places: hit.places,
        flights: hit.flights,
        sources: hit.sources,
        map_widget: hit.map_widget,
        ..TurnPatch::default()
    }
}

/// Independent second timer with its own trigger: unstick the turn if the
/// primary finalize path never ran. Resolves the moment the stream task
/// reports done, and stands down entirely once the stream has shown life;
/// a live stream finalizes through its own event loop no matter how long
/// it stalls, and force-finalizing it here would drop the chunks still in
/// flight.
#[allow(clippy::too_many_arguments)]
async fn outer_watchdog(
    conversation: Arc<Mutex<Conversation>>,
    assistant_id: Uuid,
    user_id: Uuid,
    query: String,
    context: FallbackContext,
    window: Duration,
    first_event: Arc<AtomicBool>,
    mut done_rx: oneshot::Receiver<()>,
) {
    tokio::select! {
        _ = &mut done_rx => return,
        _ = tokio::time::sleep(window) => {}
    }
    if first_event.load(Ordering::SeqCst) {
        return;
    }
    let mut conv = conversation.lock().await;
    if conv.is_finalized(assistant_id) {
        return;
    }
    warn!(%assistant_id, "outer watchdog fired; forcing finalize");
    let empty = conv
        .turn(assistant_id)
        .map_or(true, |t| t.content.trim().is_empty());
    if empty {
        let text = format!("{TIMEOUT_NOTICE} {}", fallback::synthesize(&query, &context));
        conv.set_content(assistant_id, &text, Some(user_id));
    }
    conv.finalize(assistant_id);
    conv.record_error(ErrorKind::StreamTimeout, ConversationStatus::Timeout);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Driven directly: the integration paths always have a healthy event
    // loop, but this timer exists for the case where that loop is dead.
    #[tokio::test(start_paused = true)]
    async fn grace_timer_unsticks_a_dead_event_loop() {
        let conversation = Arc::new(Mutex::new(Conversation::new("trip-1")));
        let user_id = conversation
            .lock()
            .await
            .append_user(Turn::user("where is the hotel"));
        let assistant_id = Uuid::new_v4();
        let (_done_tx, done_rx) = oneshot::channel();
        tokio::spawn(outer_watchdog(
            conversation.clone(),
            assistant_id,
            user_id,
            "where is the hotel".to_string(),
            FallbackContext::default(),
            Duration::from_secs(65),
            Arc::new(AtomicBool::new(false)),
            done_rx,
        ));

        tokio::time::sleep(Duration::from_secs(66)).await;
        let conv = conversation.lock().await;
        assert!(conv.is_finalized(assistant_id));
        assert_eq!(conv.status(), ConversationStatus::Timeout);
        let turn = conv.turn(assistant_id).unwrap();
        assert!(turn.content.starts_with(TIMEOUT_NOTICE));
    }

    #[tokio::test(start_paused = true)]
    async fn grace_timer_stands_down_once_the_stream_is_alive() {
        let conversation = Arc::new(Mutex::new(Conversation::new("trip-1")));
        let user_id = conversation
            .lock()
            .await
            .append_user(Turn::user("where is the hotel"));
        let assistant_id = Uuid::new_v4();
        let (_done_tx, done_rx) = oneshot::channel();
        tokio::spawn(outer_watchdog(
            conversation.clone(),
            assistant_id,
            user_id,
            "where is the hotel".to_string(),
            FallbackContext::default(),
            Duration::from_secs(65),
            Arc::new(AtomicBool::new(true)),
            done_rx,
        ));

        tokio::time::sleep(Duration::from_secs(300)).await;
        let conv = conversation.lock().await;
        assert!(!conv.is_finalized(assistant_id));
        assert_eq!(conv.status(), ConversationStatus::Streaming);
    }
}
