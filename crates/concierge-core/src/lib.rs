pub mod cache;
pub mod error;
pub mod fallback;
pub mod orchestrator;
pub mod ports;
pub mod request;
pub mod router;
pub mod session;

pub use cache::SimilarityCache;
pub use error::{ErrorKind, TurnError};
pub use fallback::{FallbackContext, synthesize};
pub use orchestrator::{
    ConciergeSession, OrchestratorConfig, TurnHandle, TurnInput, TurnOutcome, TIMEOUT_NOTICE,
};
pub use ports::{Allowance, HistorySource, QuotaGate, StreamAbort, StreamConnection, StreamTransport};
pub use session::{Conversation, ConversationRegistry, ConversationStatus, Role, Turn, TurnPatch};

// Simple in-crate mocks for demo/testing
pub mod mocks {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use protocol::{StreamEvent, TurnRequest};
    use tokio::sync::{mpsc, Notify};

    use crate::ports::{
        Allowance, HistorySource, QuotaGate, StreamAbort, StreamConnection, StreamTransport,
    };
    use crate::session::turn::Turn;

    /// Quota gate with a fixed answer.
    pub struct StaticQuota(pub Allowance);

    impl StaticQuota {
        pub fn allowing() -> Self {
            Self(Allowance { allowed: true, remaining: 10, limit: 10 })
        }

        pub fn denying() -> Self {
            Self(Allowance { allowed: false, remaining: 0, limit: 10 })
        }
    }

    #[async_trait]
    impl QuotaGate for StaticQuota {
        async fn check_allowance(&self) -> Result<Allowance> {
            Ok(self.0)
        }
    }

    /// Quota gate whose check itself fails (stale billing service).
    pub struct BrokenQuota;

    #[async_trait]
    impl QuotaGate for BrokenQuota {
        async fn check_allowance(&self) -> Result<Allowance> {
            Err(anyhow!("billing service unreachable"))
        }
    }

    /// A stream the test (or demo) feeds by hand. Each `open` hands the
    /// event sender back through the tap channel, so events can be pushed
    /// after `begin_turn` returns. Abort closes the stream without
    /// consuming the test's sender.
    pub struct ChannelTransport {
        taps: mpsc::UnboundedSender<(TurnRequest, mpsc::Sender<StreamEvent>)>,
    }

    impl ChannelTransport {
        pub fn new() -> (
            Self,
            mpsc::UnboundedReceiver<(TurnRequest, mpsc::Sender<StreamEvent>)>,
        ) {
            let (taps, tap_rx) = mpsc::unbounded_channel();
            (Self { taps }, tap_rx)
        }
    }

    struct ChannelAbort {
        fired: AtomicBool,
        notify: Arc<Notify>,
    }

    impl StreamAbort for ChannelAbort {
        fn abort(&self) {
            if !self.fired.swap(true, Ordering::SeqCst) {
                self.notify.notify_waiters();
            }
        }
    }

    #[async_trait]
    impl StreamTransport for ChannelTransport {
        async fn open(&self, request: TurnRequest) -> Result<StreamConnection> {
            let (feed_tx, mut feed_rx) = mpsc::channel::<StreamEvent>(64);
            let (out_tx, out_rx) = mpsc::channel::<StreamEvent>(64);
            let notify = Arc::new(Notify::new());
            let abort = Arc::new(ChannelAbort {
                fired: AtomicBool::new(false),
                notify: notify.clone(),
            });
            // Forward until the feed closes or abort fires.
            let guard = abort.clone();
            tokio::spawn(async move {
                loop {
                    // notify_waiters only wakes parked tasks; the flag
                    // covers an abort landing between iterations.
                    if guard.fired.load(Ordering::SeqCst) {
                        break;
                    }
                    tokio::select! {
                        ev = feed_rx.recv() => match ev {
                            Some(ev) => {
                                if out_tx.send(ev).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                        _ = notify.notified() => break,
                    }
                }
            });
            self.taps
                .send((request, feed_tx))
                .map_err(|_| anyhow!("transport tap dropped"))?;
            Ok(StreamConnection { events: out_rx, abort })
        }
    }

    /// Transport whose connection attempt always fails.
    pub struct FailingTransport;

    #[async_trait]
    impl StreamTransport for FailingTransport {
        async fn open(&self, _request: TurnRequest) -> Result<StreamConnection> {
            Err(anyhow!("connection refused"))
        }
    }

    /// In-memory persisted history.
    #[derive(Default)]
    pub struct MemoryHistory {
        trips: HashMap<String, Vec<Turn>>,
    }

    impl MemoryHistory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&mut self, trip_id: impl Into<String>, turns: Vec<Turn>) {
            self.trips.insert(trip_id.into(), turns);
        }
    }

    #[async_trait]
    impl HistorySource for MemoryHistory {
        async fn load(&self, trip_id: &str) -> Result<Vec<Turn>> {
            Ok(self.trips.get(trip_id).cloned().unwrap_or_default())
        }
    }
}
