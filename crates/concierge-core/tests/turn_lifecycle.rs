use std::sync::Arc;
use std::time::Duration;

use concierge_core::mocks::{BrokenQuota, ChannelTransport, MemoryHistory, StaticQuota};
use concierge_core::{
    ConciergeSession, Conversation, ConversationStatus, ErrorKind, TurnError, TurnInput,
    TurnOutcome, Turn,
};
use protocol::{Metadata, StreamEvent};
use tokio::sync::Mutex;

type Taps = tokio::sync::mpsc::UnboundedReceiver<(
    protocol::TurnRequest,
    tokio::sync::mpsc::Sender<StreamEvent>,
)>;

fn session(trip: &str) -> (ConciergeSession<ChannelTransport, StaticQuota>, Taps) {
    let conversation = Arc::new(Mutex::new(Conversation::new(trip)));
    let (transport, taps) = ChannelTransport::new();
    let session = ConciergeSession::new(
        Arc::new(transport),
        Arc::new(StaticQuota::allowing()),
        conversation,
    );
    (session, taps)
}

#[tokio::test]
async fn chunked_answer_completes_and_caches() {
    let (session, mut taps) = session("trip-1");
    let mut handle = session
        .begin_turn(TurnInput::new("where is the hotel"))
        .await
        .unwrap();

    let (request, feed) = taps.recv().await.unwrap();
    assert_eq!(request.message, "where is the hotel");
    assert_eq!(request.trip_id, "trip-1");

    feed.send(StreamEvent::chunk("I'm at ")).await.unwrap();
    feed.send(StreamEvent::chunk("the Hilton")).await.unwrap();
    feed.send(StreamEvent::Metadata(Metadata::default()))
        .await
        .unwrap();
    feed.send(StreamEvent::Done).await.unwrap();

    assert_eq!(handle.join().await, TurnOutcome::Completed);

    let conv = session.conversation();
    let conv = conv.lock().await;
    assert_eq!(conv.status(), ConversationStatus::Ready);
    assert!(conv.last_success().is_some());
    assert_eq!(conv.turns().len(), 2);
    assert_eq!(conv.turns()[1].content, "I'm at the Hilton");

    let hit = session
        .cache()
        .lock()
        .await
        .get("trip-1", "where is the hotel")
        .expect("completed answer should be cached");
    assert_eq!(hit.content, "I'm at the Hilton");
}

#[tokio::test]
async fn empty_done_falls_back_and_is_not_cached() {
    let (session, mut taps) = session("trip-1");
    let mut handle = session
        .begin_turn(TurnInput::new("where is the hotel"))
        .await
        .unwrap();
    let (_, feed) = taps.recv().await.unwrap();
    feed.send(StreamEvent::Done).await.unwrap();

    assert_eq!(handle.join().await, TurnOutcome::Completed);

    let conv = session.conversation();
    let conv = conv.lock().await;
    assert!(!conv.turns()[1].content.is_empty());
    assert!(session
        .cache()
        .lock()
        .await
        .get("trip-1", "where is the hotel")
        .is_none());
}

#[tokio::test]
async fn quota_denial_preserves_the_draft() {
    let conversation = Arc::new(Mutex::new(Conversation::new("trip-1")));
    let (transport, _taps) = ChannelTransport::new();
    let session = ConciergeSession::new(
        Arc::new(transport),
        Arc::new(StaticQuota::denying()),
        conversation.clone(),
    );

    let err = session
        .begin_turn(TurnInput::new("plan my evening"))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnError::QuotaExceeded { limit: 10, .. }));
    // No turn was created; the caller still holds the draft.
    let conv = conversation.lock().await;
    assert!(conv.turns().is_empty());
    // The rejection is tagged on the conversation without changing its
    // status: nothing was ever submitted.
    assert_eq!(conv.last_error().unwrap().kind, ErrorKind::QuotaExceeded);
    assert_eq!(conv.status(), ConversationStatus::Idle);
}

#[tokio::test]
async fn failed_quota_check_is_a_distinct_deny() {
    let conversation = Arc::new(Mutex::new(Conversation::new("trip-1")));
    let (transport, _taps) = ChannelTransport::new();
    let session = ConciergeSession::new(Arc::new(transport), Arc::new(BrokenQuota), conversation.clone());

    let err = session
        .begin_turn(TurnInput::new("plan my evening"))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnError::QuotaUnavailable(_)));
    let conv = conversation.lock().await;
    assert!(conv.turns().is_empty());
    assert_eq!(conv.last_error().unwrap().kind, ErrorKind::QuotaUnavailable);
}

#[tokio::test]
async fn delete_user_turn_removes_its_answer() {
    let (session, mut taps) = session("trip-1");
    let mut handle = session
        .begin_turn(TurnInput::new("where is the hotel"))
        .await
        .unwrap();
    let (_, feed) = taps.recv().await.unwrap();
    feed.send(StreamEvent::chunk("At the Hilton")).await.unwrap();
    feed.send(StreamEvent::Done).await.unwrap();
    let user_id = handle.user_turn_id;
    handle.join().await;

    assert!(session.delete_turn(user_id).await);
    let conv = session.conversation();
    let conv = conv.lock().await;
    assert!(conv.turns().is_empty(), "no orphaned assistant turn remains");
}

#[tokio::test]
async fn hydration_applies_once_and_never_clobbers() {
    let (session, _taps) = session("trip-7");
    let mut history = MemoryHistory::new();
    history.insert("trip-7", vec![Turn::user("old question")]);

    assert!(session.hydrate(&history).await.unwrap());
    assert!(!session.hydrate(&history).await.unwrap());
    let conv = session.conversation();
    assert_eq!(conv.lock().await.turns().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn outer_watchdog_stays_quiet_after_clean_finish() {
    let (session, mut taps) = session("trip-1");
    let mut handle = session
        .begin_turn(TurnInput::new("where is the hotel"))
        .await
        .unwrap();
    let (_, feed) = taps.recv().await.unwrap();
    feed.send(StreamEvent::chunk("At the Hilton")).await.unwrap();
    feed.send(StreamEvent::Done).await.unwrap();
    assert_eq!(handle.join().await, TurnOutcome::Completed);

    // Well past the timeout plus grace; the grace timer must have been
    // released rather than left to flip the status later.
    tokio::time::sleep(Duration::from_secs(120)).await;
    let conv = session.conversation();
    assert_eq!(conv.lock().await.status(), ConversationStatus::Ready);
}
