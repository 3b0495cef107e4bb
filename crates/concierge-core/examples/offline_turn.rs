//! Drives one scripted turn end to end, then shows the offline path when
//! the transport refuses to open. Run with:
//! `cargo run -p concierge-core --example offline_turn`

use std::sync::Arc;

use concierge_core::mocks::{ChannelTransport, FailingTransport, StaticQuota};
use concierge_core::{
    ConciergeSession, Conversation, FallbackContext, TurnInput,
};
use protocol::StreamEvent;
use serde_json::json;
use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .init();

    // A scripted stream: tool result first, then text, then done.
    let conversation = Arc::new(Mutex::new(Conversation::new("demo-trip")));
    let (transport, mut taps) = ChannelTransport::new();
    let session = ConciergeSession::new(
        Arc::new(transport),
        Arc::new(StaticQuota::allowing()),
        conversation.clone(),
    );

    let mut handle = session
        .begin_turn(TurnInput::new("find restaurants near our hotel"))
        .await?;
    let (_, feed) = taps.recv().await.expect("transport tap");
    feed.send(StreamEvent::tool_result(
        "searchPlaces",
        json!({"places": [{"name": "Bistro Andante", "rating": 4.7}]}),
    ))
    .await?;
    feed.send(StreamEvent::chunk("Bistro Andante is a short walk away."))
        .await?;
    feed.send(StreamEvent::Done).await?;
    println!("streamed turn outcome: {:?}", handle.join().await);

    {
        let conv = conversation.lock().await;
        let turn = conv.turns().last().unwrap();
        println!("assistant: {} ({} places)", turn.content, turn.places.len());
    }

    // Same question offline: the cached snapshot answers it.
    let offline = ConciergeSession::new(
        Arc::new(FailingTransport),
        Arc::new(StaticQuota::allowing()),
        conversation.clone(),
    )
    .with_cache(session.cache());
    // The hosting UI reads the same cache for offline display.
    let cache = session.cache();
    if let Some(hit) = cache.lock().await.get("demo-trip", "restaurants near hotel") {
        println!("cache hit: {}", hit.content);
    }

    let context = FallbackContext {
        base_location: Some("Hotel Okura, Tokyo".to_string()),
        ..FallbackContext::default()
    };
    let mut handle = offline
        .begin_turn(TurnInput::new("where is the hotel").with_context(context))
        .await?;
    println!("offline turn outcome: {:?}", handle.join().await);
    let conv = conversation.lock().await;
    println!("assistant: {}", conv.turns().last().unwrap().content);
    println!("conversation status: {}", conv.status());

    Ok(())
}
