use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::session::store::Conversation;

/// Owns every live conversation, keyed by trip id. Hosts pass a handle to
/// this registry down to whatever drives turns; nothing reaches for it as
/// ambient global state.
#[derive(Default)]
pub struct ConversationRegistry {
    conversations: std::sync::Mutex<HashMap<String, Arc<Mutex<Conversation>>>>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the conversation for a trip, creating it on first access.
    pub fn conversation(&self, trip_id: &str) -> Arc<Mutex<Conversation>> {
        let mut map = self.conversations.lock().unwrap();
        map.entry(trip_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Conversation::new(trip_id))))
            .clone()
    }

    pub fn contains(&self, trip_id: &str) -> bool {
        self.conversations.lock().unwrap().contains_key(trip_id)
    }

    /// Drop a conversation (e.g., trip closed). Existing handles stay
    /// valid until released; the registry just forgets the key.
    pub fn remove(&self, trip_id: &str) -> bool {
        self.conversations.lock().unwrap().remove(trip_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_trip_yields_same_conversation() {
        let registry = ConversationRegistry::new();
        let a = registry.conversation("trip-9");
        let b = registry.conversation("trip-9");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.contains("trip-9"));
    }

    #[tokio::test]
    async fn remove_forgets_the_key() {
        let registry = ConversationRegistry::new();
        let a = registry.conversation("trip-9");
        assert!(registry.remove("trip-9"));
        assert!(!registry.remove("trip-9"));
        let b = registry.conversation("trip-9");
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
