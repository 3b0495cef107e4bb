pub mod registry;
pub mod store;
pub mod turn;

pub use registry::ConversationRegistry;
pub use store::{Conversation, ConversationStatus, LastError};
pub use turn::{Role, Turn, TurnPatch};
