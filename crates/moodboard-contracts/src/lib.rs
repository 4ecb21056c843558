pub mod chat;
pub mod conversation;
pub mod events;
pub mod state_file;

pub use conversation::{ConversationId, ImageRef};
