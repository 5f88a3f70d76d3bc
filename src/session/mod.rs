//! Conversation memory keyed by remote identity

mod cache;
mod message;

pub use cache::{session_key, SessionCache};
pub use message::{Message, Role};
