//! Data models for connections, presence, events, and the assistant relay.

pub mod assistant;
pub mod event;
pub mod presence;

pub use assistant::{AssistantReply, AssistantRequest};
pub use event::*;
pub use presence::*;
