//! HTTP and WebSocket request handlers.

pub mod assistant;
pub mod http;
pub mod ws;

pub use assistant::*;
pub use http::*;
pub use ws::*;
