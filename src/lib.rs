//! Realtime presence and message delivery for a chat application.
//!
//! Tracks which users are online across their live WebSocket connections,
//! broadcasts the online-user set on every join and leave, and pushes newly
//! persisted messages to the recipient's connections. Message storage,
//! authentication, and the chat UI live elsewhere.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;

pub use config::Config;
pub use error::{AppError, RealtimeError};
pub use handlers::http::AppState;
pub use services::delivery::DeliveryNotifier;
pub use services::gateway::Gateway;
pub use services::presence::PresenceRegistry;

use axum::routing::{get, post};
use handlers::http;
use tower_http::trace::TraceLayer;

/// Build the router (ws, notify, online users, assistant, health). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    let cors = state.origins.cors_layer();

    axum::Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/api/notify", post(handlers::notify))
        .route("/api/online-users", get(handlers::online_users))
        .route("/api/gemini", post(handlers::assistant_reply))
        .route("/health", get(http::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
