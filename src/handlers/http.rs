//! HTTP handlers: delivery trigger, online users, health.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::config::{Config, HeartbeatConfig};
use crate::error::{AppError, AppResult};
use crate::middleware::{OriginPolicy, ServiceKey};
use crate::models::event::DeliveryEvent;
use crate::repositories::RedisRepository;
use crate::services::{
    AssistantService, DeliveryBridge, DeliveryNotifier, Gateway, ListenerStatus, PresenceRegistry,
};

/// Shared application state for HTTP and WS.
#[derive(Clone)]
pub struct AppState {
    pub app_key: String,
    pub gateway: Gateway,
    pub bridge: DeliveryBridge,
    pub assistant: AssistantService,
    pub origins: OriginPolicy,
    pub heartbeat: HeartbeatConfig,
    pub outbound_buffer: usize,
}

impl AppState {
    /// Wire registry, gateway, notifier, and bridge from configuration.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let registry = PresenceRegistry::new();
        let gateway = Gateway::new(registry.clone(), config.outbound_buffer);
        let notifier = DeliveryNotifier::new(registry);
        let bridge = match &config.redis_url {
            Some(url) => DeliveryBridge::with_redis(
                notifier,
                Arc::new(RedisRepository::new(url)?),
                config.delivery_channel.clone(),
            ),
            None => DeliveryBridge::local(notifier),
        };

        Ok(Self {
            app_key: config.app_key.clone(),
            gateway,
            bridge,
            assistant: AssistantService::new(config.assistant.clone())?,
            origins: OriginPolicy::new(&config.allowed_origins),
            heartbeat: config.heartbeat,
            outbound_buffer: config.outbound_buffer,
        })
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn registry(&self) -> &PresenceRegistry {
        self.gateway.registry()
    }
}

/// POST /api/notify: the REST message layer hands over a persisted message.
/// Requires header: x-app-key: <APP_KEY>.
pub async fn notify(
    State(state): State<AppState>,
    _key: ServiceKey,
    Json(event): Json<DeliveryEvent>,
) -> Result<Json<serde_json::Value>, AppError> {
    event.check()?;
    let outcome = state.bridge.dispatch(&event).await?;
    info!(message_id = %event.id, recipient = %event.receiver_id, "delivery dispatched");

    Ok(Json(json!({
        "ok": true,
        "message_id": event.id,
        "delivery": outcome
    })))
}

/// GET /api/online-users: users with at least one live connection.
pub async fn online_users(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.registry().snapshot().ids())
}

/// GET /health: liveness probe. 503 while the Redis delivery listener is
/// down, since published messages are not reaching this instance.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let listener = state.bridge.listener_status();
    let (code, status) = match listener {
        ListenerStatus::Down => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
        _ => (StatusCode::OK, "ok"),
    };
    (
        code,
        Json(json!({
            "status": status,
            "service": "chatline",
            "online_users": state.registry().online_count(),
            "connections": state.gateway().open_connections(),
            "delivery": if state.bridge.is_distributed() { "redis" } else { "local" },
            "listener": listener
        })),
    )
}
