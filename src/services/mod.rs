//! Realtime core: presence registry, connection gateway, delivery, and the
//! assistant relay.

pub mod assistant;
pub mod bridge;
pub mod connection;
pub mod delivery;
pub mod gateway;
pub mod presence;

pub use assistant::AssistantService;
pub use bridge::{DeliveryBridge, DispatchOutcome, ListenerStatus};
pub use connection::ConnectionHandle;
pub use delivery::{DeliveryNotifier, DeliveryReport};
pub use gateway::{ConnectionState, DisconnectReason, Gateway, PresenceFeed, Session};
pub use presence::PresenceRegistry;
