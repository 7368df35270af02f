//! Push newly persisted messages to the recipient's live connections.

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::error::RealtimeError;
use crate::models::event::{DeliveryEvent, ServerEvent};
use crate::services::presence::PresenceRegistry;

/// What one `notify` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub recipient: String,
    /// Connections the recipient had when the push started.
    pub connections: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Fire-and-forget delivery: no ack, no retry, no queueing for offline users.
/// An offline recipient reads the message from history on next login.
#[derive(Clone)]
pub struct DeliveryNotifier {
    registry: PresenceRegistry,
}

impl DeliveryNotifier {
    pub fn new(registry: PresenceRegistry) -> Self {
        Self { registry }
    }

    #[instrument(skip(self, event), fields(message_id = %event.id, recipient = %event.receiver_id))]
    pub fn notify(&self, event: &DeliveryEvent) -> Result<DeliveryReport, RealtimeError> {
        let mut report = DeliveryReport {
            recipient: event.receiver_id.clone(),
            ..DeliveryReport::default()
        };

        let targets = self.registry.connections_for(&event.receiver_id);
        if targets.is_empty() {
            debug!("recipient offline; nothing pushed");
            return Ok(report);
        }

        let frame = ServerEvent::NewMessage(event.clone()).to_frame()?;
        let indicator = ServerEvent::MessageIndicatorUpdate {
            sender_id: event.sender_id.clone(),
        }
        .to_frame()?;
        report.connections = targets.len();
        for conn in targets {
            match conn.push(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(error = %e, "push failed");
                    report.failed += 1;
                    continue;
                }
            }
            if let Err(e) = conn.push(indicator.clone()) {
                debug!(error = %e, "indicator dropped");
            }
        }

        debug!(delivered = report.delivered, failed = report.failed, "message pushed");
        Ok(report)
    }
}
