//! Event and message models for WebSocket and HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;
use crate::models::presence::UserId;

/// A persisted direct message, as handed over by the REST message layer.
///
/// Field names match the chat client's record format. Fields this service
/// does not interpret (`updatedAt`, `__v`, ...) are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryEvent {
    #[serde(rename = "_id")]
    #[validate(length(min = 1, max = 128))]
    pub id: String,
    #[validate(length(min = 1, max = 128))]
    pub sender_id: String,
    #[validate(length(min = 1, max = 128))]
    pub receiver_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DeliveryEvent {
    /// Field limits, a routable recipient, and at least one kind of content.
    pub fn check(&self) -> Result<UserId, AppError> {
        self.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let has_text = self.text.as_deref().is_some_and(|t| !t.trim().is_empty());
        let has_image = self.image.as_deref().is_some_and(|i| !i.is_empty());
        if !has_text && !has_image {
            return Err(AppError::Validation(
                "message needs text or image".to_string(),
            ));
        }
        Ok(UserId::parse(&self.receiver_id)?)
    }
}

/// Events pushed to clients: `{"event": name, "data": payload}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connection_established")]
    ConnectionEstablished { socket_id: String },
    #[serde(rename = "getOnlineUsers")]
    GetOnlineUsers(Vec<String>),
    #[serde(rename = "newMessage")]
    NewMessage(DeliveryEvent),
    /// Unread badge hint for the recipient's contact list.
    #[serde(rename = "messageIndicatorUpdate", rename_all = "camelCase")]
    MessageIndicatorUpdate { sender_id: String },
    #[serde(rename = "pong")]
    Pong,
}

impl ServerEvent {
    /// Encode as a WebSocket text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// WebSocket client message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> serde_json::Value {
        json!({
            "_id": "m1",
            "senderId": "u2",
            "receiverId": "u1",
            "text": "hello",
            "createdAt": "2024-03-01T10:00:00.000Z",
            "updatedAt": "2024-03-01T10:00:00.000Z",
            "__v": 0
        })
    }

    #[test]
    fn delivery_event_reads_client_record() {
        let ev: DeliveryEvent = serde_json::from_value(record()).unwrap();
        assert_eq!(ev.id, "m1");
        assert_eq!(ev.sender_id, "u2");
        assert_eq!(ev.receiver_id, "u1");
        assert_eq!(ev.text.as_deref(), Some("hello"));
        assert!(ev.image.is_none());
        assert_eq!(ev.extra.get("__v"), Some(&json!(0)));
        assert_eq!(ev.check().unwrap().as_str(), "u1");
    }

    #[test]
    fn new_message_frame_keeps_record_fields() {
        let ev: DeliveryEvent = serde_json::from_value(record()).unwrap();
        let frame = ServerEvent::NewMessage(ev).to_frame().unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["event"], "newMessage");
        assert_eq!(v["data"]["_id"], "m1");
        assert_eq!(v["data"]["senderId"], "u2");
        assert_eq!(v["data"]["updatedAt"], "2024-03-01T10:00:00.000Z");
        assert!(v["data"].get("image").is_none());
    }

    #[test]
    fn check_rejects_empty_content() {
        let mut raw = record();
        raw["text"] = json!("  ");
        let ev: DeliveryEvent = serde_json::from_value(raw).unwrap();
        assert!(ev.check().is_err());
    }

    #[test]
    fn check_accepts_image_only() {
        let mut raw = record();
        raw.as_object_mut().unwrap().remove("text");
        raw["image"] = json!("https://cdn.example.com/a.png");
        let ev: DeliveryEvent = serde_json::from_value(raw).unwrap();
        assert!(ev.check().is_ok());
    }

    #[test]
    fn check_rejects_reserved_recipient() {
        let mut raw = record();
        raw["receiverId"] = json!("gemini-ai");
        let ev: DeliveryEvent = serde_json::from_value(raw).unwrap();
        assert!(matches!(ev.check(), Err(AppError::Validation(_))));
    }

    #[test]
    fn online_users_frame() {
        let frame = ServerEvent::GetOnlineUsers(vec!["u1".into(), "u2".into()])
            .to_frame()
            .unwrap();
        assert_eq!(frame, r#"{"event":"getOnlineUsers","data":["u1","u2"]}"#);
    }

    #[test]
    fn indicator_frame_names_the_sender() {
        let frame = ServerEvent::MessageIndicatorUpdate {
            sender_id: "u2".into(),
        }
        .to_frame()
        .unwrap();
        assert_eq!(
            frame,
            r#"{"event":"messageIndicatorUpdate","data":{"senderId":"u2"}}"#
        );
    }

    #[test]
    fn client_ping_parses() {
        let msg: ClientMessage = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }
}
