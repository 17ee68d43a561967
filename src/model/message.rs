//! The message envelope exchanged between clients and the relay.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Tag selecting how a message is routed and how its payload is shaped.
///
/// Any string the relay does not recognize deserializes to
/// [`MessageType::Unrecognized`]; such messages are accepted on the wire but
/// never routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Chat text, broadcast to the whole room including the sender.
    Chat,
    /// WebRTC SDP offer.
    WebrtcOffer,
    /// WebRTC SDP answer.
    WebrtcAnswer,
    /// WebRTC ICE candidate.
    WebrtcCandidate,
    /// Server-generated room notification. Never accepted from a client.
    System,
    /// Anything else found on the wire.
    #[serde(untagged)]
    Unrecognized(String),
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Chat => write!(f, "chat"),
            MessageType::WebrtcOffer => write!(f, "webrtc_offer"),
            MessageType::WebrtcAnswer => write!(f, "webrtc_answer"),
            MessageType::WebrtcCandidate => write!(f, "webrtc_candidate"),
            MessageType::System => write!(f, "system"),
            MessageType::Unrecognized(other) => write!(f, "{other}"),
        }
    }
}

/// Envelope for every message exchanged over a relay connection.
///
/// `payload` stays opaque until a router needs it; its shape is keyed by
/// `kind`. The `room_id`, `sender_user_id` and `timestamp` fields are always
/// overwritten by the relay at ingress, whatever the client put there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub payload: Value,
    #[serde(rename = "roomID", default, skip_serializing_if = "String::is_empty")]
    pub room_id: String,
    #[serde(
        rename = "senderUserID",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub sender_user_id: String,
    #[serde(default, skip_serializing_if = "timestamp_unset")]
    pub timestamp: i64,
}

fn timestamp_unset(ts: &i64) -> bool {
    *ts == 0
}

impl WsMessage {
    /// Builds a server-originated message stamped with the current time.
    pub fn server(kind: MessageType, payload: Value, room_id: &str) -> Self {
        Self {
            kind,
            payload,
            room_id: room_id.to_string(),
            sender_user_id: String::new(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Overwrites the server-assigned fields at ingress, discarding whatever
    /// the client supplied for them.
    pub fn enrich(&mut self, sender_user_id: &str, room_id: &str) {
        self.sender_user_id = sender_user_id.to_string();
        self.room_id = room_id.to_string();
        self.timestamp = Utc::now().timestamp_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_tag_round_trips() {
        let msg: WsMessage =
            serde_json::from_str(r#"{"type":"webrtc_offer","payload":{}}"#).unwrap();
        assert_eq!(msg.kind, MessageType::WebrtcOffer);
        assert!(msg.room_id.is_empty());
        assert_eq!(msg.timestamp, 0);
    }

    #[test]
    fn unknown_type_is_preserved_not_rejected() {
        let msg: WsMessage =
            serde_json::from_str(r#"{"type":"pomodoro_started","payload":null}"#).unwrap();
        assert_eq!(
            msg.kind,
            MessageType::Unrecognized("pomodoro_started".to_string())
        );
        let out = serde_json::to_value(&msg).unwrap();
        assert_eq!(out["type"], "pomodoro_started");
    }

    #[test]
    fn enrich_overwrites_client_supplied_fields() {
        let mut msg: WsMessage = serde_json::from_value(json!({
            "type": "chat",
            "payload": {"content": "hi"},
            "roomID": "spoofed-room",
            "senderUserID": "mallory",
            "timestamp": 1,
        }))
        .unwrap();

        msg.enrich("alice", "room-1");

        assert_eq!(msg.sender_user_id, "alice");
        assert_eq!(msg.room_id, "room-1");
        assert!(msg.timestamp > 1);
    }

    #[test]
    fn server_fields_serialize_with_wire_names() {
        let msg = WsMessage::server(MessageType::Chat, json!({"content": "hi"}), "room-1");
        let out = serde_json::to_value(&msg).unwrap();
        assert_eq!(out["type"], "chat");
        assert_eq!(out["roomID"], "room-1");
        assert!(out.get("senderUserID").is_none());
        assert!(out["timestamp"].as_i64().unwrap() > 0);
    }
}
