//! Typed payloads carried inside a [`WsMessage`](crate::model::message::WsMessage).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Content of a `chat` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    pub content: String,
    #[serde(
        rename = "userDisplayName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub user_display_name: Option<String>,
}

/// Payload of the `webrtc_offer` / `webrtc_answer` / `webrtc_candidate`
/// message types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPayload {
    /// "offer", "answer" or "candidate".
    pub signal_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
    /// Unicast hint. An empty string counts as unset.
    #[serde(
        rename = "targetUserID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_user_id: Option<String>,
}

impl SignalPayload {
    /// The unicast target, if one was meaningfully supplied.
    pub fn target(&self) -> Option<&str> {
        self.target_user_id.as_deref().filter(|t| !t.is_empty())
    }
}

/// A network path descriptor exchanged during ICE negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: u16,
}

/// Payload of server-generated `system` notifications within a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPayload {
    /// e.g. "user_joined_room", "user_left_room".
    pub event: String,
    pub message: String,
    #[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl SystemPayload {
    pub fn new(event: &str, message: String, user_id: &str) -> Self {
        Self {
            event: event.to_string(),
            message,
            user_id: Some(user_id.to_string()),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_payload_wire_names() {
        let payload: SignalPayload = serde_json::from_str(
            r#"{
                "signalType": "candidate",
                "candidate": {"candidate": "candidate:0 1 UDP", "sdpMid": "0", "sdpMLineIndex": 0},
                "targetUserID": "bob"
            }"#,
        )
        .unwrap();

        assert_eq!(payload.signal_type, "candidate");
        assert_eq!(payload.target(), Some("bob"));
        assert_eq!(payload.candidate.unwrap().sdp_m_line_index, 0);
    }

    #[test]
    fn empty_target_means_unset() {
        let payload: SignalPayload =
            serde_json::from_str(r#"{"signalType": "offer", "sdp": "v=0", "targetUserID": ""}"#)
                .unwrap();
        assert_eq!(payload.target(), None);
    }
}
