use serde::{Deserialize, Serialize};

/// JID WhatsApp uses for status ("stories") broadcast traffic.
pub const STATUS_BROADCAST_JID: &str = "status@broadcast";

/// Where a session's notifications go: the chat that requested it, and
/// whether it was opened through the admin bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOrigin {
    pub chat_id: String,
    pub privileged: bool,
}

/// A message received on a WhatsApp session.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Chat JID the message arrived in.
    pub chat: String,
    /// Sender JID.
    pub sender: String,
    pub sender_name: Option<String>,
    pub body: String,
}

impl InboundMessage {
    /// Status updates are routed separately from regular messages.
    pub fn is_status(&self) -> bool {
        self.chat == STATUS_BROADCAST_JID
    }
}

/// A group membership change on a WhatsApp session.
#[derive(Debug, Clone)]
pub struct GroupUpdate {
    pub group: String,
    /// "add", "remove", "promote", "demote" — as reported by the protocol.
    pub action: String,
    pub participants: Vec<String>,
}

/// Event stream of one live connection, as seen by the session pump.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The connection reached the open state.
    Open,
    /// The connection closed. `logged_out` means the device was unlinked
    /// on the phone and reconnecting is pointless.
    Closed { reason: String, logged_out: bool },
    Message(InboundMessage),
    GroupUpdate(GroupUpdate),
    /// The protocol library persisted refreshed credentials.
    CredentialsSaved,
}

// ── Sidecar wire protocol ───────────────────────────────────────────────────

/// Messages sent to the sidecar.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    Login {
        request_id: String,
        number: String,
        auth_dir: String,
    },
    RequestPairingCode {
        request_id: String,
        number: String,
    },
    SendText {
        request_id: String,
        number: String,
        to: String,
        body: String,
    },
}

impl GatewayMessage {
    pub fn request_id(&self) -> &str {
        match self {
            Self::Login { request_id, .. }
            | Self::RequestPairingCode { request_id, .. }
            | Self::SendText { request_id, .. } => request_id,
        }
    }
}

/// Messages received from the sidecar.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    LoginResult {
        request_id: String,
        number: String,
        success: bool,
        #[serde(default)]
        registered: bool,
        #[serde(default)]
        error: Option<String>,
    },
    PairingCode {
        request_id: String,
        number: String,
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Connected {
        number: String,
    },
    Disconnected {
        number: String,
        reason: String,
        #[serde(default)]
        logged_out: bool,
    },
    Message {
        number: String,
        chat: String,
        sender: String,
        #[serde(default)]
        sender_name: Option<String>,
        body: String,
    },
    GroupUpdate {
        number: String,
        group: String,
        action: String,
        #[serde(default)]
        participants: Vec<String>,
    },
    CredsSaved {
        number: String,
    },
    Error {
        #[serde(default)]
        number: Option<String>,
        error: String,
    },
}

impl SidecarMessage {
    /// The correlation ID, for request/response messages.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::LoginResult { request_id, .. }
            | Self::PairingCode { request_id, .. }
            | Self::SendResult { request_id, .. } => Some(request_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_jid_detected() {
        let msg = InboundMessage {
            chat: STATUS_BROADCAST_JID.into(),
            sender: "123@s.whatsapp.net".into(),
            sender_name: None,
            body: "story".into(),
        };
        assert!(msg.is_status());
    }

    #[test]
    fn gateway_message_serializes_tagged() {
        let msg = GatewayMessage::Login {
            request_id: "r1".into(),
            number: "19876543210".into(),
            auth_dir: "/tmp/session/19876543210".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "login");
        assert_eq!(json["number"], "19876543210");
    }

    #[test]
    fn sidecar_message_round_trips() {
        let raw = r#"{"type":"disconnected","number":"1555","reason":"connection lost"}"#;
        let msg: SidecarMessage = serde_json::from_str(raw).unwrap();
        match msg {
            SidecarMessage::Disconnected {
                number,
                reason,
                logged_out,
            } => {
                assert_eq!(number, "1555");
                assert_eq!(reason, "connection lost");
                assert!(!logged_out);
            },
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    #[test]
    fn request_ids_extracted() {
        let msg: SidecarMessage = serde_json::from_str(
            r#"{"type":"send_result","request_id":"abc","success":true}"#,
        )
        .unwrap();
        assert_eq!(msg.request_id(), Some("abc"));

        let msg: SidecarMessage =
            serde_json::from_str(r#"{"type":"creds_saved","number":"1555"}"#).unwrap();
        assert!(msg.request_id().is_none());
    }
}
