use crate::domain::message::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events a connected client may send over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename = "auth")]
    Auth { token: String },
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "threadId", alias = "conversationId")]
        thread_id: Uuid,
    },
    #[serde(rename = "leave")]
    Leave {
        #[serde(rename = "threadId", alias = "conversationId")]
        thread_id: Uuid,
    },
    #[serde(rename = "message:send")]
    MessageSend {
        #[serde(rename = "threadId", alias = "conversationId")]
        thread_id: Uuid,
        content: String,
        #[serde(rename = "isDraft", default)]
        is_draft: bool,
    },
    #[serde(rename = "typing:start")]
    TypingStart {
        #[serde(rename = "threadId", alias = "conversationId")]
        thread_id: Uuid,
    },
    #[serde(rename = "typing:stop")]
    TypingStop {
        #[serde(rename = "threadId", alias = "conversationId")]
        thread_id: Uuid,
    },
}

impl ClientEvent {
    /// Required top-level fields per event type, checked before typed
    /// deserialization so the client gets a field-level error.
    #[must_use]
    pub fn required_fields(event_type: &str) -> Option<&'static [&'static str]> {
        match event_type {
            "auth" => Some(&["token"]),
            "join" | "leave" | "typing:start" | "typing:stop" => Some(&["threadId"]),
            "message:send" => Some(&["threadId", "content"]),
            _ => None,
        }
    }
}

/// Checks a raw inbound frame against the required-field table.
///
/// # Errors
/// Returns a client-safe description of what is missing or unknown.
pub fn validate_event_shape(raw: &serde_json::Value) -> Result<(), String> {
    let Some(event_type) = raw.get("type").and_then(serde_json::Value::as_str) else {
        return Err("missing field: type".to_string());
    };

    let Some(required) = ClientEvent::required_fields(event_type) else {
        return Err(format!("unknown event type: {event_type}"));
    };

    for field in required {
        let present = match *field {
            // threadId historically also appears as conversationId.
            "threadId" => raw.get("threadId").or_else(|| raw.get("conversationId")).is_some(),
            other => raw.get(other).is_some(),
        };
        if !present {
            return Err(format!("missing field: {field}"));
        }
    }

    Ok(())
}

/// Events the gateway emits to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "auth:success")]
    AuthSuccess {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
    #[serde(rename = "notification")]
    Notification {
        #[serde(rename = "threadId")]
        thread_id: Uuid,
        #[serde(rename = "senderId")]
        sender_id: Uuid,
        preview: String,
    },
    #[serde(rename = "message:received")]
    MessageReceived { message: Message },
    #[serde(rename = "typing:started")]
    TypingStarted {
        #[serde(rename = "threadId")]
        thread_id: Uuid,
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
    #[serde(rename = "typing:stopped")]
    TypingStopped {
        #[serde(rename = "threadId")]
        thread_id: Uuid,
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_events_parse_by_type_tag() {
        let event: ClientEvent =
            serde_json::from_value(json!({"type": "typing:start", "threadId": Uuid::from_u128(1)}))
                .expect("typing event");
        assert_eq!(event, ClientEvent::TypingStart { thread_id: Uuid::from_u128(1) });

        let event: ClientEvent = serde_json::from_value(json!({"type": "auth", "token": "abc"})).expect("auth event");
        assert_eq!(event, ClientEvent::Auth { token: "abc".to_string() });
    }

    #[test]
    fn message_send_accepts_legacy_thread_key() {
        let event: ClientEvent = serde_json::from_value(json!({
            "type": "message:send",
            "conversationId": Uuid::from_u128(5),
            "content": "hi"
        }))
        .expect("legacy key");
        assert_eq!(
            event,
            ClientEvent::MessageSend { thread_id: Uuid::from_u128(5), content: "hi".to_string(), is_draft: false }
        );
    }

    #[test]
    fn shape_validation_reports_missing_fields() {
        let err = validate_event_shape(&json!({"type": "message:send", "threadId": Uuid::from_u128(1)}))
            .expect_err("content missing");
        assert_eq!(err, "missing field: content");

        let err = validate_event_shape(&json!({"type": "warp"})).expect_err("unknown type");
        assert!(err.contains("unknown event type"));

        assert!(validate_event_shape(&json!({
            "type": "join",
            "conversationId": Uuid::from_u128(2)
        }))
        .is_ok());
    }

    #[test]
    fn outbound_error_event_serializes_with_tag() {
        let value = serde_json::to_value(ServerEvent::Error {
            code: "rate_limited".to_string(),
            message: "Rate limit exceeded".to_string(),
        })
        .expect("serialize");
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "rate_limited");
    }
}
