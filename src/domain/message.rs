use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Read,
}

impl MessageStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Read => "read",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub read_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_ids: Vec<Uuid>,
    pub content: String,
    pub is_draft: bool,
    pub status: MessageStatus,
    pub read_by: Vec<ReadReceipt>,
    pub reactions: Vec<Reaction>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Message {
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    #[must_use]
    pub fn has_receipt_from(&self, user_id: Uuid) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }

    /// True once every recipient has acknowledged the message.
    #[must_use]
    pub fn is_read_by_all(&self) -> bool {
        self.recipient_ids.iter().all(|id| self.has_receipt_from(*id))
    }
}

/// Payload accepted by `send_message`. `thread_id` historically appeared
/// under two key names; both are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(alias = "conversationId")]
    pub thread_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub is_draft: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn message(recipients: Vec<Uuid>) -> Message {
        let now = OffsetDateTime::now_utc();
        Message {
            id: uid(100),
            thread_id: uid(200),
            sender_id: uid(1),
            recipient_ids: recipients,
            content: "hi".to_string(),
            is_draft: false,
            status: MessageStatus::Sent,
            read_by: Vec::new(),
            reactions: Vec::new(),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn read_by_all_requires_every_recipient() {
        let mut msg = message(vec![uid(2), uid(3)]);
        assert!(!msg.is_read_by_all());

        msg.read_by.push(ReadReceipt { user_id: uid(2), read_at: OffsetDateTime::now_utc() });
        assert!(!msg.is_read_by_all());

        msg.read_by.push(ReadReceipt { user_id: uid(3), read_at: OffsetDateTime::now_utc() });
        assert!(msg.is_read_by_all());
    }

    #[test]
    fn new_message_accepts_both_thread_key_names() {
        let current: NewMessage = serde_json::from_value(serde_json::json!({
            "threadId": uid(1),
            "senderId": uid(2),
            "content": "hello"
        }))
        .expect("current key name");
        assert_eq!(current.thread_id, uid(1));

        let legacy: NewMessage = serde_json::from_value(serde_json::json!({
            "conversationId": uid(1),
            "senderId": uid(2),
            "content": "hello"
        }))
        .expect("legacy key name");
        assert_eq!(legacy.thread_id, uid(1));
    }
}
