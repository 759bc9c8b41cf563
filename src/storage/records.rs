use crate::domain::message::{Message, MessageStatus, Reaction, ReadReceipt};
use crate::domain::thread::{Thread, ThreadParties, ThreadStatus};
use crate::error::{AppError, Result};
use sqlx::FromRow;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, FromRow)]
pub(crate) struct ThreadRow {
    pub(crate) id: Uuid,
    pub(crate) participants: Option<Vec<Uuid>>,
    pub(crate) buyer_id: Option<Uuid>,
    pub(crate) seller_id: Option<Uuid>,
    pub(crate) status: String,
    pub(crate) last_message_id: Option<Uuid>,
    pub(crate) last_message_at: Option<OffsetDateTime>,
    pub(crate) last_message_text: Option<String>,
    pub(crate) last_message_sender_id: Option<Uuid>,
    pub(crate) metadata: serde_json::Value,
    pub(crate) created_by: Uuid,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

impl ThreadRow {
    pub(crate) fn into_thread(self, unread: HashMap<Uuid, i64>) -> Result<Thread> {
        let parties = match (self.participants, self.buyer_id, self.seller_id) {
            (Some(ids), _, _) => ThreadParties::Explicit(ids),
            (None, Some(buyer_id), Some(seller_id)) => ThreadParties::Legacy { buyer_id, seller_id },
            _ => {
                tracing::error!(thread_id = %self.id, "Thread row has neither participant shape");
                return Err(AppError::Internal);
            }
        };

        let status = ThreadStatus::parse(&self.status).ok_or_else(|| {
            tracing::error!(thread_id = %self.id, status = %self.status, "Unknown thread status");
            AppError::Internal
        })?;

        Ok(Thread {
            id: self.id,
            parties,
            status,
            last_message_id: self.last_message_id,
            last_message_at: self.last_message_at,
            last_message_text: self.last_message_text,
            last_message_sender_id: self.last_message_sender_id,
            unread,
            metadata: self.metadata,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct MessageRow {
    pub(crate) id: Uuid,
    pub(crate) thread_id: Uuid,
    pub(crate) sender_id: Uuid,
    pub(crate) recipient_ids: Vec<Uuid>,
    pub(crate) content: String,
    pub(crate) is_draft: bool,
    pub(crate) status: String,
    pub(crate) deleted_at: Option<OffsetDateTime>,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

impl MessageRow {
    pub(crate) fn into_message(self, read_by: Vec<ReadReceipt>, reactions: Vec<Reaction>) -> Result<Message> {
        let status = MessageStatus::parse(&self.status).ok_or_else(|| {
            tracing::error!(message_id = %self.id, status = %self.status, "Unknown message status");
            AppError::Internal
        })?;

        Ok(Message {
            id: self.id,
            thread_id: self.thread_id,
            sender_id: self.sender_id,
            recipient_ids: self.recipient_ids,
            content: self.content,
            is_draft: self.is_draft,
            status,
            read_by,
            reactions,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ReceiptRow {
    pub(crate) message_id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) read_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
pub(crate) struct ReactionRow {
    pub(crate) message_id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) emoji: String,
    pub(crate) created_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
pub(crate) struct UnreadRow {
    pub(crate) thread_id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) unread: i64,
}
