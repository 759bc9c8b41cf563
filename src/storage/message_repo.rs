use crate::domain::message::{Message, Reaction, ReadReceipt};
use crate::error::Result;
use crate::storage::records::{MessageRow, ReactionRow, ReceiptRow};
use crate::storage::{DbPool, MessageStore};
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str =
    "id, thread_id, sender_id, recipient_ids, content, is_draft, status, deleted_at, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct PgMessageStore {
    pool: DbPool,
}

impl PgMessageStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let receipt_rows = sqlx::query_as::<_, ReceiptRow>(
            "SELECT message_id, user_id, read_at FROM read_receipts WHERE message_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let reaction_rows = sqlx::query_as::<_, ReactionRow>(
            r"
            SELECT message_id, user_id, emoji, created_at FROM reactions
            WHERE message_id = ANY($1)
            ORDER BY created_at ASC
            ",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut receipts: HashMap<Uuid, Vec<ReadReceipt>> = HashMap::new();
        for row in receipt_rows {
            receipts
                .entry(row.message_id)
                .or_default()
                .push(ReadReceipt { user_id: row.user_id, read_at: row.read_at });
        }

        let mut reactions: HashMap<Uuid, Vec<Reaction>> = HashMap::new();
        for row in reaction_rows {
            reactions.entry(row.message_id).or_default().push(Reaction {
                user_id: row.user_id,
                emoji: row.emoji,
                created_at: row.created_at,
            });
        }

        rows.into_iter()
            .map(|row| {
                let read_by = receipts.remove(&row.id).unwrap_or_default();
                let reacts = reactions.remove(&row.id).unwrap_or_default();
                row.into_message(read_by, reacts)
            })
            .collect()
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(&self, message: &Message) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO messages
                (id, thread_id, sender_id, recipient_ids, content, is_draft, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(message.id)
        .bind(message.thread_id)
        .bind(message.sender_id)
        .bind(&message.recipient_ids)
        .bind(&message.content)
        .bind(message.is_draft)
        .bind(message.status.as_str())
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_for_thread(
        &self,
        thread_id: Uuid,
        before: Option<OffsetDateTime>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE thread_id = $1 AND ($2::timestamptz IS NULL OR created_at < $2)
            ORDER BY created_at DESC
            LIMIT $3
            "
        ))
        .bind(thread_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        // Read-time ordering guarantee: ascending by creation timestamp.
        let mut messages = self.hydrate(rows).await?;
        messages.reverse();
        Ok(messages)
    }

    async fn append_receipt(&self, message_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO read_receipts (message_id, user_id, read_at)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_thread_receipts(&self, thread_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<u64> {
        let result = sqlx::query(
            r"
            INSERT INTO read_receipts (message_id, user_id, read_at)
            SELECT m.id, $2, $3 FROM messages m
            WHERE m.thread_id = $1
              AND $2 = ANY(m.recipient_ids)
              AND m.deleted_at IS NULL
              AND m.is_draft = FALSE
            ON CONFLICT DO NOTHING
            ",
        )
        .bind(thread_id)
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn promote_to_read(&self, message_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE messages m
            SET status = 'read', updated_at = now()
            WHERE m.id = $1 AND m.status = 'sent'
              AND NOT EXISTS (
                  SELECT 1 FROM unnest(m.recipient_ids) AS r(user_id)
                  WHERE NOT EXISTS (
                      SELECT 1 FROM read_receipts rr
                      WHERE rr.message_id = m.id AND rr.user_id = r.user_id
                  )
              )
            ",
        )
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn promote_thread_to_read(&self, thread_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE messages m
            SET status = 'read', updated_at = now()
            WHERE m.thread_id = $1 AND m.status = 'sent'
              AND NOT EXISTS (
                  SELECT 1 FROM unnest(m.recipient_ids) AS r(user_id)
                  WHERE NOT EXISTS (
                      SELECT 1 FROM read_receipts rr
                      WHERE rr.message_id = m.id AND rr.user_id = r.user_id
                  )
              )
            ",
        )
        .bind(thread_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn toggle_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str, at: OffsetDateTime) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3")
            .bind(message_id)
            .bind(user_id)
            .bind(emoji)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let added = if deleted == 0 {
            sqlx::query(
                r"
                INSERT INTO reactions (message_id, user_id, emoji, created_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT DO NOTHING
                ",
            )
            .bind(message_id)
            .bind(user_id)
            .bind(emoji)
            .bind(at)
            .execute(&mut *tx)
            .await?;
            true
        } else {
            false
        };

        tx.commit().await?;
        Ok(added)
    }

    async fn soft_delete(&self, message_id: Uuid, at: OffsetDateTime) -> Result<()> {
        sqlx::query("UPDATE messages SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL")
            .bind(message_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_unread(&self, thread_id: Uuid, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM messages m
            WHERE m.thread_id = $1
              AND $2 = ANY(m.recipient_ids)
              AND m.deleted_at IS NULL
              AND m.is_draft = FALSE
              AND NOT EXISTS (
                  SELECT 1 FROM read_receipts rr
                  WHERE rr.message_id = m.id AND rr.user_id = $2
              )
            ",
        )
        .bind(thread_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_sent_since(&self, user_id: Uuid, since: OffsetDateTime) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE sender_id = $1 AND is_draft = FALSE AND created_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
