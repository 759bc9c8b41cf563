use crate::domain::thread::{Thread, ThreadStatus, normalized_participants};
use crate::error::Result;
use crate::storage::records::{ThreadRow, UnreadRow};
use crate::storage::{DbPool, ThreadStore};
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

const THREAD_COLUMNS: &str = "id, participants, buyer_id, seller_id, status, last_message_id, last_message_at, \
                              last_message_text, last_message_sender_id, metadata, created_by, created_at, updated_at";

#[derive(Clone, Debug)]
pub struct PgThreadStore {
    pool: DbPool,
}

impl PgThreadStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn unread_for_threads(&self, thread_ids: &[Uuid]) -> Result<HashMap<Uuid, HashMap<Uuid, i64>>> {
        let rows = sqlx::query_as::<_, UnreadRow>(
            "SELECT thread_id, user_id, unread FROM thread_unread WHERE thread_id = ANY($1)",
        )
        .bind(thread_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_thread: HashMap<Uuid, HashMap<Uuid, i64>> = HashMap::new();
        for row in rows {
            by_thread.entry(row.thread_id).or_default().insert(row.user_id, row.unread);
        }
        Ok(by_thread)
    }

    async fn hydrate(&self, rows: Vec<ThreadRow>) -> Result<Vec<Thread>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut unread = self.unread_for_threads(&ids).await?;

        rows.into_iter().map(|row| {
            let counters = unread.remove(&row.id).unwrap_or_default();
            row.into_thread(counters)
        }).collect()
    }
}

#[async_trait]
impl ThreadStore for PgThreadStore {
    async fn insert(&self, thread: &Thread) -> Result<()> {
        let participants = thread.participants();
        let key = normalized_participants(&participants);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO threads
                (id, participants, participants_key, status, metadata, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(thread.id)
        .bind(&participants)
        .bind(&key)
        .bind(thread.status.as_str())
        .bind(&thread.metadata)
        .bind(thread.created_by)
        .bind(thread.created_at)
        .bind(thread.updated_at)
        .execute(&mut *tx)
        .await?;

        for user_id in &participants {
            sqlx::query("INSERT INTO thread_unread (thread_id, user_id, unread) VALUES ($1, $2, 0)")
                .bind(thread.id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Thread>> {
        let row = sqlx::query_as::<_, ThreadRow>(&format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_live_by_participants(&self, normalized: &[Uuid]) -> Result<Option<Thread>> {
        let row = sqlx::query_as::<_, ThreadRow>(&format!(
            "SELECT {THREAD_COLUMNS} FROM threads WHERE participants_key = $1 AND status <> 'deleted'"
        ))
        .bind(normalized)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Thread>> {
        let rows = sqlx::query_as::<_, ThreadRow>(&format!(
            r"
            SELECT {THREAD_COLUMNS} FROM threads
            WHERE $1 = ANY(participants_key) AND status <> 'deleted'
            ORDER BY COALESCE(last_message_at, created_at) DESC
            LIMIT $2
            "
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn set_status(&self, id: Uuid, status: ThreadStatus) -> Result<()> {
        sqlx::query("UPDATE threads SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_last_message(
        &self,
        id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        preview: &str,
        at: OffsetDateTime,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE threads
            SET last_message_id = $2, last_message_sender_id = $3, last_message_text = $4,
                last_message_at = $5, updated_at = $5
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(message_id)
        .bind(sender_id)
        .bind(preview)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_unread_except(&self, id: Uuid, sender_id: Uuid) -> Result<()> {
        // Single statement; correct under concurrent sends into the same thread.
        sqlx::query("UPDATE thread_unread SET unread = unread + 1 WHERE thread_id = $1 AND user_id <> $2")
            .bind(id)
            .bind(sender_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_unread(&self, id: Uuid, user_id: Uuid, value: i64) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO thread_unread (thread_id, user_id, unread) VALUES ($1, $2, $3)
            ON CONFLICT (thread_id, user_id) DO UPDATE SET unread = EXCLUDED.unread
            ",
        )
        .bind(id)
        .bind(user_id)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn total_unread(&self, user_id: Uuid) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            r"
            SELECT COALESCE(SUM(tu.unread), 0)::bigint
            FROM thread_unread tu
            JOIN threads t ON t.id = tu.thread_id
            WHERE tu.user_id = $1 AND t.status = 'active'
            ",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn count_created_since(&self, user_id: Uuid, since: OffsetDateTime) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM threads WHERE created_by = $1 AND created_at >= $2")
                .bind(user_id)
                .bind(since)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
