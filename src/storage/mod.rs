use crate::domain::message::Message;
use crate::domain::thread::{Thread, ThreadStatus};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use time::OffsetDateTime;
use uuid::Uuid;

pub mod message_repo;
pub mod records;
pub mod thread_repo;

pub type DbPool = Pool<Postgres>;

/// Initializes the database connection pool.
///
/// # Errors
/// Returns `sqlx::Error` if the connection fails.
pub async fn init_pool(database_url: &str) -> std::result::Result<DbPool, sqlx::Error> {
    PgPoolOptions::new().max_connections(20).connect(database_url).await
}

/// Persistence contract for threads. Counter updates are single-statement
/// atomic operations; callers must never read-then-write unread state.
#[async_trait]
pub trait ThreadStore: Send + Sync + std::fmt::Debug {
    async fn insert(&self, thread: &Thread) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<Thread>>;

    /// Looks up the non-deleted thread for an exact participant set. The key
    /// must already be normalized (sorted, deduplicated).
    async fn find_live_by_participants(&self, normalized: &[Uuid]) -> Result<Option<Thread>>;

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Thread>>;

    async fn set_status(&self, id: Uuid, status: ThreadStatus) -> Result<()>;

    /// Refreshes the denormalized last-message fields.
    async fn record_last_message(
        &self,
        id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        preview: &str,
        at: OffsetDateTime,
    ) -> Result<()>;

    /// Atomically bumps every participant's unread counter except the sender's.
    async fn increment_unread_except(&self, id: Uuid, sender_id: Uuid) -> Result<()>;

    async fn set_unread(&self, id: Uuid, user_id: Uuid, value: i64) -> Result<()>;

    /// Sum of unread counters across the user's active threads.
    async fn total_unread(&self, user_id: Uuid) -> Result<i64>;

    async fn count_created_since(&self, user_id: Uuid, since: OffsetDateTime) -> Result<i64>;
}

/// Persistence contract for messages. Receipt and reaction writes are
/// idempotent at the storage layer (unique constraints, not caller checks).
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    async fn insert(&self, message: &Message) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<Message>>;

    /// Messages for a thread in creation-timestamp order, paginated backwards
    /// from `before` when set.
    async fn list_for_thread(&self, thread_id: Uuid, before: Option<OffsetDateTime>, limit: i64)
    -> Result<Vec<Message>>;

    /// Appends a read receipt; returns false if the user already had one.
    async fn append_receipt(&self, message_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<bool>;

    /// Appends receipts for every undeleted, non-draft message in the thread
    /// addressed to the user. Returns how many receipts were inserted.
    async fn append_thread_receipts(&self, thread_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<u64>;

    /// Flips the message to `read` if every recipient now has a receipt.
    async fn promote_to_read(&self, message_id: Uuid) -> Result<bool>;

    /// Thread-wide variant of `promote_to_read`. Returns how many messages flipped.
    async fn promote_thread_to_read(&self, thread_id: Uuid) -> Result<u64>;

    /// Toggles a (user, emoji) reaction; returns true when the reaction was
    /// added, false when an existing one was removed.
    async fn toggle_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str, at: OffsetDateTime) -> Result<bool>;

    async fn soft_delete(&self, message_id: Uuid, at: OffsetDateTime) -> Result<()>;

    /// Undeleted, non-draft messages addressed to the user that the user has
    /// not receipted. This is the authoritative unread figure for one thread.
    async fn count_unread(&self, thread_id: Uuid, user_id: Uuid) -> Result<i64>;

    async fn count_sent_since(&self, user_id: Uuid, since: OffsetDateTime) -> Result<i64>;
}

#[cfg(test)]
mod tests {
    use super::init_pool;

    #[tokio::test]
    async fn malformed_database_url_is_rejected() {
        // Fails at URL parse time, before any connection attempt.
        assert!(init_pool("not-a-connection-string").await.is_err());
    }
}
