use crate::domain::event::ServerEvent;
use crate::domain::message::{Message, MessageStatus, NewMessage};
use crate::domain::thread::{Thread, ThreadStatus, normalized_participants, preview_of};
use crate::domain::tier::{Tier, TierTable};
use crate::error::{AppError, Result};
use crate::services::moderation::{ContentSanitizer, SpamChecker, SpamOptions};
use crate::services::notifier::Notifier;
use crate::services::quota::QuotaLedger;
use crate::storage::{MessageStore, ThreadStore};
use opentelemetry::{
    KeyValue, global,
    metrics::Counter,
};
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Metrics {
    sent_total: Counter<u64>,
    spam_rejected_total: Counter<u64>,
    threads_created_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("tradeline-messaging");
        Self {
            sent_total: meter
                .u64_counter("tradeline_messages_sent_total")
                .with_description("Messages accepted by the send pipeline")
                .build(),
            spam_rejected_total: meter
                .u64_counter("tradeline_messages_spam_rejected_total")
                .with_description("Messages rejected by the spam check")
                .build(),
            threads_created_total: meter
                .u64_counter("tradeline_threads_created_total")
                .with_description("New threads persisted (idempotent hits excluded)")
                .build(),
        }
    }
}

/// Orchestrates thread and message lifecycle: creation, the send pipeline,
/// read receipts, reactions, soft deletes and unread bookkeeping. All
/// collaborators are injected; the service holds no ambient state.
#[derive(Clone, Debug)]
pub struct MessagingService {
    threads: Arc<dyn ThreadStore>,
    messages: Arc<dyn MessageStore>,
    sanitizer: Arc<dyn ContentSanitizer>,
    spam: Arc<dyn SpamChecker>,
    quota: QuotaLedger,
    notifier: Notifier,
    tiers: TierTable,
    spam_options: SpamOptions,
    max_participants: usize,
    page_limit: i64,
    metrics: Metrics,
}

impl MessagingService {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        threads: Arc<dyn ThreadStore>,
        messages: Arc<dyn MessageStore>,
        sanitizer: Arc<dyn ContentSanitizer>,
        spam: Arc<dyn SpamChecker>,
        notifier: Notifier,
        tiers: TierTable,
        spam_options: SpamOptions,
        max_participants: usize,
        page_limit: i64,
    ) -> Self {
        let quota = QuotaLedger::new(Arc::clone(&threads), Arc::clone(&messages));
        Self {
            threads,
            messages,
            sanitizer,
            spam,
            quota,
            notifier,
            tiers,
            spam_options,
            max_participants,
            page_limit,
            metrics: Metrics::new(),
        }
    }

    #[must_use]
    pub const fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    #[must_use]
    pub const fn page_limit(&self) -> i64 {
        self.page_limit
    }

    /// Idempotent get-or-create for the exact participant set. A creation
    /// that loses a race to an identical one returns the winner's thread.
    ///
    /// # Errors
    /// `Validation` for a malformed participant set, `LimitExceeded` when the
    /// creator's daily thread quota is exhausted.
    #[tracing::instrument(err(level = "warn"), skip(self, metadata), fields(count = participants.len()))]
    pub async fn create_thread(
        &self,
        participants: Vec<Uuid>,
        metadata: serde_json::Value,
        tier: Tier,
    ) -> Result<Thread> {
        if participants.is_empty() {
            return Err(AppError::Validation("participants are required".to_string()));
        }
        if participants.len() > self.max_participants {
            return Err(AppError::Validation(format!("a thread allows at most {} participants", self.max_participants)));
        }

        let normalized = normalized_participants(&participants);
        if normalized.len() < 2 {
            return Err(AppError::Validation("a thread needs at least two distinct participants".to_string()));
        }

        if let Some(existing) = self.threads.find_live_by_participants(&normalized).await? {
            tracing::debug!(thread_id = %existing.id, "Thread already exists for participant set");
            return Ok(existing);
        }

        let creator = participants[0];
        let limits = self.tiers.limits_for(tier);
        self.quota.check_thread_limit(creator, &limits).await?;

        let now = OffsetDateTime::now_utc();
        let thread = Thread {
            id: Uuid::now_v7(),
            parties: crate::domain::thread::ThreadParties::Explicit(normalized.clone()),
            status: ThreadStatus::Active,
            last_message_id: None,
            last_message_at: None,
            last_message_text: None,
            last_message_sender_id: None,
            unread: normalized.iter().map(|id| (*id, 0)).collect::<HashMap<_, _>>(),
            metadata,
            created_by: creator,
            created_at: now,
            updated_at: now,
        };

        match self.threads.insert(&thread).await {
            Ok(()) => {
                self.metrics.threads_created_total.add(1, &[]);
                Ok(thread)
            }
            // Lost a creation race; the partial unique index guarantees the
            // winner is the thread we were about to create.
            Err(AppError::Database(sqlx::Error::Database(db))) if db.is_unique_violation() => self
                .threads
                .find_live_by_participants(&normalized)
                .await?
                .ok_or(AppError::Internal),
            Err(e) => Err(e),
        }
    }

    /// The send pipeline. Stages short-circuit in order: sanitize, spam
    /// check, daily quota, length cap, structural validation, thread load,
    /// membership, persist + atomic thread update, fan-out.
    ///
    /// # Errors
    /// `SpamRejected`, `LimitExceeded`, `Validation`, `NotFound` and
    /// `Authorization` per stage. Sanitizer/spam failures fail closed.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self, data),
        fields(thread_id = %data.thread_id, sender_id = %data.sender_id)
    )]
    pub async fn send_message(&self, data: NewMessage, tier: Tier) -> Result<Message> {
        let sanitized = self.sanitizer.sanitize(&data.content, false).await?;

        let verdict = self.spam.check(data.sender_id, &sanitized, &self.spam_options).await?;
        if verdict.is_spam {
            let reason = verdict.reason.unwrap_or_else(|| "flagged as spam".to_string());
            self.metrics.spam_rejected_total.add(1, &[]);
            return Err(AppError::SpamRejected(reason));
        }

        let limits = self.tiers.limits_for(tier);
        self.quota.check_message_limit(data.sender_id, &limits).await?;

        if !limits.allows_length(&sanitized) {
            return Err(AppError::Validation(format!(
                "message exceeds the {} character limit for this tier",
                limits.max_message_length
            )));
        }

        if sanitized.trim().is_empty() {
            return Err(AppError::Validation("message content is required".to_string()));
        }

        let thread = self.load_live_thread(data.thread_id).await?;
        if thread.status == ThreadStatus::Archived {
            return Err(AppError::Validation("thread is archived".to_string()));
        }

        if !thread.is_participant(data.sender_id) {
            return Err(AppError::Authorization("sender is not a participant of this thread".to_string()));
        }

        let recipients: Vec<Uuid> = thread.participants().into_iter().filter(|id| *id != data.sender_id).collect();

        let now = OffsetDateTime::now_utc();
        let message = Message {
            id: Uuid::now_v7(),
            thread_id: thread.id,
            sender_id: data.sender_id,
            recipient_ids: recipients.clone(),
            content: sanitized,
            is_draft: data.is_draft,
            status: MessageStatus::Sent,
            read_by: Vec::new(),
            reactions: Vec::new(),
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        self.messages.insert(&message).await?;
        self.metrics.sent_total.add(1, &[KeyValue::new("draft", message.is_draft)]);

        // Drafts stay invisible: no previews, no counters, no fan-out.
        if !message.is_draft {
            self.threads
                .record_last_message(thread.id, message.id, message.sender_id, &preview_of(&message.content), now)
                .await?;
            self.threads.increment_unread_except(thread.id, message.sender_id).await?;

            self.notifier.notify_users(&recipients, &ServerEvent::MessageReceived { message: message.clone() });
            self.notifier.notify_users(
                &recipients,
                &ServerEvent::Notification {
                    thread_id: thread.id,
                    sender_id: message.sender_id,
                    preview: preview_of(&message.content),
                },
            );
        }

        Ok(message)
    }

    /// # Errors
    /// `Database` on storage failure.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn get_user_threads(&self, user_id: Uuid, limit: Option<i64>) -> Result<Vec<Thread>> {
        let limit = limit.unwrap_or(self.page_limit).clamp(1, self.page_limit);
        self.threads.list_for_user(user_id, limit).await
    }

    /// # Errors
    /// `NotFound` for absent or deleted threads, `Authorization` for
    /// non-participants.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn get_thread(&self, thread_id: Uuid, user_id: Uuid) -> Result<Thread> {
        let thread = self.load_live_thread(thread_id).await?;
        if !thread.is_participant(user_id) {
            return Err(AppError::Authorization("not a participant of this thread".to_string()));
        }
        Ok(thread)
    }

    /// Messages in creation-timestamp order, paginated backwards from
    /// `before` when set.
    ///
    /// # Errors
    /// Same access errors as `get_thread`.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn get_thread_messages(
        &self,
        thread_id: Uuid,
        user_id: Uuid,
        before: Option<OffsetDateTime>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>> {
        let _ = self.get_thread(thread_id, user_id).await?;
        let limit = limit.unwrap_or(self.page_limit).clamp(1, self.page_limit);
        self.messages.list_for_thread(thread_id, before, limit).await
    }

    /// Idempotent single-message read receipt. Appends at most one receipt
    /// per user, flips the message to `read` once every recipient has one,
    /// and re-derives the reader's unread counter for the thread.
    ///
    /// # Errors
    /// `NotFound` for an absent message, `Authorization` when the reader is
    /// not a recipient.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn mark_message_as_read(&self, message_id: Uuid, user_id: Uuid) -> Result<Message> {
        let message = self.messages.find(message_id).await?.ok_or(AppError::NotFound)?;

        if message.has_receipt_from(user_id) {
            return Ok(message);
        }

        if !message.recipient_ids.contains(&user_id) {
            return Err(AppError::Authorization("message is not addressed to this user".to_string()));
        }

        let appended = self.messages.append_receipt(message_id, user_id, OffsetDateTime::now_utc()).await?;
        if appended {
            let _ = self.messages.promote_to_read(message_id).await?;

            let unread = self.messages.count_unread(message.thread_id, user_id).await?;
            self.threads.set_unread(message.thread_id, user_id, unread).await?;
        }

        self.messages.find(message_id).await?.ok_or(AppError::NotFound)
    }

    /// Bulk read: receipts every matching message in one storage operation
    /// and zeroes the reader's unread counter. Returns the receipt count.
    ///
    /// # Errors
    /// Same access errors as `get_thread`.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn mark_thread_as_read(&self, thread_id: Uuid, user_id: Uuid) -> Result<u64> {
        let _ = self.get_thread(thread_id, user_id).await?;

        let receipts = self.messages.append_thread_receipts(thread_id, user_id, OffsetDateTime::now_utc()).await?;
        let _ = self.messages.promote_thread_to_read(thread_id).await?;
        self.threads.set_unread(thread_id, user_id, 0).await?;

        Ok(receipts)
    }

    /// Toggle semantics: a second call with the same (user, emoji) pair
    /// removes the reaction.
    ///
    /// # Errors
    /// `NotFound` for an absent message, `Authorization` for outsiders,
    /// `Validation` for an unusable emoji.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn add_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> Result<Message> {
        if emoji.is_empty() || emoji.chars().count() > 8 {
            return Err(AppError::Validation("emoji must be between 1 and 8 characters".to_string()));
        }

        let message = self.messages.find(message_id).await?.ok_or(AppError::NotFound)?;
        if message.sender_id != user_id && !message.recipient_ids.contains(&user_id) {
            return Err(AppError::Authorization("not a participant of this thread".to_string()));
        }

        let _ = self.messages.toggle_reaction(message_id, user_id, emoji, OffsetDateTime::now_utc()).await?;
        self.messages.find(message_id).await?.ok_or(AppError::NotFound)
    }

    /// Sender-only soft delete. The record stays; recipients' unread
    /// counters are re-derived so deleted messages stop counting.
    ///
    /// # Errors
    /// `NotFound` for an absent message, `Authorization` when the caller is
    /// not the sender.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn delete_message(&self, message_id: Uuid, user_id: Uuid) -> Result<Message> {
        let message = self.messages.find(message_id).await?.ok_or(AppError::NotFound)?;

        if message.sender_id != user_id {
            return Err(AppError::Authorization("only the sender may delete a message".to_string()));
        }

        if message.is_deleted() {
            return Ok(message);
        }

        self.messages.soft_delete(message_id, OffsetDateTime::now_utc()).await?;

        for recipient in &message.recipient_ids {
            if !message.has_receipt_from(*recipient) {
                let unread = self.messages.count_unread(message.thread_id, *recipient).await?;
                self.threads.set_unread(message.thread_id, *recipient, unread).await?;
            }
        }

        self.messages.find(message_id).await?.ok_or(AppError::NotFound)
    }

    /// # Errors
    /// `NotFound` when the thread is deleted; access errors as in
    /// `get_thread`.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn archive_thread(&self, thread_id: Uuid, user_id: Uuid) -> Result<Thread> {
        self.transition_thread(thread_id, user_id, ThreadStatus::Archived).await
    }

    /// # Errors
    /// `NotFound` when the thread is deleted; access errors as in
    /// `get_thread`.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn unarchive_thread(&self, thread_id: Uuid, user_id: Uuid) -> Result<Thread> {
        self.transition_thread(thread_id, user_id, ThreadStatus::Active).await
    }

    /// Terminal transition. A deleted thread is excluded from the idempotent
    /// lookup, so a later create with the same participants starts fresh.
    ///
    /// # Errors
    /// Access errors as in `get_thread`.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn delete_thread(&self, thread_id: Uuid, user_id: Uuid) -> Result<()> {
        let thread = self.get_thread(thread_id, user_id).await?;
        self.threads.set_status(thread.id, ThreadStatus::Deleted).await
    }

    /// Sum of the user's unread counters across active threads. Authoritative
    /// for badge displays.
    ///
    /// # Errors
    /// `Database` on storage failure.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn get_unread_count(&self, user_id: Uuid) -> Result<i64> {
        self.threads.total_unread(user_id).await
    }

    async fn load_live_thread(&self, thread_id: Uuid) -> Result<Thread> {
        let thread = self.threads.find(thread_id).await?.ok_or(AppError::NotFound)?;
        if thread.status == ThreadStatus::Deleted {
            return Err(AppError::NotFound);
        }
        Ok(thread)
    }

    async fn transition_thread(&self, thread_id: Uuid, user_id: Uuid, target: ThreadStatus) -> Result<Thread> {
        let thread = self.get_thread(thread_id, user_id).await?;

        if thread.status != target {
            self.threads.set_status(thread.id, target).await?;
        }

        self.load_live_thread(thread_id).await
    }
}
