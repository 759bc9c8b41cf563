#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;
use time::OffsetDateTime;
use tradeline_messaging::domain::message::{Message, MessageStatus, Reaction, ReadReceipt};
use tradeline_messaging::domain::thread::{Thread, ThreadStatus, normalized_participants};
use tradeline_messaging::domain::tier::TierTable;
use tradeline_messaging::error::{AppError, Result};
use tradeline_messaging::services::messaging_service::MessagingService;
use tradeline_messaging::services::moderation::{
    ContentSanitizer, EscapingSanitizer, SpamChecker, SpamOptions, SpamVerdict,
};
use tradeline_messaging::services::notifier::Notifier;
use tradeline_messaging::storage::{MessageStore, ThreadStore};
use uuid::Uuid;

static INIT: Once = Once::new();

pub fn setup_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "warn".into())
            .add_directive("tradeline_messaging=debug".parse().unwrap())
            .add_directive("sqlx=warn".parse().unwrap())
            .add_directive("tower=warn".parse().unwrap())
            .add_directive("hyper=warn".parse().unwrap())
            .add_directive("tungstenite=warn".parse().unwrap());

        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}

pub fn uid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// In-memory `ThreadStore`. Lock scope covers every method body, which gives
/// the same single-writer view as the SQL statements in the real store.
#[derive(Debug, Default)]
pub struct MemoryThreadStore {
    threads: Mutex<HashMap<Uuid, Thread>>,
    fail_counts: AtomicBool,
}

impl MemoryThreadStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes `count_created_since` fail until cleared.
    pub fn fail_counts(&self, fail: bool) {
        self.fail_counts.store(fail, Ordering::SeqCst);
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().expect("lock").len()
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn insert(&self, thread: &Thread) -> Result<()> {
        self.threads.lock().expect("lock").insert(thread.id, thread.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Thread>> {
        Ok(self.threads.lock().expect("lock").get(&id).cloned())
    }

    async fn find_live_by_participants(&self, normalized: &[Uuid]) -> Result<Option<Thread>> {
        let threads = self.threads.lock().expect("lock");
        Ok(threads
            .values()
            .find(|t| {
                t.status != ThreadStatus::Deleted && normalized_participants(&t.participants()) == normalized
            })
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Thread>> {
        let threads = self.threads.lock().expect("lock");
        let mut mine: Vec<Thread> = threads
            .values()
            .filter(|t| t.status != ThreadStatus::Deleted && t.is_participant(user_id))
            .cloned()
            .collect();
        mine.sort_by_key(|t| std::cmp::Reverse(t.last_message_at.unwrap_or(t.created_at)));
        mine.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(mine)
    }

    async fn set_status(&self, id: Uuid, status: ThreadStatus) -> Result<()> {
        let mut threads = self.threads.lock().expect("lock");
        if let Some(thread) = threads.get_mut(&id) {
            thread.status = status;
            thread.updated_at = OffsetDateTime::now_utc();
        }
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
        let mut threads = self.threads.lock().expect("lock");
        if let Some(thread) = threads.get_mut(&id) {
            thread.last_message_id = Some(message_id);
            thread.last_message_sender_id = Some(sender_id);
            thread.last_message_text = Some(preview.to_string());
            thread.last_message_at = Some(at);
            thread.updated_at = at;
        }
        Ok(())
    }

    async fn increment_unread_except(&self, id: Uuid, sender_id: Uuid) -> Result<()> {
        let mut threads = self.threads.lock().expect("lock");
        if let Some(thread) = threads.get_mut(&id) {
            for participant in thread.participants() {
                if participant != sender_id {
                    *thread.unread.entry(participant).or_insert(0) += 1;
                }
            }
        }
        Ok(())
    }

    async fn set_unread(&self, id: Uuid, user_id: Uuid, value: i64) -> Result<()> {
        let mut threads = self.threads.lock().expect("lock");
        if let Some(thread) = threads.get_mut(&id) {
            thread.unread.insert(user_id, value);
        }
        Ok(())
    }

    async fn total_unread(&self, user_id: Uuid) -> Result<i64> {
        let threads = self.threads.lock().expect("lock");
        Ok(threads
            .values()
            .filter(|t| t.status == ThreadStatus::Active)
            .map(|t| t.unread_for(user_id))
            .sum())
    }

    async fn count_created_since(&self, user_id: Uuid, since: OffsetDateTime) -> Result<i64> {
        if self.fail_counts.load(Ordering::SeqCst) {
            return Err(AppError::Internal);
        }
        let threads = self.threads.lock().expect("lock");
        Ok(threads.values().filter(|t| t.created_by == user_id && t.created_at >= since).count() as i64)
    }
}

/// In-memory `MessageStore` mirroring the idempotence guarantees of the SQL
/// store (receipt uniqueness, reaction toggles, draft/deleted exclusions).
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: Mutex<HashMap<Uuid, Message>>,
    fail_counts: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes `count_sent_since` fail until cleared.
    pub fn fail_counts(&self, fail: bool) {
        self.fail_counts.store(fail, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().expect("lock").len()
    }

    /// Rewrites a stored message's creation timestamp; lets tests move
    /// messages into a previous quota day.
    pub fn backdate(&self, message_id: Uuid, to: OffsetDateTime) {
        let mut messages = self.messages.lock().expect("lock");
        if let Some(message) = messages.get_mut(&message_id) {
            message.created_at = to;
        }
    }

    fn counts_as_unread(message: &Message, user_id: Uuid) -> bool {
        !message.is_deleted()
            && !message.is_draft
            && message.recipient_ids.contains(&user_id)
            && !message.has_receipt_from(user_id)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, message: &Message) -> Result<()> {
        self.messages.lock().expect("lock").insert(message.id, message.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self.messages.lock().expect("lock").get(&id).cloned())
    }

    async fn list_for_thread(
        &self,
        thread_id: Uuid,
        before: Option<OffsetDateTime>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let messages = self.messages.lock().expect("lock");
        let mut page: Vec<Message> = messages
            .values()
            .filter(|m| m.thread_id == thread_id && before.is_none_or(|b| m.created_at < b))
            .cloned()
            .collect();
        // Newest `limit` of the window, returned in ascending order.
        page.sort_by_key(|m| std::cmp::Reverse(m.created_at));
        page.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        page.reverse();
        Ok(page)
    }

    async fn append_receipt(&self, message_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<bool> {
        let mut messages = self.messages.lock().expect("lock");
        let Some(message) = messages.get_mut(&message_id) else {
            return Ok(false);
        };
        if message.has_receipt_from(user_id) {
            return Ok(false);
        }
        message.read_by.push(ReadReceipt { user_id, read_at: at });
        message.updated_at = at;
        Ok(true)
    }

    async fn append_thread_receipts(&self, thread_id: Uuid, user_id: Uuid, at: OffsetDateTime) -> Result<u64> {
        let mut messages = self.messages.lock().expect("lock");
        let mut inserted = 0;
        for message in messages.values_mut() {
            if message.thread_id == thread_id && Self::counts_as_unread(message, user_id) {
                message.read_by.push(ReadReceipt { user_id, read_at: at });
                message.updated_at = at;
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn promote_to_read(&self, message_id: Uuid) -> Result<bool> {
        let mut messages = self.messages.lock().expect("lock");
        let Some(message) = messages.get_mut(&message_id) else {
            return Ok(false);
        };
        if message.status == MessageStatus::Sent && message.is_read_by_all() {
            message.status = MessageStatus::Read;
            return Ok(true);
        }
        Ok(false)
    }

    async fn promote_thread_to_read(&self, thread_id: Uuid) -> Result<u64> {
        let mut messages = self.messages.lock().expect("lock");
        let mut flipped = 0;
        for message in messages.values_mut() {
            if message.thread_id == thread_id && message.status == MessageStatus::Sent && message.is_read_by_all()
            {
                message.status = MessageStatus::Read;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn toggle_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str, at: OffsetDateTime) -> Result<bool> {
        let mut messages = self.messages.lock().expect("lock");
        let Some(message) = messages.get_mut(&message_id) else {
            return Ok(false);
        };
        let existing = message.reactions.iter().position(|r| r.user_id == user_id && r.emoji == emoji);
        match existing {
            Some(index) => {
                message.reactions.remove(index);
                Ok(false)
            }
            None => {
                message.reactions.push(Reaction { user_id, emoji: emoji.to_string(), created_at: at });
                Ok(true)
            }
        }
    }

    async fn soft_delete(&self, message_id: Uuid, at: OffsetDateTime) -> Result<()> {
        let mut messages = self.messages.lock().expect("lock");
        if let Some(message) = messages.get_mut(&message_id) {
            message.deleted_at = Some(at);
            message.updated_at = at;
        }
        Ok(())
    }

    async fn count_unread(&self, thread_id: Uuid, user_id: Uuid) -> Result<i64> {
        let messages = self.messages.lock().expect("lock");
        Ok(messages
            .values()
            .filter(|m| m.thread_id == thread_id && Self::counts_as_unread(m, user_id))
            .count() as i64)
    }

    async fn count_sent_since(&self, user_id: Uuid, since: OffsetDateTime) -> Result<i64> {
        if self.fail_counts.load(Ordering::SeqCst) {
            return Err(AppError::Internal);
        }
        let messages = self.messages.lock().expect("lock");
        Ok(messages
            .values()
            .filter(|m| m.sender_id == user_id && !m.is_draft && m.created_at >= since)
            .count() as i64)
    }
}

/// Spam checker that flags every message.
#[derive(Debug, Clone, Copy)]
pub struct FlaggingSpamChecker;

#[async_trait]
impl SpamChecker for FlaggingSpamChecker {
    async fn check(&self, _sender_id: Uuid, _content: &str, _options: &SpamOptions) -> Result<SpamVerdict> {
        Ok(SpamVerdict { is_spam: true, reason: Some("flagged by test checker".to_string()), score: 1.0 })
    }
}

pub struct ServiceHarness {
    pub threads: Arc<MemoryThreadStore>,
    pub messages: Arc<MemoryMessageStore>,
    pub notifier: Notifier,
    pub service: MessagingService,
}

pub fn build_service() -> ServiceHarness {
    build_service_with(TierTable::default(), Arc::new(tradeline_messaging::services::moderation::PermissiveSpamChecker))
}

pub fn build_service_with(tiers: TierTable, spam: Arc<dyn SpamChecker>) -> ServiceHarness {
    setup_tracing();

    let threads = MemoryThreadStore::new();
    let messages = MemoryMessageStore::new();
    let notifier = Notifier::new(16);
    let sanitizer: Arc<dyn ContentSanitizer> = Arc::new(EscapingSanitizer);

    let thread_store: Arc<dyn ThreadStore> = Arc::clone(&threads) as _;
    let message_store: Arc<dyn MessageStore> = Arc::clone(&messages) as _;

    let service = MessagingService::new(
        thread_store,
        message_store,
        sanitizer,
        spam,
        notifier.clone(),
        tiers,
        SpamOptions::default(),
        8,
        50,
    );

    ServiceHarness { threads, messages, notifier: notifier.clone(), service }
}
