mod common;

use common::{FlaggingSpamChecker, build_service, build_service_with, uid};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tradeline_messaging::domain::message::NewMessage;
use tradeline_messaging::domain::tier::{Tier, TierLimits, TierTable, UNLIMITED};
use tradeline_messaging::error::AppError;
use tradeline_messaging::services::moderation::PermissiveSpamChecker;

fn send(thread_id: uuid::Uuid, sender: uuid::Uuid, content: &str) -> NewMessage {
    NewMessage { thread_id, sender_id: sender, content: content.to_string(), is_draft: false }
}

fn tight_tiers(messages_per_day: i64, max_message_length: i64) -> TierTable {
    let limits = TierLimits { messages_per_day, threads_per_day: 10, max_message_length };
    TierTable::new(HashMap::from([(Tier::Free, limits)]))
}

#[tokio::test]
async fn daily_message_quota_blocks_the_next_send() {
    let h = build_service_with(tight_tiers(3, 1_000), Arc::new(PermissiveSpamChecker));

    let thread = h.service.create_thread(vec![uid(1), uid(2)], json!({}), Tier::Free).await.expect("create");
    for i in 0..3 {
        h.service.send_message(send(thread.id, uid(1), &format!("msg {i}")), Tier::Free).await.expect("within quota");
    }

    let err = h.service.send_message(send(thread.id, uid(1), "over"), Tier::Free).await.expect_err("over quota");
    assert!(matches!(err, AppError::LimitExceeded(_)));

    // The other participant has their own allowance.
    h.service.send_message(send(thread.id, uid(2), "reply"), Tier::Free).await.expect("other sender");
}

#[tokio::test]
async fn quota_resets_when_the_day_rolls_over() {
    let h = build_service_with(tight_tiers(3, 1_000), Arc::new(PermissiveSpamChecker));

    let thread = h.service.create_thread(vec![uid(1), uid(2)], json!({}), Tier::Free).await.expect("create");
    let mut ids = Vec::new();
    for i in 0..3 {
        let message =
            h.service.send_message(send(thread.id, uid(1), &format!("msg {i}")), Tier::Free).await.expect("send");
        ids.push(message.id);
    }

    let err = h.service.send_message(send(thread.id, uid(1), "over"), Tier::Free).await.expect_err("over quota");
    assert!(matches!(err, AppError::LimitExceeded(_)));

    // Move yesterday's traffic out of today's window.
    let yesterday = OffsetDateTime::now_utc() - Duration::days(1);
    for id in ids {
        h.messages.backdate(id, yesterday);
    }

    h.service.send_message(send(thread.id, uid(1), "new day"), Tier::Free).await.expect("fresh allowance");
}

#[tokio::test]
async fn drafts_do_not_consume_the_quota() {
    let h = build_service_with(tight_tiers(1, 1_000), Arc::new(PermissiveSpamChecker));

    let thread = h.service.create_thread(vec![uid(1), uid(2)], json!({}), Tier::Free).await.expect("create");
    for i in 0..3 {
        let draft = NewMessage {
            thread_id: thread.id,
            sender_id: uid(1),
            content: format!("draft {i}"),
            is_draft: true,
        };
        h.service.send_message(draft, Tier::Free).await.expect("draft");
    }

    h.service.send_message(send(thread.id, uid(1), "the real one"), Tier::Free).await.expect("send");
}

#[tokio::test]
async fn length_cap_counts_characters_per_tier() {
    let h = build_service_with(tight_tiers(UNLIMITED, 10), Arc::new(PermissiveSpamChecker));

    let thread = h.service.create_thread(vec![uid(1), uid(2)], json!({}), Tier::Free).await.expect("create");
    h.service.send_message(send(thread.id, uid(1), "êêêêêêêêêê"), Tier::Free).await.expect("at cap");

    let err = h.service.send_message(send(thread.id, uid(1), "elevenchars"), Tier::Free).await.expect_err("over cap");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn quota_fails_open_when_storage_cannot_count() {
    let h = build_service_with(tight_tiers(1, 1_000), Arc::new(PermissiveSpamChecker));

    let thread = h.service.create_thread(vec![uid(1), uid(2)], json!({}), Tier::Free).await.expect("create");
    h.service.send_message(send(thread.id, uid(1), "one"), Tier::Free).await.expect("within quota");

    // Counter lookups fail; sends must still go through.
    h.messages.fail_counts(true);
    h.service.send_message(send(thread.id, uid(1), "two"), Tier::Free).await.expect("fail-open send");

    h.messages.fail_counts(false);
    let err = h.service.send_message(send(thread.id, uid(1), "three"), Tier::Free).await.expect_err("quota is back");
    assert!(matches!(err, AppError::LimitExceeded(_)));
}

#[tokio::test]
async fn thread_quota_fails_open_too() {
    let limits = TierLimits { messages_per_day: 50, threads_per_day: 1, max_message_length: 1_000 };
    let tiers = TierTable::new(HashMap::from([(Tier::Free, limits)]));
    let h = build_service_with(tiers, Arc::new(PermissiveSpamChecker));

    h.service.create_thread(vec![uid(1), uid(2)], json!({}), Tier::Free).await.expect("first");

    h.threads.fail_counts(true);
    h.service.create_thread(vec![uid(1), uid(3)], json!({}), Tier::Free).await.expect("fail-open create");
}

#[tokio::test]
async fn flagged_messages_are_rejected_and_never_persisted() {
    let h = build_service_with(TierTable::default(), Arc::new(FlaggingSpamChecker));

    let thread = h.service.create_thread(vec![uid(1), uid(2)], json!({}), Tier::Free).await.expect("create");
    let err = h.service.send_message(send(thread.id, uid(1), "buy now!!!"), Tier::Free).await.expect_err("flagged");
    assert!(matches!(err, AppError::SpamRejected(_)));
    assert_eq!(h.messages.message_count(), 0);
}

#[tokio::test]
async fn enterprise_tier_is_unlimited() {
    let h = build_service();

    let thread = h.service.create_thread(vec![uid(1), uid(2)], json!({}), Tier::Enterprise).await.expect("create");
    for i in 0..60 {
        h.service
            .send_message(send(thread.id, uid(1), &format!("burst {i}")), Tier::Enterprise)
            .await
            .expect("unlimited send");
    }
}
