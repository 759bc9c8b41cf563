mod common;

use common::{build_service, uid};
use serde_json::json;
use tradeline_messaging::domain::message::{Message, NewMessage};
use tradeline_messaging::domain::tier::Tier;
use tradeline_messaging::error::AppError;
use tradeline_messaging::services::messaging_service::MessagingService;

async fn seeded_message(service: &MessagingService) -> Message {
    let thread = service.create_thread(vec![uid(1), uid(2)], json!({}), Tier::Free).await.expect("create");
    service
        .send_message(
            NewMessage { thread_id: thread.id, sender_id: uid(1), content: "deal?".to_string(), is_draft: false },
            Tier::Free,
        )
        .await
        .expect("send")
}

#[tokio::test]
async fn repeated_reactions_toggle_on_and_off() {
    let h = build_service();
    let message = seeded_message(&h.service).await;

    let added = h.service.add_reaction(message.id, uid(2), "👍").await.expect("add");
    assert_eq!(added.reactions.len(), 1);
    assert_eq!(added.reactions[0].emoji, "👍");

    let removed = h.service.add_reaction(message.id, uid(2), "👍").await.expect("toggle off");
    assert!(removed.reactions.is_empty());

    let re_added = h.service.add_reaction(message.id, uid(2), "👍").await.expect("toggle back on");
    assert_eq!(re_added.reactions.len(), 1);
}

#[tokio::test]
async fn distinct_emojis_and_users_react_independently() {
    let h = build_service();
    let message = seeded_message(&h.service).await;

    h.service.add_reaction(message.id, uid(2), "👍").await.expect("thumbs");
    let both = h.service.add_reaction(message.id, uid(2), "🎉").await.expect("party");
    assert_eq!(both.reactions.len(), 2);

    // The sender may react to their own message.
    let three = h.service.add_reaction(message.id, uid(1), "👍").await.expect("sender reacts");
    assert_eq!(three.reactions.len(), 3);

    // Toggling one pair leaves the others alone.
    let after = h.service.add_reaction(message.id, uid(2), "👍").await.expect("toggle off");
    assert_eq!(after.reactions.len(), 2);
}

#[tokio::test]
async fn unusable_emojis_are_rejected() {
    let h = build_service();
    let message = seeded_message(&h.service).await;

    let err = h.service.add_reaction(message.id, uid(2), "").await.expect_err("empty");
    assert!(matches!(err, AppError::Validation(_)));

    let err = h.service.add_reaction(message.id, uid(2), "way too long").await.expect_err("oversized");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn outsiders_cannot_react() {
    let h = build_service();
    let message = seeded_message(&h.service).await;

    let err = h.service.add_reaction(message.id, uid(9), "👍").await.expect_err("outsider");
    assert!(matches!(err, AppError::Authorization(_)));
}

#[tokio::test]
async fn reacting_to_a_missing_message_is_not_found() {
    let h = build_service();

    let err = h.service.add_reaction(uid(500), uid(1), "👍").await.expect_err("missing");
    assert!(matches!(err, AppError::NotFound));
}
