mod common;

use common::{build_service, uid};
use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;
use tradeline_messaging::domain::event::ServerEvent;
use tradeline_messaging::domain::message::NewMessage;
use tradeline_messaging::domain::tier::Tier;
use tradeline_messaging::services::notifier::Room;

fn send(thread_id: uuid::Uuid, sender: uuid::Uuid, content: &str) -> NewMessage {
    NewMessage { thread_id, sender_id: sender, content: content.to_string(), is_draft: false }
}

#[tokio::test]
async fn recipients_get_the_message_and_a_preview_notification() {
    let h = build_service();
    let (buyer, seller) = (uid(1), uid(2));

    let thread = h.service.create_thread(vec![buyer, seller], json!({}), Tier::Free).await.expect("create");
    let mut rx = h.notifier.subscribe(Room::User(seller));

    let sent = h.service.send_message(send(thread.id, buyer, "still for sale?"), Tier::Free).await.expect("send");

    match rx.recv().await.expect("first event") {
        ServerEvent::MessageReceived { message } => {
            assert_eq!(message.id, sent.id);
            assert_eq!(message.content, "still for sale?");
        }
        other => panic!("expected message:received, got {other:?}"),
    }

    match rx.recv().await.expect("second event") {
        ServerEvent::Notification { thread_id, sender_id, preview } => {
            assert_eq!(thread_id, thread.id);
            assert_eq!(sender_id, buyer);
            assert_eq!(preview, "still for sale?");
        }
        other => panic!("expected notification, got {other:?}"),
    }
}

#[tokio::test]
async fn senders_do_not_hear_their_own_fan_out() {
    let h = build_service();
    let (buyer, seller) = (uid(1), uid(2));

    let thread = h.service.create_thread(vec![buyer, seller], json!({}), Tier::Free).await.expect("create");
    let mut sender_rx = h.notifier.subscribe(Room::User(buyer));

    h.service.send_message(send(thread.id, buyer, "hello"), Tier::Free).await.expect("send");

    assert!(matches!(sender_rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn drafts_produce_no_fan_out() {
    let h = build_service();
    let (buyer, seller) = (uid(1), uid(2));

    let thread = h.service.create_thread(vec![buyer, seller], json!({}), Tier::Free).await.expect("create");
    let mut rx = h.notifier.subscribe(Room::User(seller));

    let draft = NewMessage { thread_id: thread.id, sender_id: buyer, content: "wip".to_string(), is_draft: true };
    h.service.send_message(draft, Tier::Free).await.expect("draft");

    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn long_messages_notify_with_a_truncated_preview() {
    let h = build_service();
    let (buyer, seller) = (uid(1), uid(2));

    let thread = h.service.create_thread(vec![buyer, seller], json!({}), Tier::Free).await.expect("create");
    let mut rx = h.notifier.subscribe(Room::User(seller));

    let long = "x".repeat(250);
    h.service.send_message(send(thread.id, buyer, &long), Tier::Free).await.expect("send");

    // First event carries the full message.
    let _ = rx.recv().await.expect("message event");
    match rx.recv().await.expect("notification event") {
        ServerEvent::Notification { preview, .. } => assert_eq!(preview.chars().count(), 100),
        other => panic!("expected notification, got {other:?}"),
    }
}

#[tokio::test]
async fn every_recipient_of_a_group_thread_is_notified() {
    let h = build_service();
    let members = [uid(1), uid(2), uid(3)];

    let thread = h.service.create_thread(members.to_vec(), json!({}), Tier::Free).await.expect("create");
    let mut second_rx = h.notifier.subscribe(Room::User(members[1]));
    let mut third_rx = h.notifier.subscribe(Room::User(members[2]));

    h.service.send_message(send(thread.id, members[0], "group ping"), Tier::Free).await.expect("send");

    assert!(matches!(second_rx.recv().await, Ok(ServerEvent::MessageReceived { .. })));
    assert!(matches!(third_rx.recv().await, Ok(ServerEvent::MessageReceived { .. })));
}
