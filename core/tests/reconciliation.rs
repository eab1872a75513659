use std::{
    io,
    sync::{Arc, Mutex},
};

use inbox_core::{
    client::{ApiCall, ApiOutcome},
    model::Draft,
    normalize,
    presence::PresenceIndex,
    store::MessageStore,
    DeliveryStatus, MessagingView, Now, ViewSettings,
};
use inbox_wire::{Envelope, RawMessage};
use serde_json::json;
use tokio::time::Instant;

fn view() -> MessagingView {
    MessagingView::new(ViewSettings::new("me"), PresenceIndex::new())
}

fn at(wall_ms: i64) -> Now {
    Now::at(wall_ms, Instant::now())
}

fn raw(id: &str, conversation: &str, sender: &str, created_at: i64) -> RawMessage {
    serde_json::from_value(json!({
        "_id": id,
        "conversationId": conversation,
        "sender": {"_id": sender, "username": sender},
        "text": format!("text of {id}"),
        "createdAt": created_at
    }))
    .unwrap()
}

fn new_message(id: &str, conversation: &str, sender: &str) -> Envelope {
    Envelope::new(
        "new-message",
        json!({
            "conversationId": conversation,
            "message": {"_id": id, "senderId": sender, "text": "hey", "createdAt": 5_000}
        }),
    )
}

fn load_conversations(view: &mut MessagingView, ids: &[&str]) {
    let calls = view.refresh_conversations(true, at(0));
    let ApiCall::FetchConversations { ticket, .. } = calls[0].clone() else {
        panic!("expected a conversation fetch");
    };
    let raws = ids
        .iter()
        .map(|id| serde_json::from_value(json!({"_id": id, "participants": ["me", "u2"]})).unwrap())
        .collect();
    view.complete(
        ApiOutcome::ConversationsFetched {
            ticket,
            result: Ok(raws),
        },
        at(0),
    );
}

fn unread(view: &MessagingView, id: &str) -> u32 {
    view.reconciler()
        .conversations()
        .get(id)
        .map(|c| c.unread_count)
        .unwrap()
}

#[test]
fn apply_inbound_twice_stores_one_message() {
    let mut store = MessageStore::new();
    let message = normalize::message(&raw("m1", "c1", "u2", 10), None, 0).unwrap();
    store.apply_inbound(message.clone());
    store.apply_inbound(message);
    assert_eq!(store.messages("c1").len(), 1);
}

#[test]
fn rollback_restores_pre_send_sequence() {
    let mut store = MessageStore::new();
    for (i, id) in ["m1", "m2"].iter().enumerate() {
        store.apply_inbound(normalize::message(&raw(id, "c1", "u2", i as i64), None, 0).unwrap());
    }
    let before = store.messages("c1").to_vec();
    let pending = store.append_pending("c1", "me", Draft::text("oops"), 99);
    assert_eq!(store.messages("c1").len(), 3);
    store.rollback(&pending.id);
    assert_eq!(store.messages("c1"), before.as_slice());
}

#[test]
fn read_receipt_before_delivery_yields_read() {
    let mut v = view();
    v.handle_envelope(&new_message("m1", "c1", "me"), at(1));
    v.handle_envelope(
        &Envelope::new("message-read", json!({"messageId": "m1", "userId": "u2"})),
        at(2),
    );
    assert_eq!(
        v.reconciler().store().find("m1").unwrap().delivery_status(),
        DeliveryStatus::Read
    );
    v.handle_envelope(
        &Envelope::new("message-delivered", json!({"messageId": "m1", "deliveredAt": 3})),
        at(3),
    );
    assert_eq!(
        v.reconciler().store().find("m1").unwrap().delivery_status(),
        DeliveryStatus::Read
    );
}

#[test]
fn same_reaction_twice_removes_it() {
    let mut v = view();
    v.handle_envelope(&new_message("m1", "c1", "u2"), at(1));
    v.react("m1", "❤️", at(2));
    assert_eq!(v.reconciler().store().find("m1").unwrap().reactions.len(), 1);
    v.react("m1", "❤️", at(3));
    assert!(v.reconciler().store().find("m1").unwrap().reactions.is_empty());
}

#[test]
fn server_reaction_set_replaces_local_state() {
    let mut v = view();
    v.handle_envelope(&new_message("m1", "c1", "u2"), at(1));
    v.react("m1", "❤️", at(2));
    v.handle_envelope(
        &Envelope::new(
            "message-reaction-updated",
            json!({"messageId": "m1", "reactions": [{"userId": "u2", "emoji": "👍"}]}),
        ),
        at(3),
    );
    let reactions = &v.reconciler().store().find("m1").unwrap().reactions;
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].emoji, "👍");
}

#[test]
fn unread_only_grows_for_inactive_conversations() {
    let mut v = view();
    load_conversations(&mut v, &["c1", "c2"]);
    v.activate("c1", at(1));
    v.handle_envelope(&new_message("m1", "c1", "u2"), at(2));
    v.handle_envelope(&new_message("m2", "c1", "u2"), at(3));
    assert_eq!(unread(&v, "c1"), 0);

    v.handle_envelope(&new_message("m3", "c2", "u2"), at(4));
    assert_eq!(unread(&v, "c2"), 1);
    v.handle_envelope(&new_message("m4", "c2", "u2"), at(5));
    assert_eq!(unread(&v, "c2"), 2);

    v.activate("c2", at(6));
    assert_eq!(unread(&v, "c2"), 0);
}

#[test]
fn load_more_is_single_flight() {
    let mut v = view();
    let calls = v.activate("c1", at(0));
    let ticket = calls
        .iter()
        .find_map(|c| match c {
            ApiCall::FetchMessages { ticket, .. } => Some(*ticket),
            _ => None,
        })
        .unwrap();
    let page: Vec<RawMessage> = (0..20)
        .map(|i| raw(&format!("m{i}"), "c1", "u2", 100 + i))
        .collect();
    v.complete(
        ApiOutcome::MessagesFetched {
            conversation_id: "c1".into(),
            ticket,
            result: Ok(page),
        },
        at(1),
    );
    assert!(v.snapshot().has_more_messages);

    let first = v.load_more_messages("c1");
    let second = v.load_more_messages("c1");
    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    match &first[0] {
        ApiCall::FetchMessages {
            conversation_id,
            ticket,
            ..
        } => {
            assert_eq!(conversation_id, "c1");
            assert_eq!(ticket.page, 2);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn failed_page_is_retried_not_skipped() {
    let mut v = view();
    let calls = v.load_more_conversations();
    let ApiCall::FetchConversations { ticket, .. } = calls[0].clone() else {
        panic!("expected a conversation fetch");
    };
    v.complete(
        ApiOutcome::ConversationsFetched {
            ticket,
            result: Err(inbox_core::ApiError::network("offline")),
        },
        at(0),
    );
    let retry = v.load_more_conversations();
    let ApiCall::FetchConversations { ticket: again, .. } = retry[0].clone() else {
        panic!("expected a conversation fetch");
    };
    assert_eq!(again.page, ticket.page);
    assert!(v.snapshot().has_more_conversations);
}

#[test]
fn delivery_by_temp_id_survives_reconcile() {
    let mut v = view();
    let (pending, _) = v.send("c1", Draft::text("hello"), at(1000)).unwrap();
    assert_eq!(pending.id, "temp-1000");

    v.handle_envelope(
        &Envelope::new(
            "message-delivered",
            json!({"tempId": "temp-1000", "conversationId": "c1", "deliveredAt": 1001}),
        ),
        at(1001),
    );
    let stored = v.reconciler().store().find("temp-1000").unwrap();
    assert_eq!(stored.delivery_status(), DeliveryStatus::Delivered);

    v.complete(
        ApiOutcome::MessageSent {
            conversation_id: "c1".into(),
            temp_id: "temp-1000".into(),
            result: Ok(raw("srv-1", "c1", "me", 1002)),
        },
        at(1002),
    );
    let messages = v.reconciler().store().messages("c1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "srv-1");
    assert_eq!(messages[0].temp_id.as_deref(), Some("temp-1000"));
    assert_eq!(messages[0].delivery_status(), DeliveryStatus::Delivered);
    assert!(!messages[0].is_optimistic);
}

#[test]
fn echo_before_response_does_not_duplicate() {
    let mut v = view();
    let (pending, _) = v.send("c1", Draft::text("hello"), at(1000)).unwrap();
    v.handle_envelope(
        &Envelope::new(
            "new-message",
            json!({"_id": "srv-1", "tempId": pending.id, "conversationId": "c1", "senderId": "me", "text": "hello"}),
        ),
        at(1001),
    );
    v.complete(
        ApiOutcome::MessageSent {
            conversation_id: "c1".into(),
            temp_id: pending.id.clone(),
            result: Ok(raw("srv-1", "c1", "me", 1002)),
        },
        at(1002),
    );
    assert_eq!(v.reconciler().store().messages("c1").len(), 1);
}

#[test]
fn conversation_discovered_by_message_keeps_its_unread() {
    let mut v = view();
    let first = v.handle_envelope(&new_message("m1", "c9", "u2"), at(1));
    assert!(first
        .iter()
        .any(|c| matches!(c, ApiCall::FetchConversation { conversation_id } if conversation_id == "c9")));
    v.handle_envelope(&new_message("m2", "c9", "u2"), at(2));
    v.complete(
        ApiOutcome::ConversationFetched {
            conversation_id: "c9".into(),
            result: Ok(serde_json::from_value(json!({"_id": "c9", "updatedAt": 1})).unwrap()),
        },
        at(3),
    );
    let c9 = v.reconciler().conversations().get("c9").unwrap();
    assert_eq!(c9.unread_count, 2);
    assert_eq!(c9.updated_at, 5_000);
    assert_eq!(c9.last_message.as_ref().unwrap().id, "m2");
}

#[test]
fn message_during_list_refresh_survives_stale_page() {
    let mut v = view();
    load_conversations(&mut v, &["c1", "c2"]);
    let calls = v.refresh_conversations(true, at(1));
    let ApiCall::FetchConversations { ticket, .. } = calls[0].clone() else {
        panic!("expected a conversation fetch");
    };
    v.handle_envelope(&new_message("m1", "c2", "u2"), at(2));
    assert_eq!(unread(&v, "c2"), 1);

    let stale = ["c1", "c2"]
        .iter()
        .map(|id| serde_json::from_value(json!({"_id": id, "updatedAt": 1})).unwrap())
        .collect();
    v.complete(
        ApiOutcome::ConversationsFetched {
            ticket,
            result: Ok(stale),
        },
        at(3),
    );
    let c2 = v.reconciler().conversations().get("c2").unwrap();
    assert_eq!(c2.unread_count, 1);
    assert_eq!(c2.last_message.as_ref().unwrap().id, "m1");
    assert_eq!(v.reconciler().conversations().list()[0].id, "c2");
}

struct LogWriter(Arc<Mutex<Vec<u8>>>);
impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
struct MakeLogWriter(Arc<Mutex<Vec<u8>>>);
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MakeLogWriter {
    type Writer = LogWriter;
    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(self.0.clone())
    }
}

#[test]
fn malformed_events_are_logged_and_dropped() {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(MakeLogWriter(buf.clone()))
        .with_ansi(false)
        .finish();
    let mut v = view();
    tracing::subscriber::with_default(subscriber, || {
        let calls = v.handle_envelope(
            &Envelope::new("new-message", json!({"message": {"_id": "m1", "senderId": "u2"}})),
            at(1),
        );
        assert!(calls.is_empty());
    });
    assert!(v.snapshot().messages.is_empty());
    let logs = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("dropping inbound frame"), "logs: {logs}");
    assert!(logs.contains("missing conversation id"), "logs: {logs}");
}
