use std::collections::HashMap;

use tokio::time::{Duration, Instant};
use tracing::{debug, info};

use crate::client::ApiCall;
use crate::conversations::ConversationIndex;
use crate::events::{
    DeliveryReceipt, InboundEvent, MessageDeleted, ReactionsUpdated, ReadReceipt,
};
use crate::model::{Conversation, Message, MessagePreview};
use crate::notice::{NoticeKind, NoticeQueue};
use crate::presence::PresenceIndex;
use crate::status::StatusPatch;
use crate::store::{InboundOutcome, MessageStore};
use crate::typing::TypingTracker;

/// Activity seen for a conversation whose summary is still being fetched.
#[derive(Debug, Default)]
struct Unlisted {
    unread: u32,
    latest: Option<MessagePreview>,
}

impl Unlisted {
    fn record(&mut self, preview: &MessagePreview) {
        if self.latest.as_ref().map_or(true, |l| l.created_at <= preview.created_at) {
            self.latest = Some(preview.clone());
        }
    }

    // the server count may already include these messages, so take the larger
    fn fold_into(self, conversation: &mut Conversation) {
        conversation.unread_count = conversation.unread_count.max(self.unread);
        if let Some(latest) = self.latest {
            if latest.created_at >= conversation.updated_at {
                conversation.updated_at = latest.created_at;
                conversation.last_message = Some(latest);
            }
        }
    }
}

pub struct Reconciler {
    user_id: String,
    store: MessageStore,
    conversations: ConversationIndex,
    typing: TypingTracker,
    presence: PresenceIndex,
    notices: NoticeQueue,
    active: Option<String>,
    fetching: HashMap<String, Unlisted>,
}

impl Reconciler {
    pub fn new(
        user_id: impl Into<String>,
        typing_timeout: Duration,
        typing_debounce: Duration,
        presence: PresenceIndex,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            store: MessageStore::new(),
            conversations: ConversationIndex::new(),
            typing: TypingTracker::new(typing_timeout, typing_debounce),
            presence,
            notices: NoticeQueue::default(),
            active: None,
            fetching: HashMap::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut MessageStore {
        &mut self.store
    }

    pub fn conversations(&self) -> &ConversationIndex {
        &self.conversations
    }

    pub fn conversations_mut(&mut self) -> &mut ConversationIndex {
        &mut self.conversations
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    pub fn typing_mut(&mut self) -> &mut TypingTracker {
        &mut self.typing
    }

    pub fn presence(&self) -> &PresenceIndex {
        &self.presence
    }

    pub fn notices(&self) -> &NoticeQueue {
        &self.notices
    }

    pub fn notices_mut(&mut self) -> &mut NoticeQueue {
        &mut self.notices
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.active.as_deref() == Some(conversation_id)
    }

    /// Switch the active conversation. Typing indicators of the one being
    /// left are dropped. Returns the previous active conversation.
    pub fn set_active(&mut self, conversation_id: Option<String>) -> Option<String> {
        let previous = std::mem::replace(&mut self.active, conversation_id);
        if let Some(prev) = &previous {
            if self.active.as_ref() != Some(prev) {
                self.typing.clear_conversation(prev);
            }
        }
        if let Some(current) = &self.active {
            info!(conversation_id = %current, "conversation activated");
        }
        previous
    }

    /// Request an unknown conversation once; repeats while in flight are dropped.
    pub fn request_conversation(&mut self, conversation_id: &str) -> Option<ApiCall> {
        if self.conversations.contains(conversation_id) || self.fetching.contains_key(conversation_id) {
            return None;
        }
        self.fetching
            .insert(conversation_id.to_string(), Unlisted::default());
        Some(ApiCall::FetchConversation {
            conversation_id: conversation_id.to_string(),
        })
    }

    /// A `FetchConversation` finished; `None` means it failed. Messages that
    /// arrived while it was in flight are folded into the fetched copy.
    pub fn conversation_fetched(&mut self, conversation_id: &str, conversation: Option<Conversation>) {
        let unlisted = self.fetching.remove(conversation_id);
        match conversation {
            Some(mut conversation) => {
                if let Some(unlisted) = unlisted {
                    unlisted.fold_into(&mut conversation);
                }
                self.conversations.upsert(conversation);
            }
            None => {
                if let Some(unlisted) = unlisted {
                    debug!(conversation_id, unread = unlisted.unread, "dropping activity for unfetched conversation");
                }
            }
        }
    }

    /// Apply one event. Returns the collaborator calls it implies.
    pub fn handle(&mut self, event: InboundEvent, now: Instant) -> Vec<ApiCall> {
        match event {
            InboundEvent::NewMessage(message) => return self.on_new_message(message),
            InboundEvent::MessageDelivered(receipt) => self.on_delivered(&receipt),
            InboundEvent::MessageRead(receipt) => self.on_read(&receipt),
            InboundEvent::ReactionsUpdated(update) => self.on_reactions(update),
            InboundEvent::TypingStarted(signal) => {
                if signal.user_id != self.user_id {
                    self.typing.start(&signal.conversation_id, &signal.user_id, now);
                }
            }
            InboundEvent::TypingStopped(signal) => {
                self.typing.stop(&signal.conversation_id, &signal.user_id);
            }
            InboundEvent::Presence(update) => {
                self.presence.patch(update);
            }
            InboundEvent::PresenceList(list) => self.presence.replace_all(list.0),
            InboundEvent::MessageDeleted(deleted) => self.on_deleted(&deleted),
            InboundEvent::ConversationCreated(conversation) => {
                let id = conversation.id.clone();
                self.conversation_fetched(&id, Some(conversation));
            }
        }
        Vec::new()
    }

    fn on_new_message(&mut self, message: Message) -> Vec<ApiCall> {
        let conversation_id = message.conversation_id.clone();
        let message_id = message.id.clone();
        let own = message.sender_id == self.user_id;
        let active = self.is_active(&conversation_id);
        let mut calls = Vec::new();

        // a sender's indicator ends with their message
        self.typing.stop(&conversation_id, &message.sender_id);
        calls.extend(self.request_conversation(&conversation_id));

        let preview = message.preview();
        let sender_id = message.sender_id.clone();
        match self.store.apply_inbound(message) {
            InboundOutcome::Duplicate => return calls,
            InboundOutcome::Reconciled => {
                debug!(message_id = %message_id, "echo reconciled optimistic message")
            }
            InboundOutcome::Inserted => {}
        }
        if !self.conversations.touch(&conversation_id, preview.clone()) {
            if let Some(unlisted) = self.fetching.get_mut(&conversation_id) {
                unlisted.record(&preview);
            }
        }

        if own {
            return calls;
        }
        if active {
            self.store
                .update_status(&message_id, &StatusPatch::read(self.user_id.clone()));
            calls.push(ApiCall::MarkMessageRead { message_id });
        } else {
            if self.conversations.increment_unread(&conversation_id).is_none() {
                if let Some(unlisted) = self.fetching.get_mut(&conversation_id) {
                    unlisted.unread += 1;
                }
            }
            self.notices.push(NoticeKind::MessagePreview {
                conversation_id,
                sender_id,
                text: preview.text,
            });
        }
        calls
    }

    fn on_delivered(&mut self, receipt: &DeliveryReceipt) {
        let patch = StatusPatch::delivered(receipt.delivered_at);
        for key in receipt.keys() {
            if self.store.update_status(key, &patch).is_some() {
                return;
            }
        }
    }

    fn on_read(&mut self, receipt: &ReadReceipt) {
        match (&receipt.message_id, &receipt.conversation_id) {
            (Some(message_id), _) => {
                self.store
                    .update_status(message_id, &StatusPatch::read(receipt.reader_id.clone()));
            }
            (None, Some(conversation_id)) => {
                let marked = self.store.mark_read_by(conversation_id, &receipt.reader_id);
                debug!(conversation_id = %conversation_id, marked, "conversation read receipt");
                if receipt.reader_id == self.user_id {
                    // read on another device
                    self.conversations.reset_unread(conversation_id);
                }
            }
            (None, None) => {}
        }
    }

    fn on_reactions(&mut self, update: ReactionsUpdated) {
        if !self.store.set_reactions(&update.message_id, update.reactions) {
            debug!(message_id = %update.message_id, "reactions for unknown message");
        }
    }

    fn on_deleted(&mut self, deleted: &MessageDeleted) {
        if let Some(removed) = self.store.remove(&deleted.message_id) {
            self.refresh_preview(&removed.message.conversation_id, &deleted.message_id);
        }
    }

    /// After `removed_id` left a conversation, point its preview at the new tail.
    pub fn refresh_preview(&mut self, conversation_id: &str, removed_id: &str) {
        let still_latest = self
            .conversations
            .get(conversation_id)
            .and_then(|c| c.last_message.as_ref())
            .map(|m| m.id == removed_id)
            .unwrap_or(false);
        if still_latest {
            let tail = self.store.messages(conversation_id).last().map(Message::preview);
            self.conversations.set_preview(conversation_id, tail);
        }
    }

    /// Drop typing indicators whose deadline passed.
    pub fn expire_typing(&mut self, now: Instant) -> Vec<(String, String)> {
        self.typing.expire(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{TypingStarted, TypingStopped};
    use crate::model::Draft;
    use crate::status::DeliveryStatus;
    use std::collections::BTreeSet;

    fn reconciler() -> Reconciler {
        Reconciler::new(
            "me",
            Duration::from_secs(3),
            Duration::from_secs(2),
            PresenceIndex::new(),
        )
    }

    fn conversation(id: &str) -> Conversation {
        Conversation {
            id: id.into(),
            participants: vec![],
            is_group: false,
            name: None,
            last_message: None,
            unread_count: 0,
            updated_at: 0,
        }
    }

    fn incoming(id: &str, conversation: &str, sender: &str) -> Message {
        Message {
            id: id.into(),
            temp_id: None,
            conversation_id: conversation.into(),
            sender_id: sender.into(),
            text: "hello".into(),
            attachments: vec![],
            created_at: 10,
            delivered_at: None,
            read_by: BTreeSet::new(),
            reply_to: None,
            reactions: vec![],
            is_optimistic: false,
        }
    }

    #[test]
    fn new_message_in_active_conversation_marks_read() {
        let mut r = reconciler();
        r.conversations_mut().upsert(conversation("c1"));
        r.set_active(Some("c1".into()));
        let calls = r.handle(InboundEvent::NewMessage(incoming("m1", "c1", "u2")), Instant::now());
        assert_eq!(
            calls,
            vec![ApiCall::MarkMessageRead {
                message_id: "m1".into()
            }]
        );
        assert_eq!(r.conversations().get("c1").unwrap().unread_count, 0);
        assert!(r.notices().is_empty());
    }

    #[test]
    fn new_message_elsewhere_bumps_unread_and_previews() {
        let mut r = reconciler();
        r.conversations_mut().upsert(conversation("c1"));
        r.conversations_mut().upsert(conversation("c2"));
        r.set_active(Some("c1".into()));
        let now = Instant::now();
        r.handle(InboundEvent::NewMessage(incoming("m1", "c2", "u2")), now);
        r.handle(InboundEvent::NewMessage(incoming("m2", "c2", "u2")), now);
        assert_eq!(r.conversations().get("c2").unwrap().unread_count, 2);
        assert_eq!(r.notices().len(), 2);
        // redelivery changes nothing
        r.handle(InboundEvent::NewMessage(incoming("m2", "c2", "u2")), now);
        assert_eq!(r.conversations().get("c2").unwrap().unread_count, 2);
        assert_eq!(r.conversations().list()[0].id, "c2");
    }

    #[test]
    fn own_message_from_other_device_is_not_unread() {
        let mut r = reconciler();
        r.conversations_mut().upsert(conversation("c2"));
        r.handle(InboundEvent::NewMessage(incoming("m1", "c2", "me")), Instant::now());
        assert_eq!(r.conversations().get("c2").unwrap().unread_count, 0);
    }

    #[test]
    fn unknown_conversation_is_fetched_once() {
        let mut r = reconciler();
        let now = Instant::now();
        let first = r.handle(InboundEvent::NewMessage(incoming("m1", "c9", "u2")), now);
        let second = r.handle(InboundEvent::NewMessage(incoming("m2", "c9", "u2")), now);
        assert_eq!(
            first,
            vec![ApiCall::FetchConversation {
                conversation_id: "c9".into()
            }]
        );
        assert!(second.is_empty());
        r.conversation_fetched("c9", None);
        let retry = r.handle(InboundEvent::NewMessage(incoming("m3", "c9", "u2")), now);
        assert_eq!(retry.len(), 1);
    }

    #[test]
    fn activity_before_fetch_lands_is_kept() {
        let mut r = reconciler();
        let now = Instant::now();
        r.handle(InboundEvent::NewMessage(incoming("m1", "c9", "u2")), now);
        r.handle(InboundEvent::NewMessage(incoming("m2", "c9", "u2")), now);
        r.conversation_fetched("c9", Some(conversation("c9")));
        let c9 = r.conversations().get("c9").unwrap();
        assert_eq!(c9.unread_count, 2);
        assert_eq!(c9.updated_at, 10);
        assert_eq!(c9.last_message.as_ref().unwrap().id, "m2");
    }

    #[test]
    fn fetched_unread_count_is_not_doubled() {
        let mut r = reconciler();
        let now = Instant::now();
        r.handle(InboundEvent::NewMessage(incoming("m1", "c9", "u2")), now);
        let mut fetched = conversation("c9");
        fetched.unread_count = 4;
        fetched.updated_at = 50;
        r.conversation_fetched("c9", Some(fetched));
        let c9 = r.conversations().get("c9").unwrap();
        assert_eq!(c9.unread_count, 4);
        assert_eq!(c9.updated_at, 50);
        assert!(c9.last_message.is_none());
    }

    #[test]
    fn delivery_receipt_falls_back_to_temp_id() {
        let mut r = reconciler();
        let pending = r.store_mut().append_pending("c1", "me", Draft::text("hi"), 1000);
        r.handle(
            InboundEvent::MessageDelivered(DeliveryReceipt {
                message_id: Some("m-not-yet".into()),
                temp_id: Some(pending.id.clone()),
                conversation_id: None,
                delivered_at: 1001,
            }),
            Instant::now(),
        );
        assert_eq!(
            r.store().find(&pending.id).unwrap().delivery_status(),
            DeliveryStatus::Delivered
        );
    }

    #[test]
    fn typing_start_stop_and_switch() {
        let mut r = reconciler();
        let now = Instant::now();
        let start = |c: &str, u: &str| {
            InboundEvent::TypingStarted(TypingStarted {
                conversation_id: c.into(),
                user_id: u.into(),
            })
        };
        r.set_active(Some("c1".into()));
        r.handle(start("c1", "u2"), now);
        r.handle(start("c1", "me"), now);
        assert_eq!(r.typing().typing_in("c1"), vec!["u2".to_string()]);
        r.handle(
            InboundEvent::TypingStopped(TypingStopped {
                conversation_id: "c1".into(),
                user_id: "u2".into(),
            }),
            now,
        );
        assert!(r.typing().typing_in("c1").is_empty());
        r.handle(start("c1", "u3"), now);
        r.set_active(Some("c2".into()));
        assert!(r.typing().typing_in("c1").is_empty());
    }

    #[test]
    fn conversation_read_by_me_elsewhere_clears_unread() {
        let mut r = reconciler();
        r.conversations_mut().upsert(conversation("c2"));
        r.handle(InboundEvent::NewMessage(incoming("m1", "c2", "u2")), Instant::now());
        r.handle(
            InboundEvent::MessageRead(ReadReceipt {
                message_id: None,
                conversation_id: Some("c2".into()),
                reader_id: "me".into(),
            }),
            Instant::now(),
        );
        assert_eq!(r.conversations().get("c2").unwrap().unread_count, 0);
        assert!(r.store().find("m1").unwrap().read_by.contains("me"));
    }

    #[test]
    fn deleting_latest_message_moves_preview_back() {
        let mut r = reconciler();
        r.conversations_mut().upsert(conversation("c1"));
        let now = Instant::now();
        r.handle(InboundEvent::NewMessage(incoming("m1", "c1", "me")), now);
        r.handle(InboundEvent::NewMessage(incoming("m2", "c1", "me")), now);
        r.handle(
            InboundEvent::MessageDeleted(MessageDeleted {
                message_id: "m2".into(),
                conversation_id: Some("c1".into()),
            }),
            now,
        );
        let preview = r.conversations().get("c1").unwrap().last_message.clone();
        assert_eq!(preview.unwrap().id, "m1");
    }
}
