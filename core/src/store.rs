use std::collections::HashMap;
use tracing::debug;

use crate::model::{Draft, Message, Reaction, TEMP_ID_PREFIX};
use crate::status::{DeliveryStatus, StatusPatch};

/// What `apply_inbound` did with a server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Inserted,
    /// Replaced the optimistic copy named by the message's temp id.
    Reconciled,
    Duplicate,
}

/// Where a fetched page sits relative to what is already loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePosition {
    /// First page of a fresh load; replaces confirmed history.
    Newest,
    /// An older page; goes in front.
    Older,
}

/// A locally deleted message, kept so a failed delete call can put it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed {
    pub index: usize,
    pub message: Message,
}

#[derive(Debug, Default)]
pub struct MessageStore {
    conversations: HashMap<String, Vec<Message>>,
    last_temp_stamp: i64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self, conversation_id: &str) -> &[Message] {
        self.conversations
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Find a message by server id or temp id.
    pub fn find(&self, key: &str) -> Option<&Message> {
        self.conversations
            .values()
            .flat_map(|list| list.iter())
            .find(|m| m.matches(key))
    }

    fn locate(&self, key: &str) -> Option<(String, usize)> {
        self.conversations.iter().find_map(|(conversation_id, list)| {
            list.iter()
                .position(|m| m.matches(key))
                .map(|idx| (conversation_id.clone(), idx))
        })
    }

    fn find_mut(&mut self, key: &str) -> Option<&mut Message> {
        self.conversations
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|m| m.matches(key))
    }

    fn next_temp_id(&mut self, now: i64) -> String {
        let stamp = now.max(self.last_temp_stamp + 1);
        self.last_temp_stamp = stamp;
        format!("{TEMP_ID_PREFIX}{stamp}")
    }

    /// Insert an unconfirmed message at the tail and return it.
    pub fn append_pending(
        &mut self,
        conversation_id: &str,
        sender_id: &str,
        draft: Draft,
        now: i64,
    ) -> Message {
        let temp_id = self.next_temp_id(now);
        let message = Message {
            id: temp_id.clone(),
            temp_id: Some(temp_id),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            text: draft.text,
            attachments: draft.attachments,
            created_at: now,
            delivered_at: None,
            read_by: Default::default(),
            reply_to: draft.reply_to,
            reactions: Vec::new(),
            is_optimistic: true,
        };
        self.conversations
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.clone());
        message
    }

    /// Replace the message known by `temp_id` with the server copy, in place.
    /// Receipts that reached the temp copy are kept. Returns false if nothing matched.
    pub fn reconcile(&mut self, temp_id: &str, server: Message) -> bool {
        let Some((conversation_id, idx)) = self.locate(temp_id) else {
            debug!(temp_id, "reconcile target gone; ignoring");
            return false;
        };
        let Some(list) = self.conversations.get_mut(&conversation_id) else {
            return false;
        };
        let mut merged = server;
        merged.temp_id = Some(temp_id.to_string());
        merged.is_optimistic = false;
        merged.conversation_id = conversation_id;
        merged.absorb_signals(&list[idx]);
        // an echo without the temp id may already hold the server id
        let duplicate = list
            .iter()
            .enumerate()
            .position(|(i, m)| i != idx && m.id == merged.id);
        if let Some(dup) = duplicate {
            merged.absorb_signals(&list[dup]);
            list[idx] = merged;
            list.remove(dup);
        } else {
            list[idx] = merged;
        }
        true
    }

    /// Remove the optimistic message named by `temp_id`.
    pub fn rollback(&mut self, temp_id: &str) -> Option<Message> {
        let (conversation_id, idx) = self.locate(temp_id)?;
        let list = self.conversations.get_mut(&conversation_id)?;
        if !list[idx].is_optimistic {
            debug!(temp_id, "message already confirmed; not rolling back");
            return None;
        }
        Some(list.remove(idx))
    }

    /// Insert a server-originated message unless its id is already present.
    pub fn apply_inbound(&mut self, message: Message) -> InboundOutcome {
        let list = self
            .conversations
            .entry(message.conversation_id.clone())
            .or_default();
        if list.iter().any(|m| m.id == message.id) {
            debug!(message_id = %message.id, "duplicate inbound message");
            return InboundOutcome::Duplicate;
        }
        if let Some(temp_id) = message.temp_id.clone() {
            if list.iter().any(|m| m.is_optimistic && m.matches(&temp_id)) {
                self.reconcile(&temp_id, message);
                return InboundOutcome::Reconciled;
            }
        }
        list.push(message);
        InboundOutcome::Inserted
    }

    /// Merge a receipt into the message named by `key` (server or temp id).
    /// Returns the resulting status, or `None` if no message matched.
    pub fn update_status(&mut self, key: &str, patch: &StatusPatch) -> Option<DeliveryStatus> {
        let Some(message) = self.find_mut(key) else {
            debug!(key, "status update for unknown message");
            return None;
        };
        message.apply_patch(patch);
        Some(message.delivery_status())
    }

    /// Mark every message in a conversation not sent by `reader` as read by them.
    pub fn mark_read_by(&mut self, conversation_id: &str, reader: &str) -> usize {
        let Some(list) = self.conversations.get_mut(conversation_id) else {
            return 0;
        };
        let patch = StatusPatch::read(reader);
        list.iter_mut()
            .filter(|m| m.sender_id != reader)
            .map(|m| m.apply_patch(&patch))
            .filter(|changed| *changed)
            .count()
    }

    /// Undo `user_id`'s read mark locally. Other readers and the delivered
    /// bit are untouched.
    pub fn mark_unread_local(&mut self, message_id: &str, user_id: &str, now: i64) -> bool {
        let Some(message) = self.find_mut(message_id) else {
            return false;
        };
        if !message.read_by.remove(user_id) {
            return false;
        }
        if message.delivered_at.is_none() {
            message.delivered_at = Some(now);
        }
        true
    }

    /// Local toggle ahead of the server. `Some(true)` if the reaction is now present.
    pub fn toggle_reaction(
        &mut self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        at: i64,
    ) -> Option<bool> {
        self.find_mut(message_id)
            .map(|m| m.toggle_reaction(user_id, emoji, at))
    }

    /// Server-authoritative reaction set.
    pub fn set_reactions(&mut self, message_id: &str, reactions: Vec<Reaction>) -> bool {
        match self.find_mut(message_id) {
            Some(message) => {
                message.set_reactions(reactions);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, message_id: &str) -> Option<Removed> {
        let (conversation_id, index) = self.locate(message_id)?;
        let list = self.conversations.get_mut(&conversation_id)?;
        Some(Removed {
            index,
            message: list.remove(index),
        })
    }

    /// Put a removed message back where it was, unless it has reappeared meanwhile.
    pub fn restore(&mut self, removed: Removed) {
        let list = self
            .conversations
            .entry(removed.message.conversation_id.clone())
            .or_default();
        if list.iter().any(|m| m.id == removed.message.id) {
            return;
        }
        let index = removed.index.min(list.len());
        list.insert(index, removed.message);
    }

    /// Merge a fetched page. Returns how many messages were new.
    pub fn merge_page(
        &mut self,
        conversation_id: &str,
        page: Vec<Message>,
        position: PagePosition,
    ) -> usize {
        let list = self
            .conversations
            .entry(conversation_id.to_string())
            .or_default();
        match position {
            PagePosition::Older => {
                let fresh: Vec<Message> = page
                    .into_iter()
                    .filter(|m| !list.iter().any(|existing| existing.id == m.id))
                    .collect();
                let added = fresh.len();
                list.splice(0..0, fresh);
                added
            }
            PagePosition::Newest => {
                let newest_confirmed = page.iter().map(|m| m.created_at).max().unwrap_or(i64::MIN);
                let mut merged = page;
                let mut added = 0;
                for m in merged.iter_mut() {
                    match list.iter().find(|existing| existing.id == m.id) {
                        Some(existing) => m.absorb_signals(existing),
                        None => added += 1,
                    }
                }
                // keep unconfirmed sends and anything that arrived after the fetch
                for existing in list.drain(..) {
                    let in_page = merged.iter().any(|m| m.id == existing.id);
                    if !in_page && (existing.is_optimistic || existing.created_at > newest_confirmed) {
                        merged.push(existing);
                    }
                }
                *list = merged;
                added
            }
        }
    }

    pub fn clear_conversation(&mut self, conversation_id: &str) {
        self.conversations.remove(conversation_id);
    }
}
