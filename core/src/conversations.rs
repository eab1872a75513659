use std::collections::HashSet;

use tracing::debug;

use crate::model::{Conversation, MessagePreview};

/// Conversations sorted by `updated_at` descending. Sorting is stable, so
/// ties keep their previous relative order.
#[derive(Debug, Default, Clone)]
pub struct ConversationIndex {
    items: Vec<Conversation>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn resort(&mut self) {
        self.items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|c| c.id == id)
    }

    pub fn list(&self) -> &[Conversation] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_unread(&self) -> u32 {
        self.items.iter().map(|c| c.unread_count).sum()
    }

    /// Replace the whole list with the first page from the server.
    /// Conversations missing from the page are dropped; the ones it shares
    /// with the current list are merged like any other fetch.
    pub fn replace_all(&mut self, conversations: Vec<Conversation>) {
        let listed: HashSet<&str> = conversations.iter().map(|c| c.id.as_str()).collect();
        self.items.retain(|c| listed.contains(c.id.as_str()));
        self.extend(conversations);
    }

    /// Merge a page of conversations. Returns how many were new.
    pub fn extend(&mut self, conversations: Vec<Conversation>) -> usize {
        let mut added = 0;
        for conversation in conversations {
            if self.merge(conversation) {
                added += 1;
            }
        }
        self.resort();
        added
    }

    /// Insert or replace one conversation. Returns true if it was new.
    pub fn upsert(&mut self, conversation: Conversation) -> bool {
        let added = self.merge(conversation);
        self.resort();
        added
    }

    fn merge(&mut self, mut incoming: Conversation) -> bool {
        match self.position(&incoming.id) {
            Some(idx) => {
                let current = &self.items[idx];
                // a fetch can be older than what realtime events already told us
                if current.updated_at > incoming.updated_at {
                    incoming.updated_at = current.updated_at;
                    incoming.last_message = current.last_message.clone();
                    incoming.unread_count = current.unread_count;
                }
                self.items[idx] = incoming;
                false
            }
            None => {
                self.items.push(incoming);
                true
            }
        }
    }

    /// Record a message as the conversation's latest and move it up.
    pub fn touch(&mut self, id: &str, preview: MessagePreview) -> bool {
        let Some(idx) = self.position(id) else {
            debug!(conversation_id = id, "touch for unknown conversation");
            return false;
        };
        let conversation = &mut self.items[idx];
        conversation.updated_at = conversation.updated_at.max(preview.created_at);
        conversation.last_message = Some(preview);
        self.resort();
        true
    }

    /// Swap the preview after a temp message was confirmed, if it is still the latest.
    pub fn replace_preview(&mut self, id: &str, previous_id: &str, preview: MessagePreview) {
        if let Some(idx) = self.position(id) {
            let conversation = &mut self.items[idx];
            if conversation.last_message.as_ref().map(|m| m.id.as_str()) == Some(previous_id) {
                conversation.last_message = Some(preview);
            }
        }
    }

    /// Overwrite the preview without changing recency (after a delete).
    pub fn set_preview(&mut self, id: &str, preview: Option<MessagePreview>) {
        if let Some(idx) = self.position(id) {
            self.items[idx].last_message = preview;
        }
    }

    pub fn increment_unread(&mut self, id: &str) -> Option<u32> {
        let idx = self.position(id)?;
        let conversation = &mut self.items[idx];
        conversation.unread_count = conversation.unread_count.saturating_add(1);
        Some(conversation.unread_count)
    }

    /// Returns the count that was cleared.
    pub fn reset_unread(&mut self, id: &str) -> u32 {
        match self.position(id) {
            Some(idx) => std::mem::take(&mut self.items[idx].unread_count),
            None => 0,
        }
    }

    pub fn set_unread(&mut self, id: &str, count: u32) {
        if let Some(idx) = self.position(id) {
            self.items[idx].unread_count = count;
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Conversation> {
        let idx = self.position(id)?;
        Some(self.items.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(id: &str, updated_at: i64) -> Conversation {
        Conversation {
            id: id.into(),
            participants: vec![],
            is_group: false,
            name: None,
            last_message: None,
            unread_count: 0,
            updated_at,
        }
    }

    fn preview(id: &str, at: i64) -> MessagePreview {
        MessagePreview {
            id: id.into(),
            sender_id: "u2".into(),
            text: "hey".into(),
            has_attachments: false,
            created_at: at,
        }
    }

    fn ids(index: &ConversationIndex) -> Vec<&str> {
        index.list().iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn sorted_by_recency_with_stable_ties() {
        let mut index = ConversationIndex::new();
        index.replace_all(vec![conv("a", 5), conv("b", 9), conv("c", 5)]);
        assert_eq!(ids(&index), vec!["b", "a", "c"]);
        index.touch("c", preview("m1", 20));
        assert_eq!(ids(&index), vec!["c", "b", "a"]);
        assert_eq!(index.get("c").unwrap().last_message.as_ref().unwrap().id, "m1");
    }

    #[test]
    fn touch_never_moves_recency_backwards() {
        let mut index = ConversationIndex::new();
        index.upsert(conv("a", 50));
        index.touch("a", preview("late", 10));
        assert_eq!(index.get("a").unwrap().updated_at, 50);
        assert!(!index.touch("zzz", preview("m", 1)));
    }

    #[test]
    fn unread_counts() {
        let mut index = ConversationIndex::new();
        index.upsert(conv("a", 1));
        assert_eq!(index.increment_unread("a"), Some(1));
        assert_eq!(index.increment_unread("a"), Some(2));
        assert_eq!(index.increment_unread("nope"), None);
        assert_eq!(index.total_unread(), 2);
        assert_eq!(index.reset_unread("a"), 2);
        assert_eq!(index.get("a").unwrap().unread_count, 0);
    }

    #[test]
    fn stale_fetch_keeps_newer_local_preview() {
        let mut index = ConversationIndex::new();
        index.upsert(conv("a", 1));
        index.touch("a", preview("m2", 30));
        assert!(!index.upsert(conv("a", 10)));
        let a = index.get("a").unwrap();
        assert_eq!(a.updated_at, 30);
        assert_eq!(a.last_message.as_ref().unwrap().id, "m2");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn stale_first_page_keeps_local_activity() {
        let mut index = ConversationIndex::new();
        index.replace_all(vec![conv("a", 1), conv("b", 2), conv("gone", 3)]);
        index.touch("a", preview("m1", 40));
        index.increment_unread("a");
        index.replace_all(vec![conv("a", 1), conv("b", 5)]);
        assert_eq!(ids(&index), vec!["a", "b"]);
        let a = index.get("a").unwrap();
        assert_eq!(a.unread_count, 1);
        assert_eq!(a.updated_at, 40);
        assert_eq!(a.last_message.as_ref().unwrap().id, "m1");
        assert_eq!(index.get("b").unwrap().updated_at, 5);
    }

    #[test]
    fn preview_swap_only_when_still_latest() {
        let mut index = ConversationIndex::new();
        index.upsert(conv("a", 1));
        index.touch("a", preview("temp-1", 2));
        index.replace_preview("a", "temp-1", preview("m1", 3));
        assert_eq!(index.get("a").unwrap().last_message.as_ref().unwrap().id, "m1");
        index.replace_preview("a", "temp-1", preview("m9", 4));
        assert_eq!(index.get("a").unwrap().last_message.as_ref().unwrap().id, "m1");
    }
}
