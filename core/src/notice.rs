use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoticeKind {
    SendFailed { conversation_id: String, reason: String },
    ActionFailed { action: String, reason: String },
    MessagePreview { conversation_id: String, sender_id: String, text: String },
}

/// A transient, dismissible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub id: Uuid,
    pub level: NoticeLevel,
    #[serde(flatten)]
    pub kind: NoticeKind,
}

impl Notice {
    pub fn new(kind: NoticeKind) -> Self {
        let level = match kind {
            NoticeKind::MessagePreview { .. } => NoticeLevel::Info,
            _ => NoticeLevel::Error,
        };
        Self {
            id: Uuid::new_v4(),
            level,
            kind,
        }
    }
}

/// Oldest notices fall off once the queue is full.
#[derive(Debug, Clone)]
pub struct NoticeQueue {
    items: VecDeque<Notice>,
    capacity: usize,
}

impl Default for NoticeQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl NoticeQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, kind: NoticeKind) -> Uuid {
        let notice = Notice::new(kind);
        let id = notice.id;
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(notice);
        id
    }

    pub fn dismiss(&mut self, id: Uuid) -> bool {
        let before = self.items.len();
        self.items.retain(|n| n.id != id);
        before != self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
