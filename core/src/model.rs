use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{InboxError, Result};
use crate::status::{merge_delivered_at, DeliveryStatus, StatusPatch};

/// Prefix of locally generated message ids.
pub const TEMP_ID_PREFIX: &str = "temp-";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    File,
}

impl AttachmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Video => "video",
            AttachmentKind::Audio => "audio",
            AttachmentKind::File => "file",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub url: String,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub user_id: String,
    pub emoji: String,
    pub reacted_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    /// Kept after reconciliation so late events naming the temp id still match.
    pub temp_id: Option<String>,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub created_at: i64,
    pub delivered_at: Option<i64>,
    pub read_by: BTreeSet<String>,
    /// Weak back-reference; the target may no longer exist.
    pub reply_to: Option<String>,
    pub reactions: Vec<Reaction>,
    pub is_optimistic: bool,
}

impl Message {
    pub fn delivery_status(&self) -> DeliveryStatus {
        DeliveryStatus::from_signals(self.delivered_at, &self.read_by)
    }

    /// True if `key` is this message's server id or its original temp id.
    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.temp_id.as_deref() == Some(key)
    }

    /// Merge a receipt using the supremum rule. Returns whether anything changed.
    pub fn apply_patch(&mut self, patch: &StatusPatch) -> bool {
        let before = (self.delivered_at, self.read_by.len());
        self.delivered_at = merge_delivered_at(self.delivered_at, patch.delivered_at);
        if let Some(reader) = &patch.read_by {
            self.read_by.insert(reader.clone());
        }
        before != (self.delivered_at, self.read_by.len())
    }

    /// Fold the status signals of another copy of this message into this one.
    pub fn absorb_signals(&mut self, other: &Message) {
        self.delivered_at = merge_delivered_at(self.delivered_at, other.delivered_at);
        self.read_by.extend(other.read_by.iter().cloned());
    }

    /// Toggle `(user_id, emoji)`. Returns true if the reaction is now present.
    pub fn toggle_reaction(&mut self, user_id: &str, emoji: &str, at: i64) -> bool {
        if let Some(pos) = self
            .reactions
            .iter()
            .position(|r| r.user_id == user_id && r.emoji == emoji)
        {
            self.reactions.remove(pos);
            false
        } else {
            self.reactions.push(Reaction {
                user_id: user_id.to_string(),
                emoji: emoji.to_string(),
                reacted_at: at,
            });
            true
        }
    }

    /// Replace the reaction set, keeping the first entry of any repeated pair.
    pub fn set_reactions(&mut self, reactions: Vec<Reaction>) {
        let mut unique: Vec<Reaction> = Vec::with_capacity(reactions.len());
        for reaction in reactions {
            if !unique
                .iter()
                .any(|r| r.user_id == reaction.user_id && r.emoji == reaction.emoji)
            {
                unique.push(reaction);
            }
        }
        self.reactions = unique;
    }

    pub fn preview(&self) -> MessagePreview {
        MessagePreview {
            id: self.id.clone(),
            sender_id: self.sender_id.clone(),
            text: self.text.clone(),
            has_attachments: !self.attachments.is_empty(),
            created_at: self.created_at,
        }
    }
}

/// Denormalized copy of a conversation's latest message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MessagePreview {
    pub id: String,
    pub sender_id: String,
    pub text: String,
    pub has_attachments: bool,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub participants: Vec<UserProfile>,
    pub is_group: bool,
    pub name: Option<String>,
    pub last_message: Option<MessagePreview>,
    pub unread_count: u32,
    pub updated_at: i64,
}

impl Conversation {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.id == user_id)
    }
}

/// What the user composed, before it becomes a message.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<String>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// A draft needs either non-blank text or at least one attachment.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() && self.attachments.is_empty() {
            return Err(InboxError::Validation("empty_message".into()));
        }
        Ok(())
    }
}
