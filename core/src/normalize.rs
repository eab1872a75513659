use std::collections::BTreeSet;

use inbox_wire::{
    RawAttachment, RawConversation, RawMessage, RawPresence, RawReaction, RawTimestamp,
    RawUser, RawUserRef,
};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{InboxError, Result};
use crate::media::attachment_kind;
use crate::model::{Attachment, Conversation, Message, Reaction, UserProfile};
use crate::presence::PresenceUpdate;

/// Epoch milliseconds from either wire representation.
pub fn timestamp_ms(raw: &RawTimestamp) -> Option<i64> {
    match raw {
        RawTimestamp::Millis(ms) => Some(*ms),
        RawTimestamp::Text(text) => {
            if let Ok(ms) = text.parse::<i64>() {
                return Some(ms);
            }
            OffsetDateTime::parse(text, &Rfc3339)
                .ok()
                .map(|dt| (dt.unix_timestamp_nanos() / 1_000_000) as i64)
        }
    }
}

fn opt_ms(raw: &Option<RawTimestamp>) -> Option<i64> {
    raw.as_ref().and_then(timestamp_ms)
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub fn user(raw: &RawUser) -> Option<UserProfile> {
    let id = non_empty(&raw.id)?.to_string();
    let display_name = non_empty(&raw.full_name)
        .or_else(|| non_empty(&raw.name))
        .or_else(|| non_empty(&raw.display_name))
        .or_else(|| non_empty(&raw.username))
        .unwrap_or(id.as_str())
        .to_string();
    let avatar_url = non_empty(&raw.avatar)
        .or_else(|| non_empty(&raw.profile_picture))
        .or_else(|| non_empty(&raw.image))
        .map(str::to_string);
    Some(UserProfile {
        id,
        display_name,
        avatar_url,
    })
}

pub fn user_ref(raw: &RawUserRef) -> Option<UserProfile> {
    match raw {
        RawUserRef::Id(id) if !id.trim().is_empty() => Some(UserProfile {
            id: id.clone(),
            display_name: id.clone(),
            avatar_url: None,
        }),
        RawUserRef::Id(_) => None,
        RawUserRef::User(u) => user(u),
    }
}

fn attachment(raw: &RawAttachment) -> Option<Attachment> {
    let url = non_empty(&raw.url)?.to_string();
    let name = non_empty(&raw.name)
        .map(str::to_string)
        .or_else(|| url.rsplit('/').next().map(str::to_string))
        .unwrap_or_default();
    Some(Attachment {
        kind: attachment_kind(raw.kind.as_deref(), raw.mime_type.as_deref(), &name),
        url,
        name,
        size: raw.size.unwrap_or(0),
    })
}

pub fn reaction(raw: &RawReaction) -> Option<Reaction> {
    let user_id = non_empty(&raw.user_id)
        .map(str::to_string)
        .or_else(|| raw.user.as_ref().and_then(|u| u.id().map(str::to_string)))?;
    if raw.emoji.is_empty() {
        return None;
    }
    Some(Reaction {
        user_id,
        emoji: raw.emoji.clone(),
        reacted_at: opt_ms(&raw.created_at).unwrap_or(0),
    })
}

/// Normalize a message. `conversation_hint` is the conversation id carried
/// next to the message in an event envelope, which wins over the message's own.
pub fn message(raw: &RawMessage, conversation_hint: Option<&str>, now: i64) -> Result<Message> {
    let id = non_empty(&raw.id)
        .ok_or_else(|| InboxError::malformed("message", "missing message id"))?
        .to_string();
    let conversation_id = conversation_hint
        .filter(|c| !c.is_empty())
        .or_else(|| non_empty(&raw.conversation_id))
        .or_else(|| raw.conversation.as_ref().map(|c| c.id()))
        .filter(|c| !c.is_empty())
        .ok_or_else(|| InboxError::malformed("message", "missing conversation id"))?
        .to_string();
    let sender_id = non_empty(&raw.sender_id)
        .map(str::to_string)
        .or_else(|| raw.sender.as_ref().and_then(|s| s.id().map(str::to_string)))
        .ok_or_else(|| InboxError::malformed("message", "missing sender"))?;
    let read_by: BTreeSet<String> = raw
        .read_by
        .iter()
        .filter_map(|r| r.user_id())
        .map(str::to_string)
        .collect();
    Ok(Message {
        id,
        temp_id: non_empty(&raw.temp_id).map(str::to_string),
        conversation_id,
        sender_id,
        text: raw.text.clone().unwrap_or_default(),
        attachments: raw.attachments.iter().filter_map(attachment).collect(),
        created_at: opt_ms(&raw.created_at).unwrap_or(now),
        delivered_at: opt_ms(&raw.delivered_at),
        read_by,
        reply_to: raw.reply_to.as_ref().map(|r| r.id().to_string()),
        reactions: raw.reactions.iter().filter_map(reaction).collect(),
        is_optimistic: false,
    })
}

pub fn conversation(raw: &RawConversation, now: i64) -> Result<Conversation> {
    let id = non_empty(&raw.id)
        .ok_or_else(|| InboxError::malformed("conversation", "missing conversation id"))?
        .to_string();
    let mut participants: Vec<UserProfile> = Vec::new();
    for p in raw.participants.iter().filter_map(user_ref) {
        if !participants.iter().any(|existing| existing.id == p.id) {
            participants.push(p);
        }
    }
    let last_message = raw
        .last_message
        .as_ref()
        .and_then(|m| message(m, Some(&id), now).ok());
    let updated_at = opt_ms(&raw.updated_at)
        .or_else(|| last_message.as_ref().map(|m| m.created_at))
        .or_else(|| opt_ms(&raw.created_at))
        .unwrap_or(0);
    Ok(Conversation {
        is_group: raw.is_group.unwrap_or(participants.len() > 2),
        participants,
        name: non_empty(&raw.name).map(str::to_string),
        last_message: last_message.map(|m| m.preview()),
        unread_count: raw.unread_count.unwrap_or(0),
        updated_at,
        id,
    })
}

pub fn presence(raw: &RawPresence) -> Option<PresenceUpdate> {
    let user_id = non_empty(&raw.user_id)?.to_string();
    let online = raw.is_online.unwrap_or_else(|| {
        raw.status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("online"))
            .unwrap_or(false)
    });
    Some(PresenceUpdate {
        user_id,
        online,
        last_seen: opt_ms(&raw.last_seen),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_fallback_chains() {
        let raw: RawUser = serde_json::from_value(json!({
            "_id": "u1",
            "username": "ana",
            "profilePicture": "https://cdn/a.png",
            "image": "https://cdn/ignored.png"
        }))
        .unwrap();
        let u = user(&raw).unwrap();
        assert_eq!(u.display_name, "ana");
        assert_eq!(u.avatar_url.as_deref(), Some("https://cdn/a.png"));

        let bare: RawUser = serde_json::from_value(json!({"id": "u2", "avatar": " "})).unwrap();
        let u = user(&bare).unwrap();
        assert_eq!(u.display_name, "u2");
        assert_eq!(u.avatar_url, None);
    }

    #[test]
    fn parses_both_timestamp_forms() {
        assert_eq!(timestamp_ms(&RawTimestamp::Millis(42)), Some(42));
        assert_eq!(
            timestamp_ms(&RawTimestamp::Text("1970-01-01T00:00:01Z".into())),
            Some(1000)
        );
        assert_eq!(timestamp_ms(&RawTimestamp::Text("1500".into())), Some(1500));
        assert_eq!(timestamp_ms(&RawTimestamp::Text("yesterday".into())), None);
    }

    #[test]
    fn message_needs_id_conversation_and_sender() {
        let raw: RawMessage = serde_json::from_value(json!({"_id": "m1", "senderId": "u1"})).unwrap();
        assert!(message(&raw, None, 0).is_err());
        let m = message(&raw, Some("c1"), 77).unwrap();
        assert_eq!(m.conversation_id, "c1");
        assert_eq!(m.created_at, 77);

        let no_id: RawMessage =
            serde_json::from_value(json!({"conversationId": "c1", "senderId": "u1"})).unwrap();
        assert!(matches!(
            message(&no_id, None, 0),
            Err(InboxError::MalformedEvent { .. })
        ));
    }

    #[test]
    fn message_attachments_and_readers() {
        let raw: RawMessage = serde_json::from_value(json!({
            "id": "m1",
            "conversation": "c1",
            "sender": {"_id": "u1"},
            "attachments": [
                {"url": "https://cdn/x/clip.mp4", "size": 10},
                {"name": "missing-url"}
            ],
            "readBy": [{"user": {"_id": "u2"}}],
            "deliveredAt": 5
        }))
        .unwrap();
        let m = message(&raw, None, 0).unwrap();
        assert_eq!(m.attachments.len(), 1);
        assert_eq!(m.attachments[0].name, "clip.mp4");
        assert_eq!(m.attachments[0].kind, crate::model::AttachmentKind::Video);
        assert!(m.read_by.contains("u2"));
        assert_eq!(m.delivery_status(), crate::status::DeliveryStatus::Read);
    }

    #[test]
    fn conversation_dedups_participants_and_derives_recency() {
        let raw: RawConversation = serde_json::from_value(json!({
            "_id": "c1",
            "participants": ["u1", {"_id": "u2", "fullName": "Bo"}, "u1"],
            "lastMessage": {"_id": "m9", "sender": "u2", "text": "yo", "createdAt": 900}
        }))
        .unwrap();
        let c = conversation(&raw, 0).unwrap();
        assert_eq!(c.participants.len(), 2);
        assert!(!c.is_group);
        assert_eq!(c.updated_at, 900);
        assert_eq!(c.last_message.unwrap().id, "m9");
    }

    #[test]
    fn presence_from_status_or_flag() {
        let raw: RawPresence =
            serde_json::from_value(json!({"userId": "u1", "status": "Online"})).unwrap();
        assert!(presence(&raw).unwrap().online);
        let raw: RawPresence =
            serde_json::from_value(json!({"userId": "u1", "isOnline": false, "lastSeen": 3}))
                .unwrap();
        let p = presence(&raw).unwrap();
        assert!(!p.online);
        assert_eq!(p.last_seen, Some(3));
    }
}
