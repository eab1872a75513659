//! Wire shapes exchanged with the REST API and the real-time transport.
//!
//! These types mirror what the server actually sends, which is loose: ids
//! may be `id` or `_id`, references may be a bare id or an embedded
//! object, timestamps may be epoch millis or RFC 3339 text. Nothing here
//! interprets the data; `inbox_core::normalize` turns these into canonical
//! records exactly once.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One real-time frame: an event name and its JSON payload.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// Timestamp as sent by the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum RawTimestamp {
    Millis(i64),
    Text(String),
}

/// Reference to another object: either its id or the embedded object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum RawRef {
    Id(String),
    Object {
        #[serde(alias = "_id")]
        id: String,
    },
}

impl RawRef {
    pub fn id(&self) -> &str {
        match self {
            RawRef::Id(id) => id,
            RawRef::Object { id } => id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawUser {
    #[serde(alias = "_id")]
    pub id: Option<String>,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub profile_picture: Option<String>,
    pub image: Option<String>,
    pub is_online: Option<bool>,
    pub last_seen: Option<RawTimestamp>,
}

/// A user given either by id or as a populated object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum RawUserRef {
    Id(String),
    User(RawUser),
}

impl RawUserRef {
    pub fn id(&self) -> Option<&str> {
        match self {
            RawUserRef::Id(id) => Some(id),
            RawUserRef::User(user) => user.id.as_deref(),
        }
    }
}

/// An entry of a message's `readBy` list.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum RawReadMark {
    Id(String),
    Entry {
        user: RawUserRef,
        #[serde(default, rename = "readAt")]
        read_at: Option<RawTimestamp>,
    },
    User(RawUser),
}

impl RawReadMark {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            RawReadMark::Id(id) => Some(id),
            RawReadMark::Entry { user, .. } => user.id(),
            RawReadMark::User(user) => user.id.as_deref(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawAttachment {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(alias = "secureUrl")]
    pub url: Option<String>,
    #[serde(alias = "fileName")]
    pub name: Option<String>,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawReaction {
    pub user_id: Option<String>,
    pub user: Option<RawUserRef>,
    pub emoji: String,
    pub created_at: Option<RawTimestamp>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(alias = "_id")]
    pub id: Option<String>,
    pub temp_id: Option<String>,
    pub conversation_id: Option<String>,
    pub conversation: Option<RawRef>,
    pub sender_id: Option<String>,
    pub sender: Option<RawUserRef>,
    #[serde(alias = "content")]
    pub text: Option<String>,
    pub attachments: Vec<RawAttachment>,
    pub created_at: Option<RawTimestamp>,
    pub delivered_at: Option<RawTimestamp>,
    pub read_by: Vec<RawReadMark>,
    pub reply_to: Option<RawRef>,
    pub reactions: Vec<RawReaction>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawConversation {
    #[serde(alias = "_id")]
    pub id: Option<String>,
    pub participants: Vec<RawUserRef>,
    pub is_group: Option<bool>,
    #[serde(alias = "groupName")]
    pub name: Option<String>,
    pub last_message: Option<RawMessage>,
    pub unread_count: Option<u32>,
    pub updated_at: Option<RawTimestamp>,
    pub created_at: Option<RawTimestamp>,
}

/// `new-message` payload: either `{ message, conversationId }` or the bare message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum RawNewMessage {
    Wrapped {
        message: RawMessage,
        #[serde(default, rename = "conversationId")]
        conversation_id: Option<String>,
    },
    Bare(RawMessage),
}

/// `conversation-created` payload: either `{ conversation }` or the bare conversation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum RawConversationEvent {
    Wrapped { conversation: RawConversation },
    Bare(RawConversation),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawDeliveryReceipt {
    pub message_id: Option<String>,
    pub temp_id: Option<String>,
    pub conversation_id: Option<String>,
    pub delivered_at: Option<RawTimestamp>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawReadReceipt {
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    #[serde(alias = "readerId")]
    pub user_id: Option<String>,
    pub read_at: Option<RawTimestamp>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawReactionUpdate {
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub reactions: Vec<RawReaction>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawTyping {
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawPresence {
    #[serde(alias = "_id")]
    pub user_id: Option<String>,
    pub status: Option<String>,
    pub is_online: Option<bool>,
    pub last_seen: Option<RawTimestamp>,
}

/// `user:status_list` payload: a bare list or `{ users: [...] }`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum RawPresenceList {
    List(Vec<RawPresence>),
    Wrapped { users: Vec<RawPresence> },
}

impl RawPresenceList {
    pub fn into_entries(self) -> Vec<RawPresence> {
        match self {
            RawPresenceList::List(list) => list,
            RawPresenceList::Wrapped { users } => users,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawMessageDeleted {
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
}

/// Body of a send-message request. The temp id travels with it so the
/// broadcast echo can be matched to the optimistic copy.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub conversation_id: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<RawAttachment>,
    #[serde(default)]
    pub reply_to: Option<String>,
    pub temp_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_roundtrip() {
        let env = Envelope::new("user-typing", json!({"conversationId":"c1","userId":"u1"}));
        let s = serde_json::to_string(&env).unwrap();
        let de: Envelope = serde_json::from_str(&s).unwrap();
        assert_eq!(env, de);
    }

    #[test]
    fn envelope_without_payload_defaults_to_null() {
        let env: Envelope = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(env.payload, Value::Null);
    }

    #[test]
    fn message_accepts_populated_and_bare_references() {
        let raw: RawMessage = serde_json::from_value(json!({
            "_id": "m1",
            "conversation": {"_id": "c1", "participants": []},
            "sender": {"_id": "u1", "profilePicture": "https://cdn/p.png"},
            "content": "hi",
            "createdAt": "2024-05-01T10:00:00Z",
            "readBy": ["u2", {"user": "u3", "readAt": 1714557600000i64}]
        }))
        .unwrap();
        assert_eq!(raw.id.as_deref(), Some("m1"));
        assert_eq!(raw.conversation.as_ref().map(RawRef::id), Some("c1"));
        assert_eq!(raw.sender.as_ref().and_then(RawUserRef::id), Some("u1"));
        assert_eq!(raw.text.as_deref(), Some("hi"));
        let readers: Vec<_> = raw.read_by.iter().filter_map(RawReadMark::user_id).collect();
        assert_eq!(readers, vec!["u2", "u3"]);
    }

    #[test]
    fn new_message_payload_shapes() {
        let wrapped: RawNewMessage =
            serde_json::from_value(json!({"message": {"id": "m1"}, "conversationId": "c1"}))
                .unwrap();
        assert!(matches!(
            wrapped,
            RawNewMessage::Wrapped { conversation_id: Some(ref c), .. } if c == "c1"
        ));
        let bare: RawNewMessage =
            serde_json::from_value(json!({"id": "m2", "conversationId": "c2"})).unwrap();
        assert!(matches!(bare, RawNewMessage::Bare(ref m) if m.id.as_deref() == Some("m2")));
    }

    #[test]
    fn presence_list_shapes() {
        let list: RawPresenceList =
            serde_json::from_value(json!([{"userId": "u1", "status": "online"}])).unwrap();
        assert_eq!(list.into_entries().len(), 1);
        let wrapped: RawPresenceList =
            serde_json::from_value(json!({"users": [{"userId": "u1"}, {"userId": "u2"}]}))
                .unwrap();
        assert_eq!(wrapped.into_entries().len(), 2);
    }
}
