use std::sync::{Arc, Weak};

use inbox_wire::{
    Envelope, RawConversationEvent, RawDeliveryReceipt, RawMessageDeleted, RawNewMessage,
    RawPresence, RawPresenceList, RawReactionUpdate, RawReadReceipt, RawTyping,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{debug, warn};

use crate::error::{InboxError, Result};
use crate::model::{Conversation, Message, Reaction};
use crate::normalize;
use crate::presence::PresenceUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewMessage,
    MessageDelivered,
    MessageRead,
    ReactionsUpdated,
    TypingStarted,
    TypingStopped,
    Presence,
    PresenceList,
    MessageDeleted,
    ConversationCreated,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::NewMessage,
        EventKind::MessageDelivered,
        EventKind::MessageRead,
        EventKind::ReactionsUpdated,
        EventKind::TypingStarted,
        EventKind::TypingStopped,
        EventKind::Presence,
        EventKind::PresenceList,
        EventKind::MessageDeleted,
        EventKind::ConversationCreated,
    ];

    /// Event name on the wire.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::NewMessage => "new-message",
            EventKind::MessageDelivered => "message-delivered",
            EventKind::MessageRead => "message-read",
            EventKind::ReactionsUpdated => "message-reaction-updated",
            EventKind::TypingStarted => "user-typing",
            EventKind::TypingStopped => "user-stopped-typing",
            EventKind::Presence => "user:status",
            EventKind::PresenceList => "user:status_list",
            EventKind::MessageDeleted => "message-deleted",
            EventKind::ConversationCreated => "conversation-created",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
    /// Lets a receipt land on a message that has not been reconciled yet.
    pub temp_id: Option<String>,
    pub conversation_id: Option<String>,
    pub delivered_at: i64,
}

impl DeliveryReceipt {
    /// Ids to try, server id first.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.message_id.iter().chain(self.temp_id.iter()).map(String::as_str)
    }
}

/// Either one message or, without a message id, a whole conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub reader_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionsUpdated {
    pub message_id: String,
    pub conversation_id: Option<String>,
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingStarted {
    pub conversation_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingStopped {
    pub conversation_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceList(pub Vec<PresenceUpdate>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDeleted {
    pub message_id: String,
    pub conversation_id: Option<String>,
}

/// A decoded, normalized realtime event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    NewMessage(Message),
    MessageDelivered(DeliveryReceipt),
    MessageRead(ReadReceipt),
    ReactionsUpdated(ReactionsUpdated),
    TypingStarted(TypingStarted),
    TypingStopped(TypingStopped),
    Presence(PresenceUpdate),
    PresenceList(PresenceList),
    MessageDeleted(MessageDeleted),
    ConversationCreated(Conversation),
}

fn payload<T: DeserializeOwned>(env: &Envelope) -> Result<T> {
    serde_json::from_value(env.payload.clone())
        .map_err(|e| InboxError::malformed(&env.event, e.to_string()))
}

fn required(value: Option<String>, event: &str, field: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| InboxError::malformed(event, format!("missing {field}")))
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::NewMessage(_) => EventKind::NewMessage,
            InboundEvent::MessageDelivered(_) => EventKind::MessageDelivered,
            InboundEvent::MessageRead(_) => EventKind::MessageRead,
            InboundEvent::ReactionsUpdated(_) => EventKind::ReactionsUpdated,
            InboundEvent::TypingStarted(_) => EventKind::TypingStarted,
            InboundEvent::TypingStopped(_) => EventKind::TypingStopped,
            InboundEvent::Presence(_) => EventKind::Presence,
            InboundEvent::PresenceList(_) => EventKind::PresenceList,
            InboundEvent::MessageDeleted(_) => EventKind::MessageDeleted,
            InboundEvent::ConversationCreated(_) => EventKind::ConversationCreated,
        }
    }

    /// Decode and normalize a raw frame. `now` fills in missing timestamps.
    pub fn decode(env: &Envelope, now: i64) -> Result<Self> {
        let kind = EventKind::from_name(&env.event)
            .ok_or_else(|| InboxError::UnknownEvent(env.event.clone()))?;
        let event = env.event.as_str();
        Ok(match kind {
            EventKind::NewMessage => {
                let (raw, hint) = match payload::<RawNewMessage>(env)? {
                    RawNewMessage::Wrapped {
                        message,
                        conversation_id,
                    } => (message, conversation_id),
                    RawNewMessage::Bare(message) => (message, None),
                };
                InboundEvent::NewMessage(normalize::message(&raw, hint.as_deref(), now)?)
            }
            EventKind::MessageDelivered => {
                let raw: RawDeliveryReceipt = payload(env)?;
                let receipt = DeliveryReceipt {
                    message_id: present(raw.message_id),
                    temp_id: present(raw.temp_id),
                    conversation_id: present(raw.conversation_id),
                    delivered_at: raw
                        .delivered_at
                        .as_ref()
                        .and_then(normalize::timestamp_ms)
                        .unwrap_or(now),
                };
                if receipt.keys().next().is_none() {
                    return Err(InboxError::malformed(event, "missing message id"));
                }
                InboundEvent::MessageDelivered(receipt)
            }
            EventKind::MessageRead => {
                let raw: RawReadReceipt = payload(env)?;
                let receipt = ReadReceipt {
                    reader_id: required(raw.user_id, event, "reader id")?,
                    message_id: present(raw.message_id),
                    conversation_id: present(raw.conversation_id),
                };
                if receipt.message_id.is_none() && receipt.conversation_id.is_none() {
                    return Err(InboxError::malformed(event, "missing message or conversation id"));
                }
                InboundEvent::MessageRead(receipt)
            }
            EventKind::ReactionsUpdated => {
                let raw: RawReactionUpdate = payload(env)?;
                InboundEvent::ReactionsUpdated(ReactionsUpdated {
                    message_id: required(raw.message_id, event, "message id")?,
                    conversation_id: present(raw.conversation_id),
                    reactions: raw.reactions.iter().filter_map(normalize::reaction).collect(),
                })
            }
            EventKind::TypingStarted | EventKind::TypingStopped => {
                let raw: RawTyping = payload(env)?;
                let conversation_id = required(raw.conversation_id, event, "conversation id")?;
                let user_id = required(raw.user_id, event, "user id")?;
                if kind == EventKind::TypingStarted {
                    InboundEvent::TypingStarted(TypingStarted {
                        conversation_id,
                        user_id,
                    })
                } else {
                    InboundEvent::TypingStopped(TypingStopped {
                        conversation_id,
                        user_id,
                    })
                }
            }
            EventKind::Presence => {
                let raw: RawPresence = payload(env)?;
                let update = normalize::presence(&raw)
                    .ok_or_else(|| InboxError::malformed(event, "missing user id"))?;
                InboundEvent::Presence(update)
            }
            EventKind::PresenceList => {
                let raw: RawPresenceList = payload(env)?;
                let updates = raw
                    .into_entries()
                    .iter()
                    .filter_map(normalize::presence)
                    .collect();
                InboundEvent::PresenceList(PresenceList(updates))
            }
            EventKind::MessageDeleted => {
                let raw: RawMessageDeleted = payload(env)?;
                InboundEvent::MessageDeleted(MessageDeleted {
                    message_id: required(raw.message_id, event, "message id")?,
                    conversation_id: present(raw.conversation_id),
                })
            }
            EventKind::ConversationCreated => {
                let raw = match payload::<RawConversationEvent>(env)? {
                    RawConversationEvent::Wrapped { conversation } => conversation,
                    RawConversationEvent::Bare(conversation) => conversation,
                };
                InboundEvent::ConversationCreated(normalize::conversation(&raw, now)?)
            }
        })
    }
}

/// A payload type tied to exactly one event kind.
pub trait EventPayload: Clone + Send + 'static {
    const KIND: EventKind;
    fn extract(event: &InboundEvent) -> Option<Self>;
}

macro_rules! event_payload {
    ($ty:ty, $variant:ident) => {
        impl EventPayload for $ty {
            const KIND: EventKind = EventKind::$variant;
            fn extract(event: &InboundEvent) -> Option<Self> {
                match event {
                    InboundEvent::$variant(p) => Some(p.clone()),
                    _ => None,
                }
            }
        }
    };
}

event_payload!(Message, NewMessage);
event_payload!(DeliveryReceipt, MessageDelivered);
event_payload!(ReadReceipt, MessageRead);
event_payload!(ReactionsUpdated, ReactionsUpdated);
event_payload!(TypingStarted, TypingStarted);
event_payload!(TypingStopped, TypingStopped);
event_payload!(PresenceUpdate, Presence);
event_payload!(PresenceList, PresenceList);
event_payload!(MessageDeleted, MessageDeleted);
event_payload!(Conversation, ConversationCreated);

/// Forwards a matching event; returns false once the receiving side is gone.
type Sink = Box<dyn Fn(&InboundEvent) -> bool + Send>;

struct Subscriber {
    id: u64,
    kinds: Vec<EventKind>,
    sink: Sink,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Fan-out bus for inbound realtime events. Clones share subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

/// Receiving end of a subscription. Dropping it unsubscribes.
pub struct Subscription<P> {
    id: u64,
    rx: UnboundedReceiver<P>,
    registry: Weak<Mutex<Registry>>,
}

impl<P> Subscription<P> {
    pub async fn recv(&mut self) -> Option<P> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<P> {
        self.rx.try_recv().ok()
    }
}

impl<P> Drop for Subscription<P> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().subscribers.retain(|s| s.id != self.id);
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn register<P>(&self, kinds: Vec<EventKind>, sink: Sink, rx: UnboundedReceiver<P>) -> Subscription<P> {
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.subscribers.push(Subscriber { id, kinds, sink });
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Subscribe to the typed payload of a single event kind.
    pub fn subscribe<P: EventPayload>(&self) -> Subscription<P> {
        let (tx, rx) = unbounded_channel();
        let sink: Sink = Box::new(move |event| match P::extract(event) {
            Some(payload) => tx.send(payload).is_ok(),
            None => true,
        });
        self.register(vec![P::KIND], sink, rx)
    }

    /// Subscribe to whole events of several kinds.
    pub fn subscribe_kinds(&self, kinds: &[EventKind]) -> Subscription<InboundEvent> {
        let (tx, rx) = unbounded_channel();
        let sink: Sink = Box::new(move |event| tx.send(event.clone()).is_ok());
        self.register(kinds.to_vec(), sink, rx)
    }

    pub fn subscribe_all(&self) -> Subscription<InboundEvent> {
        self.subscribe_kinds(&EventKind::ALL)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().subscribers.len()
    }

    /// Deliver an event to every interested subscriber. Returns how many received it.
    pub fn publish(&self, event: &InboundEvent) -> usize {
        let kind = event.kind();
        let mut delivered = 0;
        let mut registry = self.registry.lock();
        registry.subscribers.retain(|s| {
            if !s.kinds.contains(&kind) {
                return true;
            }
            let alive = (s.sink)(event);
            if alive {
                delivered += 1;
            }
            alive
        });
        delivered
    }

    /// Decode a raw frame and publish it. Frames that fail to decode are
    /// logged and dropped.
    pub fn publish_envelope(&self, env: &Envelope, now: i64) -> Option<EventKind> {
        match InboundEvent::decode(env, now) {
            Ok(event) => {
                let delivered = self.publish(&event);
                debug!(event = %env.event, delivered, "event published");
                Some(event.kind())
            }
            Err(err) => {
                warn!(event = %env.event, error = %err, "dropping inbound frame");
                None
            }
        }
    }
}
