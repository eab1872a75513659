use std::collections::HashMap;

use inbox_wire::{Envelope, RawAttachment, SendMessagePayload, TypingPayload};
use serde::Serialize;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::client::{ApiCall, ApiOutcome};
use crate::clock::Now;
use crate::error::{ApiError, InboxError, Result};
use crate::events::InboundEvent;
use crate::media::{avatar_options, transform_url};
use crate::model::{Attachment, Conversation, Draft, Message};
use crate::normalize;
use crate::notice::{Notice, NoticeKind};
use crate::pagination::{PageKey, Paginator};
use crate::presence::PresenceIndex;
use crate::reconciler::Reconciler;
use crate::status::{DeliveryStatus, StatusPatch};
use crate::store::{PagePosition, Removed};

pub const OUTBOUND_TYPING_EVENT: &str = "typing";
const AVATAR_SIZE: u32 = 64;

#[derive(Debug, Clone)]
pub struct ViewSettings {
    pub user_id: String,
    pub page_size: u32,
    pub typing_timeout: Duration,
    pub typing_debounce: Duration,
    pub refresh_ttl: Duration,
}

impl ViewSettings {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            page_size: 20,
            typing_timeout: Duration::from_millis(3000),
            typing_debounce: Duration::from_millis(2000),
            refresh_ttl: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationEntry {
    #[serde(flatten)]
    pub conversation: Conversation,
    /// Any participant other than us is online.
    pub online: bool,
    /// Display URL for the first other participant's avatar.
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageEntry {
    #[serde(flatten)]
    pub message: Message,
    pub status: DeliveryStatus,
}

/// Render-ready copy of the view state.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub active: Option<String>,
    pub conversations: Vec<ConversationEntry>,
    pub messages: Vec<MessageEntry>,
    pub typing: Vec<String>,
    pub notices: Vec<Notice>,
    pub total_unread: u32,
    pub has_more_conversations: bool,
    pub loading_conversations: bool,
    pub has_more_messages: bool,
    pub loading_messages: bool,
    pub saved: Vec<Message>,
    pub has_more_saved: bool,
    pub loading_saved: bool,
}

/// Owns reconciled state and turns user actions into collaborator calls.
/// Nothing here awaits: each action returns the `ApiCall`s to run and the
/// caller feeds every result back through [`MessagingView::complete`].
pub struct MessagingView {
    reconciler: Reconciler,
    settings: ViewSettings,
    conversation_pages: Paginator,
    message_pages: HashMap<String, Paginator>,
    saved_pages: Paginator,
    saved: Vec<Message>,
    freshness: TtlCache<PageKey, ()>,
    pending_deletes: HashMap<String, Removed>,
}

fn outbound_attachment(attachment: &Attachment) -> RawAttachment {
    RawAttachment {
        kind: Some(attachment.kind.as_str().to_string()),
        url: Some(attachment.url.clone()),
        name: Some(attachment.name.clone()),
        size: Some(attachment.size),
        mime_type: mime_guess::from_path(&attachment.name)
            .first()
            .map(|m| m.essence_str().to_string()),
    }
}

/// Normalize a batch, logging and skipping entries that fail.
fn normalize_batch<R, T>(raws: &[R], what: &str, f: impl Fn(&R) -> Result<T>) -> Vec<T> {
    raws.iter()
        .filter_map(|raw| match f(raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(what, error = %err, "skipping malformed record");
                None
            }
        })
        .collect()
}

impl MessagingView {
    pub fn new(settings: ViewSettings, presence: PresenceIndex) -> Self {
        Self {
            reconciler: Reconciler::new(
                settings.user_id.clone(),
                settings.typing_timeout,
                settings.typing_debounce,
                presence,
            ),
            conversation_pages: Paginator::new(settings.page_size),
            message_pages: HashMap::new(),
            saved_pages: Paginator::new(settings.page_size),
            saved: Vec::new(),
            freshness: TtlCache::new(settings.refresh_ttl),
            pending_deletes: HashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &ViewSettings {
        &self.settings
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn user_id(&self) -> &str {
        &self.settings.user_id
    }

    pub fn active(&self) -> Option<&str> {
        self.reconciler.active()
    }

    fn message_paginator(&mut self, conversation_id: &str) -> &mut Paginator {
        let page_size = self.settings.page_size;
        self.message_pages
            .entry(conversation_id.to_string())
            .or_insert_with(|| Paginator::new(page_size))
    }

    fn failed(&mut self, action: &str, err: &ApiError) {
        warn!(action, error = %err, transient = err.is_transient(), "collaborator call failed");
        self.reconciler.notices_mut().push(NoticeKind::ActionFailed {
            action: action.to_string(),
            reason: err.message.clone(),
        });
    }

    /// Open a conversation: reset its unread count, mark it read, and load
    /// the newest page unless it was loaded recently.
    pub fn activate(&mut self, conversation_id: &str, now: Now) -> Vec<ApiCall> {
        self.reconciler.set_active(Some(conversation_id.to_string()));
        let mut calls = Vec::new();
        calls.extend(self.reconciler.request_conversation(conversation_id));
        calls.extend(self.mark_all_read(conversation_id));
        let key = PageKey::Messages(conversation_id.to_string());
        if !self.freshness.is_fresh(&key, now.instant) {
            let page_size = self.settings.page_size;
            let paginator = self.message_paginator(conversation_id);
            paginator.reset();
            if let Some(ticket) = paginator.begin() {
                calls.push(ApiCall::FetchMessages {
                    conversation_id: conversation_id.to_string(),
                    ticket,
                    limit: page_size,
                });
            }
        }
        calls
    }

    pub fn deactivate(&mut self) {
        self.reconciler.set_active(None);
    }

    /// Append an optimistic message and ask for it to be sent.
    pub fn send(
        &mut self,
        conversation_id: &str,
        draft: Draft,
        now: Now,
    ) -> Result<(Message, Vec<ApiCall>)> {
        draft.validate()?;
        let user_id = self.settings.user_id.clone();
        let message = self
            .reconciler
            .store_mut()
            .append_pending(conversation_id, &user_id, draft, now.wall_ms);
        self.reconciler
            .conversations_mut()
            .touch(conversation_id, message.preview());
        let payload = SendMessagePayload {
            conversation_id: conversation_id.to_string(),
            text: message.text.clone(),
            attachments: message.attachments.iter().map(outbound_attachment).collect(),
            reply_to: message.reply_to.clone(),
            temp_id: message.id.clone(),
        };
        debug!(temp_id = %message.id, conversation_id, "message queued");
        Ok((message, vec![ApiCall::SendMessage { payload }]))
    }

    /// Clear unread locally right away; the server call is fire-and-forget.
    pub fn mark_all_read(&mut self, conversation_id: &str) -> Vec<ApiCall> {
        let user_id = self.settings.user_id.clone();
        self.reconciler.conversations_mut().reset_unread(conversation_id);
        self.reconciler
            .store_mut()
            .mark_read_by(conversation_id, &user_id);
        vec![ApiCall::MarkRead {
            conversation_id: conversation_id.to_string(),
        }]
    }

    pub fn mark_message_read(&mut self, message_id: &str) -> Vec<ApiCall> {
        let patch = StatusPatch::read(self.settings.user_id.clone());
        match self.reconciler.store_mut().update_status(message_id, &patch) {
            Some(_) => vec![ApiCall::MarkMessageRead {
                message_id: message_id.to_string(),
            }],
            None => Vec::new(),
        }
    }

    pub fn mark_message_unread(&mut self, message_id: &str, now: Now) -> Vec<ApiCall> {
        let user_id = self.settings.user_id.clone();
        if !self
            .reconciler
            .store_mut()
            .mark_unread_local(message_id, &user_id, now.wall_ms)
        {
            return Vec::new();
        }
        if let Some(conversation_id) = self
            .reconciler
            .store()
            .find(message_id)
            .map(|m| m.conversation_id.clone())
        {
            self.reconciler
                .conversations_mut()
                .increment_unread(&conversation_id);
        }
        vec![ApiCall::MarkMessageUnread {
            message_id: message_id.to_string(),
        }]
    }

    /// Toggle our reaction locally, then tell the server.
    pub fn react(&mut self, message_id: &str, emoji: &str, now: Now) -> Vec<ApiCall> {
        let user_id = self.settings.user_id.clone();
        match self
            .reconciler
            .store_mut()
            .toggle_reaction(message_id, &user_id, emoji, now.wall_ms)
        {
            Some(_) => vec![ApiCall::React {
                message_id: message_id.to_string(),
                emoji: emoji.to_string(),
            }],
            None => Vec::new(),
        }
    }

    pub fn delete_message(&mut self, message_id: &str) -> Result<Vec<ApiCall>> {
        match self.reconciler.store().find(message_id) {
            None => return Ok(Vec::new()),
            Some(m) if m.is_optimistic => {
                return Err(InboxError::Validation("message_pending".into()))
            }
            Some(_) => {}
        }
        let Some(removed) = self.reconciler.store_mut().remove(message_id) else {
            return Ok(Vec::new());
        };
        let server_id = removed.message.id.clone();
        let conversation_id = removed.message.conversation_id.clone();
        self.pending_deletes.insert(server_id.clone(), removed);
        self.reconciler.refresh_preview(&conversation_id, &server_id);
        Ok(vec![ApiCall::DeleteMessage {
            message_id: server_id,
        }])
    }

    pub fn forward(&mut self, message_id: &str, conversation_id: &str) -> Result<Vec<ApiCall>> {
        let message = self
            .reconciler
            .store()
            .find(message_id)
            .ok_or_else(|| InboxError::Validation("unknown_message".into()))?;
        if message.is_optimistic {
            return Err(InboxError::Validation("message_pending".into()));
        }
        Ok(vec![ApiCall::Forward {
            message_id: message.id.clone(),
            conversation_id: conversation_id.to_string(),
        }])
    }

    pub fn create_conversation(&mut self, participant_ids: &[String]) -> Result<Vec<ApiCall>> {
        let mut unique: Vec<String> = Vec::new();
        for id in participant_ids {
            let id = id.trim();
            if !id.is_empty() && id != self.settings.user_id && !unique.iter().any(|u| u == id) {
                unique.push(id.to_string());
            }
        }
        if unique.is_empty() {
            return Err(InboxError::Validation("no_participants".into()));
        }
        Ok(vec![ApiCall::CreateConversation {
            participant_ids: unique,
        }])
    }

    pub fn load_more_conversations(&mut self) -> Vec<ApiCall> {
        match self.conversation_pages.begin() {
            Some(ticket) => vec![ApiCall::FetchConversations {
                ticket,
                limit: self.settings.page_size,
            }],
            None => Vec::new(),
        }
    }

    pub fn load_more_messages(&mut self, conversation_id: &str) -> Vec<ApiCall> {
        let limit = self.settings.page_size;
        match self.message_paginator(conversation_id).begin() {
            Some(ticket) => vec![ApiCall::FetchMessages {
                conversation_id: conversation_id.to_string(),
                ticket,
                limit,
            }],
            None => Vec::new(),
        }
    }

    pub fn load_more_saved(&mut self) -> Vec<ApiCall> {
        match self.saved_pages.begin() {
            Some(ticket) => vec![ApiCall::FetchSaved {
                ticket,
                limit: self.settings.page_size,
            }],
            None => Vec::new(),
        }
    }

    /// Reload the first page of saved messages unless it is still fresh.
    pub fn refresh_saved(&mut self, force: bool, now: Now) -> Vec<ApiCall> {
        if !force && self.freshness.is_fresh(&PageKey::Saved, now.instant) {
            return Vec::new();
        }
        self.saved_pages.reset();
        self.load_more_saved()
    }

    pub fn saved(&self) -> &[Message] {
        &self.saved
    }

    /// Reload the first conversation page unless it is still fresh.
    pub fn refresh_conversations(&mut self, force: bool, now: Now) -> Vec<ApiCall> {
        if !force && self.freshness.is_fresh(&PageKey::Conversations, now.instant) {
            debug!("conversation list still fresh");
            return Vec::new();
        }
        self.conversation_pages.reset();
        self.load_more_conversations()
    }

    /// A local keystroke in `conversation_id`; emits at most once per debounce window.
    pub fn local_typing(&mut self, conversation_id: &str, now: Now) -> Result<Vec<ApiCall>> {
        if !self
            .reconciler
            .typing_mut()
            .should_emit(conversation_id, now.instant)
        {
            return Ok(Vec::new());
        }
        let payload = serde_json::to_value(TypingPayload {
            conversation_id: conversation_id.to_string(),
        })?;
        Ok(vec![ApiCall::Emit {
            envelope: Envelope::new(OUTBOUND_TYPING_EVENT, payload),
        }])
    }

    pub fn handle_event(&mut self, event: InboundEvent, now: Now) -> Vec<ApiCall> {
        if let InboundEvent::MessageDeleted(deleted) = &event {
            self.saved.retain(|m| m.id != deleted.message_id);
        }
        self.reconciler.handle(event, now.instant)
    }

    /// Decode and apply a raw frame. Malformed frames are logged and dropped.
    pub fn handle_envelope(&mut self, envelope: &Envelope, now: Now) -> Vec<ApiCall> {
        match InboundEvent::decode(envelope, now.wall_ms) {
            Ok(event) => self.handle_event(event, now),
            Err(err) => {
                warn!(event = %envelope.event, error = %err, "dropping inbound frame");
                Vec::new()
            }
        }
    }

    pub fn expire_typing(&mut self, now: Now) -> Vec<(String, String)> {
        self.reconciler.expire_typing(now.instant)
    }

    pub fn next_typing_deadline(&self) -> Option<Instant> {
        self.reconciler.typing().next_deadline()
    }

    pub fn dismiss_notice(&mut self, id: Uuid) -> bool {
        self.reconciler.notices_mut().dismiss(id)
    }

    /// Fold the result of a collaborator call back into state.
    pub fn complete(&mut self, outcome: ApiOutcome, now: Now) -> Vec<ApiCall> {
        match outcome {
            ApiOutcome::ConversationsFetched { ticket, result } => match result {
                Ok(raws) => {
                    if !self.conversation_pages.complete(ticket, raws.len()) {
                        debug!(page = ticket.page, "discarding stale conversation page");
                        return Vec::new();
                    }
                    let conversations = normalize_batch(&raws, "conversation", |raw| {
                        normalize::conversation(raw, now.wall_ms)
                    });
                    if ticket.page == 1 {
                        self.reconciler.conversations_mut().replace_all(conversations);
                        self.freshness
                            .insert(PageKey::Conversations, (), now.instant);
                    } else {
                        self.reconciler.conversations_mut().extend(conversations);
                    }
                }
                Err(err) => {
                    self.conversation_pages.fail(ticket);
                    self.failed("load_conversations", &err);
                }
            },
            ApiOutcome::SavedFetched { ticket, result } => match result {
                Ok(raws) => {
                    if !self.saved_pages.complete(ticket, raws.len()) {
                        debug!(page = ticket.page, "discarding stale saved page");
                        return Vec::new();
                    }
                    let messages = normalize_batch(&raws, "saved message", |raw| {
                        normalize::message(raw, None, now.wall_ms)
                    });
                    if ticket.page == 1 {
                        self.saved.clear();
                        self.freshness.insert(PageKey::Saved, (), now.instant);
                    }
                    for message in messages {
                        if !self.saved.iter().any(|m| m.id == message.id) {
                            self.saved.push(message);
                        }
                    }
                }
                Err(err) => {
                    self.saved_pages.fail(ticket);
                    self.failed("load_saved", &err);
                }
            },
            ApiOutcome::ConversationFetched {
                conversation_id,
                result,
            } => {
                let conversation = match result {
                    Ok(raw) => normalize::conversation(&raw, now.wall_ms)
                        .map_err(|err| warn!(error = %err, "fetched conversation is malformed"))
                        .ok(),
                    Err(err) => {
                        warn!(conversation_id = %conversation_id, error = %err, "conversation fetch failed");
                        None
                    }
                };
                self.reconciler
                    .conversation_fetched(&conversation_id, conversation);
            }
            ApiOutcome::MessagesFetched {
                conversation_id,
                ticket,
                result,
            } => match result {
                Ok(raws) => {
                    if !self.message_paginator(&conversation_id).complete(ticket, raws.len()) {
                        debug!(page = ticket.page, conversation_id = %conversation_id, "discarding stale message page");
                        return Vec::new();
                    }
                    let messages = normalize_batch(&raws, "message", |raw| {
                        normalize::message(raw, Some(conversation_id.as_str()), now.wall_ms)
                    });
                    let position = if ticket.page == 1 {
                        self.freshness.insert(
                            PageKey::Messages(conversation_id.clone()),
                            (),
                            now.instant,
                        );
                        PagePosition::Newest
                    } else {
                        PagePosition::Older
                    };
                    let added = self
                        .reconciler
                        .store_mut()
                        .merge_page(&conversation_id, messages, position);
                    debug!(conversation_id = %conversation_id, page = ticket.page, added, "message page merged");
                    if self.reconciler.is_active(&conversation_id) {
                        let user_id = self.settings.user_id.clone();
                        self.reconciler
                            .store_mut()
                            .mark_read_by(&conversation_id, &user_id);
                    }
                }
                Err(err) => {
                    self.message_paginator(&conversation_id).fail(ticket);
                    self.failed("load_messages", &err);
                }
            },
            ApiOutcome::MessageSent {
                conversation_id,
                temp_id,
                result,
            } => match result {
                Ok(raw) => match normalize::message(&raw, Some(conversation_id.as_str()), now.wall_ms) {
                    Ok(message) => {
                        let preview = message.preview();
                        if self.reconciler.store_mut().reconcile(&temp_id, message) {
                            self.reconciler.conversations_mut().replace_preview(
                                &conversation_id,
                                &temp_id,
                                preview,
                            );
                        }
                    }
                    // accepted by the server; the broadcast echo will confirm it
                    Err(err) => warn!(temp_id = %temp_id, error = %err, "send response is malformed"),
                },
                Err(err) => {
                    warn!(temp_id = %temp_id, error = %err, "send failed; rolling back");
                    if self.reconciler.store_mut().rollback(&temp_id).is_some() {
                        self.reconciler.refresh_preview(&conversation_id, &temp_id);
                    }
                    self.reconciler.notices_mut().push(NoticeKind::SendFailed {
                        conversation_id,
                        reason: err.message,
                    });
                }
            },
            ApiOutcome::MarkedRead { result, .. } => {
                if let Err(err) = result {
                    self.failed("mark_read", &err);
                }
            }
            ApiOutcome::MessageMarkedRead { result, .. } => {
                if let Err(err) = result {
                    self.failed("mark_message_read", &err);
                }
            }
            ApiOutcome::MessageMarkedUnread { message_id, result } => {
                if let Err(err) = result {
                    let patch = StatusPatch::read(self.settings.user_id.clone());
                    self.reconciler.store_mut().update_status(&message_id, &patch);
                    if let Some(conversation_id) = self
                        .reconciler
                        .store()
                        .find(&message_id)
                        .map(|m| m.conversation_id.clone())
                    {
                        let unread = self
                            .reconciler
                            .conversations()
                            .get(&conversation_id)
                            .map(|c| c.unread_count)
                            .unwrap_or(0);
                        self.reconciler
                            .conversations_mut()
                            .set_unread(&conversation_id, unread.saturating_sub(1));
                    }
                    self.failed("mark_message_unread", &err);
                }
            }
            ApiOutcome::Reacted {
                message_id,
                emoji,
                result,
            } => {
                if let Err(err) = result {
                    let user_id = self.settings.user_id.clone();
                    self.reconciler.store_mut().toggle_reaction(
                        &message_id,
                        &user_id,
                        &emoji,
                        now.wall_ms,
                    );
                    self.failed("react", &err);
                }
            }
            ApiOutcome::Deleted { message_id, result } => {
                let removed = self.pending_deletes.remove(&message_id);
                if let Err(err) = result {
                    if let Some(removed) = removed {
                        let conversation_id = removed.message.conversation_id.clone();
                        self.reconciler.store_mut().restore(removed);
                        let tail = self
                            .reconciler
                            .store()
                            .messages(&conversation_id)
                            .last()
                            .filter(|m| m.id == message_id)
                            .map(Message::preview);
                        if tail.is_some() {
                            self.reconciler
                                .conversations_mut()
                                .set_preview(&conversation_id, tail);
                        }
                    }
                    self.failed("delete_message", &err);
                }
            }
            ApiOutcome::Forwarded {
                conversation_id,
                result,
            } => match result {
                Ok(raw) => match normalize::message(&raw, Some(conversation_id.as_str()), now.wall_ms) {
                    Ok(message) => return self.handle_event(InboundEvent::NewMessage(message), now),
                    Err(err) => warn!(error = %err, "forward response is malformed"),
                },
                Err(err) => self.failed("forward_message", &err),
            },
            ApiOutcome::ConversationCreated { result } => match result {
                Ok(raw) => match normalize::conversation(&raw, now.wall_ms) {
                    Ok(conversation) => {
                        let id = conversation.id.clone();
                        self.reconciler.conversation_fetched(&id, Some(conversation));
                        return self.activate(&id, now);
                    }
                    Err(err) => warn!(error = %err, "created conversation is malformed"),
                },
                Err(err) => self.failed("create_conversation", &err),
            },
            ApiOutcome::Emitted { event, result } => {
                if let Err(err) = result {
                    warn!(event = %event, error = %err, "realtime emit failed");
                }
            }
        }
        Vec::new()
    }

    pub fn snapshot(&self) -> Snapshot {
        let user_id = self.settings.user_id.as_str();
        let presence = self.reconciler.presence();
        let conversations = self
            .reconciler
            .conversations()
            .list()
            .iter()
            .map(|c| ConversationEntry {
                online: presence.any_online(c.participants.iter().map(|p| p.id.as_str()), user_id),
                avatar: c
                    .participants
                    .iter()
                    .filter(|p| p.id != user_id)
                    .find_map(|p| p.avatar_url.as_deref())
                    .map(|url| transform_url(url, &avatar_options(AVATAR_SIZE))),
                conversation: c.clone(),
            })
            .collect();
        let active = self.reconciler.active().map(str::to_string);
        let (messages, typing, pages) = match &active {
            Some(id) => (
                self.reconciler
                    .store()
                    .messages(id)
                    .iter()
                    .map(|m| MessageEntry {
                        status: m.delivery_status(),
                        message: m.clone(),
                    })
                    .collect(),
                self.reconciler.typing().typing_in(id),
                self.message_pages.get(id),
            ),
            None => (Vec::new(), Vec::new(), None),
        };
        Snapshot {
            active,
            conversations,
            messages,
            typing,
            notices: self.reconciler.notices().iter().cloned().collect(),
            total_unread: self.reconciler.conversations().total_unread(),
            has_more_conversations: self.conversation_pages.has_more(),
            loading_conversations: self.conversation_pages.in_flight(),
            has_more_messages: pages.map(|p| p.has_more()).unwrap_or(false),
            loading_messages: pages.map(|p| p.in_flight()).unwrap_or(false),
            saved: self.saved.clone(),
            has_more_saved: self.saved_pages.has_more(),
            loading_saved: self.saved_pages.in_flight(),
        }
    }
}
