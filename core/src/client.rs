use async_trait::async_trait;
use inbox_wire::{Envelope, RawConversation, RawMessage, SendMessagePayload};

use crate::error::ApiError;
use crate::pagination::PageTicket;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// REST collaborator. Returns raw wire shapes; normalization happens in the view.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn fetch_conversations(&self, page: u32, limit: u32) -> ApiResult<Vec<RawConversation>>;
    async fn fetch_conversation(&self, conversation_id: &str) -> ApiResult<RawConversation>;
    async fn fetch_messages(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> ApiResult<Vec<RawMessage>>;
    /// Messages the user bookmarked, newest first.
    async fn fetch_saved_messages(&self, page: u32, limit: u32) -> ApiResult<Vec<RawMessage>>;
    async fn send_message(&self, payload: &SendMessagePayload) -> ApiResult<RawMessage>;
    async fn mark_read(&self, conversation_id: &str) -> ApiResult<()>;
    async fn mark_message_read(&self, message_id: &str) -> ApiResult<()>;
    async fn mark_message_unread(&self, message_id: &str) -> ApiResult<()>;
    async fn create_conversation(&self, participant_ids: &[String]) -> ApiResult<RawConversation>;
    async fn forward_message(&self, message_id: &str, conversation_id: &str) -> ApiResult<RawMessage>;
    async fn react_to_message(&self, message_id: &str, emoji: &str) -> ApiResult<()>;
    async fn delete_message(&self, message_id: &str) -> ApiResult<()>;
}

/// Outbound half of the realtime channel. Inbound frames arrive through the event bus.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn emit(&self, envelope: Envelope) -> ApiResult<()>;
}

/// A collaborator call requested by the view.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    FetchConversations { ticket: PageTicket, limit: u32 },
    FetchConversation { conversation_id: String },
    FetchMessages { conversation_id: String, ticket: PageTicket, limit: u32 },
    FetchSaved { ticket: PageTicket, limit: u32 },
    SendMessage { payload: SendMessagePayload },
    MarkRead { conversation_id: String },
    MarkMessageRead { message_id: String },
    MarkMessageUnread { message_id: String },
    React { message_id: String, emoji: String },
    DeleteMessage { message_id: String },
    Forward { message_id: String, conversation_id: String },
    CreateConversation { participant_ids: Vec<String> },
    Emit { envelope: Envelope },
}

impl ApiCall {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ApiCall::FetchConversations { .. } => "fetch_conversations",
            ApiCall::FetchConversation { .. } => "fetch_conversation",
            ApiCall::FetchMessages { .. } => "fetch_messages",
            ApiCall::FetchSaved { .. } => "fetch_saved_messages",
            ApiCall::SendMessage { .. } => "send_message",
            ApiCall::MarkRead { .. } => "mark_read",
            ApiCall::MarkMessageRead { .. } => "mark_message_read",
            ApiCall::MarkMessageUnread { .. } => "mark_message_unread",
            ApiCall::React { .. } => "react_to_message",
            ApiCall::DeleteMessage { .. } => "delete_message",
            ApiCall::Forward { .. } => "forward_message",
            ApiCall::CreateConversation { .. } => "create_conversation",
            ApiCall::Emit { .. } => "emit",
        }
    }
}

/// Result of an `ApiCall`, carrying whatever the view needs to finish the action.
#[derive(Debug, Clone)]
pub enum ApiOutcome {
    ConversationsFetched {
        ticket: PageTicket,
        result: ApiResult<Vec<RawConversation>>,
    },
    ConversationFetched {
        conversation_id: String,
        result: ApiResult<RawConversation>,
    },
    MessagesFetched {
        conversation_id: String,
        ticket: PageTicket,
        result: ApiResult<Vec<RawMessage>>,
    },
    SavedFetched {
        ticket: PageTicket,
        result: ApiResult<Vec<RawMessage>>,
    },
    MessageSent {
        conversation_id: String,
        temp_id: String,
        result: ApiResult<RawMessage>,
    },
    MarkedRead {
        conversation_id: String,
        result: ApiResult<()>,
    },
    MessageMarkedRead {
        message_id: String,
        result: ApiResult<()>,
    },
    MessageMarkedUnread {
        message_id: String,
        result: ApiResult<()>,
    },
    Reacted {
        message_id: String,
        emoji: String,
        result: ApiResult<()>,
    },
    Deleted {
        message_id: String,
        result: ApiResult<()>,
    },
    Forwarded {
        conversation_id: String,
        result: ApiResult<RawMessage>,
    },
    ConversationCreated {
        result: ApiResult<RawConversation>,
    },
    Emitted {
        event: String,
        result: ApiResult<()>,
    },
}

/// Run one call against the collaborators.
pub async fn perform(
    api: &dyn MessagingApi,
    transport: &dyn RealtimeTransport,
    call: ApiCall,
) -> ApiOutcome {
    match call {
        ApiCall::FetchConversations { ticket, limit } => ApiOutcome::ConversationsFetched {
            result: api.fetch_conversations(ticket.page, limit).await,
            ticket,
        },
        ApiCall::FetchConversation { conversation_id } => ApiOutcome::ConversationFetched {
            result: api.fetch_conversation(&conversation_id).await,
            conversation_id,
        },
        ApiCall::FetchMessages {
            conversation_id,
            ticket,
            limit,
        } => ApiOutcome::MessagesFetched {
            result: api.fetch_messages(&conversation_id, ticket.page, limit).await,
            conversation_id,
            ticket,
        },
        ApiCall::FetchSaved { ticket, limit } => ApiOutcome::SavedFetched {
            result: api.fetch_saved_messages(ticket.page, limit).await,
            ticket,
        },
        ApiCall::SendMessage { payload } => ApiOutcome::MessageSent {
            result: api.send_message(&payload).await,
            conversation_id: payload.conversation_id,
            temp_id: payload.temp_id,
        },
        ApiCall::MarkRead { conversation_id } => ApiOutcome::MarkedRead {
            result: api.mark_read(&conversation_id).await,
            conversation_id,
        },
        ApiCall::MarkMessageRead { message_id } => ApiOutcome::MessageMarkedRead {
            result: api.mark_message_read(&message_id).await,
            message_id,
        },
        ApiCall::MarkMessageUnread { message_id } => ApiOutcome::MessageMarkedUnread {
            result: api.mark_message_unread(&message_id).await,
            message_id,
        },
        ApiCall::React { message_id, emoji } => ApiOutcome::Reacted {
            result: api.react_to_message(&message_id, &emoji).await,
            message_id,
            emoji,
        },
        ApiCall::DeleteMessage { message_id } => ApiOutcome::Deleted {
            result: api.delete_message(&message_id).await,
            message_id,
        },
        ApiCall::Forward {
            message_id,
            conversation_id,
        } => ApiOutcome::Forwarded {
            result: api.forward_message(&message_id, &conversation_id).await,
            conversation_id,
        },
        ApiCall::CreateConversation { participant_ids } => ApiOutcome::ConversationCreated {
            result: api.create_conversation(&participant_ids).await,
        },
        ApiCall::Emit { envelope } => {
            let event = envelope.event.clone();
            ApiOutcome::Emitted {
                result: transport.emit(envelope).await,
                event,
            }
        }
    }
}
