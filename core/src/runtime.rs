use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::{perform, ApiCall, ApiOutcome, MessagingApi, RealtimeTransport};
use crate::clock::Now;
use crate::error::{InboxError, Result};
use crate::events::{EventBus, InboundEvent, Subscription};
use crate::model::{Draft, Message};
use crate::view::{MessagingView, Snapshot};

const COMMAND_BUFFER: usize = 64;

enum Command {
    Activate(String),
    Send {
        conversation_id: String,
        draft: Draft,
        reply: oneshot::Sender<Result<Message>>,
    },
    MarkAllRead(String),
    MarkMessageRead(String),
    MarkMessageUnread(String),
    React {
        message_id: String,
        emoji: String,
    },
    Delete {
        message_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Forward {
        message_id: String,
        conversation_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    CreateConversation {
        participant_ids: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    LoadMoreConversations,
    LoadMoreMessages(String),
    LoadMoreSaved,
    RefreshSaved {
        force: bool,
    },
    Refresh {
        force: bool,
    },
    LocalTyping(String),
    DismissNotice(Uuid),
    Shutdown,
}

pub struct Runtime {
    view: MessagingView,
    api: Arc<dyn MessagingApi>,
    transport: Arc<dyn RealtimeTransport>,
    done_tx: mpsc::UnboundedSender<ApiOutcome>,
}

/// Handle to a running messaging runtime.
pub struct RuntimeHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
    task: JoinHandle<()>,
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Runtime {
    /// Spawn the actor. Inbound events are taken from `bus`.
    pub fn spawn(
        view: MessagingView,
        api: Arc<dyn MessagingApi>,
        transport: Arc<dyn RealtimeTransport>,
        bus: &EventBus,
    ) -> RuntimeHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(view.snapshot());
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let events = bus.subscribe_all();
        let runtime = Runtime {
            view,
            api,
            transport,
            done_tx,
        };
        let task = tokio::spawn(runtime.run(commands_rx, events, done_rx, snapshot_tx));
        RuntimeHandle {
            commands: commands_tx,
            snapshots: snapshot_rx,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: Subscription<InboundEvent>,
        mut done: mpsc::UnboundedReceiver<ApiOutcome>,
        snapshots: watch::Sender<Snapshot>,
    ) {
        info!(user_id = %self.view.user_id(), "messaging runtime started");
        loop {
            let deadline = self.view.next_typing_deadline();
            let calls = tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.apply(command),
                },
                Some(event) = events.recv() => self.view.handle_event(event, Now::system()),
                Some(outcome) = done.recv() => self.view.complete(outcome, Now::system()),
                _ = until(deadline) => {
                    let expired = self.view.expire_typing(Now::system());
                    debug!(expired = expired.len(), "typing indicators expired");
                    Vec::new()
                }
            };
            self.dispatch(calls);
            snapshots.send_replace(self.view.snapshot());
        }
        info!("messaging runtime stopped");
    }

    fn dispatch(&self, calls: Vec<ApiCall>) {
        for call in calls {
            debug!(call = call.name(), "dispatching collaborator call");
            let api = self.api.clone();
            let transport = self.transport.clone();
            let done = self.done_tx.clone();
            tokio::spawn(async move {
                let outcome = perform(api.as_ref(), transport.as_ref(), call).await;
                // the runtime may have stopped meanwhile
                let _ = done.send(outcome);
            });
        }
    }

    fn apply(&mut self, command: Command) -> Vec<ApiCall> {
        let now = Now::system();
        let view = &mut self.view;
        match command {
            Command::Activate(id) => view.activate(&id, now),
            Command::Send {
                conversation_id,
                draft,
                reply,
            } => match view.send(&conversation_id, draft, now) {
                Ok((message, calls)) => {
                    let _ = reply.send(Ok(message));
                    calls
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                    Vec::new()
                }
            },
            Command::MarkAllRead(id) => view.mark_all_read(&id),
            Command::MarkMessageRead(id) => view.mark_message_read(&id),
            Command::MarkMessageUnread(id) => view.mark_message_unread(&id, now),
            Command::React { message_id, emoji } => view.react(&message_id, &emoji, now),
            Command::Delete { message_id, reply } => respond(view.delete_message(&message_id), reply),
            Command::Forward {
                message_id,
                conversation_id,
                reply,
            } => respond(view.forward(&message_id, &conversation_id), reply),
            Command::CreateConversation {
                participant_ids,
                reply,
            } => respond(view.create_conversation(&participant_ids), reply),
            Command::LoadMoreConversations => view.load_more_conversations(),
            Command::LoadMoreMessages(id) => view.load_more_messages(&id),
            Command::LoadMoreSaved => view.load_more_saved(),
            Command::RefreshSaved { force } => view.refresh_saved(force, now),
            Command::Refresh { force } => view.refresh_conversations(force, now),
            Command::LocalTyping(id) => view.local_typing(&id, now).unwrap_or_else(|err| {
                debug!(error = %err, "typing emit skipped");
                Vec::new()
            }),
            Command::DismissNotice(id) => {
                view.dismiss_notice(id);
                Vec::new()
            }
            Command::Shutdown => Vec::new(),
        }
    }
}

fn respond(result: Result<Vec<ApiCall>>, reply: oneshot::Sender<Result<()>>) -> Vec<ApiCall> {
    match result {
        Ok(calls) => {
            let _ = reply.send(Ok(()));
            calls
        }
        Err(err) => {
            let _ = reply.send(Err(err));
            Vec::new()
        }
    }
}

impl RuntimeHandle {
    async fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| InboxError::Shutdown)
    }

    async fn request<T>(&self, command: Command, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        self.command(command).await?;
        rx.await.map_err(|_| InboxError::Shutdown)?
    }

    /// Latest published state.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that is notified on every state change.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    pub async fn activate(&self, conversation_id: impl Into<String>) -> Result<()> {
        self.command(Command::Activate(conversation_id.into())).await
    }

    /// Queue a message. Returns the optimistic copy once it is in the store.
    pub async fn send(&self, conversation_id: impl Into<String>, draft: Draft) -> Result<Message> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Send {
            conversation_id: conversation_id.into(),
            draft,
            reply,
        };
        self.request(command, rx).await
    }

    pub async fn mark_all_read(&self, conversation_id: impl Into<String>) -> Result<()> {
        self.command(Command::MarkAllRead(conversation_id.into())).await
    }

    pub async fn mark_message_read(&self, message_id: impl Into<String>) -> Result<()> {
        self.command(Command::MarkMessageRead(message_id.into())).await
    }

    pub async fn mark_message_unread(&self, message_id: impl Into<String>) -> Result<()> {
        self.command(Command::MarkMessageUnread(message_id.into())).await
    }

    pub async fn react(&self, message_id: impl Into<String>, emoji: impl Into<String>) -> Result<()> {
        self.command(Command::React {
            message_id: message_id.into(),
            emoji: emoji.into(),
        })
        .await
    }

    pub async fn delete_message(&self, message_id: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Delete {
            message_id: message_id.into(),
            reply,
        };
        self.request(command, rx).await
    }

    pub async fn forward(
        &self,
        message_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Forward {
            message_id: message_id.into(),
            conversation_id: conversation_id.into(),
            reply,
        };
        self.request(command, rx).await
    }

    pub async fn create_conversation(&self, participant_ids: Vec<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        let command = Command::CreateConversation {
            participant_ids,
            reply,
        };
        self.request(command, rx).await
    }

    pub async fn load_more_conversations(&self) -> Result<()> {
        self.command(Command::LoadMoreConversations).await
    }

    pub async fn load_more_messages(&self, conversation_id: impl Into<String>) -> Result<()> {
        self.command(Command::LoadMoreMessages(conversation_id.into()))
            .await
    }

    pub async fn load_more_saved(&self) -> Result<()> {
        self.command(Command::LoadMoreSaved).await
    }

    pub async fn refresh_saved(&self, force: bool) -> Result<()> {
        self.command(Command::RefreshSaved { force }).await
    }

    pub async fn refresh_conversations(&self, force: bool) -> Result<()> {
        self.command(Command::Refresh { force }).await
    }

    pub async fn local_typing(&self, conversation_id: impl Into<String>) -> Result<()> {
        self.command(Command::LocalTyping(conversation_id.into())).await
    }

    pub async fn dismiss_notice(&self, id: Uuid) -> Result<()> {
        self.command(Command::DismissNotice(id)).await
    }

    /// Stop the actor and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "messaging runtime task failed");
        }
    }
}
