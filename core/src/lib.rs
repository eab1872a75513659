//! Real-time state reconciliation for a messaging inbox.
//!
//! Optimistic local sends, server confirmations, and out-of-band realtime
//! events all converge on one store of messages and one recency-ordered
//! conversation list.

pub mod cache;
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod conversations;
pub mod error;
pub mod events;
pub mod ipc;
pub mod media;
pub mod model;
pub mod normalize;
pub mod notice;
pub mod pagination;
pub mod presence;
pub mod reconciler;
pub mod runtime;
pub mod status;
pub mod store;
pub mod typing;
pub mod view;

pub use client::{ApiCall, ApiOutcome, MessagingApi, RealtimeTransport};
pub use clock::Now;
pub use error::{ApiError, InboxError, Result};
pub use events::{EventBus, EventKind, InboundEvent, Subscription};
pub use model::{Conversation, Draft, Message};
pub use runtime::{Runtime, RuntimeHandle};
pub use status::DeliveryStatus;
pub use view::{MessagingView, Snapshot, ViewSettings};
