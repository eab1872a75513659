use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Delivery state of a message. Ordered so that `max` is the supremum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Status implied by the observed signals, whatever order they arrived in.
    pub fn from_signals(delivered_at: Option<i64>, read_by: &BTreeSet<String>) -> Self {
        if !read_by.is_empty() {
            DeliveryStatus::Read
        } else if delivered_at.is_some() {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Pending
        }
    }

    pub fn is_delivered(self) -> bool {
        self >= DeliveryStatus::Delivered
    }
}

/// Partial status update carried by a receipt event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPatch {
    pub delivered_at: Option<i64>,
    pub read_by: Option<String>,
}

impl StatusPatch {
    pub fn delivered(at: i64) -> Self {
        Self {
            delivered_at: Some(at),
            read_by: None,
        }
    }

    pub fn read(user_id: impl Into<String>) -> Self {
        Self {
            delivered_at: None,
            read_by: Some(user_id.into()),
        }
    }
}

/// Fold an observed delivery time into the current one, keeping the earliest.
pub fn merge_delivered_at(current: Option<i64>, observed: Option<i64>) -> Option<i64> {
    match (current, observed) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
