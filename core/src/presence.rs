use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One user's presence as pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub user_id: String,
    pub online: bool,
    pub last_seen: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub online: bool,
    pub last_seen: Option<i64>,
}

/// Process-wide online/last-seen index. Clones share the same map so the
/// conversation list and any user list read the same state.
#[derive(Clone, Default)]
pub struct PresenceIndex {
    entries: Arc<RwLock<HashMap<String, PresenceEntry>>>,
}

impl PresenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch a single user. Returns true if the user transitioned online/offline.
    pub fn patch(&self, update: PresenceUpdate) -> bool {
        let mut guard = self.entries.write();
        let previous = guard.get(&update.user_id).map(|e| e.online);
        let last_seen = match (update.last_seen, guard.get(&update.user_id)) {
            (Some(ts), _) => Some(ts),
            (None, Some(existing)) => existing.last_seen,
            (None, None) => None,
        };
        guard.insert(
            update.user_id,
            PresenceEntry {
                online: update.online,
                last_seen,
            },
        );
        previous != Some(update.online)
    }

    /// Replace the whole index with a server-provided batch.
    pub fn replace_all(&self, batch: Vec<PresenceUpdate>) {
        let mut guard = self.entries.write();
        guard.clear();
        for update in batch {
            guard.insert(
                update.user_id,
                PresenceEntry {
                    online: update.online,
                    last_seen: update.last_seen,
                },
            );
        }
    }

    pub fn get(&self, user_id: &str) -> Option<PresenceEntry> {
        self.entries.read().get(user_id).copied()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.get(user_id).map(|e| e.online).unwrap_or(false)
    }

    /// Whether any of `user_ids` other than `exclude` is online.
    pub fn any_online<'a>(&self, user_ids: impl IntoIterator<Item = &'a str>, exclude: &str) -> bool {
        let guard = self.entries.read();
        user_ids
            .into_iter()
            .filter(|id| *id != exclude)
            .any(|id| guard.get(id).map(|e| e.online).unwrap_or(false))
    }

    pub fn snapshot(&self) -> HashMap<String, PresenceEntry> {
        self.entries.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(user: &str, online: bool, last_seen: Option<i64>) -> PresenceUpdate {
        PresenceUpdate {
            user_id: user.into(),
            online,
            last_seen,
        }
    }

    #[test]
    fn patch_reports_transitions() {
        let presence = PresenceIndex::new();
        assert!(presence.patch(update("u1", true, None)));
        assert!(!presence.patch(update("u1", true, None)));
        assert!(presence.patch(update("u1", false, Some(50))));
        assert_eq!(presence.get("u1").unwrap().last_seen, Some(50));
        // last_seen survives a patch that does not carry one
        presence.patch(update("u1", true, None));
        assert_eq!(presence.get("u1").unwrap().last_seen, Some(50));
    }

    #[test]
    fn list_replaces_batch() {
        let presence = PresenceIndex::new();
        presence.patch(update("stale", true, None));
        presence.replace_all(vec![update("u1", true, None), update("u2", false, Some(3))]);
        assert!(presence.get("stale").is_none());
        assert!(presence.is_online("u1"));
        assert!(!presence.is_online("u2"));
        assert_eq!(presence.snapshot().len(), 2);
    }

    #[test]
    fn clones_share_state() {
        let a = PresenceIndex::new();
        let b = a.clone();
        a.patch(update("u1", true, None));
        assert!(b.is_online("u1"));
        assert!(b.any_online(["me", "u1"], "me"));
        assert!(!b.any_online(["u1"], "u1"));
    }
}
