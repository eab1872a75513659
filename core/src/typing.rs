use std::collections::HashMap;
use tokio::time::{Duration, Instant};

/// Who is typing where, plus the throttle for our own typing emits.
///
/// Remote indicators carry a deadline instead of a spawned timer; every new
/// `user-typing` pushes the deadline out, and the owner polls `expire`.
pub struct TypingTracker {
    remote: HashMap<String, HashMap<String, Instant>>,
    timeout: Duration,
    last_emit: HashMap<String, Instant>,
    debounce: Duration,
}

impl TypingTracker {
    pub fn new(timeout: Duration, debounce: Duration) -> Self {
        Self {
            remote: HashMap::new(),
            timeout,
            last_emit: HashMap::new(),
            debounce,
        }
    }

    /// Record a remote typing signal. Returns true if the user was not already shown.
    pub fn start(&mut self, conversation_id: &str, user_id: &str, now: Instant) -> bool {
        self.remote
            .entry(conversation_id.to_string())
            .or_default()
            .insert(user_id.to_string(), now + self.timeout)
            .is_none()
    }

    /// Returns true if an indicator was removed.
    pub fn stop(&mut self, conversation_id: &str, user_id: &str) -> bool {
        let Some(users) = self.remote.get_mut(conversation_id) else {
            return false;
        };
        let removed = users.remove(user_id).is_some();
        if users.is_empty() {
            self.remote.remove(conversation_id);
        }
        removed
    }

    /// Drop every indicator whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<(String, String)> {
        let mut expired = Vec::new();
        for (conversation_id, users) in self.remote.iter_mut() {
            users.retain(|user_id, deadline| {
                if *deadline <= now {
                    expired.push((conversation_id.clone(), user_id.clone()));
                    false
                } else {
                    true
                }
            });
        }
        self.remote.retain(|_, users| !users.is_empty());
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.remote
            .values()
            .flat_map(|users| users.values())
            .min()
            .copied()
    }

    /// Users currently typing in a conversation, sorted for stable display.
    pub fn typing_in(&self, conversation_id: &str) -> Vec<String> {
        let mut users: Vec<String> = self
            .remote
            .get(conversation_id)
            .map(|users| users.keys().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    pub fn clear_conversation(&mut self, conversation_id: &str) {
        self.remote.remove(conversation_id);
        self.last_emit.remove(conversation_id);
    }

    pub fn clear(&mut self) {
        self.remote.clear();
        self.last_emit.clear();
    }

    /// Register a local keystroke. Returns true if a typing event should be emitted.
    pub fn should_emit(&mut self, conversation_id: &str, now: Instant) -> bool {
        let should = match self.last_emit.get(conversation_id) {
            Some(&prev) => now.duration_since(prev) >= self.debounce,
            None => true,
        };
        if should {
            self.last_emit.insert(conversation_id.to_string(), now);
        }
        should
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> TypingTracker {
        TypingTracker::new(Duration::from_secs(3), Duration::from_secs(2))
    }

    #[test]
    fn new_signal_resets_the_deadline() {
        let mut t = tracker();
        let t0 = Instant::now();
        assert!(t.start("c1", "u1", t0));
        assert!(!t.start("c1", "u1", t0 + Duration::from_secs(2)));
        // the first deadline (t0 + 3s) no longer applies
        assert!(t.expire(t0 + Duration::from_millis(3500)).is_empty());
        assert_eq!(t.typing_in("c1"), vec!["u1".to_string()]);
        let expired = t.expire(t0 + Duration::from_secs(5));
        assert_eq!(expired, vec![("c1".to_string(), "u1".to_string())]);
        assert!(t.typing_in("c1").is_empty());
        assert!(t.next_deadline().is_none());
    }

    #[test]
    fn explicit_stop_and_switch_clear_entries() {
        let mut t = tracker();
        let now = Instant::now();
        t.start("c1", "u1", now);
        t.start("c1", "u2", now);
        assert!(t.stop("c1", "u1"));
        assert!(!t.stop("c1", "u1"));
        t.clear_conversation("c1");
        assert!(t.typing_in("c1").is_empty());
    }

    #[test]
    fn next_deadline_is_the_earliest() {
        let mut t = tracker();
        let now = Instant::now();
        t.start("c1", "u1", now + Duration::from_secs(1));
        t.start("c2", "u2", now);
        assert_eq!(t.next_deadline(), Some(now + Duration::from_secs(3)));
    }

    #[test]
    fn debounce_logic() {
        let mut t = tracker();
        let now = Instant::now();
        assert!(t.should_emit("c1", now));
        assert!(!t.should_emit("c1", now + Duration::from_secs(1)));
        assert!(t.should_emit("c1", now + Duration::from_secs(2)));
        assert!(t.should_emit("c2", now));
    }
}
