//! Pending dispatches awaiting a result.

use std::collections::HashMap;
use std::time::Instant;

/// Context kept for a plan dispatched on behalf of a direct requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectOrigin {
    pub user_id: String,
}

/// Context kept for a plan that came in as chat text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOrigin {
    pub original_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending<O> {
    /// Address the final reply goes to.
    pub requester: String,
    /// Address the plan was sent to; only a result from here resolves it.
    pub dispatched_to: String,
    pub origin: O,
    pub dispatched_at: Instant,
}

impl<O> Pending<O> {
    pub fn new(requester: impl Into<String>, dispatched_to: impl Into<String>, origin: O) -> Self {
        Self {
            requester: requester.into(),
            dispatched_to: dispatched_to.into(),
            origin,
            dispatched_at: Instant::now(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Claim<O> {
    Resolved(Pending<O>),
    /// An entry exists but was dispatched elsewhere; it stays in place.
    WrongSender { expected: String },
    Missing,
}

/// Pending entries keyed by task id. Each entry is consumed at most once.
#[derive(Debug)]
pub struct CorrelationTable<O> {
    entries: HashMap<String, Pending<O>>,
}

impl<O> Default for CorrelationTable<O> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<O> CorrelationTable<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task_id: impl Into<String>, pending: Pending<O>) {
        self.entries.insert(task_id.into(), pending);
    }

    pub fn remove(&mut self, task_id: &str) -> Option<Pending<O>> {
        self.entries.remove(task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.contains_key(task_id)
    }

    /// Consumes the entry for `task_id` if `sender` is where it was sent.
    pub fn claim(&mut self, task_id: &str, sender: &str) -> Claim<O> {
        match self.entries.get(task_id) {
            None => Claim::Missing,
            Some(pending) if pending.dispatched_to != sender => Claim::WrongSender {
                expected: pending.dispatched_to.clone(),
            },
            Some(_) => match self.entries.remove(task_id) {
                Some(pending) => Claim::Resolved(pending),
                None => Claim::Missing,
            },
        }
    }

    /// Drops every entry and returns how many there were.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The two tables, one per origin channel.
#[derive(Debug, Default)]
pub struct Correlations {
    pub direct: CorrelationTable<DirectOrigin>,
    pub chat: CorrelationTable<ChatOrigin>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(to: &str) -> Pending<DirectOrigin> {
        Pending::new(
            "requester",
            to,
            DirectOrigin {
                user_id: "alice".into(),
            },
        )
    }

    #[test]
    fn claim_consumes_once() {
        let mut table = CorrelationTable::new();
        table.insert("task_1", direct("/dev1"));
        assert!(matches!(table.claim("task_1", "/dev1"), Claim::Resolved(p) if p.requester == "requester"));
        assert_eq!(table.claim("task_1", "/dev1"), Claim::Missing);
    }

    #[test]
    fn claim_from_wrong_sender_keeps_entry() {
        let mut table = CorrelationTable::new();
        table.insert("task_1", direct("/dev1"));
        assert_eq!(
            table.claim("task_1", "/intruder"),
            Claim::WrongSender {
                expected: "/dev1".into()
            }
        );
        assert!(table.contains("task_1"));
    }

    #[test]
    fn clear_reports_count() {
        let mut table = CorrelationTable::new();
        table.insert("a", direct("/d"));
        table.insert("b", direct("/d"));
        assert_eq!(table.clear(), 2);
        assert!(table.is_empty());
    }
}
