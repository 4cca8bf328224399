use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

use chrono::{SecondsFormat, Utc};
use replix_common::message::{ClientReply, ClientRequest};

/// Entries kept before the oldest ones are dropped.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// Append-only, timestamped record of the messages a node received. Keeps
/// the most recent `capacity` entries.
pub struct CommunicationLog {
    entries: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl Default for CommunicationLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl CommunicationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Mutex::new(VecDeque::new()), capacity: capacity.max(1) }
    }

    pub fn add(&self, message: impl AsRef<str>) {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(format!("[{}] - {}", stamp, message.as_ref()));
    }

    pub fn add_request(&self, request: &ClientRequest) {
        self.add(format!("{} received from client {}", request, request.client_id));
    }

    pub fn add_reply(&self, reply: &ClientReply) {
        self.add(format!("{} received from server {}", reply, reply.replica_id));
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// One entry per line, oldest first.
    pub fn render(&self) -> String {
        self.entries().join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replix_common::{
        message::{Command, Transaction},
        NodeId,
    };

    #[test]
    fn test_entries_are_timestamped_in_order() {
        let log = CommunicationLog::new();
        log.add("first");
        log.add("second");

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].starts_with('['));
        assert!(entries[0].ends_with("Z] - first"));
        assert!(entries[1].ends_with("] - second"));
    }

    #[test]
    fn test_request_entry_names_client() {
        let log = CommunicationLog::new();
        let request = ClientRequest::new(
            NodeId::from("A"),
            42,
            Command::Transfer(Transaction { sender: "A".into(), receiver: "B".into(), amount: 2 }),
        );
        log.add_request(&request);

        assert!(log
            .render()
            .ends_with("<REQUEST, TRANSFER (A -> B, 2), 42, A> received from client A"));

        log.clear();
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_oldest_entries_dropped_at_capacity() {
        let log = CommunicationLog::with_capacity(2);
        log.add("first");
        log.add("second");
        log.add("third");

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].ends_with("- second"));
        assert!(entries[1].ends_with("- third"));
    }
}
