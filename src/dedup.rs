//! Auto-reply notification dedup.
//!
//! Process-lifetime only; maintenance clears it wholesale.

use std::collections::HashSet;

pub trait DedupState: Send + Sync {
    fn already_notified(&self, address: &str) -> bool;
    fn mark_notified(&mut self, address: &str);
    fn clear_all(&mut self);
}

/// In-memory set of senders whose auto-replies were already handled.
#[derive(Debug, Default)]
pub struct NotifiedSenders {
    senders: HashSet<String>,
}

impl NotifiedSenders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

impl DedupState for NotifiedSenders {
    fn already_notified(&self, address: &str) -> bool {
        self.senders.contains(address)
    }

    fn mark_notified(&mut self, address: &str) {
        self.senders.insert(address.to_string());
    }

    fn clear_all(&mut self) {
        self.senders.clear();
    }
}
