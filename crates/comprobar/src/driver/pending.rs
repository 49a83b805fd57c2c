//! In-flight request table.
//!
//! CDP failure events carry only the request id, so the driver remembers
//! method and URL until the request finishes or fails. The table is bounded:
//! when full, the oldest entry is evicted.

use std::collections::HashMap;

#[derive(Debug)]
struct Entry {
    order: u64,
    method: String,
    url: String,
}

/// Bounded map of request id to `(method, url)`
#[derive(Debug)]
pub(crate) struct PendingRequests {
    capacity: usize,
    next: u64,
    entries: HashMap<String, Entry>,
}

impl PendingRequests {
    /// Table holding at most `capacity` requests (at least one)
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next: 0,
            entries: HashMap::new(),
        }
    }

    /// Remember a request that was just sent
    pub(crate) fn begin(&mut self, id: &str, method: &str, url: &str) {
        if !self.entries.contains_key(id) && self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.order)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            id.to_string(),
            Entry {
                order: self.next,
                method: method.to_string(),
                url: url.to_string(),
            },
        );
        self.next += 1;
    }

    /// Forget a request that completed
    pub(crate) fn finish(&mut self, id: &str) {
        self.entries.remove(id);
    }

    /// Take a request that failed
    pub(crate) fn fail(&mut self, id: &str) -> Option<(String, String)> {
        self.entries
            .remove(id)
            .map(|entry| (entry.method, entry.url))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
