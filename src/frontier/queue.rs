//! FIFO work queue with in-flight tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A page waiting to be fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierEntry {
    /// Normalized, fetchable URL
    pub url: String,
    pub depth: u32,
    /// Page (or strategy) the URL was found on
    pub source: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl FrontierEntry {
    pub fn new(url: impl Into<String>, depth: u32, source: Option<String>) -> Self {
        Self {
            url: url.into(),
            depth,
            source,
            enqueued_at: Utc::now(),
        }
    }
}

/// Pending entries in BFS order plus entries handed out but not finished
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct WorkQueue {
    pending: VecDeque<FrontierEntry>,
    /// In pop order
    in_flight: Vec<FrontierEntry>,
}

impl WorkQueue {
    pub(crate) fn from_parts(in_flight: Vec<FrontierEntry>, pending: Vec<FrontierEntry>) -> Self {
        let mut queue: VecDeque<FrontierEntry> = in_flight.into_iter().collect();
        queue.extend(pending);
        Self {
            pending: queue,
            in_flight: Vec::new(),
        }
    }

    pub(crate) fn push_back(&mut self, entry: FrontierEntry) {
        self.pending.push_back(entry);
    }

    pub(crate) fn pop(&mut self) -> Option<FrontierEntry> {
        let entry = self.pending.pop_front()?;
        self.in_flight.push(entry.clone());
        Some(entry)
    }

    fn take_in_flight(&mut self, url: &str) -> Option<FrontierEntry> {
        let index = self.in_flight.iter().position(|e| e.url == url)?;
        Some(self.in_flight.remove(index))
    }

    /// Marks an in-flight entry as finished; returns false if it was not in flight
    pub(crate) fn complete(&mut self, url: &str) -> bool {
        self.take_in_flight(url).is_some()
    }

    pub(crate) fn requeue_back(&mut self, entry: FrontierEntry) {
        self.take_in_flight(&entry.url);
        self.pending.push_back(entry);
    }

    pub(crate) fn requeue_front(&mut self, entry: FrontierEntry) {
        self.take_in_flight(&entry.url);
        self.pending.push_front(entry);
    }

    pub(crate) fn pending(&self) -> impl Iterator<Item = &FrontierEntry> {
        self.pending.iter()
    }

    pub(crate) fn in_flight(&self) -> &[FrontierEntry] {
        &self.in_flight
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str) -> FrontierEntry {
        FrontierEntry::new(url, 0, None)
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = WorkQueue::default();
        queue.push_back(entry("a"));
        queue.push_back(entry("b"));
        assert_eq!(queue.pop().unwrap().url, "a");
        assert_eq!(queue.pop().unwrap().url, "b");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_in_flight_tracking() {
        let mut queue = WorkQueue::default();
        queue.push_back(entry("a"));
        queue.push_back(entry("b"));
        let a = queue.pop().unwrap();
        queue.pop().unwrap();
        assert_eq!(queue.in_flight_len(), 2);

        assert!(queue.complete("b"));
        assert!(!queue.complete("b"));
        assert_eq!(queue.in_flight(), &[a.clone()]);

        queue.requeue_front(a);
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_from_parts_puts_in_flight_first() {
        let queue = WorkQueue::from_parts(vec![entry("x")], vec![entry("a"), entry("b")]);
        let urls: Vec<_> = queue.pending().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["x", "a", "b"]);
    }
}
