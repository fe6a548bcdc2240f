//! Crawl frontier and deduplicator
//!
//! The frontier is the BFS queue of pages still to fetch plus the set of
//! dedup keys already accepted. PDF-shaped URLs never enter the queue; they
//! go straight to the link catalog, which is the persistent half of the
//! dedup index.
//!
//! The frontier is owned by the crawl loop and is not shared, so it takes no
//! locks of its own. The store it writes PDF links to is shared.

mod queue;
mod snapshot;

pub use queue::FrontierEntry;
pub use snapshot::{FrontierSnapshot, FrontierStats};

use crate::crawler::{PdfCandidate, REGEX_CONFIDENCE};
use crate::state::ExtractionMethod;
use crate::storage::{self, InsertOutcome, NewLink, SharedStorage, Storage, StorageResult};
use crate::url::{dedup_key, is_pdf_url, key_for, normalize_url};
use queue::WorkQueue;
use std::collections::HashSet;

/// Outcome of offering a PDF candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfOffer {
    /// Stored for the first time
    New(i64),
    /// Already in the catalog; its duplicate counter was bumped
    Duplicate(i64),
    /// The URL could not be normalized
    Rejected,
}

impl PdfOffer {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }
}

/// BFS queue plus seen-set, backed by the link catalog
pub struct Frontier {
    queue: WorkQueue,
    seen: HashSet<String>,
    depth_limit: Option<u32>,
    storage: SharedStorage,
    session_id: Option<String>,
    stats: FrontierStats,
}

impl Frontier {
    /// Creates an empty frontier
    ///
    /// # Arguments
    ///
    /// * `storage` - Link catalog used for persistent dedup and PDF inserts
    /// * `session_id` - Session credited with newly stored links
    /// * `depth_limit` - Maximum page depth, `None` for unbounded
    pub fn new(storage: SharedStorage, session_id: Option<String>, depth_limit: Option<u32>) -> Self {
        Self {
            queue: WorkQueue::default(),
            seen: HashSet::new(),
            depth_limit,
            storage,
            session_id,
            stats: FrontierStats::default(),
        }
    }

    pub fn depth_limit(&self) -> Option<u32> {
        self.depth_limit
    }

    /// Offers a page URL for crawling
    ///
    /// Returns `Ok(true)` when the URL was accepted. A PDF-shaped URL is
    /// routed to [`Frontier::offer_pdf`] instead and reports whether it was
    /// new to the catalog. Malformed URLs are dropped and reported as
    /// `Ok(false)`; only storage failures are errors.
    pub fn offer(&mut self, url: &str, depth: u32, source: Option<&str>) -> StorageResult<bool> {
        let normalized = match normalize_url(url) {
            Ok(u) => u,
            Err(e) => {
                tracing::debug!("Rejecting malformed URL {}: {}", url, e);
                self.stats.rejected_malformed += 1;
                return Ok(false);
            }
        };

        if is_pdf_url(&normalized) {
            let candidate = PdfCandidate::new(
                normalized.as_str(),
                source.map(str::to_string),
                ExtractionMethod::PatternMatch,
                REGEX_CONFIDENCE,
            )
            .with_meta("depth", depth);
            return Ok(self.offer_pdf(&candidate)?.is_new());
        }

        let key = key_for(&normalized);
        if self.seen.contains(&key) {
            self.stats.rejected_seen += 1;
            return Ok(false);
        }

        if let Some(limit) = self.depth_limit {
            if depth > limit {
                tracing::debug!("Rejecting {} at depth {} (limit {})", normalized, depth, limit);
                self.stats.rejected_depth += 1;
                return Ok(false);
            }
        }

        if storage::lock(&self.storage)?.link_exists(&key)? {
            self.seen.insert(key);
            self.stats.rejected_seen += 1;
            return Ok(false);
        }

        self.seen.insert(key);
        self.queue.push_back(FrontierEntry::new(
            normalized.as_str(),
            depth,
            source.map(str::to_string),
        ));
        self.stats.accepted += 1;
        Ok(true)
    }

    /// Records a PDF candidate in the link catalog
    ///
    /// A normalized URL already in the catalog, from this or any earlier
    /// session, increments its duplicate counter instead of creating a row.
    pub fn offer_pdf(&mut self, candidate: &PdfCandidate) -> StorageResult<PdfOffer> {
        let key = match dedup_key(&candidate.url) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!("Rejecting malformed PDF URL {}: {}", candidate.url, e);
                self.stats.rejected_malformed += 1;
                return Ok(PdfOffer::Rejected);
            }
        };

        let link = NewLink {
            url: candidate.url.clone(),
            normalized_url: key.clone(),
            source_url: candidate.source_url.clone(),
            session_id: self.session_id.clone(),
            method: candidate.method,
            confidence: candidate.confidence,
            metadata: candidate.metadata.clone(),
        };

        let outcome = storage::lock(&self.storage)?.insert_link(&link)?;
        self.seen.insert(key);

        Ok(match outcome {
            InsertOutcome::Inserted(id) => {
                tracing::debug!("New PDF link {} ({})", candidate.url, candidate.method);
                self.stats.pdf_new += 1;
                PdfOffer::New(id)
            }
            InsertOutcome::Duplicate { id, .. } => {
                self.stats.pdf_duplicates += 1;
                PdfOffer::Duplicate(id)
            }
        })
    }

    /// Pops the next entry in BFS order and marks it in flight
    pub fn next(&mut self) -> Option<FrontierEntry> {
        self.queue.pop()
    }

    /// Marks an in-flight entry as finished
    pub fn complete(&mut self, url: &str) {
        if !self.queue.complete(url) {
            tracing::debug!("Completed URL {} was not in flight", url);
        }
    }

    /// Puts an in-flight entry back at the end of the queue
    pub fn requeue(&mut self, entry: FrontierEntry) {
        self.queue.requeue_back(entry);
    }

    /// Puts an in-flight entry back at the head of the queue
    pub fn requeue_front(&mut self, entry: FrontierEntry) {
        self.queue.requeue_front(entry);
    }

    /// Number of entries waiting to be popped
    pub fn len(&self) -> usize {
        self.queue.pending_len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.pending_len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.queue.in_flight_len()
    }

    /// True when nothing is pending and nothing is in flight
    pub fn is_idle(&self) -> bool {
        self.is_empty() && self.in_flight() == 0
    }

    pub fn stats(&self) -> FrontierStats {
        self.stats
    }

    /// Captures the frontier state
    pub fn snapshot(&self) -> FrontierSnapshot {
        let mut seen: Vec<String> = self.seen.iter().cloned().collect();
        seen.sort();
        FrontierSnapshot {
            in_flight: self.queue.in_flight().to_vec(),
            pending: self.queue.pending().cloned().collect(),
            seen,
            stats: self.stats,
        }
    }

    /// Replaces the frontier state with a snapshot
    ///
    /// Entries that were in flight when the snapshot was taken are queued
    /// ahead of the pending ones.
    pub fn restore(&mut self, snapshot: FrontierSnapshot) {
        tracing::info!(
            "Restoring frontier: {} in flight, {} pending, {} seen",
            snapshot.in_flight.len(),
            snapshot.pending.len(),
            snapshot.seen.len()
        );
        self.queue = WorkQueue::from_parts(snapshot.in_flight, snapshot.pending);
        self.seen = snapshot.seen.into_iter().collect();
        self.stats = snapshot.stats;
    }
}
