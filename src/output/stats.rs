//! Statistics generation from the discovery database
//!
//! This module provides functionality for extracting and displaying
//! catalog, session and identity statistics from the storage layer.

use crate::identity::IdentityRecord;
use crate::output::OutputResult;
use crate::state::{ExtractionMethod, LinkStatus, SessionStatus};
use crate::storage::{BlockingEventRecord, SessionRecord, Storage};
use std::collections::HashMap;

/// Number of recent blocking events shown by [`print_statistics`]
const RECENT_BLOCKING_EVENTS: usize = 5;

/// Discovery statistics summary
#[derive(Debug, Clone)]
pub struct DiscoveryStatistics {
    /// Total number of stored PDF links
    pub total_links: u64,

    /// Count of links by lifecycle status
    pub links_by_status: HashMap<LinkStatus, u64>,

    /// Count of links by extraction method
    pub links_by_method: HashMap<ExtractionMethod, u64>,

    /// Re-discoveries absorbed by deduplication
    pub total_duplicates: u64,

    /// Count of sessions by status
    pub sessions_by_status: HashMap<SessionStatus, u64>,

    /// Health of every known identity
    pub identities: Vec<IdentityRecord>,

    /// Blocking events, newest first
    pub blocking_events: Vec<BlockingEventRecord>,
}

impl DiscoveryStatistics {
    pub fn healthy_identities(&self) -> usize {
        self.identities.iter().filter(|r| r.is_healthy).count()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(DiscoveryStatistics)` - Successfully loaded statistics
/// * `Err(OutputError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> OutputResult<DiscoveryStatistics> {
    let mut blocking_events = storage.get_blocking_events(None)?;
    blocking_events.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));

    Ok(DiscoveryStatistics {
        total_links: storage.count_links()?,
        links_by_status: storage.count_links_by_status()?,
        links_by_method: storage.count_links_by_method()?,
        total_duplicates: storage.total_duplicates()?,
        sessions_by_status: storage.count_sessions_by_status()?,
        identities: storage.load_identities()?,
        blocking_events,
    })
}

fn percentage(count: u64, total: u64) -> f64 {
    if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &DiscoveryStatistics) {
    println!("=== Discovery Statistics ===\n");

    println!("Overview:");
    println!("  Total PDF links: {}", stats.total_links);
    println!("  Duplicates absorbed: {}", stats.total_duplicates);
    println!(
        "  Identities: {} ({} healthy)",
        stats.identities.len(),
        stats.healthy_identities()
    );
    println!("  Blocking events: {}", stats.blocking_events.len());
    println!();

    println!("Links by Status:");
    for status in LinkStatus::all_states() {
        let count = stats.links_by_status.get(&status).copied().unwrap_or(0);
        if count > 0 {
            println!(
                "  {}: {} ({:.1}%)",
                status,
                count,
                percentage(count, stats.total_links)
            );
        }
    }
    println!();

    println!("Links by Extraction Method:");
    let mut methods: Vec<_> = stats.links_by_method.iter().collect();
    methods.sort_by(|a, b| b.1.cmp(a.1));
    for (method, count) in methods {
        println!("  {}: {}", method, count);
    }
    println!();

    if !stats.sessions_by_status.is_empty() {
        println!("Sessions by Status:");
        for status in SessionStatus::all_states() {
            if let Some(count) = stats.sessions_by_status.get(&status) {
                println!("  {}: {}", status, count);
            }
        }
        println!();
    }

    if !stats.blocking_events.is_empty() {
        println!("Recent Blocking Events:");
        for event in stats.blocking_events.iter().take(RECENT_BLOCKING_EVENTS) {
            println!(
                "  {} [{}] {} ({}) -> {}",
                event.detected_at, event.signal, event.url, event.detail, event.action
            );
        }
        println!();
    }

    let accessible = stats
        .links_by_status
        .get(&LinkStatus::Accessible)
        .copied()
        .unwrap_or(0);
    let checked: u64 = stats
        .links_by_status
        .iter()
        .filter(|(status, _)| {
            matches!(
                status,
                LinkStatus::Accessible | LinkStatus::Broken | LinkStatus::Blocked
            )
        })
        .map(|(_, count)| count)
        .sum();

    println!(
        "Accessibility: {:.1}% ({} / {} validated links accessible)",
        percentage(accessible, checked),
        accessible,
        checked
    );
}

/// Prints recent sessions as a table
pub fn print_sessions(sessions: &[SessionRecord]) {
    if sessions.is_empty() {
        println!("No sessions recorded");
        return;
    }

    println!(
        "{:<36}  {:<11}  {:<7}  {:<20}  {:>7}  {:>7}  {:>7}  {:>6}  {:>7}",
        "ID", "STATUS", "MODE", "STARTED", "PAGES", "FOUND", "NEW", "ERRORS", "BLOCKED"
    );
    for session in sessions {
        let started: String = session.start_time.chars().take(19).collect();
        println!(
            "{:<36}  {:<11}  {:<7}  {:<20}  {:>7}  {:>7}  {:>7}  {:>6}  {:>7}",
            session.id,
            session.status.to_string(),
            session.mode.to_string(),
            started,
            session.counters.pages_visited,
            session.counters.links_found,
            session.counters.new_links,
            session.counters.errors,
            session.counters.blocked
        );
    }
}

/// Prints identity health as a table, best score first
pub fn print_identities(identities: &[IdentityRecord]) {
    if identities.is_empty() {
        println!("No identity health recorded");
        return;
    }

    let mut sorted: Vec<&IdentityRecord> = identities.iter().collect();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    println!(
        "{:<40}  {:>6}  {:>8}  {:>8}  {:>8}  {:>9}  {:<7}",
        "IDENTITY", "SCORE", "REQUESTS", "SUCCESS", "FAILURES", "AVG (s)", "HEALTHY"
    );
    for record in sorted {
        println!(
            "{:<40}  {:>6.1}  {:>8}  {:>7.1}%  {:>8}  {:>9}  {:<7}",
            record.key,
            record.score,
            record.total_requests,
            record.success_rate() * 100.0,
            record.consecutive_failures,
            record
                .avg_response_time
                .map(|t| format!("{:.2}", t))
                .unwrap_or_else(|| "-".to_string()),
            if record.is_healthy { "yes" } else { "no" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CrawlMode;
    use crate::storage::{NewBlockingEvent, NewLink, SqliteStorage};

    fn link(url: &str, method: ExtractionMethod) -> NewLink {
        NewLink {
            url: url.to_string(),
            normalized_url: url.to_string(),
            source_url: None,
            session_id: None,
            method,
            confidence: 0.9,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_load_statistics() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .create_session("s1", CrawlMode::Deep, Some(3), "{}")
            .unwrap();
        storage
            .insert_link(&link("https://example.com/a.pdf", ExtractionMethod::StructuralSelector))
            .unwrap();
        storage
            .insert_link(&link("https://example.com/a.pdf", ExtractionMethod::StructuralSelector))
            .unwrap();
        storage
            .insert_link(&link("https://example.com/b.pdf", ExtractionMethod::Sitemap))
            .unwrap();
        storage
            .record_blocking_event(&NewBlockingEvent {
                session_id: "s1".to_string(),
                url: "https://example.com/x".to_string(),
                signal: "text-marker".to_string(),
                detail: "captcha".to_string(),
                action: "pause".to_string(),
                evidence_path: None,
            })
            .unwrap();

        let stats = load_statistics(&storage).unwrap();
        assert_eq!(stats.total_links, 2);
        assert_eq!(stats.total_duplicates, 1);
        assert_eq!(stats.links_by_status.get(&LinkStatus::Discovered), Some(&2));
        assert_eq!(stats.links_by_method.get(&ExtractionMethod::Sitemap), Some(&1));
        assert_eq!(stats.sessions_by_status.get(&SessionStatus::Running), Some(&1));
        assert_eq!(stats.blocking_events.len(), 1);
        assert_eq!(stats.healthy_identities(), 0);
    }

    #[test]
    fn test_percentage_of_empty_total() {
        assert_eq!(percentage(3, 0), 0.0);
        assert_eq!(percentage(1, 4), 25.0);
    }
}
