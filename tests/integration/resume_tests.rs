//! Integration tests for session interruption, resume and lifecycle commands

use cendoj_discovery::config::{parse_config, Config};
use cendoj_discovery::crawler::{Orchestrator, OrchestratorParts, RunOptions, SessionTarget};
use cendoj_discovery::session::{SessionError, SessionManager};
use cendoj_discovery::storage::{self, open_storage, shared, SharedStorage, SqliteStorage, Storage};
use cendoj_discovery::{DiscoveryError, SessionStatus};
use std::collections::HashMap;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const PAGES: usize = 200;

fn test_config(server: &MockServer, database: &str) -> Config {
    parse_config(&format!(
        r#"
        [crawler]
        mode = "shallow"
        max-concurrent-fetches = 4
        max-links-per-page = 500
        retry-attempts = 0

        [site]
        base-url = "{}/"

        [rate-limit]
        requests-per-minute = 600000.0
        burst = 1000

        [session]
        checkpoint-pages = 10

        [output]
        database-path = "{}"
        "#,
        server.uri(),
        database
    ))
    .expect("test config should parse")
}

fn orchestrator(config: Config, storage: SharedStorage) -> Orchestrator {
    Orchestrator::new(OrchestratorParts::from_config(config, storage)).without_signal_handler()
}

/// Mounts an index linking to `PAGES - 1` ruling pages, each with one PDF
async fn mount_site(server: &MockServer) {
    let links: String = (1..PAGES)
        .map(|i| format!(r#"<a href="/p/{}">Sentencia {}</a>"#, i, i))
        .collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(format!("<html><body>{}</body></html>", links), "text/html"),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/p/\d+$"))
        .respond_with(|request: &Request| {
            let id = request.url.path().trim_start_matches("/p/").to_string();
            ResponseTemplate::new(200).set_body_raw(
                format!(
                    r#"<html><body><a href="/">Inicio</a><a href="/docs/{}.pdf">PDF</a></body></html>"#,
                    id
                ),
                "text/html",
            )
        })
        .mount(server)
        .await;
}

async fn hits_by_path(server: &MockServer) -> HashMap<String, usize> {
    let mut hits = HashMap::new();
    for request in server.received_requests().await.unwrap_or_default() {
        *hits.entry(request.url.path().to_string()).or_insert(0) += 1;
    }
    hits
}

#[tokio::test]
async fn test_resume_continues_without_revisiting() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("discovery.db");
    let config = test_config(&server, &db.display().to_string());

    let first = {
        let storage = shared(open_storage(&db).unwrap());
        orchestrator(config.clone(), storage)
            .run(RunOptions {
                max_pages: Some(50),
                ..Default::default()
            })
            .await
            .unwrap()
    };
    assert_eq!(first.status, SessionStatus::Interrupted);
    assert_eq!(first.counters.pages_visited, 50);
    let links_after_first = first.counters.new_links;

    // A new store handle stands in for a restarted process
    let storage = shared(open_storage(&db).unwrap());
    let second = orchestrator(config, storage.clone())
        .run(RunOptions {
            target: SessionTarget::Resume(None),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(second.session_id, first.session_id);
    assert_eq!(second.status, SessionStatus::Completed);
    assert_eq!(second.counters.pages_visited, PAGES as u64);
    assert_eq!(second.counters.new_links, (PAGES - 1) as u64);
    assert!(second.counters.new_links > links_after_first);
    assert_eq!(second.counters.duplicates, 0);

    let hits = hits_by_path(&server).await;
    assert_eq!(hits.len(), PAGES);
    assert!(hits.values().all(|&count| count == 1), "a page was fetched twice");

    let store = storage::lock(&storage).unwrap();
    assert_eq!(store.count_links().unwrap(), (PAGES - 1) as u64);
    assert_eq!(store.total_duplicates().unwrap(), 0);
}

#[tokio::test]
async fn test_recovered_session_can_resume() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let config = test_config(&server, ":memory:");
    let storage = shared(SqliteStorage::new_in_memory().unwrap());

    let first = orchestrator(config.clone(), storage.clone())
        .run(RunOptions {
            max_pages: Some(20),
            ..Default::default()
        })
        .await
        .unwrap();

    // Simulate a crash that left the row running after the last checkpoint
    storage::lock(&storage)
        .unwrap()
        .update_session_status(&first.session_id, SessionStatus::Running)
        .unwrap();

    let blocked = orchestrator(config.clone(), storage.clone())
        .run(RunOptions::default())
        .await;
    assert!(matches!(
        blocked,
        Err(DiscoveryError::Session(SessionError::Conflict(ref id))) if *id == first.session_id
    ));

    let sessions = SessionManager::new(storage.clone(), &config.session);
    let recovered = sessions.recover(&first.session_id).unwrap();
    assert_eq!(recovered.status, SessionStatus::Running);
    assert_eq!(
        storage::lock(&storage)
            .unwrap()
            .get_session(&first.session_id)
            .unwrap()
            .status,
        SessionStatus::Interrupted
    );

    let resumed = orchestrator(config, storage)
        .run(RunOptions {
            target: SessionTarget::Resume(Some(first.session_id.clone())),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(resumed.status, SessionStatus::Completed);
    assert_eq!(resumed.counters.pages_visited, PAGES as u64);
}

#[tokio::test]
async fn test_cancelled_session_is_not_resumable() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let config = test_config(&server, ":memory:");
    let storage = shared(SqliteStorage::new_in_memory().unwrap());

    let first = orchestrator(config.clone(), storage.clone())
        .run(RunOptions {
            max_pages: Some(5),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(first.status, SessionStatus::Interrupted);

    SessionManager::new(storage.clone(), &config.session)
        .cancel(&first.session_id)
        .unwrap();

    let by_id = orchestrator(config.clone(), storage.clone())
        .run(RunOptions {
            target: SessionTarget::Resume(Some(first.session_id.clone())),
            ..Default::default()
        })
        .await;
    assert!(matches!(
        by_id,
        Err(DiscoveryError::Session(SessionError::NotResumable {
            status: SessionStatus::Cancelled,
            ..
        }))
    ));

    let latest = orchestrator(config, storage)
        .run(RunOptions {
            target: SessionTarget::Resume(None),
            ..Default::default()
        })
        .await;
    assert!(matches!(
        latest,
        Err(DiscoveryError::Session(SessionError::NothingToResume))
    ));
}

#[tokio::test]
async fn test_completed_session_is_not_offered_for_resume() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"<a href="/docs/only.pdf">PDF</a>"#, "text/html"),
        )
        .mount(&server)
        .await;
    let config = test_config(&server, ":memory:");
    let storage = shared(SqliteStorage::new_in_memory().unwrap());

    let summary = orchestrator(config.clone(), storage.clone())
        .run(RunOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.status, SessionStatus::Completed);

    let store = storage::lock(&storage).unwrap();
    assert!(store.get_latest_resumable_session().unwrap().is_none());
    let listed = store.list_sessions(10).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].counters.new_links, 1);
}
