//! Integration tests for discovery runs
//!
//! These tests use wiremock to stand in for the court-decision site and
//! drive full sessions through the production fetcher, extractor and store.

use cendoj_discovery::config::{parse_config, Config};
use cendoj_discovery::crawler::{Orchestrator, OrchestratorParts, RunOptions};
use cendoj_discovery::frontier::Frontier;
use cendoj_discovery::governor::{GovernorSettings, RateGovernor};
use cendoj_discovery::output::{export_links, load_statistics, ExportFormat};
use cendoj_discovery::storage::{self, shared, SharedStorage, SqliteStorage, Storage};
use cendoj_discovery::strategy::generate_gap_urls;
use cendoj_discovery::{dedup_key, CrawlMode, ExtractionMethod, LinkStatus, SessionStatus};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock server
fn test_config(server: &MockServer, extra: &str) -> Config {
    parse_config(&format!(
        r#"
        [crawler]
        mode = "shallow"
        max-concurrent-fetches = 2
        request-timeout-secs = 5
        retry-attempts = 0

        [site]
        base-url = "{}/"

        [rate-limit]
        requests-per-minute = 60000.0
        burst = 100

        [output]
        database-path = ":memory:"

        {}
        "#,
        server.uri(),
        extra
    ))
    .expect("test config should parse")
}

fn orchestrator(config: Config) -> (Orchestrator, SharedStorage) {
    let storage = shared(SqliteStorage::new_in_memory().expect("in-memory store"));
    let parts = OrchestratorParts::from_config(config, storage.clone());
    (Orchestrator::new(parts).without_signal_handler(), storage)
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<html><head><title>Cendoj</title></head><body>{}</body></html>", body),
        "text/html",
    )
}

async fn mount_page(server: &MockServer, at: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(html(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_shallow_discovery_stores_deduplicated_links() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"
        <a href="/docs/a.pdf">A</a>
        <a href="/docs/b.pdf">B</a>
        <a href="/docs/a.pdf?utm=1">A again</a>
        <a href="/sala/civil">Civil</a>
        "#,
    )
    .await;
    mount_page(
        &server,
        "/sala/civil",
        r#"<a href="/docs/b.pdf">B</a><a href="/docs/c.pdf">C</a><a href="/sala/civil/2020">2020</a>"#,
    )
    .await;

    let (mut orchestrator, storage) = orchestrator(test_config(&server, ""));
    let summary = orchestrator.run(RunOptions::default()).await.unwrap();

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.counters.pages_visited, 2);
    assert_eq!(summary.counters.new_links, 3);
    assert_eq!(summary.counters.errors, 0);

    let store = storage::lock(&storage).unwrap();
    assert_eq!(store.count_links().unwrap(), 3);
    let b = store
        .get_links(None, None)
        .unwrap()
        .into_iter()
        .find(|l| l.url.ends_with("/docs/b.pdf"))
        .expect("b.pdf stored");
    assert_eq!(b.duplicate_count, 1);
    assert_eq!(b.extraction_method, ExtractionMethod::StructuralSelector);
    assert_eq!(b.status, LinkStatus::Discovered);

    // Shallow mode stops after one hop
    let requested: Vec<String> = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert!(!requested.contains(&"/sala/civil/2020".to_string()));
}

#[tokio::test]
async fn test_offers_collapse_tracking_variants() {
    let storage = shared(SqliteStorage::new_in_memory().unwrap());
    let mut frontier = Frontier::new(storage.clone(), None, Some(3));

    assert!(frontier.offer("https://example.com/a.pdf", 0, None).unwrap());
    assert!(frontier.offer("https://example.com/b.pdf", 0, None).unwrap());
    assert!(!frontier.offer("https://example.com/a.pdf?utm=1", 0, None).unwrap());

    let store = storage::lock(&storage).unwrap();
    assert_eq!(store.count_links().unwrap(), 2);
    assert_eq!(store.total_duplicates().unwrap(), 1);
}

#[test]
fn test_gap_fill_preserves_padding() {
    let known: Vec<String> = ["doc-001.pdf", "doc-003.pdf", "doc-005.pdf"]
        .iter()
        .map(|name| format!("https://example.com/docs/{}", name))
        .collect();

    assert_eq!(
        generate_gap_urls(&known, 2, 10),
        vec![
            "https://example.com/docs/doc-002.pdf".to_string(),
            "https://example.com/docs/doc-004.pdf".to_string(),
        ]
    );
}

#[test]
fn test_consecutive_rate_limits_back_off_exponentially() {
    let base = Duration::from_millis(500);
    let governor = RateGovernor::new(GovernorSettings {
        base_rate: 60.0,
        burst: 5,
        min_rate: 1.0,
        recovery_step: 1.0,
        error_factor: 0.75,
        base_backoff: base,
        max_backoff: Duration::from_secs(60),
    });

    let delays: Vec<Duration> = (0..3)
        .map(|_| governor.on_rate_limited("example.com"))
        .collect();
    assert_eq!(delays, vec![base, base * 2, base * 4]);

    let stats = governor.snapshot("example.com").unwrap();
    assert!(stats.effective_rate <= 30.0);
    assert_eq!(stats.consecutive_rate_limits, 3);
}

#[tokio::test]
async fn test_blocking_page_pauses_session() {
    let server = MockServer::start().await;
    let evidence = TempDir::new().unwrap();
    mount_page(
        &server,
        "/",
        r#"<a href="/docs/a.pdf">A</a><a href="/buscador">Buscador</a>"#,
    )
    .await;
    mount_page(
        &server,
        "/buscador",
        r#"<div class="g-recaptcha"></div><p>Please solve the captcha to continue</p>"#,
    )
    .await;

    let config = test_config(
        &server,
        &format!(
            r#"
            [blocking]
            action = "pause"
            pause-seconds = 0
            evidence-dir = "{}"
            "#,
            evidence.path().display()
        ),
    );
    let (mut orchestrator, storage) = orchestrator(config);
    let summary = orchestrator.run(RunOptions::default()).await.unwrap();

    assert_eq!(summary.status, SessionStatus::Paused);
    assert_eq!(summary.counters.blocked, 1);
    assert_eq!(summary.counters.errors, 0);

    let store = storage::lock(&storage).unwrap();
    let events = store.get_blocking_events(Some(&summary.session_id)).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, "pause");
    assert!(events[0].url.ends_with("/buscador"));

    let session = store.get_session(&summary.session_id).unwrap();
    assert_eq!(session.status, SessionStatus::Paused);
    assert!(session.snapshot.is_some());

    let files = std::fs::read_dir(evidence.path()).unwrap().count();
    assert_eq!(files, 1);
}

#[tokio::test]
async fn test_validation_after_completed_run() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"<a href="/docs/ok.pdf">OK</a><a href="/docs/gone.pdf">Gone</a>"#,
    )
    .await;
    Mock::given(method("HEAD"))
        .and(path("/docs/ok.pdf"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("content-type", "application/pdf"),
        )
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/docs/gone.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (mut orchestrator, storage) = orchestrator(test_config(&server, ""));
    let summary = orchestrator
        .run(RunOptions {
            validate: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();

    let report = summary.validation.expect("validation ran");
    assert_eq!(report.checked, 2);
    assert_eq!(report.accessible, 1);
    assert_eq!(report.broken, 1);

    let store = storage::lock(&storage).unwrap();
    let accessible = store.get_links(Some(LinkStatus::Accessible), None).unwrap();
    assert_eq!(accessible.len(), 1);
    assert_eq!(accessible[0].http_status, Some(200));
    assert_eq!(accessible[0].content_type.as_deref(), Some("application/pdf"));
    assert_eq!(store.get_links(Some(LinkStatus::Broken), None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_deep_mode_runs_strategies_before_crawl() {
    let server = MockServer::start().await;
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                  <url><loc>{base}/docs/doc-001.pdf</loc></url>
                  <url><loc>{base}/docs/doc-003.pdf</loc></url>
                  <url><loc>{base}/sala/penal</loc></url>
                </urlset>"#
            ),
            "application/xml",
        ))
        .mount(&server)
        .await;
    mount_page(&server, "/", "<p>Inicio</p>").await;
    mount_page(&server, "/sala/penal", r#"<a href="/docs/penal-7.pdf">7</a>"#).await;

    let mut config = test_config(
        &server,
        r#"
        [strategies.taxonomy]
        enabled = false
        "#,
    );
    config.crawler.mode = CrawlMode::Deep;

    let (mut orchestrator, storage) = orchestrator(config);
    let summary = orchestrator.run(RunOptions::default()).await.unwrap();
    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.counters.pages_visited, 2);

    let store = storage::lock(&storage).unwrap();
    let by_method = store.count_links_by_method().unwrap();
    assert_eq!(by_method.get(&ExtractionMethod::Sitemap), Some(&2));
    assert_eq!(by_method.get(&ExtractionMethod::PatternMatch), Some(&1));
    assert_eq!(
        by_method.get(&ExtractionMethod::StructuralSelector),
        Some(&1)
    );
    let gap = dedup_key(&format!("{}/docs/doc-002.pdf", base)).unwrap();
    let generated = store.get_link(&gap).unwrap().expect("gap URL stored");
    assert_eq!(generated.extraction_method, ExtractionMethod::PatternMatch);
}

#[tokio::test]
async fn test_export_and_statistics_after_run() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"<a href="/docs/1.pdf">1</a><a href="/docs/2.pdf">2</a>"#,
    )
    .await;

    let (mut orchestrator, storage) = orchestrator(test_config(&server, ""));
    orchestrator.run(RunOptions::default()).await.unwrap();

    let store = storage::lock(&storage).unwrap();
    let stats = load_statistics(&*store).unwrap();
    assert_eq!(stats.total_links, 2);
    assert_eq!(stats.sessions_by_status.get(&SessionStatus::Completed), Some(&1));
    assert!(stats.healthy_identities() >= 1);

    let dir = TempDir::new().unwrap();
    let out = dir.path().join("links.txt");
    let written = export_links(&*store, &out, ExportFormat::Txt, None, None).unwrap();
    assert_eq!(written, 2);
    let content = std::fs::read_to_string(&out).unwrap();
    assert!(content.lines().all(|line| line.ends_with(".pdf")));
}
