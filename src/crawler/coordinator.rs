//! Discovery orchestrator - main crawl loop
//!
//! The orchestrator composes every service into one run:
//! - Starting or resuming the session
//! - Seeding the frontier from config seeds and pre-crawl strategies
//! - Dispatching frontier entries to a bounded pool of workers
//! - Applying worker results serially (catalog inserts, child links, counters)
//! - Reacting to blocking pages, identity exhaustion and shutdown signals
//! - Checkpointing periodically and on every exit path

use crate::config::Config;
use crate::crawler::fetcher::{Fetcher, HttpFetcher};
use crate::crawler::parser::{HtmlLinkExtractor, LinkExtractor, PdfCandidate};
use crate::crawler::validator::{HttpValidator, LinkValidator};
use crate::crawler::worker::{WorkOutcome, Worker};
use crate::detector::{write_evidence, BlockAction, BlockDetector, BlockEvidence};
use crate::frontier::{Frontier, FrontierEntry, PdfOffer};
use crate::governor::RateGovernor;
use crate::identity::{IdentityError, IdentityRotator, IdentitySupply, StaticSupply};
use crate::session::{CheckpointState, SessionManager};
use crate::state::{LinkStatus, SessionStatus};
use crate::storage::{self, NewBlockingEvent, SessionCounters, SharedStorage, Storage};
use crate::strategy::{build_strategies, DiscoveryStrategy, StrategyContext};
use crate::{DiscoveryError, Result, UrlError};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use url::Url;

/// Which session a run drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    /// Start a new session
    Fresh,
    /// Resume the given session, or the latest resumable one
    Resume(Option<String>),
}

/// Per-run overrides of the configuration
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub target: SessionTarget,
    /// Pages to dispatch in this run; overrides `crawler.max-pages`
    pub max_pages: Option<u64>,
    /// Validate discovered links after a completed run; overrides
    /// `output.validate-on-discovery`
    pub validate: Option<bool>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            target: SessionTarget::Fresh,
            max_pages: None,
            validate: None,
        }
    }
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub counters: SessionCounters,
    pub validation: Option<ValidationReport>,
}

/// Tally of a validation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub checked: u64,
    pub accessible: u64,
    pub blocked: u64,
    pub broken: u64,
}

/// Services the orchestrator is assembled from
///
/// Every field is public so tests can swap a collaborator (usually the
/// fetcher) before building the orchestrator.
pub struct OrchestratorParts {
    pub config: Config,
    pub storage: SharedStorage,
    pub fetcher: Arc<dyn Fetcher>,
    pub extractor: Arc<dyn LinkExtractor>,
    pub detector: Arc<BlockDetector>,
    pub governor: Arc<RateGovernor>,
    pub rotator: Arc<IdentityRotator>,
    pub supply: Arc<dyn IdentitySupply>,
    pub strategies: Vec<Box<dyn DiscoveryStrategy>>,
}

impl OrchestratorParts {
    /// Builds the production services described by `config`
    pub fn from_config(config: Config, storage: SharedStorage) -> Self {
        Self {
            fetcher: Arc::new(HttpFetcher::new()),
            extractor: Arc::new(HtmlLinkExtractor::new(config.crawler.max_links_per_page)),
            detector: Arc::new(BlockDetector::new()),
            governor: Arc::new(RateGovernor::from_config(&config.rate_limit)),
            rotator: Arc::new(IdentityRotator::new(
                &config.identity,
                config.rotation_cadence(),
            )),
            supply: Arc::new(StaticSupply::from_config(&config.identity)),
            strategies: build_strategies(&config.strategies),
            storage,
            config,
        }
    }
}

/// Why the loop stopped dispatching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    /// Frontier empty, nothing in flight
    Drained,
    PageLimit,
    Signal,
    /// Blocking page with no automatic resume
    Blocked,
}

enum LoopEvent {
    Joined(Option<std::result::Result<(FrontierEntry, WorkOutcome), tokio::task::JoinError>>),
    Signal,
}

/// Mutable state of one run, owned by the loop
struct CrawlState {
    session_id: String,
    sessions: SessionManager,
    frontier: Frontier,
    counters: SessionCounters,
    pages_this_run: u64,
    exhaustion_waits: u32,
    started: Instant,
}

impl CrawlState {
    fn checkpoint_state(&self) -> CheckpointState {
        CheckpointState::new(self.frontier.snapshot(), self.counters)
    }
}

/// Offers a PDF candidate to the catalog and updates the counters
fn record_pdf(
    frontier: &mut Frontier,
    counters: &mut SessionCounters,
    candidate: &PdfCandidate,
) -> Result<()> {
    match frontier.offer_pdf(candidate)? {
        PdfOffer::New(_) => {
            counters.links_found += 1;
            counters.new_links += 1;
        }
        PdfOffer::Duplicate(_) => {
            counters.links_found += 1;
            counters.duplicates += 1;
        }
        PdfOffer::Rejected => {}
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, stopping after a checkpoint"),
        _ = terminate => tracing::info!("Received SIGTERM, stopping after a checkpoint"),
    }
}

/// Forwards process signals to the shutdown handle while a run lasts
struct SignalListener(JoinHandle<()>);

impl SignalListener {
    fn spawn(shutdown: Arc<Notify>) -> Self {
        Self(tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.notify_one();
        }))
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Consumes a pending shutdown request without waiting
async fn shutdown_pending(shutdown: &Notify) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.notified() => true,
        _ = std::future::ready(()) => false,
    }
}

/// Main discovery orchestrator
pub struct Orchestrator {
    config: Config,
    storage: SharedStorage,
    worker: Worker,
    supply: Arc<dyn IdentitySupply>,
    strategies: Vec<Box<dyn DiscoveryStrategy>>,
    validator: Arc<dyn LinkValidator>,
    shutdown: Arc<Notify>,
    listen_for_signals: bool,
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        let timeout = Duration::from_secs(parts.config.crawler.request_timeout_secs);
        let per_path_class = parts.config.rate_limit.per_path_class;

        let validator = Arc::new(HttpValidator::new(
            parts.fetcher.clone(),
            parts.governor.clone(),
            parts.rotator.clone(),
            timeout,
            per_path_class,
        ));

        let worker = Worker {
            fetcher: parts.fetcher,
            extractor: parts.extractor,
            detector: parts.detector,
            governor: parts.governor,
            rotator: parts.rotator,
            timeout,
            retry_attempts: parts.config.crawler.retry_attempts,
            retry_backoff: Duration::from_millis(parts.config.crawler.retry_backoff_ms),
            per_path_class,
        };

        Self {
            config: parts.config,
            storage: parts.storage,
            worker,
            supply: parts.supply,
            strategies: parts.strategies,
            validator,
            shutdown: Arc::new(Notify::new()),
            listen_for_signals: true,
        }
    }

    /// Handle that stops a running session as Ctrl-C or SIGTERM would
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Disables the signal listener; the shutdown handle still works
    pub fn without_signal_handler(mut self) -> Self {
        self.listen_for_signals = false;
        self
    }

    /// Loads persisted identity health and merges the configured supply
    async fn prepare_identities(&self) -> Result<()> {
        let rotator = &self.worker.rotator;
        let added = rotator.refresh(self.supply.as_ref()).await?;
        let persisted = storage::lock(&self.storage)?.load_identities()?;
        rotator.load_records(persisted);
        tracing::debug!(
            "Identity pool ready: {} identities ({} from supply)",
            rotator.len(),
            added
        );
        Ok(())
    }

    /// Runs a discovery session until it drains, stops or fails
    ///
    /// # Arguments
    ///
    /// * `options` - Session to drive and per-run overrides
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - The session ended completed, interrupted or paused
    /// * `Err(DiscoveryError)` - A fatal error; the session was marked failed
    pub async fn run(&mut self, options: RunOptions) -> Result<RunSummary> {
        let _signals = self
            .listen_for_signals
            .then(|| SignalListener::spawn(self.shutdown.clone()));
        self.prepare_identities().await?;

        let mut sessions = SessionManager::new(self.storage.clone(), &self.config.session)
            .with_identities(self.worker.rotator.clone());

        let (mut crawl, fresh, run_strategies) = match &options.target {
            SessionTarget::Fresh => {
                let id = sessions.start(&self.config)?;
                let frontier =
                    Frontier::new(self.storage.clone(), Some(id.clone()), self.config.depth_limit());
                let run_strategies = self.config.crawler.mode.runs_strategies();
                (
                    CrawlState {
                        session_id: id,
                        sessions,
                        frontier,
                        counters: SessionCounters::default(),
                        pages_this_run: 0,
                        exhaustion_waits: 0,
                        started: Instant::now(),
                    },
                    true,
                    run_strategies,
                )
            }
            SessionTarget::Resume(id) => {
                let point = sessions.resume(id.as_deref())?;
                let mut frontier = Frontier::new(
                    self.storage.clone(),
                    Some(point.session_id.clone()),
                    point.max_depth,
                );
                frontier.restore(point.state.frontier);
                (
                    CrawlState {
                        session_id: point.session_id,
                        sessions,
                        frontier,
                        counters: point.state.counters,
                        pages_this_run: 0,
                        exhaustion_waits: 0,
                        started: Instant::now(),
                    },
                    false,
                    false,
                )
            }
        };

        let outcome = self
            .drive(&mut crawl, fresh, run_strategies, options.max_pages)
            .await;

        let status = match outcome.and_then(|stop| self.finish(&mut crawl, stop)) {
            Ok(status) => status,
            Err(e) => {
                let state = crawl.checkpoint_state();
                if let Err(fail_err) = crawl.sessions.fail(&e.to_string(), Some(&state)) {
                    tracing::error!(
                        "Could not mark session {} as failed: {}",
                        crawl.session_id,
                        fail_err
                    );
                }
                return Err(e);
            }
        };

        let validate = options
            .validate
            .unwrap_or(self.config.output.validate_on_discovery);
        let validation = if status == SessionStatus::Completed && validate {
            Some(self.validate_pending(None).await?)
        } else {
            None
        };

        tracing::info!(
            "Session {} {}: {} pages visited, {} links found ({} new, {} duplicates), {} errors, {} blocked",
            crawl.session_id,
            status,
            crawl.counters.pages_visited,
            crawl.counters.links_found,
            crawl.counters.new_links,
            crawl.counters.duplicates,
            crawl.counters.errors,
            crawl.counters.blocked
        );

        Ok(RunSummary {
            session_id: crawl.session_id,
            status,
            counters: crawl.counters,
            validation,
        })
    }

    /// Applies the final session transition for a stop reason
    fn finish(&self, crawl: &mut CrawlState, stop: StopReason) -> Result<SessionStatus> {
        let state = crawl.checkpoint_state();
        let status = match stop {
            StopReason::Drained => {
                crawl.sessions.complete(&state)?;
                SessionStatus::Completed
            }
            StopReason::PageLimit | StopReason::Signal => {
                crawl.sessions.interrupt(&state)?;
                SessionStatus::Interrupted
            }
            StopReason::Blocked => {
                crawl.sessions.pause(&state)?;
                tracing::warn!(
                    "Session {} left paused; resume it once the block is lifted",
                    crawl.session_id
                );
                SessionStatus::Paused
            }
        };
        Ok(status)
    }

    /// Seeds the frontier and runs the loop
    async fn drive(
        &mut self,
        crawl: &mut CrawlState,
        fresh: bool,
        run_strategies: bool,
        max_pages: Option<u64>,
    ) -> Result<StopReason> {
        if fresh {
            let mut accepted = 0;
            for seed in self.config.seed_urls() {
                if crawl.frontier.offer(&seed, 0, None)? {
                    accepted += 1;
                }
            }
            tracing::info!("Seeded frontier with {} URLs", accepted);

            if run_strategies {
                if let Some(stop) = self.run_strategies(crawl).await? {
                    return Ok(stop);
                }
            }
        }

        self.crawl_loop(crawl, max_pages).await
    }

    /// Runs every enabled pre-crawl strategy in registry order
    ///
    /// A strategy that fails is logged and skipped, except for identity and
    /// store failures, which abort the run. A shutdown request cancels the
    /// running strategy and skips the rest.
    async fn run_strategies(&mut self, crawl: &mut CrawlState) -> Result<Option<StopReason>> {
        let base_url = Url::parse(&self.config.site.base_url)
            .map_err(|e| UrlError::Parse(format!("{}: {}", self.config.site.base_url, e)))?;
        let ctx = StrategyContext::new(
            self.worker.fetcher.clone(),
            self.worker.governor.clone(),
            self.worker.rotator.clone(),
            self.storage.clone(),
            base_url,
            self.worker.timeout,
            self.worker.per_path_class,
        );

        for strategy in self.strategies.iter_mut() {
            let name = strategy.name();
            if shutdown_pending(&self.shutdown).await {
                tracing::info!("Shutdown requested before strategy {}", name);
                return Ok(Some(StopReason::Signal));
            }
            if !strategy.enabled() {
                tracing::debug!("Strategy {} disabled", name);
                continue;
            }

            tracing::info!("Running strategy {}", name);
            if let Err(e) = strategy.initialize(&ctx).await {
                if e.is_fatal() {
                    return Err(e.into());
                }
                tracing::warn!("Strategy {} failed to initialize: {}", name, e);
                continue;
            }

            let discovered = tokio::select! {
                result = strategy.discover(&ctx) => Some(result),
                _ = self.shutdown.notified() => None,
            };
            if let Err(e) = strategy.cleanup().await {
                tracing::debug!("Strategy {} cleanup failed: {}", name, e);
            }
            let Some(discovered) = discovered else {
                tracing::info!("Shutdown requested, strategy {} cancelled", name);
                return Ok(Some(StopReason::Signal));
            };
            let output = match discovered {
                Ok(output) => output,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!("Strategy {} failed: {}", name, e);
                    continue;
                }
            };

            let source = format!("strategy:{}", name);
            let mut seeds = 0;
            for url in &output.seed_urls {
                if crawl.frontier.offer(url, 0, Some(&source))? {
                    seeds += 1;
                }
            }
            let new_before = crawl.counters.new_links;
            for candidate in &output.pdf_links {
                record_pdf(&mut crawl.frontier, &mut crawl.counters, candidate)?;
            }

            tracing::info!(
                "Strategy {} queued {} pages and stored {} new PDF links ({})",
                name,
                seeds,
                crawl.counters.new_links - new_before,
                output.metadata
            );
        }

        Ok(None)
    }

    async fn crawl_loop(&self, crawl: &mut CrawlState, max_pages: Option<u64>) -> Result<StopReason> {
        let concurrency = self.config.crawler.max_concurrent_fetches.max(1) as usize;
        let max_pages = max_pages.or(self.config.crawler.max_pages);
        let mut tasks: JoinSet<(FrontierEntry, WorkOutcome)> = JoinSet::new();
        let mut dispatched: u64 = 0;

        tracing::info!(
            "Crawling with {} workers ({} URLs queued)",
            concurrency,
            crawl.frontier.len()
        );

        let stop = loop {
            while tasks.len() < concurrency && max_pages.map_or(true, |limit| dispatched < limit) {
                let Some(entry) = crawl.frontier.next() else {
                    break;
                };
                dispatched += 1;
                let worker = self.worker.clone();
                tasks.spawn(async move {
                    let outcome = worker.process(&entry).await;
                    (entry, outcome)
                });
            }

            if tasks.is_empty() {
                if crawl.frontier.is_empty() {
                    tracing::info!("Frontier is empty, discovery complete");
                    break StopReason::Drained;
                }
                tracing::info!("Page limit of {} reached", dispatched);
                break StopReason::PageLimit;
            }

            let event = tokio::select! {
                joined = tasks.join_next() => LoopEvent::Joined(joined),
                _ = self.shutdown.notified() => LoopEvent::Signal,
            };

            match event {
                LoopEvent::Joined(Some(joined)) => {
                    if let Some(stop) = self.handle_joined(crawl, joined, false).await? {
                        break stop;
                    }
                }
                LoopEvent::Joined(None) => {}
                LoopEvent::Signal => {
                    tracing::info!("Shutdown requested, stopping dispatch");
                    break StopReason::Signal;
                }
            }
        };

        if !tasks.is_empty() {
            self.drain(crawl, &mut tasks).await?;
        }

        Ok(stop)
    }

    /// Waits for in-flight fetches up to the shutdown grace period
    ///
    /// Results that arrive in time are applied; the rest are aborted and
    /// stay in the frontier's in-flight list.
    async fn drain(
        &self,
        crawl: &mut CrawlState,
        tasks: &mut JoinSet<(FrontierEntry, WorkOutcome)>,
    ) -> Result<()> {
        let grace = Duration::from_secs(self.config.crawler.shutdown_grace_seconds);
        tracing::info!(
            "Waiting up to {:?} for {} in-flight fetches",
            grace,
            tasks.len()
        );

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = tasks.join_next().await {
                self.handle_joined(crawl, joined, true).await?;
            }
            Ok::<(), DiscoveryError>(())
        })
        .await;

        match drained {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Aborting {} fetches still in flight after {:?}",
                    tasks.len(),
                    grace
                );
                tasks.abort_all();
                Ok(())
            }
        }
    }

    async fn handle_joined(
        &self,
        crawl: &mut CrawlState,
        joined: std::result::Result<(FrontierEntry, WorkOutcome), tokio::task::JoinError>,
        draining: bool,
    ) -> Result<Option<StopReason>> {
        let stop = match joined {
            Ok((entry, outcome)) => self.apply(crawl, entry, outcome, draining).await?,
            Err(e) => {
                tracing::error!("Worker task failed: {}", e);
                crawl.counters.errors += 1;
                None
            }
        };

        crawl.sessions.record_page();
        if stop.is_none() && crawl.sessions.checkpoint_due() {
            let state = crawl.checkpoint_state();
            crawl.sessions.checkpoint(&state)?;
        }
        Ok(stop)
    }

    /// Applies one worker result to the frontier, catalog and counters
    async fn apply(
        &self,
        crawl: &mut CrawlState,
        entry: FrontierEntry,
        outcome: WorkOutcome,
        draining: bool,
    ) -> Result<Option<StopReason>> {
        match outcome {
            WorkOutcome::Page {
                status,
                final_url,
                extraction,
            } => {
                crawl.frontier.complete(&entry.url);
                crawl.exhaustion_waits = 0;
                crawl.counters.pages_visited += 1;
                crawl.pages_this_run += 1;

                let mut queued = 0;
                for candidate in extraction.pdf_candidates {
                    let candidate = candidate.with_meta("depth", entry.depth);
                    record_pdf(&mut crawl.frontier, &mut crawl.counters, &candidate)?;
                }
                for link in &extraction.internal_links {
                    if crawl.frontier.offer(link, entry.depth + 1, Some(&entry.url))? {
                        queued += 1;
                    }
                }
                tracing::debug!(
                    "Visited {} (HTTP {}, final {}), {} new pages queued",
                    entry.url,
                    status,
                    final_url,
                    queued
                );

                self.log_progress(crawl);
            }

            WorkOutcome::Failed { error } => {
                tracing::warn!("Failed to fetch {}: {}", entry.url, error);
                crawl.frontier.complete(&entry.url);
                crawl.counters.errors += 1;
            }

            WorkOutcome::RateLimited => {
                tracing::debug!("Still rate limited on {}; re-queued", entry.url);
                crawl.frontier.requeue(entry);
            }

            WorkOutcome::Blocked { evidence, body } => {
                return self.on_blocked(crawl, entry, evidence, body, draining).await;
            }

            WorkOutcome::Exhausted(e) => {
                crawl.frontier.requeue_front(entry);
                return self.on_exhausted(crawl, e, draining).await;
            }
        }

        Ok(None)
    }

    fn log_progress(&self, crawl: &CrawlState) {
        let interval = self.config.crawler.progress_interval;
        if interval > 0 && crawl.pages_this_run % interval == 0 {
            let elapsed = crawl.started.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                crawl.pages_this_run as f64 / elapsed
            } else {
                0.0
            };
            tracing::info!(
                "Progress: {} pages visited, {} in frontier, {:.2} pages/sec, {} new links, {} duplicates",
                crawl.counters.pages_visited,
                crawl.frontier.len(),
                rate,
                crawl.counters.new_links,
                crawl.counters.duplicates
            );
        }
    }

    /// Records a blocking event and applies the configured action
    async fn on_blocked(
        &self,
        crawl: &mut CrawlState,
        entry: FrontierEntry,
        evidence: BlockEvidence,
        body: String,
        draining: bool,
    ) -> Result<Option<StopReason>> {
        let blocking = &self.config.blocking;
        tracing::warn!(
            "Blocking detected at {} ({}: {}, HTTP {})",
            evidence.url,
            evidence.signal,
            evidence.detail,
            evidence.status
        );
        crawl.counters.blocked += 1;

        let evidence_path = match blocking.evidence_dir.as_deref() {
            Some(dir) => match write_evidence(Path::new(dir), &crawl.session_id, &body).await {
                Ok(path) => Some(path.to_string_lossy().to_string()),
                Err(e) => {
                    tracing::warn!("Could not write blocking evidence to {}: {}", dir, e);
                    None
                }
            },
            None => None,
        };

        storage::lock(&self.storage)?.record_blocking_event(&NewBlockingEvent {
            session_id: crawl.session_id.clone(),
            url: evidence.url.clone(),
            signal: evidence.signal.as_str().to_string(),
            detail: evidence.detail.clone(),
            action: blocking.action.as_str().to_string(),
            evidence_path,
        })?;

        match blocking.action {
            BlockAction::Skip => {
                crawl.frontier.complete(&entry.url);
                Ok(None)
            }
            BlockAction::Pause => {
                crawl.frontier.requeue_front(entry);
                if blocking.pause_seconds == 0 {
                    return Ok(Some(StopReason::Blocked));
                }
                if draining {
                    return Ok(None);
                }

                let state = crawl.checkpoint_state();
                crawl.sessions.pause(&state)?;
                let pause = Duration::from_secs(blocking.pause_seconds);
                tracing::warn!("Pausing for {:?} before resuming", pause);

                if !self.wait_or_shutdown(pause).await {
                    return Ok(Some(StopReason::Signal));
                }
                crawl.sessions.unpause()?;
                Ok(None)
            }
        }
    }

    /// Waits for an identity to come back or gives up
    ///
    /// An identity leaving its probation cooldown ends the wait. With
    /// `wait-on-exhaustion` the pool is also refreshed from the supply.
    async fn on_exhausted(
        &self,
        crawl: &mut CrawlState,
        error: IdentityError,
        draining: bool,
    ) -> Result<Option<StopReason>> {
        if draining {
            return Ok(None);
        }

        let identity = &self.config.identity;
        let rotator = &self.worker.rotator;
        let probation = rotator.probation_wait();
        // Another task already waited this out
        if probation == Some(Duration::ZERO) {
            return Ok(None);
        }

        let refresh = Duration::from_secs(identity.refresh_seconds);
        let wait = match (probation, identity.wait_on_exhaustion) {
            (Some(probation), true) => probation.min(refresh),
            (Some(probation), false) => probation,
            (None, true) => refresh,
            (None, false) => {
                tracing::error!("No usable identity left: {}", error);
                return Err(error.into());
            }
        };
        if crawl.exhaustion_waits >= identity.exhaustion_retries {
            tracing::error!(
                "No usable identity left after {} waits: {}",
                crawl.exhaustion_waits,
                error
            );
            return Err(error.into());
        }

        crawl.exhaustion_waits += 1;
        tracing::warn!(
            "Identities exhausted; waiting {:?} (attempt {}/{})",
            wait,
            crawl.exhaustion_waits,
            identity.exhaustion_retries
        );
        if !self.wait_or_shutdown(wait).await {
            return Ok(Some(StopReason::Signal));
        }

        if identity.wait_on_exhaustion {
            let added = rotator.refresh(self.supply.as_ref()).await?;
            tracing::info!("Identity refresh added {} identities", added);
        }
        Ok(None)
    }

    /// Sleeps for `duration`; false when a shutdown arrived first
    async fn wait_or_shutdown(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown.notified() => false,
        }
    }

    /// Checks `discovered` links with a HEAD request
    ///
    /// # Arguments
    ///
    /// * `limit` - Maximum number of links to check, oldest first
    ///
    /// Identity exhaustion stops the pass; links checked so far keep their
    /// new status and the rest stay `discovered`.
    pub async fn validate_pending(&self, limit: Option<usize>) -> Result<ValidationReport> {
        self.prepare_identities().await?;

        let links = storage::lock(&self.storage)?.get_links(Some(LinkStatus::Discovered), limit)?;
        tracing::info!("Validating {} links", links.len());

        let mut report = ValidationReport::default();
        for link in links {
            let outcome = match self.validator.validate(&link.url).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        "Validation stopped after {} links: {}",
                        report.checked,
                        e
                    );
                    self.save_identity_health();
                    return Err(e.into());
                }
            };
            let update = outcome.to_update();
            storage::lock(&self.storage)?.update_link_validation(link.id, &update)?;

            report.checked += 1;
            match update.status {
                LinkStatus::Accessible => report.accessible += 1,
                LinkStatus::Blocked => report.blocked += 1,
                _ => report.broken += 1,
            }
            tracing::debug!("{} -> {}", link.url, update.status);
        }

        tracing::info!(
            "Validation done: {} checked, {} accessible, {} blocked, {} broken",
            report.checked,
            report.accessible,
            report.blocked,
            report.broken
        );
        self.save_identity_health();
        Ok(report)
    }

    fn save_identity_health(&self) {
        let records = self.worker.rotator.records();
        let saved =
            storage::lock(&self.storage).and_then(|mut store| store.save_identities(&records));
        if let Err(e) = saved {
            tracing::warn!("Could not save identity health: {}", e);
        }
    }
}
