//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the crawl loop that ties the other components
//! together:
//! - Gating every page on a fresh quota query
//! - Enumerating stubs and fetching their details
//! - Checkpointing after every fully processed page
//! - Flushing full batches and draining partial ones at the end
//! - Honoring stop requests at page boundaries

use crate::config::{compute_config_hash, validate, Config};
use crate::crawler::client::{ApiClient, ProviderError};
use crate::crawler::enumerator::{next_cursor, EntityStub, PageEnumerator};
use crate::crawler::fetcher::DetailFetcher;
use crate::crawler::quota::{QuotaMonitor, QuotaState, MIN_THROTTLE_WAIT};
use crate::output::{BatchWriter, FlushedUnit, UnitKind};
use crate::state::{Checkpoint, CheckpointStore, CrawlState, FileCheckpointStore};
use crate::storage::{open_ledger, RunLedger, RunStatus, RunSummary, SqliteLedger};
use crate::HarvestError;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Outcome of one crawl run
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub run_id: i64,
    pub state: CrawlState,
    /// Checkpoint the run resumed from
    pub start: Checkpoint,
    /// Last checkpoint saved by the run
    pub checkpoint: Checkpoint,
    pub pages: u64,
    pub records: u64,
    pub failures: u64,
    /// Budgeted requests sent (page and detail fetches)
    pub requests_made: u64,
    pub throttle_waits: Vec<Duration>,
    pub units: Vec<FlushedUnit>,
    /// True if the run ended early because a stop was requested
    pub stopped: bool,
    pub elapsed: Duration,
}

impl CrawlReport {
    fn new(run_id: i64, start: Checkpoint) -> Self {
        Self {
            run_id,
            state: CrawlState::Init,
            start,
            checkpoint: start,
            pages: 0,
            records: 0,
            failures: 0,
            requests_made: 0,
            throttle_waits: Vec::new(),
            units: Vec::new(),
            stopped: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn total_throttle_wait(&self) -> Duration {
        self.throttle_waits.iter().sum()
    }

    pub fn success_units(&self) -> impl Iterator<Item = &FlushedUnit> {
        self.units.iter().filter(|u| u.kind == UnitKind::Success)
    }

    pub fn failure_units(&self) -> impl Iterator<Item = &FlushedUnit> {
        self.units.iter().filter(|u| u.kind == UnitKind::Failure)
    }

    fn summary(&self, error: Option<String>) -> RunSummary {
        RunSummary {
            end_cursor: self.checkpoint.cursor,
            records_written: self.success_units().map(|u| u.count as u64).sum(),
            failures_written: self.failure_units().map(|u| u.count as u64).sum(),
            requests_made: self.requests_made,
            throttle_wait_ms: self.total_throttle_wait().as_millis() as u64,
            error_message: error,
        }
    }
}

/// Cloneable handle used to ask a running crawl to stop
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests a stop; the crawl observes it at the next page boundary
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    fn reset(&self) {
        self.tx.send_replace(false);
    }
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    config_hash: String,
    quota: QuotaMonitor,
    enumerator: PageEnumerator,
    fetcher: DetailFetcher,
    store: Box<dyn CheckpointStore>,
    ledger: SqliteLedger,
    writer: BatchWriter,
    state: CrawlState,
    stop: StopSignal,
    stop_rx: watch::Receiver<bool>,
}

impl Coordinator {
    /// Creates a coordinator that checkpoints to the configured file
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run; nothing on disk has been touched
    ///   except the run ledger
    /// * `Err(HarvestError)` - Invalid configuration or unusable ledger
    pub fn new(config: Config) -> Result<Self, HarvestError> {
        let store = FileCheckpointStore::new(&config.output.checkpoint_path);
        Self::with_store(config, Box::new(store))
    }

    /// Creates a coordinator with a custom checkpoint backend
    pub fn with_store(
        config: Config,
        store: Box<dyn CheckpointStore>,
    ) -> Result<Self, HarvestError> {
        validate(&config)?;
        let config_hash = compute_config_hash(&config)?;

        let client = ApiClient::new(&config.api)?;
        let ledger = open_ledger(std::path::Path::new(&config.output.ledger_path))?;
        let writer = BatchWriter::new(&config.output);

        let stop = StopSignal::new();
        let stop_rx = stop.subscribe();

        tracing::debug!("Config fingerprint: {}", config_hash);

        Ok(Self {
            quota: QuotaMonitor::new(client.clone()),
            enumerator: PageEnumerator::new(client.clone(), config.crawler.per_page),
            fetcher: DetailFetcher::new(client),
            config: Arc::new(config),
            config_hash,
            store,
            ledger,
            writer,
            state: CrawlState::Init,
            stop,
            stop_rx,
        })
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// Returns a handle that can stop this coordinator from another task
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Runs one crawl from the stored checkpoint until the source is
    /// exhausted, a stop is honored, or a fatal fault occurs
    ///
    /// A coordinator that ended in `Done` or `Failed` may be run again; it
    /// restarts from `Init` with whatever checkpoint is durable. A stop
    /// request ends only the run that observes it: a stop issued before
    /// `run` is honored by that run, and the signal is cleared when it ends.
    pub async fn run(&mut self) -> Result<CrawlReport, HarvestError> {
        if self.state.is_terminal() {
            self.transition(CrawlState::Init)?;
        }

        let start = self.store.load();
        let run_id = self.ledger.begin_run(&self.config_hash, start.cursor)?;
        tracing::info!(
            "Starting crawl run {} from since={}, totalFetched={}",
            run_id,
            start.cursor,
            start.total_fetched
        );

        let mut report = CrawlReport::new(run_id, start);
        let started = Instant::now();
        let result = self.drive(&mut report).await;
        report.elapsed = started.elapsed();

        self.stop.reset();
        self.stop_rx.borrow_and_update();

        match result {
            Ok(()) => {
                report.state = self.state;
                let status = if report.stopped {
                    RunStatus::Stopped
                } else {
                    RunStatus::Completed
                };
                self.record_outcome(status, &report, None);

                tracing::info!(
                    "Crawl run {} {}: {} pages, {} records, {} failures, {} requests in {:?}",
                    run_id,
                    status.to_db_string(),
                    report.pages,
                    report.records,
                    report.failures,
                    report.requests_made,
                    report.elapsed
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(
                    "Crawl run {} failed at since={}: {}",
                    run_id,
                    report.checkpoint.cursor,
                    e
                );

                // Units published before a flush failed, then records still
                // in memory, which belong to checkpointed pages
                report.units.extend(self.writer.take_written());
                match self.writer.flush_remaining() {
                    Ok(units) => report.units.extend(units),
                    Err(flush_err) => {
                        tracing::warn!("Could not flush pending batches: {}", flush_err)
                    }
                }

                // Failed is reachable from every non-terminal state
                self.state = CrawlState::Failed;
                report.state = CrawlState::Failed;
                self.record_outcome(RunStatus::Failed, &report, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn drive(&mut self, report: &mut CrawlReport) -> Result<(), HarvestError> {
        let mut exhausted: Option<QuotaState> = None;
        let mut page_failures = 0u32;

        self.transition(CrawlState::Paging)?;

        loop {
            match self.state {
                CrawlState::Paging => {
                    if self.stop.is_stopped() {
                        tracing::info!(
                            "Stop requested, draining at since={}",
                            report.checkpoint.cursor
                        );
                        report.stopped = true;
                        self.transition(CrawlState::Draining)?;
                        continue;
                    }

                    let mut budget = match self.quota.check().await {
                        Ok(budget) => budget,
                        Err(e) => {
                            self.page_failed(e, &mut page_failures).await?;
                            continue;
                        }
                    };

                    if budget.is_exhausted() {
                        exhausted = Some(budget);
                        self.transition(CrawlState::Throttled)?;
                        continue;
                    }

                    let cursor = report.checkpoint.cursor;
                    let stubs = match self.enumerator.fetch_page(cursor).await {
                        Ok(stubs) => stubs,
                        Err(e) => {
                            report.requests_made += 1;
                            self.page_failed(e, &mut page_failures).await?;
                            continue;
                        }
                    };
                    report.requests_made += 1;
                    budget.consume();

                    if stubs.is_empty() {
                        tracing::info!("Empty page after since={}, source exhausted", cursor);
                        self.transition(CrawlState::Draining)?;
                        continue;
                    }

                    self.process_page(&stubs, &mut budget, report).await?;
                    page_failures = 0;

                    self.pause(self.config.crawler.pacing()).await;
                    self.transition(CrawlState::Paging)?;
                }

                CrawlState::Throttled => {
                    let wait = exhausted
                        .take()
                        .map(|q| q.wait_duration(Utc::now()))
                        .unwrap_or(MIN_THROTTLE_WAIT);
                    tracing::warn!("Quota exhausted, sleeping {:?} until reset", wait);

                    let slept = Instant::now();
                    let interrupted = self.pause(wait).await;
                    report.throttle_waits.push(slept.elapsed());

                    if interrupted {
                        tracing::info!("Stop requested while throttled");
                        report.stopped = true;
                        self.transition(CrawlState::Draining)?;
                    } else {
                        self.transition(CrawlState::Paging)?;
                    }
                }

                CrawlState::Draining => {
                    let units = self.writer.flush_remaining()?;
                    report.units.extend(units);
                    self.transition(CrawlState::Done)?;
                }

                CrawlState::Done => return Ok(()),

                CrawlState::Init | CrawlState::Failed => {
                    return Err(HarvestError::InvalidTransition {
                        from: self.state,
                        to: CrawlState::Paging,
                    })
                }
            }
        }
    }

    /// Fetches details for one page, then checkpoints and flushes
    ///
    /// Outcomes reach the batch writer only after the page's checkpoint is
    /// durable, so a failed save never leaves records of an uncheckpointed
    /// page behind.
    async fn process_page(
        &mut self,
        stubs: &[EntityStub],
        budget: &mut QuotaState,
        report: &mut CrawlReport,
    ) -> Result<(), HarvestError> {
        let since = report.checkpoint.cursor;
        let cursor = next_cursor(since, stubs)?;

        let mut total = report.checkpoint.total_fetched;
        let mut outcomes = Vec::with_capacity(stubs.len());

        for stub in stubs {
            if budget.is_exhausted() {
                *budget = self.throttle_mid_page(*budget, report).await?;
            }

            let outcome = self.fetcher.fetch_detail(stub, total, since).await;
            report.requests_made += 1;
            budget.consume();

            if outcome.is_success() {
                total += 1;
            }
            outcomes.push(outcome);
        }

        let checkpoint = Checkpoint::new(cursor, total);
        self.store.save(&checkpoint)?;

        let page_records = outcomes.iter().filter(|o| o.is_success()).count() as u64;
        let page_failures = outcomes.len() as u64 - page_records;
        for outcome in outcomes {
            self.writer.add(outcome);
        }

        report.checkpoint = checkpoint;
        report.pages += 1;
        report.records += page_records;
        report.failures += page_failures;

        let units = self.writer.flush_if_full()?;
        report.units.extend(units);

        tracing::info!(
            "Page {}: since={} -> {}, {} records, {} failures, totalFetched={}",
            report.pages,
            since,
            cursor,
            page_records,
            page_failures,
            total
        );
        Ok(())
    }

    /// Waits out an exhausted budget in the middle of a page
    ///
    /// Stop requests are not honored here; the page must complete first.
    async fn throttle_mid_page(
        &mut self,
        budget: QuotaState,
        report: &mut CrawlReport,
    ) -> Result<QuotaState, HarvestError> {
        self.transition(CrawlState::Throttled)?;

        let mut budget = budget;
        let mut failures = 0u32;
        loop {
            let wait = budget.wait_duration(Utc::now());
            tracing::warn!("Quota exhausted mid-page, sleeping {:?} until reset", wait);
            tokio::time::sleep(wait).await;
            report.throttle_waits.push(wait);

            match self.quota.check().await {
                Ok(fresh) if !fresh.is_exhausted() => {
                    self.transition(CrawlState::Paging)?;
                    return Ok(fresh);
                }
                Ok(fresh) => budget = fresh,
                Err(e) => self.page_failed(e, &mut failures).await?,
            }
        }
    }

    /// Applies the page-level fault policy to a failed quota or page request
    ///
    /// Returns `Ok` if the same page should be attempted again.
    async fn page_failed(
        &mut self,
        error: ProviderError,
        failures: &mut u32,
    ) -> Result<(), HarvestError> {
        if !error.is_retryable() {
            return Err(error.into());
        }

        *failures += 1;
        let max = self.config.crawler.max_page_retries;
        if *failures > max {
            return Err(HarvestError::RetriesExhausted {
                attempts: *failures,
                source: error,
            });
        }

        tracing::warn!("Page request failed (attempt {}/{}): {}", failures, max + 1, error);
        self.pause(self.config.crawler.pacing()).await;
        Ok(())
    }

    /// Sleeps for `duration`, returning early if a stop is requested
    ///
    /// Returns true if the sleep was cut short by a stop request.
    async fn pause(&mut self, duration: Duration) -> bool {
        if self.stop.is_stopped() {
            return true;
        }

        let rx = &mut self.stop_rx;
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = stop_requested(rx) => true,
        }
    }

    fn transition(&mut self, next: CrawlState) -> Result<(), HarvestError> {
        if !self.state.can_transition_to(next) {
            return Err(HarvestError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!("State {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn record_outcome(&mut self, status: RunStatus, report: &CrawlReport, error: Option<String>) {
        let summary = report.summary(error);
        if let Err(e) = self.ledger.finish_run(report.run_id, status, &summary) {
            tracing::warn!("Failed to record outcome of run {}: {}", report.run_id, e);
        }
    }
}

async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        // Sender dropped, no stop can arrive
        std::future::pending::<()>().await;
    }
}

/// Runs a single crawl to completion with the file checkpoint store
///
/// # Example
///
/// ```no_run
/// use roster_harvest::config::load_config;
/// use roster_harvest::crawler::run_crawl;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("harvest.toml"))?;
/// let report = run_crawl(config).await?;
/// println!("{} records", report.records);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(config: Config) -> Result<CrawlReport, HarvestError> {
    let mut coordinator = Coordinator::new(config)?;
    coordinator.run().await
}
