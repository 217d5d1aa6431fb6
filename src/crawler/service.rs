//! In-process crawl service
//!
//! Decouples "start" from "completed": [`CrawlService::start`] spawns the
//! coordinator on the tokio runtime and returns as soon as the crawl is
//! accepted. Completion is observed with [`CrawlService::wait`], progress
//! with [`CrawlService::status`].

use crate::config::{validate, Config};
use crate::crawler::coordinator::{Coordinator, CrawlReport, StopSignal};
use crate::output::{load_status, CrawlStatus};
use crate::HarvestError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

/// A crawl running on the tokio runtime
pub struct CrawlHandle {
    stop: StopSignal,
    task: JoinHandle<Result<CrawlReport, HarvestError>>,
}

impl CrawlHandle {
    /// Spawns `coordinator`, keeping `guard` alive until the run ends
    ///
    /// Must be called from within a tokio runtime.
    fn spawn<G: Send + 'static>(mut coordinator: Coordinator, guard: G) -> Self {
        let stop = coordinator.stop_signal();
        let task = tokio::spawn(async move {
            let _guard = guard;
            coordinator.run().await
        });
        Self { stop, task }
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Waits for the crawl to end
    pub async fn wait(self) -> Result<CrawlReport, HarvestError> {
        self.task
            .await
            .map_err(|e| HarvestError::TaskFailed(e.to_string()))?
    }
}

/// Clears the running flag when the crawl task ends, however it ends
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Start/stop/status front for one crawl configuration
///
/// At most one crawl started through a service is in flight at a time.
/// Separate processes sharing a checkpoint path are not coordinated.
pub struct CrawlService {
    config: Arc<Config>,
    running: Arc<AtomicBool>,
    active: Mutex<Option<CrawlHandle>>,
    signal: Mutex<Option<StopSignal>>,
}

impl CrawlService {
    /// Creates a service; the configuration is validated up front
    pub fn new(config: Config) -> Result<Self, HarvestError> {
        validate(&config)?;
        Ok(Self {
            config: Arc::new(config),
            running: Arc::new(AtomicBool::new(false)),
            active: Mutex::new(None),
            signal: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts a crawl in the background
    ///
    /// Returns once the crawl is accepted. Fails with
    /// [`HarvestError::AlreadyRunning`] while a previous crawl is in flight,
    /// without touching any state.
    pub fn start(&self) -> Result<(), HarvestError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(HarvestError::AlreadyRunning);
        }
        let guard = RunningGuard(Arc::clone(&self.running));

        let coordinator = Coordinator::new(Config::clone(&self.config))?;
        let handle = CrawlHandle::spawn(coordinator, guard);

        *lock(&self.signal) = Some(handle.stop_signal());
        *lock(&self.active) = Some(handle);

        tracing::info!("Crawl accepted");
        Ok(())
    }

    /// Requests the running crawl to stop at its next page boundary
    ///
    /// Returns false if no crawl has been started.
    pub fn stop(&self) -> bool {
        match lock(&self.signal).as_ref() {
            Some(signal) => {
                signal.stop();
                true
            }
            None => false,
        }
    }

    pub fn stop_signal(&self) -> Option<StopSignal> {
        lock(&self.signal).clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Waits for the most recently started crawl
    ///
    /// Returns `None` if there is nothing to wait for (never started, or
    /// already waited on).
    pub async fn wait(&self) -> Option<Result<CrawlReport, HarvestError>> {
        let handle = lock(&self.active).take()?;
        Some(handle.wait().await)
    }

    /// Durable progress, read from disk
    pub fn status(&self) -> Result<CrawlStatus, HarvestError> {
        load_status(&self.config)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
