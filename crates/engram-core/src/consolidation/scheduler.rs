//! Consolidation Scheduler
//!
//! Cron-gated background consolidation with a synchronous manual trigger,
//! exponential-backoff retry, load-threshold suppression, and live progress
//! for the health monitor. At most one job runs per process; the manual
//! trigger fails fast instead of queueing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::storage::{MemoryStore, StoreError};

use super::cron::CronSchedule;
use super::engine::{
    ConsolidationConfig, ConsolidationEngine, ConsolidationError, ConsolidationRunReport,
};
use super::progress::{ConsolidationPhase, ConsolidationProgress, ProgressTracker};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Scheduler error type
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A job is already running; the trigger fails fast
    #[error("A consolidation job is already in progress")]
    JobInProgress,
    /// Every retry attempt failed
    #[error("Consolidation failed after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },
    /// System load is above the configured ceiling
    #[error("System load {load:.2} exceeds threshold {max:.2}")]
    LoadThresholdExceeded { load: f64, max: f64 },
    /// Batch size must be at least 1
    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(usize),
    /// Unparseable cron expression
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::JobInProgress => "JOB_IN_PROGRESS",
            SchedulerError::MaxRetriesExceeded { .. } => "MAX_RETRIES_EXCEEDED",
            SchedulerError::LoadThresholdExceeded { .. } => "LOAD_THRESHOLD_EXCEEDED",
            SchedulerError::InvalidBatchSize(_) => "VALIDATION_ERROR",
            SchedulerError::InvalidCron(_) => "VALIDATION_ERROR",
        }
    }
}

// ============================================================================
// SEAMS
// ============================================================================

/// Supplies the users a scheduled run iterates. The scheduler assumes
/// nothing beyond "iterable".
pub trait UserSource: Send + Sync {
    fn user_ids(&self) -> Result<Vec<String>, StoreError>;
}

impl UserSource for MemoryStore {
    fn user_ids(&self) -> Result<Vec<String>, StoreError> {
        self.distinct_user_ids()
    }
}

/// Runs one consolidation pass. The engine is the production
/// implementation; tests inject doubles.
#[async_trait]
pub trait ConsolidationRunner: Send + Sync {
    async fn run(
        &self,
        user_id: &str,
        config: &ConsolidationConfig,
        progress: &ProgressTracker,
    ) -> Result<ConsolidationRunReport, ConsolidationError>;
}

#[async_trait]
impl ConsolidationRunner for ConsolidationEngine {
    async fn run(
        &self,
        user_id: &str,
        config: &ConsolidationConfig,
        progress: &ProgressTracker,
    ) -> Result<ConsolidationRunReport, ConsolidationError> {
        self.run_consolidation(user_id, config, Some(progress)).await
    }
}

/// System load probe in [0,1]; a weighted mix of process memory and CPU.
/// Callers must tolerate a stubbed 0 during tests.
pub type LoadProbe = Arc<dyn Fn() -> f64 + Send + Sync>;

// ============================================================================
// CONFIG
// ============================================================================

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Five-field cron expression for scheduled runs
    pub cron_expression: String,
    /// Master switch; `start` is a no-op when disabled
    pub enabled: bool,
    /// Scheduled runs are suppressed above this load, in [0,1]
    pub max_system_load: f64,
    /// Consolidation tuning for each run
    pub consolidation: ConsolidationConfig,
    /// Retries after the first failed attempt
    pub max_retry_attempts: u32,
    /// Backoff base; attempt n sleeps `base * 2^n`
    pub base_retry_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cron_expression: "0 3 * * *".to_string(),
            enabled: true,
            max_system_load: 0.8,
            consolidation: ConsolidationConfig::default(),
            max_retry_attempts: 3,
            base_retry_delay: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Background consolidation driver.
pub struct ConsolidationScheduler {
    runner: Arc<dyn ConsolidationRunner>,
    users: Arc<dyn UserSource>,
    load_probe: LoadProbe,
    clock: Arc<dyn Clock>,
    config: Mutex<SchedulerConfig>,
    cron: Mutex<CronSchedule>,
    next_due: Mutex<Option<DateTime<Utc>>>,
    job_lock: tokio::sync::Mutex<()>,
    progress: Arc<ProgressTracker>,
    last_run_at: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConsolidationScheduler {
    pub fn new(
        runner: Arc<dyn ConsolidationRunner>,
        users: Arc<dyn UserSource>,
        load_probe: LoadProbe,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        let cron = CronSchedule::parse(&config.cron_expression)
            .map_err(SchedulerError::InvalidCron)?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            runner,
            users,
            load_probe,
            clock,
            config: Mutex::new(config),
            cron: Mutex::new(cron),
            next_due: Mutex::new(None),
            job_lock: tokio::sync::Mutex::new(()),
            progress: Arc::new(ProgressTracker::new()),
            last_run_at: Mutex::new(None),
            last_error: Mutex::new(None),
            tick_handle: Mutex::new(None),
            shutdown_tx,
        })
    }

    /// Start the one-minute tick loop. Idempotent; a no-op when disabled.
    pub fn start(self: &Arc<Self>) {
        if !self.config.lock().expect("config lock poisoned").enabled {
            tracing::info!("consolidation scheduler disabled");
            return;
        }

        let mut handle = self.tick_handle.lock().expect("tick lock poisoned");
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let scheduler = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        *handle = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tick.tick() => scheduler.run_scheduled_if_due().await,
                }
            }
        }));
        tracing::info!("consolidation scheduler started");
    }

    /// Stop the tick loop and wait for any in-flight job.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.tick_handle.lock().expect("tick lock poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        // Waits until the current job (if any) releases the lock
        let _guard = self.job_lock.lock().await;
        tracing::info!("consolidation scheduler stopped");
    }

    /// Run consolidation for one user right now, with retry. Fails fast with
    /// `JobInProgress` when a job is already running and with
    /// `LoadThresholdExceeded` above the load ceiling.
    pub async fn trigger_now(
        &self,
        user_id: &str,
    ) -> Result<ConsolidationRunReport, SchedulerError> {
        let _guard = self
            .job_lock
            .try_lock()
            .map_err(|_| SchedulerError::JobInProgress)?;

        let max_load = self.config.lock().expect("config lock poisoned").max_system_load;
        let load = (self.load_probe)();
        if load > max_load {
            self.record_error(format!("Load {load:.2} above threshold {max_load:.2}"));
            return Err(SchedulerError::LoadThresholdExceeded {
                load,
                max: max_load,
            });
        }

        self.run_with_retry(user_id).await
    }

    /// One scheduler tick: skip when busy, not yet due, or under high load;
    /// otherwise consolidate every supplied user.
    pub async fn run_scheduled_if_due(&self) {
        let Ok(_guard) = self.job_lock.try_lock() else {
            return;
        };

        let now = self.clock.now();
        {
            let mut next_due = self.next_due.lock().expect("next_due lock poisoned");
            match *next_due {
                None => {
                    let due = self.cron.lock().expect("cron lock poisoned").next_after(now);
                    *next_due = Some(due);
                    return;
                }
                Some(due) if now < due => return,
                Some(_) => {}
            }
        }

        let max_load = self.config.lock().expect("config lock poisoned").max_system_load;
        let load = (self.load_probe)();
        if load > max_load {
            self.record_error("Skipped due to high system load".to_string());
            tracing::warn!(load, max_load, "scheduled consolidation suppressed");
            return;
        }

        let users = match self.users.user_ids() {
            Ok(users) => users,
            Err(e) => {
                self.record_error(format!("user listing failed: {e}"));
                return;
            }
        };

        for user_id in users {
            if let Err(e) = self.run_with_retry(&user_id).await {
                tracing::warn!(user_id = %user_id, error = %e, "scheduled consolidation failed");
            }
        }

        let now = self.clock.now();
        let due = self.cron.lock().expect("cron lock poisoned").next_after(now);
        *self.next_due.lock().expect("next_due lock poisoned") = Some(due);
    }

    /// Run with exponential backoff: attempt `n` sleeps `base * 2^n` before
    /// the next try; exhaustion surfaces `MaxRetriesExceeded` with the total
    /// attempt count.
    async fn run_with_retry(
        &self,
        user_id: &str,
    ) -> Result<ConsolidationRunReport, SchedulerError> {
        let (max_attempts, base_delay, consolidation) = {
            let config = self.config.lock().expect("config lock poisoned");
            (
                config.max_retry_attempts,
                config.base_retry_delay,
                config.consolidation,
            )
        };

        let mut attempt: u32 = 0;
        loop {
            self.progress.begin(self.clock.now());
            match self.runner.run(user_id, &consolidation, &self.progress).await {
                Ok(report) => {
                    self.progress.set_phase(ConsolidationPhase::Complete);
                    *self.last_run_at.lock().expect("last_run lock poisoned") =
                        Some(self.clock.now());
                    *self.last_error.lock().expect("last_error lock poisoned") = None;
                    tracing::info!(
                        user_id,
                        clusters = report.clusters_consolidated,
                        memories = report.memories_consolidated,
                        "consolidation run complete"
                    );
                    return Ok(report);
                }
                Err(e) => {
                    self.record_error(e.to_string());
                    if attempt < max_attempts {
                        let delay = base_delay * 2u32.pow(attempt);
                        tracing::warn!(
                            user_id,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "consolidation attempt failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    } else {
                        self.progress.set_phase(ConsolidationPhase::Complete);
                        return Err(SchedulerError::MaxRetriesExceeded {
                            attempts: attempt + 1,
                        });
                    }
                }
            }
        }
    }

    /// Update the per-run batch size at runtime.
    pub fn set_batch_size(&self, batch_size: usize) -> Result<(), SchedulerError> {
        if batch_size < 1 {
            return Err(SchedulerError::InvalidBatchSize(batch_size));
        }
        self.config
            .lock()
            .expect("config lock poisoned")
            .consolidation
            .batch_size = batch_size;
        Ok(())
    }

    /// Live progress snapshot for the health monitor.
    pub fn progress(&self) -> ConsolidationProgress {
        self.progress.snapshot(self.clock.now())
    }

    /// Whether a job currently holds the run lock.
    pub fn is_running(&self) -> bool {
        self.job_lock.try_lock().is_err()
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        *self.last_run_at.lock().expect("last_run lock poisoned")
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().expect("last_error lock poisoned").clone()
    }

    fn record_error(&self, message: String) {
        *self.last_error.lock().expect("last_error lock poisoned") = Some(message);
    }
}
