//! Backup coordination and the periodic background tasks.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use folder_kernel_core::ErrorReporter;
use folder_kernel_store_sqlite::{BackupEngine, BackupType, RecordStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::rate_limit::RateLimiter;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackupStats {
    pub total_attempts: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped_unchanged: u64,
    pub skipped_in_flight: u64,
    pub success_rate: f64,
    pub last_backup_at: Option<String>,
}

impl BackupStats {
    fn record_attempt(&mut self, succeeded: bool) {
        self.total_attempts += 1;
        if succeeded {
            self.successful += 1;
            self.last_backup_at = Some(folder_kernel_core::now_rfc3339());
        } else {
            self.failed += 1;
        }
        #[allow(clippy::cast_precision_loss)]
        let attempts = self.total_attempts as f64;
        let outcome = if succeeded { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * (attempts - 1.0) + outcome) / attempts;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AutoBackupOutcome {
    Created { backup_id: i64 },
    SkippedUnchanged,
    SkippedInFlight,
    Failed { error: String },
}

impl fmt::Display for AutoBackupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created { backup_id } => write!(f, "created backup {backup_id}"),
            Self::SkippedUnchanged => f.write_str("skipped (no changes)"),
            Self::SkippedInFlight => f.write_str("skipped (backup in flight)"),
            Self::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// Serializes backup creation and keeps the running statistics. Shared between
/// the kernel handle and the scheduler task.
pub struct BackupCoordinator {
    store: Arc<Mutex<RecordStore>>,
    engine: BackupEngine,
    in_flight: AtomicBool,
    stats: Mutex<BackupStats>,
    reporter: Arc<dyn ErrorReporter>,
}

impl fmt::Debug for BackupCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupCoordinator")
            .field("engine", &self.engine)
            .field("in_flight", &self.in_flight.load(Ordering::Acquire))
            .field("stats", &*self.stats.lock())
            .finish_non_exhaustive()
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).ok().map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BackupCoordinator {
    #[must_use]
    pub fn new(store: Arc<Mutex<RecordStore>>, engine: BackupEngine, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            store,
            engine,
            in_flight: AtomicBool::new(false),
            stats: Mutex::new(BackupStats::default()),
            reporter,
        }
    }

    #[must_use]
    pub fn engine(&self) -> BackupEngine {
        self.engine
    }

    #[must_use]
    pub fn stats(&self) -> BackupStats {
        self.stats.lock().clone()
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Create a manual backup, ignoring change detection.
    ///
    /// # Errors
    /// Returns an error when another backup is in flight or the store write fails.
    pub fn create_manual_backup(&self, description: Option<&str>) -> Result<i64> {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            bail!("a backup is already in progress");
        };
        let result = self.engine.create_backup(&mut self.store.lock(), BackupType::Manual, description);
        self.stats.lock().record_attempt(result.is_ok());
        match &result {
            Ok(id) => tracing::info!(backup_id = id, "manual backup created"),
            Err(err) => self.reporter.report_warning(&format!("manual backup failed: {err:#}")),
        }
        result
    }

    /// One automatic backup run. Never fails; the outcome says what happened.
    pub fn run_auto_backup(&self) -> AutoBackupOutcome {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            self.stats.lock().skipped_in_flight += 1;
            tracing::info!("automatic backup skipped; another backup is in flight");
            return AutoBackupOutcome::SkippedInFlight;
        };

        let mut store = self.store.lock();
        let result = self.engine.should_create_backup(&store).and_then(|changed| {
            if changed {
                self.engine.create_backup(&mut store, BackupType::Auto, Some("automatic backup")).map(Some)
            } else {
                Ok(None)
            }
        });
        drop(store);

        let mut stats = self.stats.lock();
        match result {
            Ok(Some(backup_id)) => {
                stats.record_attempt(true);
                tracing::info!(backup_id, "automatic backup created");
                AutoBackupOutcome::Created { backup_id }
            }
            Ok(None) => {
                stats.skipped_unchanged += 1;
                tracing::debug!("automatic backup skipped; no changes since the last backup");
                AutoBackupOutcome::SkippedUnchanged
            }
            Err(err) => {
                stats.record_attempt(false);
                drop(stats);
                let error = format!("{err:#}");
                self.reporter.report_warning(&format!("automatic backup failed: {error}"));
                AutoBackupOutcome::Failed { error }
            }
        }
    }
}

/// A tokio task that runs a blocking job on a fixed interval until shut down.
/// The first run happens one full interval after spawning.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(name: &'static str, every: Duration, job: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);
        let job = Arc::new(job);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracing::debug!(task = name, "periodic task tick");
                        let job = Arc::clone(&job);
                        if let Err(err) = tokio::task::spawn_blocking(move || (*job)()).await {
                            tracing::error!(task = name, error = %err, "periodic task panicked");
                        }
                    }
                    () = signal.notified() => break,
                }
            }
            tracing::debug!(task = name, "periodic task stopped");
        });
        Self { name, shutdown, handle }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop ticking and wait for a running job to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.handle.await {
            tracing::error!(task = self.name, error = %err, "periodic task did not stop cleanly");
        }
    }
}

/// Automatic backups every `interval` through a shared [`BackupCoordinator`].
#[derive(Debug)]
pub struct AutoBackupScheduler {
    coordinator: Arc<BackupCoordinator>,
    task: PeriodicTask,
}

impl AutoBackupScheduler {
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(coordinator: Arc<BackupCoordinator>, interval: Duration) -> Self {
        tracing::info!(interval_secs = interval.as_secs(), "auto-backup scheduler started");
        let shared = Arc::clone(&coordinator);
        let task = PeriodicTask::spawn("auto-backup", interval, move || {
            let outcome = shared.run_auto_backup();
            tracing::debug!(%outcome, "auto-backup tick finished");
        });
        Self { coordinator, task }
    }

    #[must_use]
    pub fn stats(&self) -> BackupStats {
        self.coordinator.stats()
    }

    pub async fn shutdown(self) {
        self.task.shutdown().await;
        tracing::info!("auto-backup scheduler stopped");
    }
}

/// Periodic [`RateLimiter::cleanup`], independent of the backup scheduler.
#[must_use]
pub fn spawn_rate_limit_cleanup(limiter: Arc<RateLimiter>, every: Duration) -> PeriodicTask {
    PeriodicTask::spawn("rate-limit-cleanup", every, move || limiter.cleanup())
}

#[cfg(test)]
mod tests {
    use folder_kernel_core::MemoryReporter;
    use folder_kernel_store_sqlite::Table;
    use serde_json::json;

    use super::*;

    fn coordinator(reporter: Arc<MemoryReporter>) -> Result<Arc<BackupCoordinator>> {
        let mut store = RecordStore::open_in_memory()?;
        store.initialize()?;
        store.create(Table::Folders, json!({"id": "a", "name": "Finance"}))?;
        Ok(Arc::new(BackupCoordinator::new(Arc::new(Mutex::new(store)), BackupEngine::default(), reporter)))
    }

    #[test]
    fn auto_run_skips_when_nothing_changed() -> Result<()> {
        let coordinator = coordinator(Arc::new(MemoryReporter::default()))?;
        assert!(matches!(coordinator.run_auto_backup(), AutoBackupOutcome::Created { .. }));
        assert_eq!(coordinator.run_auto_backup(), AutoBackupOutcome::SkippedUnchanged);

        let stats = coordinator.stats();
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.skipped_unchanged, 1);
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
        assert!(stats.last_backup_at.is_some());
        Ok(())
    }

    #[test]
    fn manual_backup_bypasses_change_detection() -> Result<()> {
        let coordinator = coordinator(Arc::new(MemoryReporter::default()))?;
        coordinator.create_manual_backup(Some("first"))?;
        coordinator.create_manual_backup(Some("second"))?;
        assert_eq!(coordinator.stats().successful, 2);
        Ok(())
    }

    #[test]
    fn in_flight_guard_skips_concurrent_auto_runs() -> Result<()> {
        let coordinator = coordinator(Arc::new(MemoryReporter::default()))?;
        let guard = InFlight::acquire(&coordinator.in_flight);
        assert!(guard.is_some());
        assert_eq!(coordinator.run_auto_backup(), AutoBackupOutcome::SkippedInFlight);
        assert!(coordinator.create_manual_backup(None).is_err());
        drop(guard);

        assert!(!coordinator.is_in_flight());
        assert_eq!(coordinator.stats().skipped_in_flight, 1);
        assert!(matches!(coordinator.run_auto_backup(), AutoBackupOutcome::Created { .. }));
        Ok(())
    }

    #[test]
    fn failures_lower_the_success_rate_and_are_reported() -> Result<()> {
        let reporter = Arc::new(MemoryReporter::default());
        let coordinator = coordinator(Arc::clone(&reporter))?;
        coordinator.create_manual_backup(None)?;
        coordinator.store.lock().close()?;

        assert!(matches!(coordinator.run_auto_backup(), AutoBackupOutcome::Failed { .. }));
        let stats = coordinator.stats();
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(reporter.warning_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn scheduler_runs_on_its_interval_until_shut_down() -> Result<()> {
        let coordinator = coordinator(Arc::new(MemoryReporter::default()))?;
        let scheduler = AutoBackupScheduler::spawn(Arc::clone(&coordinator), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(250)).await;
        scheduler.shutdown().await;

        let stats = coordinator.stats();
        assert_eq!(stats.successful, 1);
        assert!(stats.skipped_unchanged >= 1, "{stats:?}");

        let settled = coordinator.stats();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.stats(), settled);
        Ok(())
    }

    #[tokio::test]
    async fn cleanup_task_forgets_expired_calls() {
        let config = crate::config::RateLimitConfig {
            import: crate::rate_limit::Quota::new(3, 0),
            ..crate::config::RateLimitConfig::default()
        };
        let limiter = Arc::new(RateLimiter::new(&config));
        assert!(limiter.check(crate::rate_limit::OperationKind::Import).is_ok());

        let task = spawn_rate_limit_cleanup(Arc::clone(&limiter), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.shutdown().await;
        assert_eq!(limiter.in_window(crate::rate_limit::OperationKind::Import), 0);
    }
}
