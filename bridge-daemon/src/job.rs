//! Recurring jobs and the local supervisor.
//!
//! A [`RecurringJob`] is one pass of a pipeline. The [`Supervisor`] runs every
//! job in its own task, one pass at a time, on the job's [`Schedule`].
//! Cancellation is checked between passes only.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use bridge_core::Store;
use bridge_sync::{pipeline, LedgerClient, PassContext, UpdateSource, WriterSettings};

use crate::error::{join_err, DaemonError};
use crate::reconcile::BlockStreamConsumer;
use crate::schedule::{Schedule, Ticker};

#[async_trait]
pub trait RecurringJob: Send + Sync {
    fn name(&self) -> &'static str;

    fn schedule(&self) -> Schedule;

    /// Run one pass.
    async fn run(&self, cancel: &CancellationToken) -> Result<(), DaemonError>;
}

// ---------------------------------------------------------------------------
// 1. Fact sync job
// ---------------------------------------------------------------------------

/// Local store sync followed by fact writes.
pub struct FactSyncJob {
    pub store: Store,
    pub source: Arc<dyn UpdateSource>,
    pub ledger: Arc<dyn LedgerClient>,
    pub settings: Arc<WriterSettings>,
    pub schedule: Schedule,
}

#[async_trait]
impl RecurringJob for FactSyncJob {
    fn name(&self) -> &'static str {
        "fact_sync"
    }

    fn schedule(&self) -> Schedule {
        self.schedule
    }

    async fn run(&self, _cancel: &CancellationToken) -> Result<(), DaemonError> {
        let store = self.store.clone();
        let source = self.source.clone();
        let ledger = self.ledger.clone();
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || {
            pipeline::run(PassContext {
                store: &store,
                source: source.as_ref(),
                ledger: ledger.as_ref(),
                settings: settings.as_ref(),
            })
        })
        .await
        .map_err(|e| join_err("fact pass", e))??;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 2. Block reconcile job
// ---------------------------------------------------------------------------

pub struct BlockReconcileJob {
    pub consumer: BlockStreamConsumer,
    pub schedule: Schedule,
}

#[async_trait]
impl RecurringJob for BlockReconcileJob {
    fn name(&self) -> &'static str {
        "block_reconcile"
    }

    fn schedule(&self) -> Schedule {
        self.schedule
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<(), DaemonError> {
        self.consumer.run(cancel.clone()).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 3. Supervisor
// ---------------------------------------------------------------------------

/// Runs exactly one loop per registered job.
#[derive(Default)]
pub struct Supervisor {
    jobs: Vec<Arc<dyn RecurringJob>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(mut self, job: Arc<dyn RecurringJob>) -> Self {
        self.jobs.push(job);
        self
    }

    /// Run all jobs until `cancel` fires or one of them fails fatally, in
    /// which case the others are cancelled and the error returned.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DaemonError> {
        let handles: Vec<_> = self
            .jobs
            .into_iter()
            .map(|job| {
                let cancel = cancel.clone();
                let name = job.name();
                let handle = tokio::spawn(async move {
                    let result = run_recurring(job, cancel.clone()).await;
                    if result.is_err() {
                        cancel.cancel();
                    }
                    result
                });
                (name, handle)
            })
            .collect();

        let mut first_error = None;
        for (name, handle) in handles {
            let result = match handle.await {
                Ok(inner) => inner,
                Err(err) => {
                    cancel.cancel();
                    Err(join_err(name, err))
                }
            };
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Drive `job` on its schedule until cancelled. Non-fatal pass errors are
/// logged and retried at the next slot.
pub async fn run_recurring(
    job: Arc<dyn RecurringJob>,
    cancel: CancellationToken,
) -> Result<(), DaemonError> {
    let name = job.name();
    let mut ticker = Ticker::new(job.schedule());
    tracing::info!(job = name, "job scheduled");

    while ticker.tick(&cancel).await {
        match job.run(&cancel).await {
            Ok(()) => tracing::debug!(job = name, "pass finished"),
            Err(err) if err.is_fatal() => {
                tracing::error!(job = name, error = %err, "fatal error, stopping");
                return Err(err);
            }
            Err(err) => tracing::error!(job = name, error = %err, "pass failed, retrying at next slot"),
        }
        if cancel.is_cancelled() {
            break;
        }
        ticker.rearm();
    }

    tracing::info!(job = name, "job stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bridge_core::StoreError;

    use super::*;

    struct CountingJob {
        runs: AtomicUsize,
        cancel_after: usize,
        fail_with: fn() -> Option<DaemonError>,
    }

    impl CountingJob {
        fn new(cancel_after: usize, fail_with: fn() -> Option<DaemonError>) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                cancel_after,
                fail_with,
            })
        }
    }

    #[async_trait]
    impl RecurringJob for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn schedule(&self) -> Schedule {
            Schedule::new(Duration::from_secs(60), Duration::from_secs(30))
        }

        async fn run(&self, cancel: &CancellationToken) -> Result<(), DaemonError> {
            let runs = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if runs >= self.cancel_after {
                cancel.cancel();
            }
            match (self.fail_with)() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    fn no_error() -> Option<DaemonError> {
        None
    }

    fn transient() -> Option<DaemonError> {
        Some(DaemonError::BlockSource("connection reset".to_string()))
    }

    fn fatal() -> Option<DaemonError> {
        Some(DaemonError::Store(StoreError::MissingInsertId {
            hash: "0xabc".to_string(),
        }))
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn passes_repeat_until_cancelled() {
        let job = CountingJob::new(3, no_error);
        run_recurring(job.clone(), CancellationToken::new())
            .await
            .expect("job loop");
        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn transient_errors_are_retried() {
        let job = CountingJob::new(2, transient);
        run_recurring(job.clone(), CancellationToken::new())
            .await
            .expect("transient errors do not end the loop");
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn fatal_error_ends_supervisor() {
        let failing = CountingJob::new(usize::MAX, fatal);
        let idle = CountingJob::new(usize::MAX, no_error);
        let cancel = CancellationToken::new();

        let err = Supervisor::new()
            .with_job(failing.clone())
            .with_job(idle)
            .run(cancel.clone())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(failing.runs.load(Ordering::SeqCst), 1);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn cancelled_before_first_slot_runs_nothing() {
        let job = CountingJob::new(1, no_error);
        let cancel = CancellationToken::new();
        cancel.cancel();
        Supervisor::new()
            .with_job(job.clone())
            .run(cancel)
            .await
            .expect("supervisor");
        assert_eq!(job.runs.load(Ordering::SeqCst), 0);
    }
}
