//! Offer expiration scheduler.
//!
//! Every issued offer has a persisted expiration job firing at exactly its
//! `offer_expires_at`. The scheduler keeps the known jobs in a deadline-ordered
//! queue and hands due ones to an [`ExpirationHandler`]. Jobs survive restarts:
//! [`ExpirationScheduler::recover`] reloads every uncompleted job on start, and
//! a periodic sweep pulls due jobs from the store so work persisted by another
//! instance (or a failed fire) is picked up within one tick.
//!
//! Jobs are never cancelled. A job whose entry is no longer offered fires and
//! no-ops.

use admission_core::environment::Clock;
use admission_core::error::AdmissionResult;
use admission_core::store::AdmissionStore;
use admission_core::types::{EntryId, ExpirationJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

/// Applies an expiration when its deadline passes.
#[async_trait]
pub trait ExpirationHandler: Send + Sync {
    /// Expires the job's offer (no-op if it is no longer offered).
    ///
    /// # Errors
    ///
    /// Returns the store error; the job stays pending and is retried by the
    /// next sweep.
    async fn handle_expiration(&self, job: &ExpirationJob) -> AdmissionResult<()>;
}

/// Cheap handle used to register freshly persisted jobs with a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    sender: mpsc::UnboundedSender<ExpirationJob>,
}

impl SchedulerHandle {
    /// Registers a job. If the scheduler is gone the job is still in the store
    /// and will be recovered.
    pub fn schedule(&self, job: ExpirationJob) {
        if let Err(error) = self.sender.send(job) {
            tracing::debug!(
                entry_id = %error.0.entry_id,
                "Scheduler not running, job left for the recovery sweep"
            );
        }
    }
}

/// Deadline-ordered expiration queue and its run loop.
pub struct ExpirationScheduler {
    receiver: mpsc::UnboundedReceiver<ExpirationJob>,
    queue: BTreeMap<(DateTime<Utc>, EntryId), ExpirationJob>,
    store: Arc<dyn AdmissionStore>,
    handler: Arc<dyn ExpirationHandler>,
    clock: Arc<dyn Clock>,
    sweep_interval: Duration,
    sweep_batch: usize,
}

impl ExpirationScheduler {
    /// Creates the handle/receiver pair linking producers to the scheduler.
    #[must_use]
    pub fn channel() -> (SchedulerHandle, mpsc::UnboundedReceiver<ExpirationJob>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (SchedulerHandle { sender }, receiver)
    }

    /// Creates a scheduler consuming `receiver`.
    #[must_use]
    pub fn new(
        receiver: mpsc::UnboundedReceiver<ExpirationJob>,
        store: Arc<dyn AdmissionStore>,
        handler: Arc<dyn ExpirationHandler>,
        clock: Arc<dyn Clock>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            receiver,
            queue: BTreeMap::new(),
            store,
            handler,
            clock,
            sweep_interval,
            sweep_batch: 500,
        }
    }

    /// Number of jobs waiting in memory.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    fn enqueue(&mut self, job: ExpirationJob) {
        self.queue.insert((job.fire_at, job.entry_id), job);
    }

    /// Moves every job sent through a [`SchedulerHandle`] into the queue.
    pub fn drain_inbox(&mut self) {
        while let Ok(job) = self.receiver.try_recv() {
            self.enqueue(job);
        }
    }

    /// Loads every uncompleted job from the store. Overdue jobs fire on the
    /// next [`ExpirationScheduler::fire_due`].
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn recover(&mut self) -> AdmissionResult<usize> {
        let jobs = self.store.pending_expirations().await?;
        let count = jobs.len();
        for job in jobs {
            self.enqueue(job);
        }
        tracing::info!(jobs = count, "Recovered pending offer expirations");
        Ok(count)
    }

    /// Pulls due jobs from the store into the queue.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn sweep(&mut self) -> AdmissionResult<usize> {
        let jobs = self
            .store
            .due_expirations(self.clock.now(), self.sweep_batch)
            .await?;
        let count = jobs.len();
        for job in jobs {
            self.enqueue(job);
        }
        Ok(count)
    }

    /// Fires every queued job whose deadline has passed. Returns how many fired.
    pub async fn fire_due(&mut self) -> usize {
        let now = self.clock.now();
        let mut fired = 0;

        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let job = entry.remove();

            match self.handler.handle_expiration(&job).await {
                Ok(()) => fired += 1,
                Err(error) => {
                    tracing::warn!(
                        entry_id = %job.entry_id,
                        event_id = %job.event_id,
                        %error,
                        "Offer expiration failed, will retry on next sweep"
                    );
                    metrics::counter!("admission_expirations_failed_total").increment(1);
                }
            }
        }

        fired
    }

    /// One scheduler iteration: inbox, store sweep, due jobs.
    pub async fn tick(&mut self) -> usize {
        self.drain_inbox();
        if let Err(error) = self.sweep().await {
            tracing::error!(%error, "Expiration sweep failed");
        }
        self.fire_due().await
    }

    fn time_until_next(&self) -> Duration {
        self.queue
            .keys()
            .next()
            .map_or(self.sweep_interval, |(fire_at, _)| {
                (*fire_at - self.clock.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(self.sweep_interval)
            })
    }

    /// Runs until `shutdown` fires or every handle is dropped.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if let Err(error) = self.recover().await {
            tracing::error!(%error, "Failed to recover pending expirations");
        }

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            sweep_interval_ms = u64::try_from(self.sweep_interval.as_millis()).unwrap_or(u64::MAX),
            "Expiration scheduler started"
        );

        loop {
            let wait = self.time_until_next();

            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(pending = self.queue.len(), "Expiration scheduler shutting down");
                    break;
                }
                job = self.receiver.recv() => {
                    if let Some(job) = job {
                        self.enqueue(job);
                    } else {
                        tracing::info!("All scheduler handles dropped, stopping");
                        break;
                    }
                }
                _ = sweep.tick() => {
                    self.tick().await;
                }
                () = tokio::time::sleep(wait) => {
                    self.fire_due().await;
                }
            }
        }
    }
}
