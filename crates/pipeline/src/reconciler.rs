//! Status reconciler.
//!
//! [`Reconciler::poll`] asks the owning backend about one handle and
//! never writes anything. The driving loop ([`Reconciler::run`]) keeps the
//! set of outstanding handles, polls every due handle concurrently on a
//! fixed interval, and removes a handle the moment it resolves. Each poll
//! result is applied as soon as it arrives, so one slow backend never
//! holds back status delivery for the others.
//!
//! Dead-backend policy: a transport failure (unreachable, timed out)
//! postpones the next poll of that handle with exponential backoff; after
//! `max_transport_failures` consecutive failures the handle resolves to
//! an error. Rejections and malformed responses resolve immediately, and
//! so does a handle that stays pending past `pending_timeout`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use atelier_comfyui::backoff::{delay_after, BackoffConfig};
use atelier_comfyui::history::HistoryStatus;
use atelier_comfyui::registry::BackendRegistry;
use atelier_core::job::{JobHandle, JobKey, JobState};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{broadcast, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::events::{JobEvent, EVENT_CHANNEL_CAPACITY};
use crate::status::JobStatus;
use crate::store::{JobStore, JobUpdate};

/// Default interval between sweeps.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of consecutive transport failures before giving up.
pub const DEFAULT_MAX_TRANSPORT_FAILURES: u32 = 5;

/// Default limit on how long a job may stay pending.
pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub poll_interval: Duration,
    pub max_transport_failures: u32,
    pub pending_timeout: Duration,
    /// Spacing of polls after transport failures.
    pub backoff: BackoffConfig,
}

impl ReconcilerConfig {
    /// Backoff starting at `poll_interval`, doubling, capped at 30 s.
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            backoff: BackoffConfig {
                initial_delay: poll_interval,
                ..BackoffConfig::default()
            },
            ..Self::default()
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_transport_failures: DEFAULT_MAX_TRANSPORT_FAILURES,
            pending_timeout: DEFAULT_PENDING_TIMEOUT,
            backoff: BackoffConfig {
                initial_delay: DEFAULT_POLL_INTERVAL,
                ..BackoffConfig::default()
            },
        }
    }
}

/// Bookkeeping for one outstanding handle.
#[derive(Debug)]
struct Tracked {
    handle: JobHandle,
    tracked_at: Instant,
    transport_failures: u32,
    next_poll_at: Instant,
    last_state: JobState,
}

/// Counters for one completed sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub polled: usize,
    pub resolved: usize,
    /// Transport failures that were rescheduled.
    pub retried: usize,
    /// Results that arrived for handles no longer tracked.
    pub discarded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Another sweep was still running.
    Skipped,
    Completed(SweepReport),
}

/// What applying one poll result did.
enum Applied {
    Unchanged,
    Progressed,
    Retried,
    Resolved,
    Discarded,
}

/// Clears the sweep flag when the sweep ends, even if it is dropped.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Reconciler {
    registry: Arc<BackendRegistry>,
    jobs: Arc<dyn JobStore>,
    events: broadcast::Sender<JobEvent>,
    outstanding: Mutex<HashMap<JobKey, Tracked>>,
    sweeping: AtomicBool,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        registry: Arc<BackendRegistry>,
        jobs: Arc<dyn JobStore>,
        config: ReconcilerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            jobs,
            events,
            outstanding: Mutex::new(HashMap::new()),
            sweeping: AtomicBool::new(false),
            config,
        }
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Sender shared with other event producers (the replication pool).
    pub fn event_sender(&self) -> broadcast::Sender<JobEvent> {
        self.events.clone()
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    // ---- polling ----

    /// Ask the owning backend for the current status of `handle`.
    ///
    /// Read-only and idempotent. A job the backend has not recorded yet is
    /// `Pending`, never an error. Transport and parse failures come back
    /// as [`JobStatus::Error`] carrying the cause.
    pub async fn poll(&self, handle: &JobHandle) -> JobStatus {
        let Some(api) = self.registry.api_at(handle.backend_index) else {
            return JobStatus::Error(PipelineError::UnknownBackend(handle.backend_index));
        };

        match api.poll(&handle.job_id).await {
            Ok(HistoryStatus::Pending) => JobStatus::Pending,
            Ok(HistoryStatus::Processing) => JobStatus::Processing,
            Ok(HistoryStatus::Ready(images)) => JobStatus::Ready(images),
            Ok(HistoryStatus::Failed(message)) => {
                JobStatus::Error(PipelineError::ExecutionFailed {
                    endpoint: api.api_url().to_string(),
                    message,
                })
            }
            Err(e) => JobStatus::Error(PipelineError::from_api(api.api_url(), e)),
        }
    }

    // ---- outstanding set ----

    /// Start tracking `handle`. Returns `false` if it was already tracked.
    pub async fn track(&self, handle: JobHandle) -> bool {
        let key = handle.key();

        if let Err(e) = self.jobs.insert(handle.clone()).await {
            tracing::warn!(job = %key, error = %e, "Failed to record job");
        }

        let now = Instant::now();
        let inserted = {
            let mut outstanding = self.outstanding.lock().await;
            if outstanding.contains_key(&key) {
                false
            } else {
                outstanding.insert(
                    key.clone(),
                    Tracked {
                        handle,
                        tracked_at: now,
                        transport_failures: 0,
                        next_poll_at: now,
                        last_state: JobState::Pending,
                    },
                );
                true
            }
        };

        if inserted {
            tracing::debug!(job = %key, "Tracking job");
            let _ = self.events.send(JobEvent::Tracked { key });
        }
        inserted
    }

    /// Stop tracking `key` without resolving it. Returns `false` if it was
    /// not tracked.
    pub async fn cancel(&self, key: &JobKey) -> bool {
        let removed = self.outstanding.lock().await.remove(key).is_some();
        if removed {
            tracing::info!(job = %key, "Stopped tracking job");
            let _ = self.events.send(JobEvent::Cancelled { key: key.clone() });
        }
        removed
    }

    pub async fn is_tracked(&self, key: &JobKey) -> bool {
        self.outstanding.lock().await.contains_key(key)
    }

    /// Keys of all outstanding handles.
    pub async fn outstanding(&self) -> Vec<JobKey> {
        let mut keys: Vec<JobKey> = self.outstanding.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    // ---- resolution ----

    /// Record a status observed outside the driving loop (the status
    /// surface). A resolved status removes the handle from the set; the
    /// resolution event fires only for whoever removed it.
    pub async fn observe(&self, handle: &JobHandle, status: &JobStatus) {
        let key = handle.key();
        let removed = status.is_resolved()
            && self.outstanding.lock().await.remove(&key).is_some();

        self.record(&key, status).await;
        if removed {
            self.announce(key, status);
        }
    }

    /// Write `status` to the job store. Stale or unknown updates are
    /// expected when the loop and the status surface race, so they are
    /// only logged.
    async fn record(&self, key: &JobKey, status: &JobStatus) {
        let update = match status {
            JobStatus::Pending => return,
            JobStatus::Processing => JobUpdate::Processing,
            JobStatus::Ready(images) => JobUpdate::Ready(images.clone()),
            JobStatus::Completed(artifacts) => JobUpdate::Completed(artifacts.clone()),
            JobStatus::Error(e) => JobUpdate::Failed(e.to_string()),
        };

        if let Err(e) = self.jobs.apply(key, update).await {
            tracing::debug!(job = %key, error = %e, "Job record not updated");
        }
    }

    fn announce(&self, key: JobKey, status: &JobStatus) {
        let event = match status {
            JobStatus::Pending => return,
            JobStatus::Processing => JobEvent::Processing { key },
            JobStatus::Ready(images) => {
                tracing::info!(job = %key, images = images.len(), "Job ready");
                JobEvent::Ready {
                    key,
                    images: images.clone(),
                }
            }
            JobStatus::Completed(artifacts) => {
                tracing::info!(job = %key, artifacts = artifacts.len(), "Job completed");
                JobEvent::Completed {
                    key,
                    artifacts: artifacts.clone(),
                }
            }
            JobStatus::Error(e) => {
                tracing::warn!(job = %key, error = %e, "Job failed");
                JobEvent::Failed {
                    key,
                    error: e.to_string(),
                }
            }
        };
        let _ = self.events.send(event);
    }

    /// Apply one poll result from a sweep.
    async fn apply(&self, handle: &JobHandle, status: JobStatus) -> Applied {
        let key = handle.key();
        let now = Instant::now();

        let (applied, status) = {
            let mut outstanding = self.outstanding.lock().await;
            let Some(tracked) = outstanding.get_mut(&key) else {
                tracing::debug!(job = %key, "Discarding result for untracked job");
                return Applied::Discarded;
            };

            match status {
                JobStatus::Error(e) if e.is_transport() => {
                    tracked.transport_failures += 1;
                    let failures = tracked.transport_failures;
                    if failures >= self.config.max_transport_failures {
                        outstanding.remove(&key);
                        (Applied::Resolved, JobStatus::Error(e))
                    } else {
                        let delay = delay_after(failures, &self.config.backoff);
                        tracked.next_poll_at = now + delay;
                        tracing::warn!(
                            job = %key,
                            endpoint = %handle.endpoint,
                            failures,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Backend unreachable, backing off",
                        );
                        return Applied::Retried;
                    }
                }
                status @ (JobStatus::Pending | JobStatus::Processing) => {
                    tracked.transport_failures = 0;
                    tracked.next_poll_at = now;

                    let waited = now.duration_since(tracked.tracked_at);
                    if waited >= self.config.pending_timeout {
                        outstanding.remove(&key);
                        let timeout = PipelineError::PendingTimeout {
                            job_id: handle.job_id.clone(),
                            waited_secs: waited.as_secs(),
                        };
                        (Applied::Resolved, JobStatus::Error(timeout))
                    } else if matches!(status, JobStatus::Processing)
                        && tracked.last_state == JobState::Pending
                    {
                        tracked.last_state = JobState::Processing;
                        (Applied::Progressed, status)
                    } else {
                        return Applied::Unchanged;
                    }
                }
                resolved => {
                    outstanding.remove(&key);
                    (Applied::Resolved, resolved)
                }
            }
        };

        self.record(&key, &status).await;
        self.announce(key, &status);
        applied
    }

    // ---- driving loop ----

    /// Poll every due handle once, applying results as they arrive.
    ///
    /// Returns [`SweepOutcome::Skipped`] if a sweep is already running.
    pub async fn sweep(&self) -> SweepOutcome {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return SweepOutcome::Skipped;
        }
        let _guard = SweepGuard(&self.sweeping);

        let now = Instant::now();
        let due: Vec<JobHandle> = self
            .outstanding
            .lock()
            .await
            .values()
            .filter(|t| t.next_poll_at <= now)
            .map(|t| t.handle.clone())
            .collect();

        let mut report = SweepReport::default();
        let mut polls: FuturesUnordered<_> = due
            .into_iter()
            .map(|handle| async move {
                let status = self.poll(&handle).await;
                (handle, status)
            })
            .collect();

        while let Some((handle, status)) = polls.next().await {
            report.polled += 1;
            match self.apply(&handle, status).await {
                Applied::Resolved => report.resolved += 1,
                Applied::Retried => report.retried += 1,
                Applied::Discarded => report.discarded += 1,
                Applied::Unchanged | Applied::Progressed => {}
            }
        }

        SweepOutcome::Completed(report)
    }

    /// Sweep every `poll_interval` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            backends = self.registry.count(),
            "Status reconciler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Status reconciler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let SweepOutcome::Completed(report) = self.sweep().await {
                        if report.polled > 0 {
                            tracing::debug!(
                                polled = report.polled,
                                resolved = report.resolved,
                                retried = report.retried,
                                "Sweep finished",
                            );
                        }
                    }
                }
            }
        }
    }
}
