//! Background replication of materialized artifacts to the durable store.
//!
//! The materializer hands bytes to a [`ReplicationQueue`] and returns
//! immediately. A [`ReplicationPool`] drains the queue with a bounded
//! number of concurrent uploads and retries each upload with backoff.
//! Failures are logged and broadcast, never returned to the request
//! that produced the artifact.

use std::sync::Arc;
use std::time::Duration;

use atelier_comfyui::backoff::{delay_after, BackoffConfig};
use atelier_core::asset::RemoteRef;
use atelier_core::job::JobKey;
use atelier_storage::DurableStore;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::events::JobEvent;
use crate::store::JobStore;

/// Default number of queued uploads before new tasks are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default time allowed at shutdown for queued and in-flight uploads.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// One artifact waiting to be uploaded.
#[derive(Debug, Clone)]
pub struct ReplicationTask {
    /// Job the artifact belongs to, when known.
    pub key: Option<JobKey>,
    pub name: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Maximum concurrent uploads.
    pub workers: usize,
    /// Upload attempts per artifact, including the first.
    pub max_attempts: u32,
    pub queue_capacity: usize,
    pub backoff: BackoffConfig,
    /// Budget for finishing queued uploads once cancelled.
    pub shutdown_grace: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 3,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backoff: BackoffConfig::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Sending half of the replication queue.
#[derive(Debug, Clone)]
pub struct ReplicationQueue {
    tx: mpsc::Sender<ReplicationTask>,
}

impl ReplicationQueue {
    /// Create a queue and its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ReplicationTask>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a task without waiting. Returns `false` if the task was
    /// dropped because the queue is full or the pool has stopped.
    pub fn enqueue(&self, task: ReplicationTask) -> bool {
        match self.tx.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(task)) => {
                tracing::warn!(name = %task.name, "Replication queue full, dropping task");
                false
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                tracing::warn!(name = %task.name, "Replication pool stopped, dropping task");
                false
            }
        }
    }
}

/// Worker pool uploading queued artifacts.
pub struct ReplicationPool {
    store: Arc<dyn DurableStore>,
    jobs: Arc<dyn JobStore>,
    events: broadcast::Sender<JobEvent>,
    config: ReplicationConfig,
}

impl ReplicationPool {
    pub fn new(
        store: Arc<dyn DurableStore>,
        jobs: Arc<dyn JobStore>,
        events: broadcast::Sender<JobEvent>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            store,
            jobs,
            events,
            config,
        }
    }

    /// Create the queue and spawn the pool consuming it.
    pub fn spawn(self, cancel: CancellationToken) -> (ReplicationQueue, JoinHandle<()>) {
        let (queue, rx) = ReplicationQueue::channel(self.config.queue_capacity);
        let handle = tokio::spawn(Arc::new(self).run(rx, cancel));
        (queue, handle)
    }

    /// Consume `rx` until it closes or `cancel` fires.
    ///
    /// On cancel the queue is closed and the tasks already in it are still
    /// uploaded within `shutdown_grace`. A task that cannot start before
    /// the grace period ends is reported as a replication failure.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<ReplicationTask>, cancel: CancellationToken) {
        let workers = self.config.workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));

        tracing::info!(
            workers,
            max_attempts = self.config.max_attempts,
            provider = self.store.provider_type(),
            "Replication pool started",
        );

        let mut backlog = Vec::new();
        loop {
            let task = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    backlog.push(task);
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit,
            };
            match permit {
                Ok(permit) => self.dispatch(task, permit),
                Err(_) => {
                    backlog.push(task);
                    break;
                }
            }
        }

        rx.close();
        while let Ok(task) = rx.try_recv() {
            backlog.push(task);
        }

        let deadline = Instant::now() + self.config.shutdown_grace;
        if !backlog.is_empty() {
            tracing::info!(queued = backlog.len(), "Replication pool stopping, finishing queued uploads");
        }
        for task in backlog {
            match tokio::time::timeout_at(deadline, Arc::clone(&semaphore).acquire_owned()).await {
                Ok(Ok(permit)) => self.dispatch(task, permit),
                _ => self.abandon(task),
            }
        }

        if tokio::time::timeout_at(deadline, semaphore.acquire_many(workers as u32))
            .await
            .is_err()
        {
            tracing::warn!("Replication uploads still running at shutdown");
        }
        tracing::info!("Replication pool stopped");
    }

    fn dispatch(self: &Arc<Self>, task: ReplicationTask, permit: OwnedSemaphorePermit) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            pool.replicate(task).await;
        });
    }

    /// Report a task dropped at shutdown.
    fn abandon(&self, task: ReplicationTask) {
        let error = PipelineError::RemoteReplicationFailure {
            name: task.name.clone(),
            reason: "replication pool stopped before upload".into(),
        };
        tracing::error!(name = %task.name, error = %error, "Artifact replication abandoned");
        let _ = self.events.send(JobEvent::ReplicationFailed {
            key: task.key,
            name: task.name,
            error: error.to_string(),
        });
    }

    /// Upload one task, retrying with backoff. Never fails.
    pub async fn replicate(&self, task: ReplicationTask) {
        match self.upload_with_retry(&task).await {
            Ok(remote_ref) => {
                tracing::info!(name = %task.name, remote_ref = %remote_ref, "Artifact replicated");

                if let Some(key) = &task.key {
                    if let Err(e) = self
                        .jobs
                        .attach_remote_ref(key, &task.name, remote_ref.clone())
                        .await
                    {
                        tracing::debug!(job = %key, error = %e, "Could not record remote reference");
                    }
                }
                let _ = self.events.send(JobEvent::Replicated {
                    key: task.key,
                    name: task.name,
                    remote_ref,
                });
            }
            Err(e) => {
                tracing::error!(name = %task.name, error = %e, "Artifact replication failed");
                let _ = self.events.send(JobEvent::ReplicationFailed {
                    key: task.key,
                    name: task.name,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn upload_with_retry(&self, task: &ReplicationTask) -> Result<RemoteRef, PipelineError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.store.put(task.bytes.clone(), &task.name).await {
                Ok(remote_ref) => return Ok(remote_ref),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = delay_after(attempt, &self.config.backoff);
                    tracing::warn!(
                        name = %task.name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Replication attempt failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(PipelineError::RemoteReplicationFailure {
                        name: task.name.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}
