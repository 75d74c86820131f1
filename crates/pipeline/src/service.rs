//! Facade wiring submission, reconciliation and materialization for the
//! HTTP layer.

use std::sync::Arc;

use atelier_comfyui::registry::BackendRegistry;
use atelier_core::job::{JobHandle, JobKey, JobRequest, JobState};

use crate::error::PipelineError;
use crate::materializer::Materializer;
use crate::reconciler::Reconciler;
use crate::status::{JobStatus, StatusAction};
use crate::store::{JobRecord, JobStore};
use crate::submission::{Submission, Submitter};

pub struct Pipeline {
    registry: Arc<BackendRegistry>,
    jobs: Arc<dyn JobStore>,
    submitter: Submitter,
    reconciler: Arc<Reconciler>,
    materializer: Arc<Materializer>,
}

impl Pipeline {
    pub fn new(
        registry: Arc<BackendRegistry>,
        jobs: Arc<dyn JobStore>,
        reconciler: Arc<Reconciler>,
        materializer: Arc<Materializer>,
    ) -> Self {
        Self {
            submitter: Submitter::new(Arc::clone(&registry)),
            registry,
            jobs,
            reconciler,
            materializer,
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn materializer(&self) -> &Arc<Materializer> {
        &self.materializer
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Submit to every backend and start tracking each accepted handle.
    pub async fn submit(&self, request: JobRequest) -> Result<Submission, PipelineError> {
        let submission = self.submitter.submit(request).await?;
        for handle in &submission.handles {
            self.reconciler.track(handle.clone()).await;
        }
        Ok(submission)
    }

    /// Check one job on demand.
    ///
    /// `Poll` only classifies. `Retrieve` additionally materializes every
    /// asset of a ready job and reports it `Completed`. A job whose record
    /// already resolved to an error stays an error without contacting the
    /// backend. When the backend cannot answer (unreachable, non-success
    /// response, malformed body) the check returns `Err` and nothing is
    /// recorded, so the caller can tell a failed check from a failed job.
    pub async fn check_status(
        &self,
        key: &JobKey,
        action: StatusAction,
    ) -> Result<JobStatus, PipelineError> {
        let handle = match self.jobs.get(key).await? {
            Some(record) if record.state == JobState::Error => {
                let message = record.error.unwrap_or_else(|| "Job failed".to_string());
                return Ok(JobStatus::Error(PipelineError::JobFailed { message }));
            }
            Some(record) => record.handle,
            None => self.rebuild_handle(key)?,
        };

        let status = match self.reconciler.poll(&handle).await {
            JobStatus::Error(e) if e.is_failed_check() => {
                tracing::warn!(job = %key, error = %e, "Status check failed");
                return Err(e);
            }
            JobStatus::Ready(images) if action == StatusAction::Retrieve => {
                let artifacts = self.materializer.materialize_all(&handle, &images).await?;
                JobStatus::Completed(artifacts)
            }
            status => status,
        };

        self.reconciler.observe(&handle, &status).await;
        Ok(status)
    }

    pub async fn job(&self, key: &JobKey) -> Result<Option<JobRecord>, PipelineError> {
        Ok(self.jobs.get(key).await?)
    }

    pub async fn jobs_list(&self) -> Result<Vec<JobRecord>, PipelineError> {
        Ok(self.jobs.list().await?)
    }

    /// Stop polling a job. Returns `false` if it was not being polled.
    pub async fn cancel(&self, key: &JobKey) -> bool {
        self.reconciler.cancel(key).await
    }

    /// A handle for a job submitted elsewhere, rebuilt from the registry.
    fn rebuild_handle(&self, key: &JobKey) -> Result<JobHandle, PipelineError> {
        let endpoint = self
            .registry
            .endpoint_at(key.backend_index)
            .ok_or(PipelineError::UnknownBackend(key.backend_index))?;

        Ok(JobHandle {
            job_id: key.job_id.clone(),
            backend_index: key.backend_index,
            endpoint: endpoint.to_string(),
            seed: 0,
        })
    }
}
