//! Fan-out submission of one job to every configured backend.

use std::sync::Arc;

use atelier_comfyui::registry::BackendRegistry;
use atelier_comfyui::workflow::build_workflow;
use atelier_core::job::{JobHandle, JobParams, JobRequest};
use atelier_core::types::BackendIndex;
use futures::future::join_all;

use crate::error::PipelineError;

/// Result of a submission with at least one accepted backend.
#[derive(Debug, Clone)]
pub struct Submission {
    pub params: JobParams,
    /// One handle per accepting backend, in registry order.
    pub handles: Vec<JobHandle>,
    /// Backends that refused or could not be reached.
    pub failures: Vec<(BackendIndex, PipelineError)>,
}

#[derive(Debug, Clone)]
pub struct Submitter {
    registry: Arc<BackendRegistry>,
}

impl Submitter {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self { registry }
    }

    /// Submit `request` to all backends concurrently.
    ///
    /// The base seed is resolved once; backend `i` receives `seed + i`.
    /// Fails only when no backend accepted, with every backend's reason
    /// joined into the error.
    pub async fn submit(&self, request: JobRequest) -> Result<Submission, PipelineError> {
        let params = request.resolve();

        let attempts = self.registry.iter().map(|(index, api)| {
            let seed = params.seed_for(index);
            let graph = build_workflow(&params, seed);
            let api = Arc::clone(api);
            async move {
                let result = api
                    .submit_workflow(&graph)
                    .await
                    .map(|accepted| JobHandle {
                        job_id: accepted.prompt_id,
                        backend_index: index,
                        endpoint: api.api_url().to_string(),
                        seed,
                    })
                    .map_err(|e| PipelineError::from_api(api.api_url(), e));
                (index, result)
            }
        });

        let mut handles = Vec::new();
        let mut failures = Vec::new();
        for (index, result) in join_all(attempts).await {
            match result {
                Ok(handle) => {
                    tracing::info!(
                        job_id = %handle.job_id,
                        backend_index = index,
                        seed = handle.seed,
                        "Job accepted by backend",
                    );
                    handles.push(handle);
                }
                Err(e) => {
                    tracing::warn!(backend_index = index, error = %e, "Backend did not accept job");
                    failures.push((index, e));
                }
            }
        }

        if handles.is_empty() {
            return Err(PipelineError::NoBackendAccepted {
                reasons: failures.iter().map(|(_, e)| e.to_string()).collect(),
            });
        }

        Ok(Submission {
            params,
            handles,
            failures,
        })
    }
}
