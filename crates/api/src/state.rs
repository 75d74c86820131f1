use std::sync::Arc;

use atelier_comfyui::registry::BackendRegistry;
use atelier_pipeline::materializer::Materializer;
use atelier_pipeline::reconciler::{Reconciler, ReconcilerConfig};
use atelier_pipeline::replication::{ReplicationConfig, ReplicationPool};
use atelier_pipeline::service::Pipeline;
use atelier_pipeline::store::{JobStore, MemoryJobStore};
use atelier_storage::local::LocalArtifactStore;
use atelier_storage::DurableStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Submission, status checks and job records.
    pub pipeline: Arc<Pipeline>,
    /// Store behind `/remote/{id}`.
    pub durable: Arc<dyn DurableStore>,
    /// Per-client limiter for the submission surface.
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Wire the pipeline from configuration and start the replication
    /// pool, which stops when `cancel` fires.
    ///
    /// The reconciler loop is not started here; spawn
    /// `pipeline.reconciler().run(..)` separately.
    pub fn assemble(
        config: ServerConfig,
        durable: Arc<dyn DurableStore>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let registry = Arc::new(BackendRegistry::with_timeout(
            config.backend_endpoints.clone(),
            config.backend_timeout,
        ));
        let jobs: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&registry),
            Arc::clone(&jobs),
            ReconcilerConfig {
                max_transport_failures: config.max_transport_failures,
                pending_timeout: config.pending_timeout,
                ..ReconcilerConfig::with_poll_interval(config.poll_interval)
            },
        ));

        let pool = ReplicationPool::new(
            Arc::clone(&durable),
            Arc::clone(&jobs),
            reconciler.event_sender(),
            ReplicationConfig {
                workers: config.replication_workers,
                max_attempts: config.replication_max_attempts,
                ..ReplicationConfig::default()
            },
        );
        let (queue, replication) = pool.spawn(cancel);

        let materializer = Arc::new(Materializer::new(
            Arc::clone(&registry),
            LocalArtifactStore::new(config.output_dir.clone()),
            queue,
        ));
        let pipeline = Arc::new(Pipeline::new(registry, jobs, reconciler, materializer));

        let state = Self {
            rate_limiter: Arc::new(RateLimiter::per_minute(config.rate_limit_per_minute)),
            config: Arc::new(config),
            pipeline,
            durable,
        };
        (state, replication)
    }
}
