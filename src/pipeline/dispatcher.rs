//! Worker task lifecycle.
//!
//! [`Dispatcher::start`] recovers jobs orphaned by the previous process,
//! spawns one commit worker and one identity worker, and hands back a
//! [`PipelineService`] for submissions. Workers park on wake channels
//! between drains; submissions nudge the commit worker and commit-phase
//! fanout nudges the identity worker, with the poll interval as the
//! fallback for missed wakes and delayed jobs.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::github::IdentityApi;
use crate::pipeline::{CommitWorker, PipelineService, UserWorker};
use crate::store::{Store, StoreError};

/// Buffer for the wake channels. Wakes collapse, so small is fine.
const WAKE_BUFFER: usize = 16;

/// Owns the two worker tasks and their shutdown.
pub struct Dispatcher {
    service: PipelineService,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Recovers interrupted jobs, spawns the workers, and returns the
    /// running pipeline.
    pub async fn start(
        config: PipelineConfig,
        store: Store,
        api: Arc<dyn IdentityApi>,
    ) -> Result<Self, StoreError> {
        let recovered = store.recover_stale_jobs().await?;
        if recovered > 0 {
            info!(recovered, "Re-queued jobs interrupted by the previous shutdown");
        }

        let shutdown = CancellationToken::new();
        let (commit_wake_tx, commit_wake_rx) = mpsc::channel(WAKE_BUFFER);
        let (user_wake_tx, user_wake_rx) = mpsc::channel(WAKE_BUFFER);

        let commit_worker =
            CommitWorker::new(store.clone(), api.clone(), user_wake_tx, config.clone());
        let user_worker = UserWorker::new(store.clone(), api, config);

        let tasks = vec![
            tokio::spawn(commit_worker.run(commit_wake_rx, shutdown.child_token())),
            tokio::spawn(user_worker.run(user_wake_rx, shutdown.child_token())),
        ];

        let service = PipelineService::new(store, commit_wake_tx);
        Ok(Dispatcher { service, shutdown, tasks })
    }

    /// Handle for submitting work and reading results.
    pub fn service(&self) -> PipelineService {
        self.service.clone()
    }

    /// Signals both workers and waits for them to finish the jobs they
    /// have in flight.
    pub async fn shutdown(self) {
        info!("Shutting down workers");
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(error = %err, "Worker task panicked");
            }
        }
        info!("Workers stopped");
    }
}
