use std::sync::Arc;
use std::time::Duration;

use tokio::task::{self, JoinHandle};
use tracing::{error, info, warn};

use crate::config::VgenConfig;
use crate::gateway::{generate_outcome, GenerationGateway};

use super::models::{Job, JobFilter, JobStatus};
use super::store::SqliteJobStore;
use super::webhook::{WebhookNotifier, WebhookPayload};
use super::{JobError, JobResult};

const INTERRUPTED_NOTE: &str = "interrupted by restart";

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub gateway_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(20),
        }
    }
}

impl ExecutorConfig {
    pub fn from_config(config: &VgenConfig) -> Self {
        Self {
            gateway_timeout: config.gateway.timeout(),
        }
    }
}

/// Jobs touched by [`Executor::recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub resumed: Vec<String>,
    pub abandoned: Vec<String>,
}

/// Drives a persisted job from `queued` to a terminal status, one gateway
/// call at a time in plan order.
pub struct Executor {
    store: SqliteJobStore,
    gateway: Arc<dyn GenerationGateway>,
    notifier: Arc<dyn WebhookNotifier>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        store: SqliteJobStore,
        gateway: Arc<dyn GenerationGateway>,
        notifier: Arc<dyn WebhookNotifier>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            config,
        }
    }

    /// Runs the job on the current tokio runtime without waiting for it.
    pub fn spawn(self: &Arc<Self>, job_id: String) -> JoinHandle<()> {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = executor.execute(&job_id).await {
                error!(target: "executor", job_id = %job_id, "job could not be finalized: {err}");
            }
        })
    }

    /// Re-drives work left behind by a previous process. Jobs still
    /// `running` are failed, since their executor is gone; `queued` jobs are
    /// spawned again, oldest first. Only call this before any new job is
    /// accepted on the same database.
    pub async fn recover(self: &Arc<Self>) -> JobResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let stale = self
            .with_store(|store| store.list_jobs(&JobFilter::with_status(JobStatus::Running)))
            .await?;
        for job in stale {
            let aborted = self.abort(&job.job_id, INTERRUPTED_NOTE).await;
            match aborted {
                Ok(_) => report.abandoned.push(job.job_id),
                Err(err) => {
                    warn!(target: "executor", job_id = %job.job_id, "stale job left as is: {err}")
                }
            }
        }

        let queued = self
            .with_store(|store| store.list_jobs(&JobFilter::with_status(JobStatus::Queued)))
            .await?;
        for job in queued.into_iter().rev() {
            self.spawn(job.job_id.clone());
            report.resumed.push(job.job_id);
        }

        info!(
            target: "executor",
            resumed = report.resumed.len(),
            abandoned = report.abandoned.len(),
            "recovery finished"
        );
        Ok(report)
    }

    /// Returns the terminal status the job reached. An error means the job
    /// could not even be marked failed.
    pub async fn execute(&self, job_id: &str) -> JobResult<JobStatus> {
        let job = match self.claim(job_id).await {
            Ok(job) => job,
            Err(err) => {
                warn!(target: "executor", job_id, "claim failed: {err}");
                return self.abort(job_id, &err.to_string()).await;
            }
        };
        info!(target: "executor", job_id, variants = job.plan.len(), "job running");

        let mut succeeded = 0usize;
        for spec in &job.plan.variants {
            let outcome =
                generate_outcome(self.gateway.as_ref(), spec, self.config.gateway_timeout).await;
            let success = outcome.is_success();
            let key = spec.key();
            let recorded = {
                let (id, key) = (job_id.to_string(), key.clone());
                self.with_store(move |store| store.update_job_result(&id, &key, &outcome))
                    .await
            };
            if let Err(err) = recorded {
                error!(target: "executor", job_id, slot = %key, "result not persisted: {err}");
                return self.abort(job_id, &err.to_string()).await;
            }
            if success {
                succeeded += 1;
            }
        }

        let status = if succeeded > 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        let note = format!("{succeeded}/{} variants generated", job.plan.len());
        {
            let (id, note) = (job_id.to_string(), note.clone());
            self.with_store(move |store| store.transition_with_note(&id, status, Some(&note)))
                .await?;
        }
        info!(target: "executor", job_id, status = %status, "{note}");
        self.notify(job_id).await;
        Ok(status)
    }

    async fn claim(&self, job_id: &str) -> JobResult<Job> {
        let id = job_id.to_string();
        self.with_store(move |store| {
            let job = store.fetch_job(&id)?;
            store.transition_status(&id, JobStatus::Running)?;
            Ok(job)
        })
        .await
    }

    async fn abort(&self, job_id: &str, reason: &str) -> JobResult<JobStatus> {
        let (id, note) = (job_id.to_string(), reason.to_string());
        self.with_store(move |store| store.transition_with_note(&id, JobStatus::Failed, Some(&note)))
            .await?;
        warn!(target: "executor", job_id, "job failed: {reason}");
        self.notify(job_id).await;
        Ok(JobStatus::Failed)
    }

    /// One best-effort delivery; failures are logged and never retried.
    async fn notify(&self, job_id: &str) {
        let id = job_id.to_string();
        let delivery = match self.with_store(move |store| store.load_delivery(&id)).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return,
            Err(err) => {
                warn!(target: "webhook", job_id, "could not load job for notification: {err}");
                return;
            }
        };
        let Some(url) = delivery.webhook_url.clone() else {
            return;
        };
        let payload = WebhookPayload::from_delivery(delivery);
        match self.notifier.notify(&url, &payload).await {
            Ok(()) => {
                info!(target: "webhook", job_id, status = %payload.status, "notification delivered")
            }
            Err(err) => warn!(target: "webhook", job_id, url = %url, "notification failed: {err}"),
        }
    }

    /// Runs a store call on the blocking pool; sqlite may wait on its busy
    /// timeout and must not hold a runtime worker while it does.
    async fn with_store<T, F>(&self, call: F) -> JobResult<T>
    where
        F: FnOnce(&SqliteJobStore) -> JobResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        task::spawn_blocking(move || call(&store))
            .await
            .map_err(|err| JobError::Background(err.to_string()))?
    }
}
