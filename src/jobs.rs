//! Async job manager: submit long-running work, poll status, fetch the
//! result once it lands, and cancel in-flight jobs cooperatively.
//!
//! Jobs are identified by opaque `task_<uuid>` ids. Completed jobs are
//! retained up to `jobs.max_completed`, oldest evicted first, after which
//! `status`/`result` return `None` for the evicted id exactly as they do
//! for an id that was never submitted.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::JobsConfig;
use crate::progress::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

struct JobRecord<T> {
    summary: JobSummary,
    result: Option<Result<T, String>>,
    cancel: Arc<AtomicBool>,
    progress: Option<Arc<Operation>>,
    handle: Option<JoinHandle<()>>,
}

struct Shared<T> {
    jobs: Mutex<HashMap<String, JobRecord<T>>>,
    completed_order: Mutex<VecDeque<String>>,
    max_completed: usize,
}

/// Registry of in-flight and recently-completed jobs, generic over the
/// result type the submitted work produces.
pub struct JobManager<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for JobManager<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T> JobManager<T>
where
    T: Send + 'static,
{
    pub fn new(config: JobsConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                jobs: Mutex::new(HashMap::new()),
                completed_order: Mutex::new(VecDeque::new()),
                max_completed: config.max_completed,
            }),
        }
    }

    /// Submit work for background execution. `work` receives the job's
    /// cooperative-cancellation flag and an optional progress handle it
    /// may update as it runs.
    pub async fn submit<F, Fut>(&self, progress: Option<Arc<Operation>>, work: F) -> String
    where
        F: FnOnce(Arc<AtomicBool>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, String>> + Send + 'static,
    {
        let id = format!("task_{}", uuid::Uuid::new_v4());
        let cancel = Arc::new(AtomicBool::new(false));
        let now = Utc::now();

        let record = JobRecord {
            summary: JobSummary {
                id: id.clone(),
                status: JobStatus::Pending,
                created_at: now,
                started_at: None,
                completed_at: None,
                error: None,
            },
            result: None,
            cancel: cancel.clone(),
            progress,
            handle: None,
        };
        self.shared.jobs.lock().await.insert(id.clone(), record);

        let shared = self.shared.clone();
        let job_id = id.clone();
        let cancel_for_task = cancel.clone();
        let handle = tokio::spawn(async move {
            {
                let mut jobs = shared.jobs.lock().await;
                if let Some(rec) = jobs.get_mut(&job_id) {
                    rec.summary.status = JobStatus::Running;
                    rec.summary.started_at = Some(Utc::now());
                }
            }
            debug!(job_id = %job_id, "job running");

            let outcome = work(cancel_for_task.clone()).await;

            let mut jobs = shared.jobs.lock().await;
            if let Some(rec) = jobs.get_mut(&job_id) {
                let was_cancelled = cancel_for_task.load(Ordering::SeqCst);
                let (status, error) = match &outcome {
                    Ok(_) if was_cancelled => (JobStatus::Cancelled, Some("cancelled".to_string())),
                    Ok(_) => (JobStatus::Completed, None),
                    Err(e) if was_cancelled => (JobStatus::Cancelled, Some(e.clone())),
                    Err(e) => (JobStatus::Failed, Some(e.clone())),
                };
                rec.summary.status = status;
                rec.summary.error = error;
                rec.summary.completed_at = Some(Utc::now());
                rec.result = Some(outcome);
                rec.handle = None;
            }
            drop(jobs);

            let mut completed = shared.completed_order.lock().await;
            completed.push_back(job_id.clone());
            while completed.len() > shared.max_completed {
                if let Some(evicted) = completed.pop_front() {
                    shared.jobs.lock().await.remove(&evicted);
                    debug!(job_id = %evicted, "evicted completed job, retention bound reached");
                }
            }
            info!(job_id = %job_id, "job finished");
        });

        if let Some(rec) = self.shared.jobs.lock().await.get_mut(&id) {
            rec.handle = Some(handle);
        }

        id
    }

    pub async fn status(&self, id: &str) -> Option<JobStatus> {
        self.shared.jobs.lock().await.get(id).map(|r| r.summary.status)
    }

    pub async fn summary(&self, id: &str) -> Option<JobSummary> {
        self.shared.jobs.lock().await.get(id).map(|r| r.summary.clone())
    }

    /// The job's result, if it has reached a terminal state. `None` while
    /// pending/running, and also `None` for an unknown or evicted id.
    pub async fn result(&self, id: &str) -> Option<Result<T, String>>
    where
        T: Clone,
    {
        self.shared.jobs.lock().await.get(id).and_then(|r| r.result.clone())
    }

    pub async fn progress(&self, id: &str) -> Option<Arc<Operation>> {
        self.shared.jobs.lock().await.get(id).and_then(|r| r.progress.clone())
    }

    /// Flip the job's cancellation flag. Returns `true` if the job existed
    /// and was not already in a terminal state, `false` otherwise.
    pub async fn cancel(&self, id: &str) -> bool {
        let jobs = self.shared.jobs.lock().await;
        match jobs.get(id) {
            Some(rec) if !rec.summary.status.is_terminal() => {
                rec.cancel.store(true, Ordering::SeqCst);
                warn!(job_id = %id, "cancellation requested");
                true
            }
            _ => false,
        }
    }

    pub async fn list_active(&self) -> Vec<JobSummary> {
        self.shared
            .jobs
            .lock()
            .await
            .values()
            .filter(|r| !r.summary.status.is_terminal())
            .map(|r| r.summary.clone())
            .collect()
    }
}
