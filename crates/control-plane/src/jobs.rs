use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::models::DeploymentResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    InProgress,
    Completed,
    Failed,
}

/// One progress event. Appended only; never mutated or removed once written,
/// so clients can render the list as a growing log.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatusUpdate {
    pub step: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobStatus {
    pub job_id: String,
    pub status: JobState,
    pub updates: Vec<StatusUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DeploymentResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct JobEntry {
    status: JobStatus,
    terminal_at: Option<Instant>,
}

/// Event stream between a running pipeline and the registry. The pipeline
/// only ever holds the sending half, keeping stage code decoupled from the
/// tracker.
#[derive(Debug)]
pub enum JobEvent {
    Progress { step: String, message: String, completed: bool },
    Completed { result: DeploymentResult },
    Failed { error: String },
}

/// Sending half of a job's progress channel. Cheap to clone; dropping every
/// clone ends the consuming task.
#[derive(Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<JobEvent>,
}

impl ProgressSink {
    pub fn emit(&self, step: &str, message: impl Into<String>, completed: bool) {
        let _ = self.tx.send(JobEvent::Progress {
            step: step.to_owned(),
            message: message.into(),
            completed,
        });
    }

    pub fn completed(&self, result: DeploymentResult) {
        let _ = self.tx.send(JobEvent::Completed { result });
    }

    pub fn failed(&self, error: impl Into<String>) {
        let _ = self.tx.send(JobEvent::Failed { error: error.into() });
    }

    /// Sink for synchronous callers that only want the events in the log.
    pub fn logging() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let JobEvent::Progress { step, message, completed } = event {
                    info!(event = "pipeline.progress", step = %step, completed, "{message}");
                }
            }
        });
        Self { tx }
    }
}

/// Concurrency-safe registry of asynchronous pipeline executions. The map is
/// owned here and never exposed; all mutation goes through these operations.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<Mutex<HashMap<String, JobEntry>>>,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(retention: Duration) -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())), retention }
    }

    pub fn create(&self, job_id: &str) {
        let mut jobs = self.inner.lock().unwrap();
        jobs.insert(
            job_id.to_owned(),
            JobEntry {
                status: JobStatus {
                    job_id: job_id.to_owned(),
                    status: JobState::InProgress,
                    updates: Vec::new(),
                    result: None,
                    error: None,
                },
                terminal_at: None,
            },
        );
    }

    /// Append a progress update. Unknown or already-terminal jobs are left
    /// untouched; the tracker may legitimately be asked to update a job that
    /// was reclaimed or finished by a racing stage.
    pub fn append(&self, job_id: &str, step: &str, message: &str, completed: bool) {
        let mut jobs = self.inner.lock().unwrap();
        if let Some(entry) = jobs.get_mut(job_id) {
            if entry.status.status != JobState::InProgress {
                return;
            }
            entry.status.updates.push(StatusUpdate {
                step: step.to_owned(),
                message: message.to_owned(),
                timestamp: Utc::now(),
                completed,
            });
        }
    }

    /// Set the terminal success state exactly once; later terminal calls for
    /// the same job are ignored rather than raised, since stages may race to
    /// report a final outcome.
    pub fn complete(&self, job_id: &str, result: DeploymentResult) {
        let mut jobs = self.inner.lock().unwrap();
        if let Some(entry) = jobs.get_mut(job_id) {
            if entry.status.status != JobState::InProgress {
                return;
            }
            entry.status.status = JobState::Completed;
            entry.status.result = Some(result);
            entry.terminal_at = Some(Instant::now());
        }
    }

    pub fn fail(&self, job_id: &str, error: impl Into<String>) {
        let mut jobs = self.inner.lock().unwrap();
        if let Some(entry) = jobs.get_mut(job_id) {
            if entry.status.status != JobState::InProgress {
                return;
            }
            entry.status.status = JobState::Failed;
            entry.status.error = Some(error.into());
            entry.terminal_at = Some(Instant::now());
        }
    }

    pub fn get(&self, job_id: &str) -> Option<JobStatus> {
        self.inner.lock().unwrap().get(job_id).map(|entry| entry.status.clone())
    }

    /// Drop terminal entries older than the retention window. Returns how
    /// many were reclaimed.
    pub fn sweep(&self) -> usize {
        let mut jobs = self.inner.lock().unwrap();
        let before = jobs.len();
        let retention = self.retention;
        jobs.retain(|_, entry| match entry.terminal_at {
            Some(at) => at.elapsed() < retention,
            None => true,
        });
        before - jobs.len()
    }

    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(30)).await;
                let removed = registry.sweep();
                if removed > 0 {
                    debug!(event = "jobs.swept", removed);
                }
            }
        })
    }

    /// Open a progress channel for a job and pump its events into the
    /// registry in arrival order.
    pub fn attach(&self, job_id: &str) -> ProgressSink {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = self.clone();
        let job_id = job_id.to_owned();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    JobEvent::Progress { step, message, completed } => {
                        registry.append(&job_id, &step, &message, completed)
                    }
                    JobEvent::Completed { result } => registry.complete(&job_id, result),
                    JobEvent::Failed { error } => registry.fail(&job_id, error),
                }
            }
        });
        ProgressSink { tx }
    }
}
