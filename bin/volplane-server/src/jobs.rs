//! Async job engine.
//!
//! A job runs a future on its own tokio task. Its handle is registered
//! before the task starts, so a caller can poll it immediately. Handles
//! live in memory only and are reclaimed the first time a terminal state
//! is observed through [`AsyncJobManager::poll`].

use dashmap::DashMap;
use std::future::Future;
use tokio::sync::watch;
use tracing::{debug, error, warn};
use volplane_common::{Result, new_id};

/// State of a job as stored by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    /// Finished; carries the location of the produced resource, if any
    Completed(Option<String>),
    Failed(String),
}

impl JobState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Result of polling a job handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPoll {
    Pending,
    Completed(Option<String>),
    Failed(String),
    Unknown,
}

#[derive(Default)]
pub struct AsyncJobManager {
    jobs: DashMap<String, watch::Receiver<JobState>>,
}

impl AsyncJobManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` in the background and return its handle.
    ///
    /// Errors and panics inside the job become its `Failed` state.
    pub fn spawn<F>(&self, job: F) -> String
    where
        F: Future<Output = Result<Option<String>>> + Send + 'static,
    {
        let id = new_id();
        let (state_tx, state_rx) = watch::channel(JobState::Pending);
        self.jobs.insert(id.clone(), state_rx);

        let task = tokio::spawn(job);
        let job_id = id.clone();
        tokio::spawn(async move {
            let state = match task.await {
                Ok(Ok(location)) => {
                    debug!("Job {} completed", job_id);
                    JobState::Completed(location)
                }
                Ok(Err(e)) => {
                    warn!("Job {} failed: {}", job_id, e);
                    JobState::Failed(e.to_string())
                }
                Err(e) => {
                    error!("Job {} aborted: {}", job_id, e);
                    JobState::Failed(format!("job aborted: {e}"))
                }
            };
            state_tx.send_replace(state);
        });

        id
    }

    /// Observe a job. A terminal state is returned once; the handle is
    /// forgotten afterwards.
    pub fn poll(&self, id: &str) -> JobPoll {
        let state = match self.jobs.get(id) {
            Some(rx) => rx.borrow().clone(),
            None => return JobPoll::Unknown,
        };
        match state {
            JobState::Pending => JobPoll::Pending,
            JobState::Completed(location) => {
                self.jobs.remove(id);
                JobPoll::Completed(location)
            }
            JobState::Failed(message) => {
                self.jobs.remove(id);
                JobPoll::Failed(message)
            }
        }
    }

    /// Wait until a job reaches a terminal state without reclaiming it
    pub async fn wait(&self, id: &str) -> Option<JobState> {
        let mut rx = self.jobs.get(id).map(|entry| entry.value().clone())?;
        let state = rx.wait_for(JobState::is_terminal).await.ok()?;
        Some((*state).clone())
    }

    /// Number of handles not yet reclaimed
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
