//! Waiting for asynchronous node tasks.

use std::time::Duration;

use pve_core::client::{TASK_POLL_INTERVAL_SECS, TASK_TIMEOUT_SECS};
use pve_core::{ApiClient, Error, ExpectStatus};
use reqwest::Method;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::models::TaskSummary;
use crate::Result;

/// Bounds of a task wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Overall deadline, measured from the first poll
    pub timeout: Duration,
    /// Pause between two polls
    pub interval: Duration,
}

impl PollSettings {
    /// Default settings: two minutes, polling every five seconds.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: Duration::from_secs(TASK_TIMEOUT_SECS),
            interval: Duration::from_secs(TASK_POLL_INTERVAL_SECS),
        }
    }

    /// Set the overall deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the pause between polls.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `GET /nodes/{node}/tasks/{upid}/status` until a task stops.
#[derive(Debug, Clone)]
pub struct TaskPoller {
    api: ApiClient,
    node: String,
    settings: PollSettings,
}

impl TaskPoller {
    /// Create a poller for tasks on `node`.
    #[must_use]
    pub fn new(api: ApiClient, node: impl Into<String>, settings: PollSettings) -> Self {
        Self {
            api,
            node: node.into(),
            settings,
        }
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Fetch the current status of a task.
    ///
    /// # Errors
    ///
    /// Returns transport errors, [`Error::Status`] on any status but 200, or
    /// [`Error::Decode`].
    pub async fn status(&self, upid: &str) -> Result<TaskSummary> {
        self.api
            .call(
                Method::GET,
                &["nodes", &self.node, "tasks", upid, "status"],
                None,
                ExpectStatus::OkOnly,
            )
            .await
    }

    /// Wait until the task stops.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskFailed`] if the task stops with an exit status other
    /// than `OK`, [`Error::Timeout`] once the deadline passes, or the first
    /// error of a status request.
    pub async fn wait(&self, upid: &str) -> Result<TaskSummary> {
        let deadline = Instant::now() + self.settings.timeout;
        let mut polls = 0_u32;

        loop {
            polls += 1;
            let summary = self.status(upid).await?;

            if summary.is_stopped() {
                if summary.is_success() {
                    info!(upid, polls, "Task completed");
                    return Ok(summary);
                }
                let exit_status = summary.exit_status.clone().unwrap_or_default();
                warn!(upid, exit_status = %exit_status, "Task failed");
                return Err(Error::TaskFailed {
                    upid: upid.to_string(),
                    exit_status,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout(format!(
                    "task {upid} still {} after {:?}",
                    summary.status, self.settings.timeout
                )));
            }

            debug!(upid, status = %summary.status, polls, "Task still running");
            sleep_until((now + self.settings.interval).min(deadline)).await;
        }
    }
}
