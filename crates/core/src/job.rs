//! Job lifecycle state machine.
//!
//! A [`Job`] is one asynchronous unit of server-side work (an AI inference
//! or an order-driven computation). It is created locally at submission
//! time and moves through:
//!
//! ```text
//! CREATED --accept--> PENDING --apply--> COMPLETED | FAILED
//! CREATED --complete_cached--> COMPLETED
//! CREATED --reject--> FAILED
//! ```
//!
//! Terminal states absorb every later update: [`Job::apply`] on a
//! completed or failed job is a no-op.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job_events::{is_terminal_status, STATUS_COMPLETED};
use crate::roles::JobRole;
use crate::types::{JobId, Timestamp};

/// Fallback reason when a failure arrives without a usable message.
pub const UNKNOWN_FAILURE: &str = "Job failed without an error message";

/// AI inference model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    /// MRI-based model.
    #[serde(rename = "M1")]
    M1,
    /// Genomics model.
    #[serde(rename = "MG")]
    Mg,
    /// Multimodal model.
    #[serde(rename = "MM")]
    Mm,
}

/// What a job computes. Only used to route and decode its result payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Inference(ModelType),
    Order(JobRole),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Created,
    Pending,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// A terminal update for a pending job, whichever source delivered it
/// (push frame, status poll or local timeout).
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Completed { result: serde_json::Value },
    Failed { error: String },
}

impl JobUpdate {
    pub fn completed(result: serde_json::Value) -> Self {
        JobUpdate::Completed { result }
    }

    /// Build a failure update. Blank messages are replaced by
    /// [`UNKNOWN_FAILURE`] so a failed job always carries a reason.
    pub fn failed(error: impl Into<String>) -> Self {
        JobUpdate::Failed {
            error: non_blank_error(error.into()),
        }
    }

    /// Build an update from a wire status, as carried by push frames and
    /// the job status endpoint.
    ///
    /// Returns `None` for non-terminal statuses. A completion without a
    /// result completes with `null`.
    pub fn from_status(
        status: &str,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Option<Self> {
        if !is_terminal_status(status) {
            return None;
        }
        if status.eq_ignore_ascii_case(STATUS_COMPLETED) {
            Some(Self::completed(result.unwrap_or(serde_json::Value::Null)))
        } else {
            Some(Self::failed(error.unwrap_or_default()))
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobUpdate::Completed { .. })
    }
}

/// A submitted unit of asynchronous work.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    job_id: Option<JobId>,
    kind: JobKind,
    submitted_at: Timestamp,
    state: JobState,
    result: Option<serde_json::Value>,
    error: Option<String>,
    cached: bool,
}

impl Job {
    /// Create a job in the `CREATED` state.
    pub fn new(kind: JobKind, submitted_at: Timestamp) -> Self {
        Self {
            job_id: None,
            kind,
            submitted_at,
            state: JobState::Created,
            result: None,
            error: None,
            cached: false,
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn submitted_at(&self) -> Timestamp {
        self.submitted_at
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn cached(&self) -> bool {
        self.cached
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Decode the result payload into a kind-specific type.
    ///
    /// Returns `Ok(None)` if the job has no result.
    pub fn decode_result<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.result
            .as_ref()
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
    }

    /// `CREATED -> PENDING`: the server acknowledged the submission.
    ///
    /// A job id is assigned at most once.
    pub fn accept(&mut self, job_id: JobId) -> Result<(), CoreError> {
        if let Some(existing) = &self.job_id {
            return Err(CoreError::Conflict(format!(
                "Job already has id '{existing}', refusing to reassign '{job_id}'"
            )));
        }
        self.expect_created("accept")?;
        self.job_id = Some(job_id);
        self.state = JobState::Pending;
        Ok(())
    }

    /// `CREATED -> COMPLETED`: the submission response itself carried the
    /// finished result. The job never waits on the push channel.
    pub fn complete_cached(
        &mut self,
        job_id: Option<JobId>,
        result: serde_json::Value,
    ) -> Result<(), CoreError> {
        self.expect_created("complete from cache")?;
        self.job_id = job_id;
        self.result = Some(result);
        self.cached = true;
        self.state = JobState::Completed;
        Ok(())
    }

    /// `CREATED -> FAILED`: rejected, or the request never reached the
    /// server. No job id is ever assigned.
    pub fn reject(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.expect_created("reject")?;
        self.error = Some(non_blank_error(error.into()));
        self.state = JobState::Failed;
        Ok(())
    }

    /// Apply a terminal update to a `PENDING` job.
    ///
    /// Returns `true` if the update changed the job. Updates for jobs that
    /// are already terminal, or that were never accepted, are discarded and
    /// return `false`.
    pub fn apply(&mut self, update: JobUpdate) -> bool {
        if self.state != JobState::Pending {
            return false;
        }
        match update {
            JobUpdate::Completed { result } => {
                self.result = Some(result);
                self.state = JobState::Completed;
            }
            JobUpdate::Failed { error } => {
                self.error = Some(non_blank_error(error));
                self.state = JobState::Failed;
            }
        }
        true
    }

    fn expect_created(&self, action: &str) -> Result<(), CoreError> {
        if self.state == JobState::Created {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Cannot {action} a job in state {:?}",
                self.state
            )))
        }
    }
}

fn non_blank_error(error: String) -> String {
    if error.trim().is_empty() {
        UNKNOWN_FAILURE.to_string()
    } else {
        error
    }
}
