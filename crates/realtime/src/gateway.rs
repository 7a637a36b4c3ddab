//! Submission gateway: the synchronous request path for jobs.
//!
//! [`SubmissionGateway::submit`] creates a [`Job`], sends it, and branches
//! on the response into exactly one of:
//!
//! - **cached**: the response carries the finished result; the job
//!   completes immediately and never touches the correlator.
//! - **accepted**: the response carries a job id; the job goes `PENDING`
//!   and its completion is registered with the [`JobCorrelator`]. One status
//!   poll follows the registration, catching a push frame that arrived
//!   before it.
//! - **rejected**: an error response or a network failure; the job fails
//!   with the reason and nothing is registered.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use medflow_core::error::CoreError;
use medflow_core::job::{Job, JobUpdate};
use medflow_core::types::JobId;
use tokio::sync::oneshot;

use crate::api::{ApiError, ClinicalApi, JobRequest, SubmitResponse};
use crate::correlator::{JobCorrelator, RegistrationId};

/// Failure reason for a cached response that lacks its result.
pub const CACHED_WITHOUT_RESULT: &str = "Server reported a cached result but sent none";

/// Failure reason for a response with neither a job id nor a result.
pub const EMPTY_ACKNOWLEDGEMENT: &str = "Server returned neither a job id nor a result";

/// A submitted job plus, while it is pending, the receiver for its update.
#[derive(Debug)]
pub struct Submission {
    job: Job,
    completion: Option<oneshot::Receiver<JobUpdate>>,
}

impl Submission {
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job.job_id()
    }

    /// `true` while a terminal update is still expected.
    pub fn is_waiting(&self) -> bool {
        self.completion.is_some()
    }

    /// Wait for the job to reach a terminal state.
    ///
    /// Returns immediately for cached and rejected jobs. If the
    /// registration is abandoned or replaced while waiting, the job is
    /// returned still `PENDING`.
    pub async fn wait(mut self) -> Job {
        if let Some(rx) = self.completion.take() {
            match rx.await {
                Ok(update) => {
                    self.job.apply(update);
                }
                Err(_) => {
                    tracing::debug!(job_id = ?self.job.job_id(), "Job registration dropped before completion");
                }
            }
        }
        self.job
    }

    pub fn into_parts(self) -> (Job, Option<oneshot::Receiver<JobUpdate>>) {
        (self.job, self.completion)
    }
}

pub struct SubmissionGateway {
    api: Arc<dyn ClinicalApi>,
    correlator: Arc<JobCorrelator>,
    /// Client-side escalation for jobs that never resolve. `None` disables it.
    job_timeout: Option<Duration>,
}

impl SubmissionGateway {
    pub fn new(
        api: Arc<dyn ClinicalApi>,
        correlator: Arc<JobCorrelator>,
        job_timeout: Option<Duration>,
    ) -> Self {
        Self {
            api,
            correlator,
            job_timeout,
        }
    }

    pub fn correlator(&self) -> &Arc<JobCorrelator> {
        &self.correlator
    }

    /// Submit `request` and settle the resulting job's first transition.
    ///
    /// Rejections are not errors: they come back as a `FAILED` job. An `Err`
    /// means the job state machine refused a transition.
    pub async fn submit(&self, request: JobRequest) -> Result<Submission, CoreError> {
        let mut job = Job::new(request.kind, Utc::now());

        let response = match self.api.submit(&request).await {
            Ok(response) => response,
            Err(e) => {
                log_rejection(&e);
                job.reject(e.user_message())?;
                return Ok(Submission {
                    job,
                    completion: None,
                });
            }
        };

        let completion = self.settle(&mut job, response).await?;
        Ok(Submission { job, completion })
    }

    async fn settle(
        &self,
        job: &mut Job,
        response: SubmitResponse,
    ) -> Result<Option<oneshot::Receiver<JobUpdate>>, CoreError> {
        let SubmitResponse {
            job_id,
            cached,
            result,
            error,
        } = response;

        if cached {
            match result {
                Some(result) => {
                    tracing::info!(job_id = ?job_id, "Job served from cache");
                    job.complete_cached(job_id, result)?;
                }
                None => {
                    tracing::warn!(job_id = ?job_id, "Cached response without a result");
                    job.reject(CACHED_WITHOUT_RESULT)?;
                }
            }
            return Ok(None);
        }

        let Some(job_id) = job_id else {
            tracing::warn!(error = ?error, "Submission acknowledged without a job id");
            job.reject(error.unwrap_or_else(|| EMPTY_ACKNOWLEDGEMENT.to_string()))?;
            return Ok(None);
        };

        job.accept(job_id.clone())?;
        let (registration, rx) = self.correlator.subscribe_with_id(job_id.clone()).await;
        tracing::info!(job_id = %job_id, kind = ?job.kind(), "Job accepted, awaiting result");

        // A push frame that beat the registration was dropped as unknown.
        match self.poll(&job_id).await {
            Ok(true) => {
                tracing::info!(job_id = %job_id, "Job already finished on the server");
                return Ok(Some(rx));
            }
            Ok(false) => {}
            Err(e) => tracing::debug!(job_id = %job_id, error = %e, "Initial status poll failed"),
        }

        if let Some(after) = self.job_timeout {
            self.spawn_escalation(job_id, registration, after);
        }
        Ok(Some(rx))
    }

    /// After `after`, poll once more and fail the job locally only if the
    /// server still has no terminal status for it.
    fn spawn_escalation(&self, job_id: JobId, registration: RegistrationId, after: Duration) {
        let api = Arc::clone(&self.api);
        let correlator = Arc::clone(&self.correlator);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if !correlator.is_registered(&job_id, registration).await {
                return;
            }
            match poll_job(&*api, &correlator, &job_id).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Status poll before timeout failed"),
            }
            correlator.expire(&job_id, registration, after).await;
        });
    }

    /// Poll the status endpoint for `job_id`.
    ///
    /// A terminal status is delivered through the correlator, so a poll
    /// racing a push frame still yields exactly one delivery. Returns `true`
    /// if this poll resolved the job.
    pub async fn poll(&self, job_id: &JobId) -> Result<bool, ApiError> {
        poll_job(&*self.api, &self.correlator, job_id).await
    }

    /// Poll every pending job once. Returns how many were resolved.
    pub async fn poll_pending(&self) -> usize {
        let mut resolved = 0;
        for job_id in self.correlator.pending_ids().await {
            match self.poll(&job_id).await {
                Ok(true) => resolved += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Failed to poll job status"),
            }
        }
        if resolved > 0 {
            tracing::info!(resolved, "Recovered job results by polling");
        }
        resolved
    }

    /// Stop waiting for `job_id`. The server is not told.
    pub async fn abandon(&self, job_id: &JobId) -> bool {
        self.correlator.abandon(job_id).await
    }
}

async fn poll_job(
    api: &dyn ClinicalApi,
    correlator: &JobCorrelator,
    job_id: &JobId,
) -> Result<bool, ApiError> {
    let status = api.job_status(job_id).await?;
    match JobUpdate::from_status(&status.status, status.result, status.error) {
        Some(update) => Ok(correlator.resolve(job_id, update).await),
        None => {
            tracing::debug!(job_id = %job_id, status = %status.status, "Job still running");
            Ok(false)
        }
    }
}

fn log_rejection(error: &ApiError) {
    match error {
        ApiError::Api { status, code, message } => tracing::warn!(
            status,
            code = ?code,
            message = %message,
            "Job submission rejected",
        ),
        other => tracing::warn!(error = %other, "Job submission failed"),
    }
}
