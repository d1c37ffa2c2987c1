use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use super::cancel::CancelToken;
use super::remote::{GeoprocessingService, JobInfo, JobParameters, RemoteJobStatus};
use crate::errors::{PrintError, PrintResult};

/// Output parameter every print service task writes its result document to.
pub const RESULT_PARAM: &str = "result";

/// Client-side lifecycle of a submitted job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Idle,
    Submitted,
    Running,
    Succeeded(Value),
    Failed(String),
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded(_) | JobState::Failed(_) | JobState::Cancelled
        )
    }
}

/// Snapshot of the job an orchestrator owns.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintJob {
    pub job_id: Option<String>,
    pub state: JobState,
    pub cancel_requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobSettings {
    /// Delay between two status requests.
    pub poll_interval: Duration,
    /// How long a cancelled job waits for an outstanding submission or
    /// cancel acknowledgement.
    pub cancel_grace: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            cancel_grace: Duration::from_secs(10),
        }
    }
}

/// Read access to a running job from outside the task that drives it.
#[derive(Debug, Clone)]
pub struct JobTracker {
    job: Arc<RwLock<PrintJob>>,
    cancel: CancelToken,
}

impl JobTracker {
    pub async fn snapshot(&self) -> PrintJob {
        let mut job = self.job.read().await.clone();
        job.cancel_requested = self.cancel.is_cancelled();
        job
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Drives one remote job from submission to a settled result.
///
/// An orchestrator is consumed by [`JobOrchestrator::execute`], so every
/// submission gets its own job id slot.
pub struct JobOrchestrator {
    service: Arc<dyn GeoprocessingService>,
    settings: JobSettings,
    cancel: CancelToken,
    job: Arc<RwLock<PrintJob>>,
}

impl JobOrchestrator {
    pub fn new(service: Arc<dyn GeoprocessingService>, settings: JobSettings) -> Self {
        Self::with_cancel_token(service, settings, CancelToken::new())
    }

    /// Orchestrator that stops when `cancel` fires.
    pub fn with_cancel_token(
        service: Arc<dyn GeoprocessingService>,
        settings: JobSettings,
        cancel: CancelToken,
    ) -> Self {
        Self {
            service,
            settings,
            cancel,
            job: Arc::new(RwLock::new(PrintJob {
                job_id: None,
                state: JobState::Idle,
                cancel_requested: false,
            })),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn tracker(&self) -> JobTracker {
        JobTracker {
            job: self.job.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Requests cancellation. Safe to call before the job id is known; the
    /// request is applied as soon as the submission is acknowledged.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Submits `params`, follows the job to a terminal status and returns
    /// the `output_name` entry of its result document.
    #[instrument(skip(self, params))]
    pub async fn execute(self, params: JobParameters, output_name: &str) -> PrintResult<Value> {
        if self.cancel.is_cancelled() {
            info!("Cancelled before submission");
            return self.settle(Err(PrintError::JobCancelled)).await;
        }

        let submit = self.service.submit_job(&params);
        tokio::pin!(submit);

        let acknowledged = tokio::select! {
            biased;
            result = &mut submit => result,
            _ = self.cancel.cancelled() => {
                return self.cancel_pending_submission(submit).await;
            }
        };

        let status = match acknowledged {
            Ok(status) => status,
            Err(err) => return self.settle(Err(err)).await,
        };
        let job_id = status.job_id.clone();
        self.record_submission(&job_id).await;
        info!("[{}] Job submitted", job_id);

        let mut status = status;
        loop {
            match status.job_status {
                RemoteJobStatus::Succeeded => {
                    info!("[{}] Job succeeded", job_id);
                    let output = self.fetch_output(&job_id, output_name).await;
                    return self.settle(output).await;
                }
                RemoteJobStatus::Failed | RemoteJobStatus::TimedOut => {
                    warn!("[{}] Job ended with {:?}", job_id, status.job_status);
                    let payload = Value::Array(status.messages);
                    return self.settle(Err(PrintError::JobFailed(payload))).await;
                }
                RemoteJobStatus::Cancelled => {
                    info!("[{}] Job cancelled by the service", job_id);
                    return self.settle(Err(PrintError::JobCancelled)).await;
                }
                RemoteJobStatus::Executing => self.mark_running().await,
                RemoteJobStatus::New
                | RemoteJobStatus::Submitted
                | RemoteJobStatus::Waiting
                | RemoteJobStatus::Cancelling => {}
            }

            status = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return self.cancel_known_job(&job_id).await;
                }
                next = self.poll(&job_id) => match next {
                    Ok(next) => next,
                    Err(err) => return self.settle(Err(err)).await,
                },
            };
        }
    }

    async fn poll(&self, job_id: &str) -> PrintResult<JobInfo> {
        sleep(self.settings.poll_interval).await;
        let status = self.service.job_status(job_id).await?;
        debug!("[{}] Status {:?}", job_id, status.job_status);
        Ok(status)
    }

    async fn fetch_output(&self, job_id: &str, output_name: &str) -> PrintResult<Value> {
        let value = self.service.job_result(job_id, RESULT_PARAM).await?;
        extract_output(value, output_name)
    }

    async fn cancel_pending_submission<F>(&self, submit: Pin<&mut F>) -> PrintResult<Value>
    where
        F: Future<Output = PrintResult<JobInfo>>,
    {
        info!("Cancel requested before the job was acknowledged");
        match timeout(self.settings.cancel_grace, submit).await {
            Ok(Ok(status)) => {
                self.record_submission(&status.job_id).await;
                return self.cancel_known_job(&status.job_id).await;
            }
            Ok(Err(err)) => warn!("Submission failed after cancellation: {}", err),
            Err(_) => warn!(
                "No submission acknowledgement within {:?}; job may keep running remotely",
                self.settings.cancel_grace
            ),
        }
        self.settle(Err(PrintError::JobCancelled)).await
    }

    async fn cancel_known_job(&self, job_id: &str) -> PrintResult<Value> {
        info!("[{}] Sending cancel request", job_id);
        match timeout(self.settings.cancel_grace, self.service.cancel_job(job_id)).await {
            Ok(Ok(status)) => debug!("[{}] Cancel acknowledged: {:?}", job_id, status.job_status),
            Ok(Err(err)) => warn!("[{}] Cancel request failed: {}", job_id, err),
            Err(_) => warn!("[{}] Cancel request was not acknowledged in time", job_id),
        }
        self.settle(Err(PrintError::JobCancelled)).await
    }

    async fn record_submission(&self, job_id: &str) {
        let mut job = self.job.write().await;
        job.job_id = Some(job_id.to_string());
        job.state = JobState::Submitted;
    }

    async fn mark_running(&self) {
        let mut job = self.job.write().await;
        if !job.state.is_terminal() {
            job.state = JobState::Running;
        }
    }

    async fn settle(&self, result: PrintResult<Value>) -> PrintResult<Value> {
        let mut job = self.job.write().await;
        if job.state.is_terminal() {
            warn!("Ignoring second terminal outcome for job {:?}", job.job_id);
            return result;
        }
        job.state = match &result {
            Ok(value) => JobState::Succeeded(value.clone()),
            Err(PrintError::JobCancelled) => JobState::Cancelled,
            Err(err) => JobState::Failed(err.to_string()),
        };
        job.cancel_requested = self.cancel.is_cancelled();
        result
    }
}

/// Reads `output_name` from a task result document.
///
/// The document may arrive as an object or as JSON text. A non-empty
/// `error` field fails the job with that error.
pub fn extract_output(value: Value, output_name: &str) -> PrintResult<Value> {
    let mut document = match value {
        Value::String(text) => serde_json::from_str::<Value>(&text)?,
        Value::Object(_) => value,
        other => {
            return Err(PrintError::InvalidResponse(format!(
                "unexpected result document: {other}"
            )))
        }
    };

    if let Some(error) = document.get("error") {
        if is_error_set(error) {
            return Err(PrintError::JobFailed(error.clone()));
        }
    }

    document
        .get_mut(output_name)
        .map(Value::take)
        .ok_or_else(|| {
            PrintError::InvalidResponse(format!("result has no '{output_name}' entry"))
        })
}

fn is_error_set(error: &Value) -> bool {
    match error {
        Value::Null | Value::Bool(false) => false,
        Value::String(text) => !text.is_empty(),
        _ => true,
    }
}
