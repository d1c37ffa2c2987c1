//! Seams towards the remote print, legend and metadata endpoints.
//!
//! The pipeline only talks to these traits; [`super::RestClient`] implements
//! them over HTTP, tests implement them in memory.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PrintResult;

/// Form parameters of a geoprocessing job, in submission order.
pub type JobParameters = IndexMap<String, String>;

/// Status of a remote job as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteJobStatus {
    #[serde(rename = "esriJobNew")]
    New,
    #[serde(rename = "esriJobSubmitted")]
    Submitted,
    #[serde(rename = "esriJobWaiting")]
    Waiting,
    #[serde(rename = "esriJobExecuting")]
    Executing,
    #[serde(rename = "esriJobSucceeded")]
    Succeeded,
    #[serde(rename = "esriJobFailed")]
    Failed,
    #[serde(rename = "esriJobTimedOut")]
    TimedOut,
    #[serde(rename = "esriJobCancelling")]
    Cancelling,
    #[serde(rename = "esriJobCancelled")]
    Cancelled,
}

impl RemoteJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }
}

/// Job acknowledgement / status document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub job_id: String,
    pub job_status: RemoteJobStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Value>,
}

impl JobInfo {
    pub fn new(job_id: &str, job_status: RemoteJobStatus) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_status,
            messages: Vec::new(),
        }
    }
}

/// One sub-layer of a map service legend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegendLayer {
    pub layer_id: i64,
    #[serde(default)]
    pub layer_name: Option<String>,
    #[serde(default)]
    pub legend: Vec<Value>,
    #[serde(default)]
    pub min_scale: f64,
    #[serde(default)]
    pub max_scale: f64,
}

/// Response of `<layerUrl>/legend?f=json`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LegendResponse {
    #[serde(default)]
    pub layers: Vec<LegendLayer>,
}

/// How the metadata response body is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHandling {
    /// Accept whatever the endpoint sends and parse it as JSON text.
    Auto,
    /// Insist on a JSON response.
    Json,
}

/// Asynchronous geoprocessing job endpoint.
#[async_trait]
pub trait GeoprocessingService: Send + Sync {
    async fn submit_job(&self, params: &JobParameters) -> PrintResult<JobInfo>;
    async fn job_status(&self, job_id: &str) -> PrintResult<JobInfo>;
    async fn job_result(&self, job_id: &str, param_name: &str) -> PrintResult<Value>;
    async fn cancel_job(&self, job_id: &str) -> PrintResult<JobInfo>;
}

/// Legend endpoint of composite map services.
#[async_trait]
pub trait LegendService: Send + Sync {
    async fn fetch_legend(&self, layer_url: &str) -> PrintResult<LegendResponse>;
}

/// Print service description endpoint.
#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn fetch_service_info(&self, handling: ResponseHandling) -> PrintResult<Value>;
}
