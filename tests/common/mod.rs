//! In-memory stand-ins for the remote print, legend and metadata services.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use webmap_print::services::{
    GeoprocessingService, JobInfo, JobParameters, JobSettings, LegendResponse, LegendService,
    MetadataService, RemoteJobStatus, ResponseHandling,
};
use webmap_print::webmap::{
    Extent, LayerKind, LiveLayer, MapState, Renderer, SpatialReference, WebMapDefinition,
};
use webmap_print::{PrintError, PrintResult};

pub const JOB_ID: &str = "j-0001";

/// Geoprocessing task that walks through a scripted list of statuses.
pub struct FakeGeoprocessing {
    submit_delay: Duration,
    initial: RemoteJobStatus,
    statuses: Mutex<VecDeque<RemoteJobStatus>>,
    messages: Vec<Value>,
    result: Value,
    pub submitted: Mutex<Vec<JobParameters>>,
    pub cancelled: Mutex<Vec<String>>,
    pub status_calls: AtomicUsize,
}

impl FakeGeoprocessing {
    pub fn new(initial: RemoteJobStatus, statuses: Vec<RemoteJobStatus>) -> Self {
        Self {
            submit_delay: Duration::ZERO,
            initial,
            statuses: Mutex::new(statuses.into()),
            messages: Vec::new(),
            result: json!({"error": "", "url": "https://gis.example.com/output/print.pdf"}),
            submitted: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            status_calls: AtomicUsize::new(0),
        }
    }

    /// Succeeds after one executing status.
    pub fn succeeding() -> Self {
        Self::new(
            RemoteJobStatus::Submitted,
            vec![RemoteJobStatus::Executing, RemoteJobStatus::Succeeded],
        )
    }

    /// Keeps executing until cancelled.
    pub fn running() -> Self {
        Self::new(RemoteJobStatus::Submitted, vec![RemoteJobStatus::Executing])
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn with_messages(mut self, messages: Vec<Value>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = result;
        self
    }

    pub fn submitted_params(&self) -> Vec<JobParameters> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn cancelled_jobs(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    fn info(&self, status: RemoteJobStatus) -> JobInfo {
        let mut info = JobInfo::new(JOB_ID, status);
        if matches!(status, RemoteJobStatus::Failed | RemoteJobStatus::TimedOut) {
            info.messages = self.messages.clone();
        }
        info
    }
}

#[async_trait]
impl GeoprocessingService for FakeGeoprocessing {
    async fn submit_job(&self, params: &JobParameters) -> PrintResult<JobInfo> {
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        self.submitted.lock().unwrap().push(params.clone());
        Ok(self.info(self.initial))
    }

    async fn job_status(&self, job_id: &str) -> PrintResult<JobInfo> {
        assert_eq!(job_id, JOB_ID);
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front().unwrap()
        } else {
            *statuses.front().unwrap_or(&RemoteJobStatus::Executing)
        };
        Ok(self.info(status))
    }

    async fn job_result(&self, job_id: &str, param_name: &str) -> PrintResult<Value> {
        assert_eq!(job_id, JOB_ID);
        assert_eq!(param_name, "result");
        Ok(self.result.clone())
    }

    async fn cancel_job(&self, job_id: &str) -> PrintResult<JobInfo> {
        self.cancelled.lock().unwrap().push(job_id.to_string());
        Ok(self.info(RemoteJobStatus::Cancelling))
    }
}

/// Legend endpoint serving canned responses per layer url.
#[derive(Default)]
pub struct FakeLegend {
    responses: HashMap<String, LegendResponse>,
    pub calls: AtomicUsize,
}

impl FakeLegend {
    pub fn with_response(mut self, layer_url: &str, response: Value) -> Self {
        let response = serde_json::from_value(response).unwrap();
        self.responses.insert(layer_url.to_string(), response);
        self
    }
}

#[async_trait]
impl LegendService for FakeLegend {
    async fn fetch_legend(&self, layer_url: &str) -> PrintResult<LegendResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(layer_url)
            .cloned()
            .ok_or_else(|| PrintError::ServiceUnavailable(format!("no legend at {layer_url}")))
    }
}

/// Metadata endpoint answering with a fixed sequence of bodies.
pub struct FakeMetadata {
    responses: Mutex<VecDeque<Value>>,
    pub handling: Mutex<Vec<ResponseHandling>>,
}

impl FakeMetadata {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            handling: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MetadataService for FakeMetadata {
    async fn fetch_service_info(&self, handling: ResponseHandling) -> PrintResult<Value> {
        self.handling.lock().unwrap().push(handling);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PrintError::ServiceUnavailable("no more responses".to_string()))
    }
}

pub fn fast_settings() -> JobSettings {
    JobSettings {
        poll_interval: Duration::from_millis(5),
        cancel_grace: Duration::from_millis(500),
    }
}

pub fn simple_feature_layer(id: &str) -> LiveLayer {
    LiveLayer {
        id: id.to_string(),
        title: Some(id.to_string()),
        url: Some(format!("https://gis.example.com/FeatureServer/{id}")),
        opacity: 1.0,
        visible: true,
        min_scale: 0.0,
        max_scale: 0.0,
        kind: LayerKind::Feature {
            renderer: Renderer::Simple,
            layer_definition: None,
            popup_info: None,
        },
    }
}

pub fn map_state(layers: Vec<LiveLayer>) -> MapState {
    let spatial_reference = SpatialReference {
        wkid: 2193,
        latest_wkid: Some(2193),
    };
    MapState {
        extent: Extent {
            xmin: 1_754_040.0,
            ymin: 5_920_576.0,
            xmax: 1_755_022.0,
            ymax: 5_921_225.0,
            spatial_reference: Some(spatial_reference),
        },
        scale: 2500.0,
        spatial_reference,
        layers,
        base_map_layers: Vec::new(),
        base_map_title: None,
        definition: WebMapDefinition::default(),
    }
}
