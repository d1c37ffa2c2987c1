use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::remote::{
    GeoprocessingService, JobInfo, JobParameters, LegendResponse, LegendService, MetadataService,
    ResponseHandling,
};
use crate::errors::{PrintError, PrintResult};

/// HTTP client for an ArcGIS-style geoprocessing print task and the map
/// services it prints.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    task_url: Url,
}

impl RestClient {
    pub fn new(task_url: Url, request_timeout: Duration) -> PrintResult<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, task_url })
    }

    pub fn task_url(&self) -> &Url {
        &self.task_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.task_url.as_str().trim_end_matches('/'), path)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> PrintResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        parse_json_body(status, &text)
    }
}

/// Classifies a response body. A failure status wins over whatever the body
/// holds, so HTML error pages surface as an unavailable service.
fn parse_json_body<T: DeserializeOwned>(status: StatusCode, text: &str) -> PrintResult<T> {
    if !status.is_success() {
        return Err(PrintError::ServiceUnavailable(format!(
            "HTTP {status}: {}",
            text.chars().take(200).collect::<String>()
        )));
    }
    let body: Value = serde_json::from_str(text)?;
    if let Some(error) = body.get("error").filter(|e| e.is_object()) {
        return Err(PrintError::ServiceUnavailable(error.to_string()));
    }
    Ok(serde_json::from_value(body)?)
}

#[async_trait]
impl GeoprocessingService for RestClient {
    async fn submit_job(&self, params: &JobParameters) -> PrintResult<JobInfo> {
        let url = self.endpoint("submitJob");
        debug!("POST {} ({} parameter(s))", url, params.len());
        let mut form: Vec<(&str, &str)> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        form.push(("f", "json"));
        self.send_json(self.client.post(url).form(&form)).await
    }

    async fn job_status(&self, job_id: &str) -> PrintResult<JobInfo> {
        let url = self.endpoint(&format!("jobs/{job_id}"));
        self.send_json(self.client.get(url).query(&[("f", "json")]))
            .await
    }

    async fn job_result(&self, job_id: &str, param_name: &str) -> PrintResult<Value> {
        let url = self.endpoint(&format!("jobs/{job_id}/results/{param_name}"));
        let mut body: Value = self
            .send_json(self.client.get(url).query(&[("f", "json")]))
            .await?;
        body.get_mut("value").map(Value::take).ok_or_else(|| {
            PrintError::InvalidResponse(format!("result '{param_name}' has no value"))
        })
    }

    async fn cancel_job(&self, job_id: &str) -> PrintResult<JobInfo> {
        let url = self.endpoint(&format!("jobs/{job_id}/cancel"));
        self.send_json(self.client.post(url).form(&[("f", "json")]))
            .await
    }
}

#[async_trait]
impl LegendService for RestClient {
    async fn fetch_legend(&self, layer_url: &str) -> PrintResult<LegendResponse> {
        let url = format!("{}/legend", layer_url.trim_end_matches('/'));
        self.send_json(self.client.get(url).query(&[("f", "json")]))
            .await
    }
}

#[async_trait]
impl MetadataService for RestClient {
    async fn fetch_service_info(&self, handling: ResponseHandling) -> PrintResult<Value> {
        let mut request = self
            .client
            .get(self.task_url.clone())
            .query(&[("f", "json")]);
        if handling == ResponseHandling::Json {
            request = request.header(reqwest::header::ACCEPT, "application/json");
        }
        // Authentication challenges come back as `{error: {...}}` and are
        // handled by the caller, so the body is returned untouched.
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        match serde_json::from_str::<Value>(&text) {
            Ok(body) => Ok(body),
            Err(_) if !status.is_success() => Err(PrintError::ServiceUnavailable(format!(
                "HTTP {status} from {}",
                self.task_url
            ))),
            Err(err) => Err(err.into()),
        }
    }
}
