use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use super::cancel::CancelToken;
use super::job_orchestrator::{JobOrchestrator, JobSettings};
use super::metadata::{self, ServiceInfo};
use super::remote::{GeoprocessingService, JobParameters, LegendService, MetadataService};
use crate::config::PrintServiceConfig;
use crate::errors::{PrintError, PrintResult};
use crate::legend::LegendAggregator;
use crate::templates::{resolve_templates, SelectionResults, TemplateSelection};
use crate::text::TextFormatter;
use crate::webmap::{Extent, MapState, PrintWebMap, WebMapAssembler};

/// Output the print task writes the document URL to.
pub const URL_OUTPUT: &str = "url";
pub const LAYOUTS_OUTPUT: &str = "layouts";
pub const TEMPLATES_OUTPUT: &str = "templates";

/// Which scale the printed map uses.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ScaleMode {
    /// The scale of the live map.
    #[default]
    Keep,
    Force(f64),
    /// Fit the extent and let the service pick the scale.
    Extent,
}

impl ScaleMode {
    /// Scale the page prints at, or `None` when the service derives it from
    /// the extent.
    pub fn print_scale(&self, map_scale: f64) -> Option<f64> {
        match self {
            ScaleMode::Keep => Some(map_scale),
            ScaleMode::Force(scale) => Some(*scale),
            ScaleMode::Extent => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Quality {
    /// Named preset from the configuration.
    Preset(String),
    Dpi(u32),
}

/// What the user asked to print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintRequest {
    pub template: TemplateSelection,
    pub layout: String,
    pub format: String,
    #[serde(default)]
    pub text_elements: IndexMap<String, String>,
    #[serde(default)]
    pub quality: Option<Quality>,
    #[serde(default)]
    pub scale_mode: ScaleMode,
    #[serde(default)]
    pub extent: Option<Extent>,
    /// Levels of detail the printed scale snaps to.
    #[serde(default)]
    pub lods: Option<Value>,
    #[serde(default)]
    pub include_legend: bool,
}

/// An assembled document with the form parameters that submit it.
#[derive(Debug, Clone)]
pub struct PreparedPrint {
    pub web_map: PrintWebMap,
    pub params: JobParameters,
}

#[derive(Debug, Clone)]
pub struct PrintOutput {
    pub url: String,
    pub web_map: PrintWebMap,
}

/// Handle to a print running in the background.
pub struct PrintTask {
    handle: JoinHandle<PrintResult<PrintOutput>>,
    cancel: CancelToken,
}

impl PrintTask {
    /// Stops the print. Before submission nothing is sent to the service;
    /// afterwards the remote job is cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> PrintResult<PrintOutput> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Err(PrintError::JobCancelled),
            Err(err) => Err(PrintError::InvalidResponse(format!(
                "print task ended abnormally: {err}"
            ))),
        }
    }
}

/// Entry point for printing a live map.
#[derive(Clone)]
pub struct PrintCoordinator {
    config: Arc<PrintServiceConfig>,
    geoprocessing: Arc<dyn GeoprocessingService>,
    metadata: Arc<dyn MetadataService>,
    assembler: WebMapAssembler,
    formatter: TextFormatter,
}

impl PrintCoordinator {
    pub fn new(
        config: PrintServiceConfig,
        geoprocessing: Arc<dyn GeoprocessingService>,
        legend: Arc<dyn LegendService>,
        metadata: Arc<dyn MetadataService>,
    ) -> PrintResult<Self> {
        let mut assembler = WebMapAssembler::new(LegendAggregator::new(legend));
        if let Some(page_url) = config.page_url()? {
            assembler = assembler.with_page_url(page_url);
        }
        let formatter = match &config.text_rules {
            Some(rules) => TextFormatter::new(rules.clone()),
            None => TextFormatter::default(),
        };
        Ok(Self {
            config: Arc::new(config),
            geoprocessing,
            metadata,
            assembler,
            formatter,
        })
    }

    /// Coordinator talking to the configured print service over HTTP.
    #[cfg(feature = "http")]
    pub fn from_config(config: PrintServiceConfig) -> PrintResult<Self> {
        let client = Arc::new(super::RestClient::new(
            config.service_url()?,
            config.request_timeout,
        )?);
        Self::new(config, client.clone(), client.clone(), client)
    }

    pub fn config(&self) -> &PrintServiceConfig {
        &self.config
    }

    fn job_settings(&self) -> JobSettings {
        self.config.job_settings()
    }

    /// Server templates to print for a configured user template, given the
    /// caller's selection results.
    pub fn template_for(
        &self,
        user_template_id: &str,
        results: &SelectionResults,
    ) -> PrintResult<TemplateSelection> {
        let template = self.config.user_template(user_template_id).ok_or_else(|| {
            PrintError::Config(format!("unknown user template '{user_template_id}'"))
        })?;
        resolve_templates(template, results).into_selection(template)
    }

    /// Assembles the document and builds the submission parameters.
    #[instrument(skip_all, fields(layout = %request.layout))]
    pub async fn prepare(&self, map: &MapState, request: &PrintRequest) -> PrintResult<PreparedPrint> {
        let web_map = self
            .assembler
            .assemble(map, request.scale_mode.print_scale(map.scale))
            .await?;

        let mut params = JobParameters::new();
        params.insert("template".to_string(), request.template.to_param()?);
        params.insert("layout".to_string(), request.layout.clone());
        params.insert("getlayouts".to_string(), "false".to_string());
        params.insert("webmap".to_string(), web_map.to_json_string()?);
        params.insert(
            "textelements".to_string(),
            self.text_elements_param(request)?,
        );
        params.insert("format".to_string(), request.format.clone());
        params.insert("quality".to_string(), self.quality_param(request.quality.as_ref()));

        let (scale, extent) = match request.scale_mode {
            ScaleMode::Keep => (positive_scale(map.scale), request.extent),
            ScaleMode::Force(scale) => (positive_scale(scale), request.extent),
            ScaleMode::Extent => (String::new(), request.extent.or(Some(map.extent))),
        };
        params.insert("scale".to_string(), scale);
        params.insert(
            "extent".to_string(),
            match extent {
                Some(extent) => serde_json::to_string(&extent)?,
                None => String::new(),
            },
        );
        params.insert(
            "lods".to_string(),
            match &request.lods {
                Some(lods) => serde_json::to_string(lods)?,
                None => String::new(),
            },
        );
        params.insert("includelegend".to_string(), request.include_legend.to_string());

        Ok(PreparedPrint { web_map, params })
    }

    fn text_elements_param(&self, request: &PrintRequest) -> PrintResult<String> {
        let formatted = self.formatter.format(
            &request.text_elements,
            &request.layout,
            request.template.text_hint(),
        );
        match formatted {
            Some(elements) => Ok(serde_json::to_string(&elements)?),
            None => {
                if !request.text_elements.is_empty() {
                    warn!("No text rule for layout '{}'; text elements dropped", request.layout);
                }
                Ok(String::new())
            }
        }
    }

    fn quality_param(&self, quality: Option<&Quality>) -> String {
        match quality {
            Some(Quality::Dpi(dpi)) => dpi.to_string(),
            Some(Quality::Preset(name)) => match self.config.quality_dpi(name) {
                Some(dpi) => dpi.to_string(),
                None => {
                    warn!("Unknown quality preset '{}'; using the service default", name);
                    String::new()
                }
            },
            None => String::new(),
        }
    }

    /// Starts printing `map` in the background.
    pub fn print(&self, map: MapState, request: PrintRequest) -> PrintTask {
        let cancel = CancelToken::new();
        let task_cancel = cancel.clone();
        let coordinator = self.clone();

        let handle =
            tokio::spawn(async move { coordinator.run_print(map, request, task_cancel).await });

        PrintTask { handle, cancel }
    }

    async fn run_print(
        &self,
        map: MapState,
        request: PrintRequest,
        cancel: CancelToken,
    ) -> PrintResult<PrintOutput> {
        let prepared = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Print cancelled before submission");
                return Err(PrintError::JobCancelled);
            }
            prepared = self.prepare(&map, &request) => prepared?,
        };

        let orchestrator =
            JobOrchestrator::with_cancel_token(self.geoprocessing.clone(), self.job_settings(), cancel);
        let value = orchestrator.execute(prepared.params, URL_OUTPUT).await?;
        let url = value.as_str().map(str::to_string).ok_or_else(|| {
            PrintError::InvalidResponse(format!("print url is not a string: {value}"))
        })?;
        info!("Print ready at {}", url);

        Ok(PrintOutput {
            url,
            web_map: prepared.web_map,
        })
    }

    /// Layout names published for `template`.
    pub async fn list_layouts(&self, template: &str) -> PrintResult<Vec<String>> {
        let mut params = JobParameters::new();
        params.insert("template".to_string(), template.to_string());
        params.insert("getlayouts".to_string(), "true".to_string());
        self.run_listing(params, LAYOUTS_OUTPUT).await
    }

    /// Server template names.
    pub async fn list_templates(&self) -> PrintResult<Vec<String>> {
        let mut params = JobParameters::new();
        params.insert("gettemplates".to_string(), "true".to_string());
        self.run_listing(params, TEMPLATES_OUTPUT).await
    }

    async fn run_listing(&self, params: JobParameters, output: &str) -> PrintResult<Vec<String>> {
        let orchestrator = JobOrchestrator::new(self.geoprocessing.clone(), self.job_settings());
        let value = orchestrator.execute(params, output).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn service_info(&self) -> PrintResult<ServiceInfo> {
        metadata::fetch_service_info(self.metadata.as_ref()).await
    }
}

fn positive_scale(scale: f64) -> String {
    if scale.is_finite() && scale > 0.0 {
        scale.to_string()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_param_is_empty_unless_positive() {
        assert_eq!(positive_scale(2500.0), "2500");
        assert_eq!(positive_scale(0.0), "");
        assert_eq!(positive_scale(-1.0), "");
        assert_eq!(positive_scale(f64::NAN), "");
    }

    #[test]
    fn print_scale_follows_scale_mode() {
        assert_eq!(ScaleMode::Keep.print_scale(2500.0), Some(2500.0));
        assert_eq!(ScaleMode::Force(10_000.0).print_scale(2500.0), Some(10_000.0));
        assert_eq!(ScaleMode::Extent.print_scale(2500.0), None);
    }

    #[test]
    fn print_request_reads_from_json() {
        let request: PrintRequest = serde_json::from_value(serde_json::json!({
            "template": ["Base", "Zoning"],
            "layout": "A4 Portrait",
            "format": "PDF",
            "quality": {"Preset": "high"},
            "scale_mode": {"Force": 5000.0}
        }))
        .unwrap();
        assert_eq!(request.template.text_hint(), Some("Base"));
        assert_eq!(request.scale_mode, ScaleMode::Force(5000.0));
        assert!(!request.include_legend);
    }
}
