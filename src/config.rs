use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{PrintError, PrintResult};
use crate::services::JobSettings;
use crate::templates::UserTemplate;
use crate::text::LayoutRule;

pub const SERVICE_URL_ENV: &str = "WEBMAP_PRINT_SERVICE_URL";
pub const PAGE_URL_ENV: &str = "WEBMAP_PRINT_PAGE_URL";

/// Print service settings, usually read from a YAML file.
///
/// ```yaml
/// service_url: https://gis.example.com/arcgis/rest/services/Print/GPServer/Export
/// poll_interval: 0.5
/// quality:
///   low: 96
///   high: 300
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintServiceConfig {
    /// Geoprocessing task that renders prints.
    pub service_url: Option<String>,
    /// Page the map runs in; base for relative picture symbol URLs.
    pub page_url: Option<String>,
    #[serde(with = "seconds")]
    pub poll_interval: Duration,
    #[serde(with = "seconds")]
    pub cancel_grace: Duration,
    #[serde(with = "seconds")]
    pub request_timeout: Duration,
    /// Named dpi presets.
    pub quality: IndexMap<String, u32>,
    pub default_format: Option<String>,
    pub default_layout: Option<String>,
    /// Replaces the built-in text wrapping table when set.
    pub text_rules: Option<Vec<LayoutRule>>,
    pub user_templates: Vec<UserTemplate>,
}

impl Default for PrintServiceConfig {
    fn default() -> Self {
        let mut quality = IndexMap::new();
        quality.insert("low".to_string(), 96);
        quality.insert("high".to_string(), 300);

        Self {
            service_url: None,
            page_url: None,
            poll_interval: Duration::from_secs(1),
            cancel_grace: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            quality,
            default_format: None,
            default_layout: None,
            text_rules: None,
            user_templates: Vec::new(),
        }
    }
}

impl PrintServiceConfig {
    pub fn from_yaml(yaml: &str) -> PrintResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| PrintError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> PrintResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PrintError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Applies `WEBMAP_PRINT_SERVICE_URL` and `WEBMAP_PRINT_PAGE_URL`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(SERVICE_URL_ENV) {
            self.service_url = Some(url);
        }
        if let Ok(url) = std::env::var(PAGE_URL_ENV) {
            self.page_url = Some(url);
        }
        self
    }

    pub fn service_url(&self) -> PrintResult<Url> {
        let raw = self
            .service_url
            .as_deref()
            .ok_or_else(|| PrintError::Config("no print service url configured".to_string()))?;
        Url::parse(raw).map_err(|e| PrintError::Config(format!("invalid service url '{raw}': {e}")))
    }

    pub fn page_url(&self) -> PrintResult<Option<Url>> {
        self.page_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| PrintError::Config(format!("invalid page url '{raw}': {e}")))
            })
            .transpose()
    }

    /// Dpi of a named quality preset.
    pub fn quality_dpi(&self, preset: &str) -> Option<u32> {
        self.quality.get(preset).copied()
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            poll_interval: self.poll_interval,
            cancel_grace: self.cancel_grace,
        }
    }

    pub fn user_template(&self, id: &str) -> Option<&UserTemplate> {
        self.user_templates.iter().find(|t| t.id == id)
    }
}

/// Durations as (fractional) seconds.
mod seconds {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
