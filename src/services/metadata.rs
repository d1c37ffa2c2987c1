//! Print service description: published formats, layouts and templates.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::remote::{MetadataService, ResponseHandling};
use crate::errors::{PrintError, PrintResult};

pub const FORMAT_PARAM: &str = "Format";
pub const LAYOUT_PARAM: &str = "Layout_Template";
pub const TEMPLATE_PARAM: &str = "MXD_Template";

/// One published task parameter with its allowed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceParameter {
    pub name: String,
    /// Allowed values, sorted.
    #[serde(default)]
    pub choice_list: Vec<String>,
    #[serde(default)]
    pub default_value: Option<String>,
}

/// What the settings surface needs to know about the print service.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub formats: Option<ServiceParameter>,
    pub layouts: Option<ServiceParameter>,
    pub templates: Option<ServiceParameter>,
    /// Well-known parameters the service does not publish.
    pub missing: Vec<String>,
}

impl ServiceInfo {
    /// Reads the well-known parameters from a service description.
    pub fn from_description(description: &Value) -> PrintResult<Self> {
        let parameters = description
            .get("parameters")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                PrintError::InvalidResponse("service description has no parameters".to_string())
            })?;

        let mut info = ServiceInfo::default();
        for (name, slot) in [
            (FORMAT_PARAM, &mut info.formats),
            (LAYOUT_PARAM, &mut info.layouts),
            (TEMPLATE_PARAM, &mut info.templates),
        ] {
            *slot = find_parameter(parameters, name);
        }
        info.missing = [
            (FORMAT_PARAM, info.formats.is_none()),
            (LAYOUT_PARAM, info.layouts.is_none()),
            (TEMPLATE_PARAM, info.templates.is_none()),
        ]
        .into_iter()
        .filter(|(_, missing)| *missing)
        .map(|(name, _)| name.to_string())
        .collect();

        for name in &info.missing {
            warn!("Print service does not publish the '{}' parameter", name);
        }
        Ok(info)
    }

    /// Missing parameters as non-fatal configuration warnings.
    pub fn warnings(&self) -> Vec<PrintError> {
        self.missing
            .iter()
            .map(|name| PrintError::ConfigurationMismatch(name.clone()))
            .collect()
    }
}

fn find_parameter(parameters: &[Value], name: &str) -> Option<ServiceParameter> {
    let raw = parameters
        .iter()
        .find(|p| p.get("name").and_then(Value::as_str) == Some(name))?;

    let mut choice_list: Vec<String> = raw
        .get("choiceList")
        .and_then(Value::as_array)
        .map(|choices| {
            choices
                .iter()
                .filter_map(|c| c.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    choice_list.sort();

    let default_value = match raw.get("defaultValue") {
        Some(Value::String(value)) => Some(value.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };

    Some(ServiceParameter {
        name: name.to_string(),
        choice_list,
        default_value,
    })
}

/// `(code, message)` of an authentication challenge response.
fn auth_challenge(response: &Value) -> Option<(i64, String)> {
    let error = response.get("error")?.as_object()?;
    let code = error.get("code").and_then(Value::as_i64)?;
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((code, message))
}

/// Fetches the service description. An authentication challenge is retried
/// once with JSON response handling forced.
pub async fn fetch_description(service: &dyn MetadataService) -> PrintResult<Value> {
    let response = service.fetch_service_info(ResponseHandling::Auto).await?;
    let Some((code, message)) = auth_challenge(&response) else {
        return Ok(response);
    };

    debug!("Metadata request challenged ({}): {}; retrying as JSON", code, message);
    let retried = service.fetch_service_info(ResponseHandling::Json).await?;
    match auth_challenge(&retried) {
        Some((code, message)) => Err(PrintError::AuthenticationRequired { code, message }),
        None => Ok(retried),
    }
}

pub async fn fetch_service_info(service: &dyn MetadataService) -> PrintResult<ServiceInfo> {
    let description = fetch_description(service).await?;
    ServiceInfo::from_description(&description)
}
