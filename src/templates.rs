//! Conditional print templates.
//!
//! A user-facing template maps onto one or more server templates. Some
//! server templates only print when a selection made on the map intersects
//! a target layer; the spatial work is done by the caller and handed in as
//! [`SelectionResults`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{PrintError, PrintResult};

/// Relationship value of an unconditioned server template.
pub const NO_RELATIONSHIP: &str = "None";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerTemplate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    #[serde(default, rename = "selectionlayer", skip_serializing_if = "Option::is_none")]
    pub selection_layer: Option<String>,
    #[serde(default, rename = "targetlayer", skip_serializing_if = "Option::is_none")]
    pub target_layer: Option<String>,
    /// Buffer applied to the selection before intersecting, in metres.
    #[serde(default, rename = "bufferdistance", skip_serializing_if = "Option::is_none")]
    pub buffer_distance: Option<f64>,
}

impl ServerTemplate {
    pub fn unconditional(name: &str) -> Self {
        Self {
            name: name.to_string(),
            relationship: None,
            selection_layer: None,
            target_layer: None,
            buffer_distance: None,
        }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self.relationship.as_deref(), Some(rel) if !rel.is_empty() && rel != NO_RELATIONSHIP)
    }
}

/// Template offered to users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTemplate {
    pub id: String,
    pub name: String,
    /// Fixed layout list; when absent layouts are read from the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layouts: Option<Vec<String>>,
    #[serde(default)]
    pub server_templates: Vec<ServerTemplate>,
}

/// Name and URL of a map layer, either of which may identify it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayerRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl LayerRef {
    /// Case-insensitive match against a layer name, or a layer URL when the
    /// key starts with `http`.
    pub fn matches(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        let candidate = if key.starts_with("http") {
            self.url.as_deref()
        } else {
            self.name.as_deref()
        };
        candidate.map(str::to_lowercase).as_deref() == Some(key.as_str())
    }
}

/// Features selected on the map, named after the tool that produced them
/// and the layer they came from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectionSet {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub layer: Option<LayerRef>,
    pub feature_count: usize,
}

impl SelectionSet {
    fn matches(&self, key: &str) -> bool {
        let is_url = key.to_lowercase().starts_with("http");
        if !is_url
            && self
                .name
                .as_deref()
                .is_some_and(|name| name.eq_ignore_ascii_case(key))
        {
            return true;
        }
        self.layer.as_ref().is_some_and(|layer| layer.matches(key))
    }
}

/// Outcome of intersecting a buffered selection with a target layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Intersection {
    Features(usize),
    Failed(String),
}

/// Spatial checks computed by the caller for a print request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionResults {
    #[serde(default)]
    pub selections: Vec<SelectionSet>,
    /// Layers present in the map that may act as targets.
    #[serde(default)]
    pub layers: Vec<LayerRef>,
    /// Intersection outcomes keyed by server template name.
    #[serde(default)]
    pub intersections: HashMap<String, Intersection>,
}

impl SelectionResults {
    pub fn selection(&self, key: &str) -> Option<&SelectionSet> {
        self.selections.iter().find(|set| set.matches(key))
    }

    pub fn has_layer(&self, key: &str) -> bool {
        self.layers.iter().any(|layer| layer.matches(key))
    }
}

/// The template parameter of a print submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateSelection {
    Single(String),
    Candidates(Vec<String>),
}

impl TemplateSelection {
    /// Template name used to pick a text layout rule.
    pub fn text_hint(&self) -> Option<&str> {
        match self {
            TemplateSelection::Single(name) => Some(name),
            TemplateSelection::Candidates(names) => names.first().map(String::as_str),
        }
    }

    /// Form value: the plain name, or the candidates as a JSON array.
    pub fn to_param(&self) -> PrintResult<String> {
        match self {
            TemplateSelection::Single(name) => Ok(name.clone()),
            TemplateSelection::Candidates(names) => Ok(serde_json::to_string(names)?),
        }
    }
}

/// Server templates sorted by whether their conditions hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateResolution {
    pub names: Vec<String>,
    pub missing_selection: Vec<ServerTemplate>,
    pub failed: Vec<ServerTemplate>,
}

impl TemplateResolution {
    /// Turns the resolution into a template parameter, or into the message
    /// to show when the print cannot go ahead.
    pub fn into_selection(self, template: &UserTemplate) -> PrintResult<TemplateSelection> {
        if let Some(first) = self.missing_selection.first() {
            return Err(PrintError::TemplateConditions(format!(
                "No features were selected from layer \"{}\". A single selection from this layer is required before a \"{}\" print can be made.",
                first.selection_layer.as_deref().unwrap_or_default(),
                template.name
            )));
        }
        if !self.failed.is_empty() {
            return Err(PrintError::TemplateConditions(
                "An error occurred when checking the conditions for printing this template. Please contact the administrator.".to_string(),
            ));
        }
        if self.names.is_empty() {
            return Err(PrintError::TemplateConditions(format!(
                "None of the templates of \"{}\" apply to the current selection.",
                template.name
            )));
        }
        Ok(TemplateSelection::Candidates(self.names))
    }
}

/// Decides which server templates of `template` print.
pub fn resolve_templates(template: &UserTemplate, results: &SelectionResults) -> TemplateResolution {
    let mut resolution = TemplateResolution::default();

    for server in &template.server_templates {
        if !server.is_conditional() {
            resolution.names.push(server.name.clone());
            continue;
        }

        let target = server.target_layer.as_deref().unwrap_or_default();
        let selection = server
            .selection_layer
            .as_deref()
            .and_then(|key| results.selection(key))
            .filter(|set| set.feature_count > 0);

        if !results.has_layer(target) {
            debug!("Target layer '{}' of template {} not in map", target, server.name);
            resolution.failed.push(server.clone());
            continue;
        }
        if selection.is_none() {
            resolution.missing_selection.push(server.clone());
            continue;
        }

        match results.intersections.get(&server.name) {
            Some(Intersection::Features(count)) if *count > 0 => {
                resolution.names.push(server.name.clone())
            }
            Some(Intersection::Features(_)) => {
                debug!("Template {} has no intersecting features", server.name)
            }
            Some(Intersection::Failed(reason)) => {
                debug!("Intersection for template {} failed: {}", server.name, reason);
                resolution.failed.push(server.clone());
            }
            None => resolution.failed.push(server.clone()),
        }
    }

    resolution
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conditional(name: &str) -> ServerTemplate {
        ServerTemplate {
            name: name.to_string(),
            relationship: Some("SPATIAL_REL_INTERSECTS".to_string()),
            selection_layer: Some("Parcels".to_string()),
            target_layer: Some("https://gis.example.com/MapServer/3".to_string()),
            buffer_distance: Some(10.0),
        }
    }

    fn user_template(server_templates: Vec<ServerTemplate>) -> UserTemplate {
        UserTemplate {
            id: "t1".to_string(),
            name: "Property Report".to_string(),
            layouts: None,
            server_templates,
        }
    }

    fn results(selected: usize, intersection: Option<Intersection>) -> SelectionResults {
        let mut intersections = HashMap::new();
        if let Some(intersection) = intersection {
            intersections.insert("Zoning".to_string(), intersection);
        }
        SelectionResults {
            selections: vec![SelectionSet {
                name: None,
                layer: Some(LayerRef {
                    name: Some("parcels".to_string()),
                    url: None,
                }),
                feature_count: selected,
            }],
            layers: vec![LayerRef {
                name: Some("Zoning".to_string()),
                url: Some("https://GIS.example.com/MapServer/3".to_string()),
            }],
            intersections,
        }
    }

    #[test]
    fn unconditional_templates_always_print() {
        let template = user_template(vec![
            ServerTemplate::unconditional("Base"),
            ServerTemplate {
                relationship: Some(NO_RELATIONSHIP.to_string()),
                ..ServerTemplate::unconditional("Overview")
            },
        ]);
        let resolution = resolve_templates(&template, &SelectionResults::default());
        assert_eq!(resolution.names, vec!["Base", "Overview"]);
    }

    #[test]
    fn intersecting_template_is_included() {
        let template = user_template(vec![ServerTemplate::unconditional("Base"), conditional("Zoning")]);
        let resolution = resolve_templates(&template, &results(1, Some(Intersection::Features(3))));
        let selection = resolution.into_selection(&template).unwrap();
        assert_eq!(
            selection,
            TemplateSelection::Candidates(vec!["Base".to_string(), "Zoning".to_string()])
        );
        assert_eq!(selection.text_hint(), Some("Base"));
        assert_eq!(selection.to_param().unwrap(), "[\"Base\",\"Zoning\"]");
    }

    #[test]
    fn empty_intersection_skips_template() {
        let template = user_template(vec![ServerTemplate::unconditional("Base"), conditional("Zoning")]);
        let resolution = resolve_templates(&template, &results(1, Some(Intersection::Features(0))));
        assert_eq!(resolution.names, vec!["Base"]);
        assert!(resolution.failed.is_empty());
    }

    #[test]
    fn missing_selection_explains_which_layer() {
        let template = user_template(vec![conditional("Zoning")]);
        let resolution = resolve_templates(&template, &results(0, None));
        assert_eq!(resolution.missing_selection.len(), 1);
        match resolution.into_selection(&template) {
            Err(PrintError::TemplateConditions(message)) => {
                assert!(message.starts_with("No features were selected from layer \"Parcels\""));
                assert!(message.contains("\"Property Report\""));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_target_or_failed_intersection_fails() {
        let template = user_template(vec![conditional("Zoning")]);
        let mut no_target = results(1, Some(Intersection::Features(2)));
        no_target.layers.clear();
        assert_eq!(resolve_templates(&template, &no_target).failed.len(), 1);

        let failed = results(1, Some(Intersection::Failed("timeout".to_string())));
        let resolution = resolve_templates(&template, &failed);
        assert_eq!(resolution.failed.len(), 1);
        assert!(matches!(
            resolution.into_selection(&template),
            Err(PrintError::TemplateConditions(_))
        ));
    }

    #[test]
    fn layer_keys_match_case_insensitively() {
        let layer = LayerRef {
            name: Some("Parcels".to_string()),
            url: Some("https://gis.example.com/MapServer/0".to_string()),
        };
        assert!(layer.matches("PARCELS"));
        assert!(layer.matches("HTTPS://GIS.EXAMPLE.COM/MapServer/0"));
        assert!(!layer.matches("https://gis.example.com/MapServer/1"));
    }

    #[test]
    fn single_template_param_is_plain() {
        let selection = TemplateSelection::Single("Standard".to_string());
        assert_eq!(selection.to_param().unwrap(), "Standard");
        assert_eq!(selection.text_hint(), Some("Standard"));
    }
}
