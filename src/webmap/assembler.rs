use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{
    split_text_layers, BaseMap, ConfigSource, Feature, LayerKind, LiveLayer, MapOptions, MapState,
    OperationalLayer, PrintWebMap, WebMapDefinition, SELECTION_MARKER_STYLE,
};
use crate::errors::{PrintError, PrintResult};
use crate::legend::{LegendAggregator, LegendRequest};

/// Builds the print web map document from the live map.
#[derive(Clone)]
pub struct WebMapAssembler {
    legend: LegendAggregator,
    page_url: Option<Url>,
}

impl WebMapAssembler {
    pub fn new(legend: LegendAggregator) -> Self {
        Self {
            legend,
            page_url: None,
        }
    }

    /// Base for rewriting relative picture symbol URLs.
    pub fn with_page_url(mut self, page_url: Url) -> Self {
        self.page_url = Some(page_url);
        self
    }

    /// Assembles the document: converts live layers, attaches legend counts,
    /// splits text callouts out of graphic overlays, applies print service
    /// compatibility fixes and carries web map configuration forward.
    ///
    /// Legend counts are filtered at `legend_scale`, the scale the page
    /// prints at; `None` counts every visible sub-layer.
    #[instrument(skip(self, map), fields(layers = map.layers.len()))]
    pub async fn assemble(
        &self,
        map: &MapState,
        legend_scale: Option<f64>,
    ) -> PrintResult<PrintWebMap> {
        validate(map)?;

        let requests: Vec<LegendRequest> = map
            .layers
            .iter()
            .map(|layer| LegendRequest {
                layer,
                config: map.definition.find_layer(&layer.id).map(|(config, _)| config),
            })
            .collect();
        let counts = self.legend.aggregate(&requests, legend_scale).await;

        let mut layers: Vec<OperationalLayer> = map
            .layers
            .iter()
            .map(|live| {
                let mut layer = operational_layer(live);
                layer.legend_count = counts.get(&live.id).copied();
                remove_selection_markers(&mut layer);
                layer
            })
            .collect();

        let graphics_ids: HashSet<String> = map.graphics_layer_ids().into_iter().collect();
        if !graphics_ids.is_empty() {
            layers = split_text_layers(layers, &graphics_ids);
        }

        let page_base = self.page_url.as_ref().map(page_base);
        for layer in &mut layers {
            apply_compatibility_fixes(layer, page_base.as_deref());
            attach_definition(layer, &map.definition);
        }

        let base_map = if map.base_map_layers.is_empty() {
            None
        } else {
            let base_map_layers = map
                .base_map_layers
                .iter()
                .map(|live| {
                    let mut layer = operational_layer(live);
                    attach_definition(&mut layer, &map.definition);
                    layer
                })
                .collect();
            Some(BaseMap {
                title: map.base_map_title.clone(),
                base_map_layers,
            })
        };

        info!(
            "Assembled print web map with {} operational layer(s)",
            layers.len()
        );

        Ok(PrintWebMap {
            map_options: MapOptions {
                extent: map.extent,
                scale: map.scale,
                spatial_reference: map.spatial_reference,
            },
            operational_layers: layers,
            base_map,
        })
    }
}

fn validate(map: &MapState) -> PrintResult<()> {
    if !map.extent.is_valid() {
        return Err(PrintError::InvalidMapState(format!(
            "extent {:?} is not a valid envelope",
            map.extent
        )));
    }
    if !map.scale.is_finite() || map.scale < 0.0 {
        return Err(PrintError::InvalidMapState(format!(
            "scale {} is not a valid map scale",
            map.scale
        )));
    }
    let mut ids = HashSet::new();
    for layer in map.layers.iter().chain(map.base_map_layers.iter()) {
        if !ids.insert(layer.id.as_str()) {
            return Err(PrintError::InvalidMapState(format!(
                "layer id '{}' is used more than once",
                layer.id
            )));
        }
    }
    Ok(())
}

/// Print document entry for a live layer.
pub fn operational_layer(live: &LiveLayer) -> OperationalLayer {
    let mut layer = OperationalLayer {
        id: live.id.clone(),
        title: live.title.clone(),
        url: live.url.clone(),
        layer_type: live.kind.web_map_layer_type().map(str::to_string),
        opacity: live.opacity,
        visibility: live.visible,
        min_scale: (live.min_scale > 0.0).then_some(live.min_scale),
        max_scale: (live.max_scale > 0.0).then_some(live.max_scale),
        source_class_name: Some(live.kind.class_name().to_string()),
        ..Default::default()
    };

    match &live.kind {
        LayerKind::Feature {
            layer_definition,
            popup_info,
            ..
        } => {
            layer.layer_definition = layer_definition.clone();
            layer.popup_info = popup_info.clone();
        }
        LayerKind::DynamicMapService { visible_layers, .. } => {
            layer.visible_layers = Some(visible_layers.clone());
        }
        LayerKind::Graphics { feature_collection } => {
            layer.feature_collection = Some(feature_collection.clone());
        }
        LayerKind::TiledMapService | LayerKind::Other { .. } => {}
    }

    layer
}

/// `protocol//host/path/` of the page the map runs in.
fn page_base(page_url: &Url) -> String {
    let mut base = format!("{}://", page_url.scheme());
    if let Some(host) = page_url.host_str() {
        base.push_str(host);
    }
    if let Some(port) = page_url.port() {
        base.push_str(&format!(":{port}"));
    }
    base.push_str(page_url.path());
    if !base.ends_with('/') {
        base.push('/');
    }
    base
}

/// Drops the interactive selection cross markers. Runs before text layers
/// are split out, so a marker never counts as a graphic feature.
pub fn remove_selection_markers(layer: &mut OperationalLayer) {
    let Some(collection) = layer.feature_collection.as_mut() else {
        return;
    };
    for sub_layer in &mut collection.layers {
        let features = &mut sub_layer.feature_set.features;
        let before = features.len();
        features.retain(|feature| !is_selection_marker(feature));
        if features.len() != before {
            debug!(
                "Removed {} selection marker(s) from layer {}",
                before - features.len(),
                layer.id
            );
        }
    }
}

/// Rewrites feature collections into a shape the print service renders:
/// relative picture symbol URLs become absolute and text symbols lose their
/// attributes.
pub fn apply_compatibility_fixes(layer: &mut OperationalLayer, page_base: Option<&str>) {
    let Some(collection) = layer.feature_collection.as_mut() else {
        return;
    };
    for sub_layer in &mut collection.layers {
        for feature in sub_layer.feature_set.features.iter_mut() {
            let Some(symbol) = feature.symbol.as_mut() else {
                continue;
            };
            if symbol.is_picture_marker() {
                if let Some(url) = symbol.url.as_mut() {
                    if !url.starts_with("http") {
                        match page_base {
                            Some(base) => *url = format!("{base}{url}"),
                            None => warn!(
                                "Picture symbol url '{}' in layer {} is relative and no page url is configured",
                                url, layer.id
                            ),
                        }
                    }
                }
            }
            if symbol.is_text() {
                feature.attributes.clear();
            }
        }
    }
}

fn is_selection_marker(feature: &Feature) -> bool {
    feature
        .symbol
        .as_ref()
        .and_then(|symbol| symbol.style.as_deref())
        == Some(SELECTION_MARKER_STYLE)
}

/// Carries `showLegend`, the sub-layer list and the base map flag from the
/// web map definition onto the document entry, without overriding values
/// already set.
pub fn attach_definition(layer: &mut OperationalLayer, definition: &WebMapDefinition) {
    let Some((config, source)) = definition.find_layer(&layer.id) else {
        return;
    };
    if layer.show_legend.is_none() {
        layer.show_legend = config.show_legend;
    }
    if layer.layers.is_none() {
        layer.layers = config.layers.clone();
    }
    if layer.base_map_layer.is_none() {
        layer.base_map_layer = config
            .base_map_layer
            .or((source == ConfigSource::BaseMap).then_some(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webmap::{
        FeatureCollection, FeatureCollectionLayer, FeatureSet, LayerConfig, Symbol, TEXT_SYMBOL,
    };
    use serde_json::{json, Map};

    fn symbol(symbol_type: &str, url: Option<&str>, style: Option<&str>) -> Symbol {
        Symbol {
            symbol_type: symbol_type.to_string(),
            url: url.map(str::to_string),
            style: style.map(str::to_string),
            extra: Map::new(),
        }
    }

    fn feature_with(symbol: Symbol) -> Feature {
        let mut attributes = Map::new();
        attributes.insert("name".to_string(), json!("label"));
        Feature {
            geometry: Some(json!({"x": 1, "y": 2})),
            attributes,
            symbol: Some(symbol),
        }
    }

    fn collection_layer(features: Vec<Feature>) -> OperationalLayer {
        OperationalLayer {
            id: "graphics".to_string(),
            feature_collection: Some(FeatureCollection {
                layers: vec![FeatureCollectionLayer {
                    layer_definition: None,
                    feature_set: FeatureSet {
                        geometry_type: None,
                        features,
                    },
                    popup_info: None,
                }],
            }),
            ..Default::default()
        }
    }

    fn features(layer: &OperationalLayer) -> &[Feature] {
        &layer.feature_collection.as_ref().unwrap().layers[0]
            .feature_set
            .features
    }

    #[test]
    fn page_base_keeps_path_and_port() {
        let url = Url::parse("https://maps.example.com:8443/viewer/index.html?x=1").unwrap();
        assert_eq!(page_base(&url), "https://maps.example.com:8443/viewer/index.html/");
        let url = Url::parse("http://maps.example.com/viewer/").unwrap();
        assert_eq!(page_base(&url), "http://maps.example.com/viewer/");
    }

    #[test]
    fn relative_picture_urls_become_absolute() {
        let mut layer = collection_layer(vec![
            feature_with(symbol("esriPMS", Some("images/pin.png"), None)),
            feature_with(symbol("esriPMS", Some("https://cdn.example.com/pin.png"), None)),
        ]);
        apply_compatibility_fixes(&mut layer, Some("https://maps.example.com/viewer/"));

        let urls: Vec<&str> = features(&layer)
            .iter()
            .map(|f| f.symbol.as_ref().unwrap().url.as_deref().unwrap())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://maps.example.com/viewer/images/pin.png",
                "https://cdn.example.com/pin.png"
            ]
        );
    }

    #[test]
    fn text_symbols_lose_attributes() {
        let mut layer = collection_layer(vec![
            feature_with(symbol(TEXT_SYMBOL, None, None)),
            feature_with(symbol("esriSMS", None, None)),
        ]);
        apply_compatibility_fixes(&mut layer, None);
        assert!(features(&layer)[0].attributes.is_empty());
        assert_eq!(features(&layer)[1].attributes.len(), 1);
    }

    #[test]
    fn selection_markers_are_removed() {
        let mut layer = collection_layer(vec![
            feature_with(symbol("esriSMS", None, Some("target"))),
            feature_with(symbol("esriSMS", None, Some("circle"))),
        ]);
        remove_selection_markers(&mut layer);
        assert_eq!(features(&layer).len(), 1);
    }

    #[test]
    fn definition_values_do_not_override_existing_ones() {
        let definition = WebMapDefinition {
            operational_layers: vec![LayerConfig {
                id: "a".to_string(),
                show_legend: Some(false),
                layers: None,
                base_map_layer: None,
            }],
            base_map: None,
        };
        let mut layer = OperationalLayer {
            id: "a".to_string(),
            show_legend: Some(true),
            ..Default::default()
        };
        attach_definition(&mut layer, &definition);
        assert_eq!(layer.show_legend, Some(true));

        let mut fresh = OperationalLayer {
            id: "a".to_string(),
            ..Default::default()
        };
        attach_definition(&mut fresh, &definition);
        assert_eq!(fresh.show_legend, Some(false));
        assert_eq!(fresh.base_map_layer, None);
    }
}
