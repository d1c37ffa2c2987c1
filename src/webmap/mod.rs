//! Print web map document model
//!
//! Two families of types live here:
//!
//! - the live map state handed over by the map front end ([`MapState`],
//!   [`LiveLayer`], [`WebMapDefinition`]),
//! - the print document sent to the print service ([`PrintWebMap`],
//!   [`OperationalLayer`]).
//!
//! Field names serialize in camelCase to match the web map JSON format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod assembler;
pub mod shared;
pub mod splitter;

pub use assembler::WebMapAssembler;
pub use shared::{IdentityWalk, SharedJson};
pub use splitter::split_text_layers;

/// Symbol type of picture marker symbols.
pub const PICTURE_MARKER_SYMBOL: &str = "esriPMS";
/// Symbol type of text (callout) symbols.
pub const TEXT_SYMBOL: &str = "esriTS";
/// Geometry type of point feature layers.
pub const POINT_GEOMETRY: &str = "esriGeometryPoint";
/// Symbol style used by the interactive selection cross marker.
pub const SELECTION_MARKER_STYLE: &str = "target";

fn default_opacity() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialReference {
    pub wkid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_wkid: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial_reference: Option<SpatialReference>,
}

impl Extent {
    pub fn is_valid(&self) -> bool {
        [self.xmin, self.ymin, self.xmax, self.ymax]
            .iter()
            .all(|v| v.is_finite())
            && self.xmin <= self.xmax
            && self.ymin <= self.ymax
    }
}

// ---------------------------------------------------------------------------
// Live map state
// ---------------------------------------------------------------------------

/// Symbol attached to a graphic. Only the fields the print pipeline inspects
/// are typed; everything else is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Symbol {
    #[serde(rename = "type")]
    pub symbol_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Symbol {
    pub fn is_text(&self) -> bool {
        self.symbol_type == TEXT_SYMBOL
    }

    pub fn is_picture_marker(&self) -> bool {
        self.symbol_type == PICTURE_MARKER_SYMBOL
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<Symbol>,
}

impl Feature {
    pub fn is_text(&self) -> bool {
        self.symbol.as_ref().map(Symbol::is_text).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_type: Option<String>,
    #[serde(default)]
    pub features: Vec<Feature>,
}

/// One geometry-typed layer inside a feature collection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureCollectionLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_definition: Option<SharedJson>,
    #[serde(default)]
    pub feature_set: FeatureSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popup_info: Option<SharedJson>,
}

impl FeatureCollectionLayer {
    /// Geometry type from the layer definition, falling back to the feature
    /// set's own declaration.
    pub fn geometry_type(&self) -> Option<&str> {
        self.layer_definition
            .as_ref()
            .and_then(|def| def.value().get("geometryType"))
            .and_then(Value::as_str)
            .or(self.feature_set.geometry_type.as_deref())
    }

    pub fn is_point_layer(&self) -> bool {
        self.geometry_type() == Some(POINT_GEOMETRY)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureCollection {
    #[serde(default)]
    pub layers: Vec<FeatureCollectionLayer>,
}

/// One category of a unique value renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueValueInfo {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Renderer {
    Simple,
    UniqueValue {
        #[serde(default)]
        infos: Vec<UniqueValueInfo>,
    },
    #[serde(other)]
    Other,
}

/// Sub-layer metadata of a dynamic map service, in service order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubLayerInfo {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default = "root_parent")]
    pub parent_layer_id: i64,
    #[serde(default)]
    pub min_scale: f64,
    #[serde(default)]
    pub max_scale: f64,
}

fn root_parent() -> i64 {
    -1
}

/// Runtime kind of a live layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LayerKind {
    #[serde(rename_all = "camelCase")]
    Feature {
        renderer: Renderer,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        layer_definition: Option<SharedJson>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        popup_info: Option<SharedJson>,
    },
    #[serde(rename_all = "camelCase")]
    DynamicMapService {
        #[serde(default)]
        visible_layers: Vec<i64>,
        #[serde(default)]
        layer_infos: Vec<SubLayerInfo>,
    },
    TiledMapService,
    #[serde(rename_all = "camelCase")]
    Graphics {
        #[serde(default)]
        feature_collection: FeatureCollection,
    },
    #[serde(rename_all = "camelCase")]
    Other { class_name: String },
}

impl LayerKind {
    /// Runtime class name forwarded to the print service so it can special
    /// case tiled and dynamic layers.
    pub fn class_name(&self) -> &str {
        match self {
            LayerKind::Feature { .. } => "FeatureLayer",
            LayerKind::DynamicMapService { .. } => "ArcGISDynamicMapServiceLayer",
            LayerKind::TiledMapService => "ArcGISTiledMapServiceLayer",
            LayerKind::Graphics { .. } => "GraphicsLayer",
            LayerKind::Other { class_name } => class_name,
        }
    }

    /// Web map `layerType` of the print document entry.
    pub fn web_map_layer_type(&self) -> Option<&'static str> {
        match self {
            LayerKind::Feature { .. } => Some("ArcGISFeatureLayer"),
            LayerKind::DynamicMapService { .. } => Some("ArcGISMapServiceLayer"),
            LayerKind::TiledMapService => Some("ArcGISTiledMapServiceLayer"),
            LayerKind::Graphics { .. } | LayerKind::Other { .. } => None,
        }
    }
}

/// A layer of the live map, in draw order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveLayer {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub min_scale: f64,
    #[serde(default)]
    pub max_scale: f64,
    #[serde(flatten)]
    pub kind: LayerKind,
}

impl LiveLayer {
    pub fn is_graphics(&self) -> bool {
        matches!(self.kind, LayerKind::Graphics { .. })
    }
}

/// Sub-layer entry of a web map layer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubLayerConfig {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_legend: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Layer entry of the declarative web map the live map was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_legend: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layers: Option<Vec<SubLayerConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_map_layer: Option<bool>,
}

impl LayerConfig {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            show_legend: None,
            layers: None,
            base_map_layer: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseMapDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub base_map_layers: Vec<LayerConfig>,
}

/// The declarative web map definition used to build the live map.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebMapDefinition {
    #[serde(default)]
    pub operational_layers: Vec<LayerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_map: Option<BaseMapDefinition>,
}

/// Where a configuration entry was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Operational,
    BaseMap,
}

impl WebMapDefinition {
    /// Entry for `id`, searching operational layers first and base map layers
    /// second.
    pub fn find_layer(&self, id: &str) -> Option<(&LayerConfig, ConfigSource)> {
        if let Some(config) = self.operational_layers.iter().find(|c| c.id == id) {
            return Some((config, ConfigSource::Operational));
        }
        self.base_map
            .as_ref()
            .and_then(|base| base.base_map_layers.iter().find(|c| c.id == id))
            .map(|config| (config, ConfigSource::BaseMap))
    }
}

/// Snapshot of the interactive map at print time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapState {
    pub extent: Extent,
    pub scale: f64,
    pub spatial_reference: SpatialReference,
    #[serde(default)]
    pub layers: Vec<LiveLayer>,
    #[serde(default)]
    pub base_map_layers: Vec<LiveLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_map_title: Option<String>,
    #[serde(default)]
    pub definition: WebMapDefinition,
}

impl MapState {
    /// Ids of layers that hold client-side graphic overlays.
    pub fn graphics_layer_ids(&self) -> Vec<String> {
        self.layers
            .iter()
            .filter(|layer| layer.is_graphics())
            .map(|layer| layer.id.clone())
            .collect()
    }

    pub fn layer(&self, id: &str) -> Option<&LiveLayer> {
        self.layers.iter().find(|layer| layer.id == id)
    }
}

// ---------------------------------------------------------------------------
// Print document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapOptions {
    pub extent: Extent,
    pub scale: f64,
    pub spatial_reference: SpatialReference,
}

/// Layer entry of the print document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationalLayer {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_type: Option<String>,
    pub opacity: f64,
    pub visibility: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_layers: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_definition: Option<SharedJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popup_info: Option<SharedJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_collection: Option<FeatureCollection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legend_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_legend: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layers: Option<Vec<SubLayerConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_map_layer: Option<bool>,
}

impl OperationalLayer {
    fn visit_shared(&mut self, walk: &mut IdentityWalk) {
        walk.visit(&mut self.layer_definition);
        walk.visit(&mut self.popup_info);
        if let Some(collection) = self.feature_collection.as_mut() {
            for layer in &mut collection.layers {
                walk.visit(&mut layer.layer_definition);
                walk.visit(&mut layer.popup_info);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub base_map_layers: Vec<OperationalLayer>,
}

/// The print web map document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintWebMap {
    pub map_options: MapOptions,
    pub operational_layers: Vec<OperationalLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_map: Option<BaseMap>,
}

impl PrintWebMap {
    pub fn layer(&self, id: &str) -> Option<&OperationalLayer> {
        self.operational_layers.iter().find(|layer| layer.id == id)
    }

    /// JSON text of the document. Shared fragments are emitted once, at
    /// their first position in document order.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        let mut document = self.clone();
        let mut walk = IdentityWalk::new();
        for layer in &mut document.operational_layers {
            layer.visit_shared(&mut walk);
        }
        if let Some(base_map) = document.base_map.as_mut() {
            for layer in &mut base_map.base_map_layers {
                layer.visit_shared(&mut walk);
            }
        }
        serde_json::to_string(&document)
    }
}
