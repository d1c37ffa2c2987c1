use std::collections::HashSet;

use tracing::debug;

use super::{FeatureCollection, FeatureCollectionLayer, FeatureSet, OperationalLayer};

/// Suffix appended to the id of a split-out text layer.
pub const TEXT_LAYER_SUFFIX: &str = "_textlayer";

/// Moves text callout features of graphic overlays into layers of their own.
///
/// Every layer whose id is in `graphics_ids` and whose point sub-layer mixes
/// graphic and text features is replaced by two adjacent layers: the original
/// without its text features, followed by a new `<id>_textlayer` layer holding
/// only the text features. All other layers keep their position.
///
/// When `<id>_textlayer` is already taken by another layer, a numeric suffix
/// is appended until the id is free.
pub fn split_text_layers(
    layers: Vec<OperationalLayer>,
    graphics_ids: &HashSet<String>,
) -> Vec<OperationalLayer> {
    let mut taken: HashSet<String> = layers.iter().map(|layer| layer.id.clone()).collect();
    let mut result = Vec::with_capacity(layers.len());
    for layer in layers {
        if !graphics_ids.contains(&layer.id) {
            result.push(layer);
            continue;
        }
        match split_layer(layer) {
            (layer, Some(mut text_layer)) => {
                text_layer.id = free_id(&text_layer.id, &taken);
                taken.insert(text_layer.id.clone());
                debug!(
                    "Split {} text feature(s) out of graphics layer {}",
                    text_layer_feature_count(&text_layer),
                    layer.id
                );
                result.push(layer);
                result.push(text_layer);
            }
            (layer, None) => result.push(layer),
        }
    }
    result
}

fn free_id(candidate: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(candidate) {
        return candidate.to_string();
    }
    (1..)
        .map(|n| format!("{candidate}_{n}"))
        .find(|id| !taken.contains(id))
        .unwrap_or_else(|| candidate.to_string())
}

fn text_layer_feature_count(layer: &OperationalLayer) -> usize {
    layer
        .feature_collection
        .as_ref()
        .map(|fc| fc.layers.iter().map(|l| l.feature_set.features.len()).sum())
        .unwrap_or(0)
}

fn split_layer(mut layer: OperationalLayer) -> (OperationalLayer, Option<OperationalLayer>) {
    let Some(collection) = layer.feature_collection.as_mut() else {
        return (layer, None);
    };
    let Some(point_index) = collection.layers.iter().position(|l| l.is_point_layer()) else {
        return (layer, None);
    };

    let point_layer = &collection.layers[point_index];
    let text_count = point_layer
        .feature_set
        .features
        .iter()
        .filter(|f| f.is_text())
        .count();
    if text_count == 0 || text_count == point_layer.feature_set.features.len() {
        return (layer, None);
    }

    let point_layer = &mut collection.layers[point_index];
    let (text_features, graphic_features): (Vec<_>, Vec<_>) =
        std::mem::take(&mut point_layer.feature_set.features)
            .into_iter()
            .partition(|f| f.is_text());
    point_layer.feature_set.features = graphic_features;

    // The new layer gets its own copies of the shared fragments so the two
    // layers never alias each other.
    let text_point_layer = FeatureCollectionLayer {
        layer_definition: point_layer.layer_definition.as_ref().map(|d| d.deep_clone()),
        feature_set: FeatureSet {
            geometry_type: point_layer.feature_set.geometry_type.clone(),
            features: text_features,
        },
        popup_info: point_layer.popup_info.as_ref().map(|p| p.deep_clone()),
    };

    let text_layer = OperationalLayer {
        id: format!("{}{}", layer.id, TEXT_LAYER_SUFFIX),
        layer_definition: layer.layer_definition.as_ref().map(|d| d.deep_clone()),
        popup_info: layer.popup_info.as_ref().map(|p| p.deep_clone()),
        feature_collection: Some(FeatureCollection {
            layers: vec![text_point_layer],
        }),
        legend_count: None,
        ..layer.clone()
    };

    (layer, Some(text_layer))
}
