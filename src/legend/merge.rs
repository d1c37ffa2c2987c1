//! Legend merging and visibility rules for composite map services.

use crate::services::remote::LegendLayer;
use crate::webmap::{LayerConfig, SubLayerInfo};

/// A legend sub-layer enriched with its place in the sub-layer tree.
#[derive(Debug, Clone, PartialEq)]
pub struct LegendLayerInfo {
    pub layer_id: i64,
    /// Direct parent, `-1` for root sub-layers.
    pub parent_layer_id: i64,
    /// Ancestor ids, outermost first.
    pub parent_layer_ids: Vec<i64>,
    pub min_scale: f64,
    pub max_scale: f64,
    pub entry_count: usize,
}

/// Attaches parent ancestry to each legend sub-layer.
///
/// Precondition: `layer_infos` lists sub-layers depth first with parents
/// before their children, which is the order map services publish them in.
/// The ancestry is tracked with a stack of parent ids while scanning the
/// legend in order: a deeper parent id is pushed, a shallower one pops a
/// level, a root sub-layer (`parentLayerId == -1`) clears the stack.
///
/// Legend sub-layers without a matching layer info are kept as roots and do
/// not touch the stack.
pub fn merge_layer_infos(legend: &[LegendLayer], layer_infos: &[SubLayerInfo]) -> Vec<LegendLayerInfo> {
    let mut parents: Vec<i64> = Vec::new();
    let mut merged = Vec::with_capacity(legend.len());

    for item in legend {
        let info = layer_infos.iter().find(|info| info.id == item.layer_id);

        let (parent_layer_id, parent_layer_ids) = match info {
            Some(info) => {
                if info.parent_layer_id > -1 {
                    match parents.last() {
                        Some(&top) if info.parent_layer_id > top => parents.push(info.parent_layer_id),
                        Some(&top) if info.parent_layer_id < top => {
                            parents.pop();
                        }
                        Some(_) => {}
                        None => parents.push(info.parent_layer_id),
                    }
                } else {
                    parents.clear();
                }
                (info.parent_layer_id, parents.clone())
            }
            None => (-1, Vec::new()),
        };

        let (min_scale, max_scale) = match info {
            Some(info) if item.min_scale == 0.0 && item.max_scale == 0.0 => {
                (info.min_scale, info.max_scale)
            }
            _ => (item.min_scale, item.max_scale),
        };

        merged.push(LegendLayerInfo {
            layer_id: item.layer_id,
            parent_layer_id,
            parent_layer_ids,
            min_scale,
            max_scale,
            entry_count: item.legend.len(),
        });
    }

    merged
}

/// Whether a legend sub-layer may appear in the printed legend according to
/// the web map configuration.
///
/// Without configuration the sub-layer is shown. With a sub-layer list only a
/// matching entry (the sub-layer itself or one of its ancestors) carrying
/// `showLegend: false` hides it; without a list the layer-level flag decides.
pub fn layer_in_legend(info: &LegendLayerInfo, config: Option<&LayerConfig>) -> bool {
    let Some(config) = config else {
        return true;
    };
    match &config.layers {
        Some(sub_layers) => !sub_layers.iter().any(|sub| {
            (sub.id == info.layer_id || info.parent_layer_ids.contains(&sub.id))
                && sub.show_legend == Some(false)
        }),
        None => config.show_legend != Some(false),
    }
}

/// Whether `scale` falls outside a min/max scale range. Zero bounds are open.
pub fn out_of_scale(min_scale: f64, max_scale: f64, scale: f64) -> bool {
    (min_scale > 0.0 && scale >= min_scale) || (max_scale > 0.0 && scale <= max_scale)
}

/// Sums the legend entries of visible, non-hidden, in-scale sub-layers.
pub fn visible_legend_count(
    visible_layers: &[i64],
    infos: &[LegendLayerInfo],
    config: Option<&LayerConfig>,
    scale: Option<f64>,
) -> u32 {
    infos
        .iter()
        .filter(|info| visible_layers.contains(&info.layer_id))
        .filter(|info| layer_in_legend(info, config))
        .filter(|info| match scale {
            Some(scale) => !out_of_scale(info.min_scale, info.max_scale, scale),
            None => true,
        })
        .map(|info| info.entry_count as u32)
        .sum()
}
