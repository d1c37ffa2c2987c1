//! Legend item counting for print layouts.
//!
//! The print service sizes legend panels from a per-layer count of legend
//! entries. Counts come from the renderer for feature layers and from the
//! service legend for composite map services.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, instrument, warn};

use crate::services::remote::LegendService;
use crate::webmap::{LayerConfig, LayerKind, LiveLayer, Renderer, SubLayerInfo};

pub mod merge;

pub use merge::{layer_in_legend, merge_layer_infos, out_of_scale, visible_legend_count, LegendLayerInfo};

/// Legend capability of a live layer.
#[derive(Debug, Clone, Copy)]
pub enum LegendSubject<'a> {
    SimpleFeature {
        renderer: &'a Renderer,
    },
    CompositeMapService {
        url: Option<&'a str>,
        visible_layers: &'a [i64],
        layer_infos: &'a [SubLayerInfo],
        min_scale: f64,
        max_scale: f64,
    },
    Other,
}

impl<'a> LegendSubject<'a> {
    pub fn of(layer: &'a LiveLayer) -> Self {
        match &layer.kind {
            LayerKind::Feature { renderer, .. } => LegendSubject::SimpleFeature { renderer },
            LayerKind::DynamicMapService {
                visible_layers,
                layer_infos,
            } => LegendSubject::CompositeMapService {
                url: layer.url.as_deref(),
                visible_layers,
                layer_infos,
                min_scale: layer.min_scale,
                max_scale: layer.max_scale,
            },
            _ => LegendSubject::Other,
        }
    }

    /// Number of legend entries this layer contributes, or `None` when the
    /// count could not be determined.
    pub async fn legend_count(
        &self,
        service: &dyn LegendService,
        config: Option<&LayerConfig>,
        scale: Option<f64>,
    ) -> Option<u32> {
        match *self {
            LegendSubject::SimpleFeature { renderer } => Some(renderer_item_count(renderer, config)),
            LegendSubject::CompositeMapService {
                url,
                visible_layers,
                layer_infos,
                min_scale,
                max_scale,
            } => {
                if let Some(scale) = scale {
                    if out_of_scale(min_scale, max_scale, scale) {
                        return Some(0);
                    }
                }
                let Some(url) = url else {
                    warn!("Map service layer has no url; skipping legend lookup");
                    return None;
                };
                match service.fetch_legend(url).await {
                    Ok(response) => {
                        let infos = merge_layer_infos(&response.layers, layer_infos);
                        let count = visible_legend_count(visible_layers, &infos, config, scale);
                        debug!(
                            "Legend for {} has {} sub-layer(s), {} visible item(s)",
                            url,
                            infos.len(),
                            count
                        );
                        Some(count)
                    }
                    Err(err) => {
                        warn!("Legend request for {} failed: {}", url, err);
                        None
                    }
                }
            }
            LegendSubject::Other => Some(0),
        }
    }
}

/// Legend count of a feature layer drawn with `renderer`.
pub fn renderer_item_count(renderer: &Renderer, config: Option<&LayerConfig>) -> u32 {
    if config.and_then(|c| c.show_legend) == Some(false) {
        return 0;
    }
    match renderer {
        Renderer::Simple => 1,
        Renderer::UniqueValue { infos } => infos.len() as u32,
        Renderer::Other => 1,
    }
}

/// One layer to count, with its web map configuration when the layer came
/// from the web map definition.
#[derive(Debug, Clone, Copy)]
pub struct LegendRequest<'a> {
    pub layer: &'a LiveLayer,
    pub config: Option<&'a LayerConfig>,
}

/// Computes legend counts for the layers of a print document.
#[derive(Clone)]
pub struct LegendAggregator {
    service: Arc<dyn LegendService>,
}

impl LegendAggregator {
    pub fn new(service: Arc<dyn LegendService>) -> Self {
        Self { service }
    }

    /// Legend count of a single layer. Never fails; `None` means the count is
    /// unknown.
    pub async fn legend_count(
        &self,
        layer: &LiveLayer,
        config: Option<&LayerConfig>,
        scale: Option<f64>,
    ) -> Option<u32> {
        LegendSubject::of(layer)
            .legend_count(self.service.as_ref(), config, normalize_scale(scale))
            .await
    }

    /// Counts every requested layer concurrently and returns once all
    /// lookups have settled. Layers whose count is unknown are left out.
    #[instrument(skip(self, requests), fields(layers = requests.len()))]
    pub async fn aggregate(
        &self,
        requests: &[LegendRequest<'_>],
        scale: Option<f64>,
    ) -> HashMap<String, u32> {
        let lookups = requests.iter().map(|request| async move {
            let count = self
                .legend_count(request.layer, request.config, scale)
                .await;
            (request.layer.id.clone(), count)
        });

        join_all(lookups)
            .await
            .into_iter()
            .filter_map(|(id, count)| count.map(|count| (id, count)))
            .collect()
    }
}

fn normalize_scale(scale: Option<f64>) -> Option<f64> {
    scale.filter(|s| s.is_finite() && *s > 0.0)
}
