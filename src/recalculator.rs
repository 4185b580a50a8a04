use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregator::{summarize, Diagnostics, RouteAggregator};
use crate::model::Route;

#[derive(Debug, Clone, Serialize)]
pub struct Recalculation {
    pub diagnostics: Diagnostics,
    pub cancelled: bool,
}

/// Re-derives a route after its photo list was edited.
///
/// Road names are taken as they are; only missing coordinates are looked up again.
/// Losing every locatable photo empties the geometry instead of failing.
#[derive(Clone)]
pub struct RouteRecalculator {
    aggregator: RouteAggregator,
}

impl RouteRecalculator {
    pub fn new(aggregator: RouteAggregator) -> Self {
        Self { aggregator }
    }

    pub async fn recalculate(&self, route: &mut Route) -> Recalculation {
        let mut records = route.photos.clone();
        let pass = self.aggregator.resolve_in_order(&mut records).await;
        if pass.cancelled {
            info!(route_id = %route.id, "recalculation cancelled; route unchanged");
            return Recalculation {
                diagnostics: pass.diagnostics,
                cancelled: true,
            };
        }

        let metrics = summarize(&records);
        if let Some(first) = records.first() {
            route.anchor_date = first.captured_at;
        }
        route.photos = records;
        metrics.apply_to(route);
        route.updated_at = Utc::now();

        if route.coordinates.is_empty() {
            warn!(route_id = %route.id, "route has no locatable photos after edit");
        }
        info!(
            route_id = %route.id,
            photos = route.photos.len(),
            points = route.coordinates.len(),
            distance_km = route.total_distance_km,
            "route recalculated"
        );
        Recalculation {
            diagnostics: pass.diagnostics,
            cancelled: false,
        }
    }
}
