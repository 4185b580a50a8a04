pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod db;
pub mod detection;
pub mod errors;
pub mod geo;
pub mod geocoding;
pub mod model;
pub mod pipeline;
pub mod recalculator;
pub mod resolver;

#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

pub use aggregator::{
    route_name, summarize, Aggregation, Diagnostics, ProgressObserver, ResolutionProgress,
    RouteAggregator, RouteMetrics,
};
pub use classifier::{ClassifiedRoad, RoadNameClassifier};
pub use config::{AppConfig, PublicAppConfig};
pub use db::{RouteStore, StoredRouteSummary};
pub use detection::{annotate_record, TextDetector};
pub use errors::{AppError, AppResult};
pub use geo::{haversine_distance, path_length_km};
pub use geocoding::{Geocoder, GeocodingService, HttpGeocoder, OfflineGeocoder};
pub use model::{BoundingBox, Coordinate, CoordinateSource, PhotoRecord, RecognizedCandidate, Route};
pub use pipeline::{BatchSummary, PhotoInput, RoutePipeline};
pub use recalculator::{Recalculation, RouteRecalculator};
pub use resolver::{CoordinateResolver, Unresolved, UnresolvedReason};

/// Everything a front end needs to build, edit and keep routes.
pub struct RouteWorkspace {
    config: AppConfig,
    store: RouteStore,
    aggregator: RouteAggregator,
    classifier: RoadNameClassifier,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceHealth {
    pub db_path: Option<String>,
    pub stored_routes: usize,
    pub geocode_calls: u64,
    pub geocode_cache_hits: u64,
    pub config: PublicAppConfig,
}

impl WorkspaceHealth {
    pub fn has_geocoding_key(&self) -> bool {
        self.config.has_geocoding_key
    }
}

impl RouteWorkspace {
    pub fn open<P: AsRef<Path>>(data_dir: P, config: AppConfig) -> AppResult<Self> {
        init_tracing();
        let data_dir = data_dir.as_ref();
        let store = RouteStore::open(data_dir, &config.database_file_name)?;
        let aggregator = RouteAggregator::from_config(&config)?;
        info!(
            db = %data_dir.display(),
            concurrency = config.geocode_concurrency,
            "route workspace ready"
        );
        Ok(Self {
            config,
            store,
            aggregator,
            classifier: RoadNameClassifier::new(),
        })
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        let service = GeocodingService::from_geocoder(geocoder, &self.config);
        let resolver = CoordinateResolver::new(service, self.config.region_hint.clone());
        self.aggregator = RouteAggregator::new(resolver, self.config.geocode_concurrency);
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.aggregator = self.aggregator.with_cancel_flag(flag);
        self
    }

    pub fn store(&self) -> &RouteStore {
        &self.store
    }

    pub async fn build_route(
        &self,
        detector: Arc<dyn TextDetector>,
        batch: Vec<PhotoInput>,
    ) -> AppResult<BatchSummary> {
        let pipeline =
            RoutePipeline::new(detector, self.classifier.clone(), self.aggregator.clone());
        let summary = pipeline.run(batch).await;
        if let Some(route) = &summary.route {
            self.store.save_route(route)?;
        }
        Ok(summary)
    }

    /// Re-derives a stored route after `edit` has changed its photo list.
    pub async fn edit_route<F>(&self, id: Uuid, edit: F) -> AppResult<Option<(Route, Recalculation)>>
    where
        F: FnOnce(&mut Route),
    {
        let Some(mut route) = self.store.load_route(id)? else {
            return Ok(None);
        };
        edit(&mut route);
        let report = RouteRecalculator::new(self.aggregator.clone())
            .recalculate(&mut route)
            .await;
        if !report.cancelled {
            self.store.save_route(&route)?;
        }
        Ok(Some((route, report)))
    }

    pub fn health(&self) -> AppResult<WorkspaceHealth> {
        let geocoder = self.aggregator.resolver().geocoder();
        Ok(WorkspaceHealth {
            db_path: self
                .store
                .path()
                .map(|path| path.to_string_lossy().to_string()),
            stored_routes: self.store.list_routes()?.len(),
            geocode_calls: geocoder.calls(),
            geocode_cache_hits: geocoder.cache_hits(),
            config: self.config.public_profile(),
        })
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,photo_route=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
