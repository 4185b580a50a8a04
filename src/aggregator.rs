use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::geo::path_length_km;
use crate::geocoding::GeocodingService;
use crate::model::{default_route_name, Coordinate, PhotoRecord, Route};
use crate::resolver::{apply, CoordinateResolver, Resolved, Unresolved};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub unresolved: Vec<Unresolved>,
}

impl Diagnostics {
    pub fn count(&self) -> usize {
        self.unresolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub fn failed_road_names(&self) -> Vec<String> {
        self.unresolved
            .iter()
            .filter_map(|entry| entry.road_name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResolutionProgress {
    pub total: usize,
    pub processed: usize,
    pub resolved: usize,
}

pub type ProgressObserver = Arc<dyn Fn(ResolutionProgress) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteMetrics {
    pub coordinates: Vec<Coordinate>,
    pub total_distance_km: f64,
    pub duration_secs: i64,
    pub road_names: Vec<String>,
}

impl RouteMetrics {
    pub(crate) fn apply_to(self, route: &mut Route) {
        route.coordinates = self.coordinates;
        route.total_distance_km = self.total_distance_km;
        route.duration_secs = self.duration_secs;
        route.road_names = self.road_names;
    }
}

/// Derived route fields for records already in chronological order.
pub fn summarize(records: &[PhotoRecord]) -> RouteMetrics {
    let coordinates: Vec<Coordinate> = records.iter().filter_map(|r| r.coordinate).collect();
    let total_distance_km = path_length_km(&coordinates);
    let duration_secs = match (records.first(), records.last()) {
        (Some(first), Some(last)) => (last.captured_at - first.captured_at)
            .num_seconds()
            .max(0),
        _ => 0,
    };
    let road_names = records
        .iter()
        .filter_map(|r| r.road_name().map(str::to_string))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    RouteMetrics {
        coordinates,
        total_distance_km,
        duration_secs,
        road_names,
    }
}

pub fn route_name(records: &[PhotoRecord]) -> Option<String> {
    let date = records.first()?.captured_at.date_naive();
    Some(match records.iter().find_map(|r| r.road_name()) {
        Some(road) => format!("{} {road}", date.format("%Y-%m-%d")),
        None => default_route_name(date),
    })
}

#[derive(Debug, Clone)]
pub struct Aggregation {
    pub route: Route,
    pub diagnostics: Diagnostics,
    pub cancelled: bool,
}

pub(crate) struct ResolutionPass {
    pub diagnostics: Diagnostics,
    pub cancelled: bool,
}

#[derive(Clone)]
pub struct RouteAggregator {
    resolver: CoordinateResolver,
    concurrency: usize,
    cancel_flag: Option<Arc<AtomicBool>>,
    observer: Option<ProgressObserver>,
}

impl RouteAggregator {
    pub fn new(resolver: CoordinateResolver, concurrency: usize) -> Self {
        Self {
            resolver,
            concurrency: concurrency.max(1),
            cancel_flag: None,
            observer: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let geocoder = GeocodingService::new(config)?;
        let resolver = CoordinateResolver::new(geocoder, config.region_hint.clone());
        Ok(Self::new(resolver, config.geocode_concurrency))
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn resolver(&self) -> &CoordinateResolver {
        &self.resolver
    }

    pub async fn aggregate(&self, mut records: Vec<PhotoRecord>) -> AppResult<Aggregation> {
        if records.is_empty() {
            return Err(AppError::NoPhotos);
        }

        let pass = self.resolve_in_order(&mut records).await;
        let Some(name) = route_name(&records) else {
            return Err(AppError::Cancelled);
        };

        let metrics = summarize(&records);
        if metrics.coordinates.is_empty() {
            warn!(
                photos = records.len(),
                unresolved = pass.diagnostics.count(),
                "no photo could be located"
            );
            return Err(AppError::NoCoordinatesFound {
                unresolved: pass.diagnostics.unresolved,
            });
        }

        let now = Utc::now();
        let mut route = Route {
            id: Uuid::new_v4(),
            name,
            anchor_date: records[0].captured_at,
            photos: records,
            coordinates: Vec::new(),
            total_distance_km: 0.0,
            duration_secs: 0,
            road_names: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        metrics.apply_to(&mut route);

        info!(
            route_id = %route.id,
            photos = route.photos.len(),
            points = route.coordinates.len(),
            distance_km = route.total_distance_km,
            unresolved = pass.diagnostics.count(),
            cancelled = pass.cancelled,
            "route aggregated"
        );
        Ok(Aggregation {
            route,
            diagnostics: pass.diagnostics,
            cancelled: pass.cancelled,
        })
    }

    /// Sorts the records, resolves missing coordinates and caches them on the records.
    pub(crate) async fn resolve_in_order(&self, records: &mut Vec<PhotoRecord>) -> ResolutionPass {
        records.sort_by_key(|record| record.captured_at);
        let total = records.len();

        let outcomes: Vec<(usize, Option<Result<Resolved, Unresolved>>)> = {
            let snapshot: &[PhotoRecord] = records.as_slice();
            stream::iter(snapshot.iter().enumerate())
                .map(|(index, record)| async move {
                    if self.is_cancelled() {
                        return (index, None);
                    }
                    (index, Some(self.resolver.lookup(record).await))
                })
                .buffered(self.concurrency)
                .collect()
                .await
        };

        let mut slots: Vec<Option<Result<Resolved, Unresolved>>> =
            (0..total).map(|_| None).collect();
        for (index, outcome) in outcomes {
            slots[index] = outcome;
        }

        let mut diagnostics = Diagnostics::default();
        let mut processed = 0;
        let mut resolved = 0;
        for (record, slot) in records.iter_mut().zip(slots) {
            let Some(outcome) = slot else {
                break;
            };
            match outcome {
                Ok(found) => {
                    apply(record, found);
                    resolved += 1;
                }
                Err(unresolved) => diagnostics.unresolved.push(unresolved),
            }
            processed += 1;
            if let Some(observer) = &self.observer {
                observer(ResolutionProgress {
                    total,
                    processed,
                    resolved,
                });
            }
        }

        let cancelled = processed < total;
        if cancelled {
            info!(processed, total, "resolution cancelled; keeping processed prefix");
            records.truncate(processed);
        }
        ResolutionPass {
            diagnostics,
            cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}
