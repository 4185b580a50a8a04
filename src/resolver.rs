use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::geocoding::GeocodingService;
use crate::model::{Coordinate, CoordinateSource, PhotoRecord};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum UnresolvedReason {
    NoEvidence,
    NoMatch,
    LookupFailed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Unresolved {
    pub photo_id: Uuid,
    pub road_name: Option<String>,
    pub reason: UnresolvedReason,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    pub coordinate: Coordinate,
    pub source: CoordinateSource,
}

#[derive(Clone)]
pub struct CoordinateResolver {
    geocoder: GeocodingService,
    region_hint: String,
}

impl CoordinateResolver {
    pub fn new(geocoder: GeocodingService, region_hint: impl Into<String>) -> Self {
        Self {
            geocoder,
            region_hint: region_hint.into(),
        }
    }

    pub fn geocoder(&self) -> &GeocodingService {
        &self.geocoder
    }

    pub fn query_for(&self, road_name: &str) -> String {
        let hint = self.region_hint.trim();
        if hint.is_empty() {
            road_name.to_string()
        } else {
            format!("{road_name} {hint}")
        }
    }

    pub async fn resolve(&self, record: &mut PhotoRecord) -> Result<Coordinate, Unresolved> {
        let resolved = self.lookup(record).await?;
        apply(record, resolved);
        Ok(resolved.coordinate)
    }

    /// Two-tier lookup without touching the record: GPS on the record, else the road name.
    pub async fn lookup(&self, record: &PhotoRecord) -> Result<Resolved, Unresolved> {
        if let Some(coordinate) = record.coordinate {
            return Ok(Resolved {
                coordinate,
                source: record.coordinate_source.unwrap_or(CoordinateSource::Gps),
            });
        }

        let Some(road_name) = record.road_name() else {
            return Err(Unresolved {
                photo_id: record.id,
                road_name: None,
                reason: UnresolvedReason::NoEvidence,
            });
        };

        let query = self.query_for(road_name);
        match self.geocoder.geocode(&query).await {
            Ok(Some(coordinate)) => {
                debug!(photo_id = %record.id, road_name, "road name geocoded");
                Ok(Resolved {
                    coordinate,
                    source: CoordinateSource::Geocoded,
                })
            }
            Ok(None) => {
                warn!(photo_id = %record.id, road_name, "geocoder found no match");
                Err(Unresolved {
                    photo_id: record.id,
                    road_name: Some(road_name.to_string()),
                    reason: UnresolvedReason::NoMatch,
                })
            }
            Err(err) => {
                warn!(?err, photo_id = %record.id, road_name, "geocoding failed");
                Err(Unresolved {
                    photo_id: record.id,
                    road_name: Some(road_name.to_string()),
                    reason: UnresolvedReason::LookupFailed(err.to_string()),
                })
            }
        }
    }
}

pub(crate) fn apply(record: &mut PhotoRecord, resolved: Resolved) {
    if resolved.source == CoordinateSource::Geocoded && !record.has_coordinate() {
        record.cache_geocoded(resolved.coordinate);
    }
}
