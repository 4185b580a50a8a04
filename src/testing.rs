use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::aggregator::RouteAggregator;
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::geocoding::{Geocoder, GeocodingService};
use crate::model::Coordinate;
use crate::resolver::CoordinateResolver;

#[derive(Default)]
pub struct TableGeocoder {
    table: HashMap<String, Coordinate>,
    delays_ms: HashMap<String, u64>,
    failing: Vec<String>,
    cancel_on: Option<(String, Arc<AtomicBool>)>,
    calls: AtomicUsize,
}

impl TableGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, road: &str, latitude: f64, longitude: f64) -> Self {
        self.table
            .insert(road.to_string(), Coordinate::new(latitude, longitude));
        self
    }

    pub fn with_delay(mut self, road: &str, delay_ms: u64) -> Self {
        self.delays_ms.insert(road.to_string(), delay_ms);
        self
    }

    pub fn failing(mut self, road: &str) -> Self {
        self.failing.push(road.to_string());
        self
    }

    pub fn cancel_on(mut self, road: &str, flag: Arc<AtomicBool>) -> Self {
        self.cancel_on = Some((road.to_string(), flag));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for TableGeocoder {
    async fn geocode(&self, query: &str) -> AppResult<Option<Coordinate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let road = query.split_whitespace().next().unwrap_or_default();
        if let Some(delay) = self.delays_ms.get(road) {
            tokio::time::sleep(Duration::from_millis(*delay)).await;
        }
        if let Some((trigger, flag)) = &self.cancel_on {
            if trigger == road {
                flag.store(true, Ordering::SeqCst);
            }
        }
        if self.failing.iter().any(|name| name == road) {
            return Err(AppError::Geocode(format!("no service for {road}")));
        }
        Ok(self.table.get(road).copied())
    }
}

pub fn fast_config() -> AppConfig {
    AppConfig {
        geocode_rate_limit_qps: 1000,
        geocode_max_attempts: 1,
        geocode_backoff_ms: 0,
        ..AppConfig::default()
    }
}

pub fn aggregator_with(geocoder: Arc<TableGeocoder>, concurrency: usize) -> RouteAggregator {
    let config = fast_config();
    let service = GeocodingService::from_geocoder(geocoder, &config).with_jitter_seed(7);
    RouteAggregator::new(
        CoordinateResolver::new(service, config.region_hint.clone()),
        concurrency,
    )
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
}
