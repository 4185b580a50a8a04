use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::model::Coordinate;

const HTTP_TIMEOUT_SECS: u64 = 10;
const MIN_INTERVAL_MS: u64 = 20;

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` means the service answered but found nothing.
    async fn geocode(&self, query: &str) -> AppResult<Option<Coordinate>>;
}

/// Rate limited, retrying and caching front for an injected [`Geocoder`].
#[derive(Clone)]
pub struct GeocodingService {
    inner: Arc<dyn Geocoder>,
    rate_limiter: Arc<RateLimiter>,
    jitter_rng: Arc<Mutex<StdRng>>,
    cache: Arc<Mutex<HashMap<String, Arc<OnceCell<Option<Coordinate>>>>>>,
    max_attempts: u32,
    backoff_ms: u64,
    calls: Arc<AtomicU64>,
    cache_hits: Arc<AtomicU64>,
}

impl GeocodingService {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let inner: Arc<dyn Geocoder> = match config.geocoding_api_key.clone() {
            Some(key) => Arc::new(HttpGeocoder::new(config, key)?),
            None => {
                debug!("no geocoding key configured; road names will not be geocoded");
                Arc::new(OfflineGeocoder)
            }
        };
        Ok(Self::from_geocoder(inner, config))
    }

    pub fn from_geocoder(inner: Arc<dyn Geocoder>, config: &AppConfig) -> Self {
        Self {
            inner,
            rate_limiter: Arc::new(RateLimiter::new(config.geocode_rate_limit_qps)),
            jitter_rng: Arc::new(Mutex::new(StdRng::from_entropy())),
            cache: Arc::new(Mutex::new(HashMap::new())),
            max_attempts: config.geocode_max_attempts.max(1),
            backoff_ms: config.geocode_backoff_ms,
            calls: Arc::new(AtomicU64::new(0)),
            cache_hits: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_jitter_seed(self, seed: u64) -> Self {
        *self.jitter_rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::SeqCst)
    }

    /// Concurrent calls for the same query share a single backend lookup.
    pub async fn geocode(&self, query: &str) -> AppResult<Option<Coordinate>> {
        let key = query.trim().to_string();
        let slot = self.cache.lock().entry(key.clone()).or_default().clone();

        let mut looked_up = false;
        let result = *slot
            .get_or_try_init(|| {
                looked_up = true;
                self.lookup_with_retry(&key)
            })
            .await?;
        if !looked_up {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
            trace!(query = %key, "geocode cache hit");
        }
        Ok(result)
    }

    async fn lookup_with_retry(&self, query: &str) -> AppResult<Option<Coordinate>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.rate_limiter.wait().await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.inner.geocode(query).await {
                Ok(result) => return Ok(result),
                Err(err) if attempt < self.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(?err, attempt, query, "geocode failed; retrying after {:?}", delay);
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        if self.backoff_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(6);
        let base = Duration::from_millis(self.backoff_ms.saturating_mul(1 << exponent));
        let jitter = {
            let mut rng = self.jitter_rng.lock();
            Duration::from_millis(rng.gen_range(0..self.backoff_ms))
        };
        base.saturating_add(jitter)
    }
}

struct RateLimiter {
    min_interval_ms: u64,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(qps: u32) -> Self {
        let safe_qps = qps.max(1);
        let interval_ms = (1000_f64 / safe_qps as f64).ceil() as u64;
        Self {
            min_interval_ms: interval_ms.max(MIN_INTERVAL_MS),
            last_tick: AsyncMutex::new(None),
        }
    }

    async fn wait(&self) {
        let interval = Duration::from_millis(self.min_interval_ms);
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                sleep(interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}

pub struct HttpGeocoder {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    region_code: String,
    language: String,
}

impl HttpGeocoder {
    pub fn new(config: &AppConfig, api_key: SecretString) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.geocoder_endpoint.clone(),
            api_key,
            region_code: config.region_code.clone(),
            language: config.language.clone(),
        })
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, query: &str) -> AppResult<Option<Coordinate>> {
        #[derive(Deserialize)]
        struct Response {
            status: String,
            #[serde(default)]
            results: Vec<ResponseResult>,
            error_message: Option<String>,
        }

        #[derive(Deserialize)]
        struct ResponseResult {
            geometry: ResponseGeometry,
        }

        #[derive(Deserialize)]
        struct ResponseGeometry {
            location: ResponseLocation,
        }

        #[derive(Deserialize)]
        struct ResponseLocation {
            lat: f64,
            lng: f64,
        }

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("address", query),
                ("region", self.region_code.as_str()),
                ("language", self.language.as_str()),
                ("key", self.api_key.expose_secret()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let parsed: Response = response.json().await?;
        match parsed.status.as_str() {
            "OK" => Ok(parsed.results.into_iter().next().map(|result| {
                Coordinate::new(result.geometry.location.lat, result.geometry.location.lng)
            })),
            "ZERO_RESULTS" => Ok(None),
            status => Err(AppError::Geocode(format!(
                "{status}: {}",
                parsed.error_message.unwrap_or_default()
            ))),
        }
    }
}

#[derive(Default)]
pub struct OfflineGeocoder;

#[async_trait]
impl Geocoder for OfflineGeocoder {
    async fn geocode(&self, _query: &str) -> AppResult<Option<Coordinate>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedGeocoder {
        responses: Mutex<Vec<AppResult<Option<Coordinate>>>>,
    }

    impl ScriptedGeocoder {
        fn new(responses: Vec<AppResult<Option<Coordinate>>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl Geocoder for ScriptedGeocoder {
        async fn geocode(&self, _query: &str) -> AppResult<Option<Coordinate>> {
            self.responses.lock().pop().unwrap_or(Ok(None))
        }
    }

    fn fast_config() -> AppConfig {
        AppConfig {
            geocode_rate_limit_qps: 100,
            geocode_max_attempts: 3,
            geocode_backoff_ms: 1,
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn caches_answers_per_query() {
        let geocoder = ScriptedGeocoder::new(vec![Ok(Some(Coordinate::new(37.5, 127.0)))]);
        let service =
            GeocodingService::from_geocoder(Arc::new(geocoder), &fast_config()).with_jitter_seed(1);

        let first = service.geocode("테헤란로 대한민국").await.unwrap();
        let second = service.geocode(" 테헤란로 대한민국 ").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(service.calls(), 1);
        assert_eq!(service.cache_hits(), 1);
    }

    #[tokio::test]
    async fn retries_before_succeeding() {
        let geocoder = ScriptedGeocoder::new(vec![
            Ok(Some(Coordinate::new(37.5, 127.0))),
            Err(AppError::Geocode("transient".into())),
        ]);
        let service =
            GeocodingService::from_geocoder(Arc::new(geocoder), &fast_config()).with_jitter_seed(2);

        let result = service.geocode("강남대로").await.unwrap();
        assert_eq!(result, Some(Coordinate::new(37.5, 127.0)));
        assert_eq!(service.calls(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_without_caching() {
        let geocoder = ScriptedGeocoder::new(vec![
            Err(AppError::Geocode("down".into())),
            Err(AppError::Geocode("down".into())),
            Err(AppError::Geocode("down".into())),
        ]);
        let service =
            GeocodingService::from_geocoder(Arc::new(geocoder), &fast_config()).with_jitter_seed(3);

        assert!(service.geocode("세종대로").await.is_err());
        assert_eq!(service.calls(), 3);
        assert_eq!(service.geocode("세종대로").await.unwrap(), None);
        assert_eq!(service.calls(), 4);
    }

    struct SlowGeocoder {
        calls: AtomicU64,
    }

    #[async_trait]
    impl Geocoder for SlowGeocoder {
        async fn geocode(&self, _query: &str) -> AppResult<Option<Coordinate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(30)).await;
            Ok(Some(Coordinate::new(37.566, 126.991)))
        }
    }

    #[tokio::test]
    async fn overlapping_lookups_share_one_backend_call() {
        let geocoder = Arc::new(SlowGeocoder {
            calls: AtomicU64::new(0),
        });
        let service = GeocodingService::from_geocoder(geocoder.clone(), &fast_config())
            .with_jitter_seed(4);

        let (first, second) = tokio::join!(
            service.geocode("을지로 대한민국"),
            service.geocode("을지로 대한민국")
        );
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.calls(), 1);
        assert_eq!(service.cache_hits(), 1);
    }

    #[test]
    fn huge_backoff_saturates_instead_of_overflowing() {
        let config = AppConfig {
            geocode_backoff_ms: u64::MAX / 2,
            ..fast_config()
        };
        let service = GeocodingService::from_geocoder(Arc::new(OfflineGeocoder), &config)
            .with_jitter_seed(5);
        let base = Duration::from_millis(u64::MAX / 2);
        assert!(service.backoff_delay(1) >= base);
        assert!(service.backoff_delay(7) >= base);
    }

    #[tokio::test]
    async fn offline_geocoder_finds_nothing() {
        let service = GeocodingService::new(&AppConfig::default()).unwrap();
        assert_eq!(service.geocode("테헤란로").await.unwrap(), None);
    }
}
