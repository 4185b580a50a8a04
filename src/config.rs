use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_GEOCODER_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const DEFAULT_REGION_HINT: &str = "대한민국";
const MAX_GEOCODE_CONCURRENCY: usize = 4;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub geocoder_endpoint: String,
    pub geocoding_api_key: Option<SecretString>,
    pub region_hint: String,
    pub region_code: String,
    pub language: String,
    pub geocode_concurrency: usize,
    pub geocode_rate_limit_qps: u32,
    pub geocode_max_attempts: u32,
    pub geocode_backoff_ms: u64,
    pub database_file_name: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub geocoder_endpoint: String,
    pub region_hint: String,
    pub region_code: String,
    pub language: String,
    pub geocode_concurrency: usize,
    pub geocode_rate_limit_qps: u32,
    pub geocode_max_attempts: u32,
    pub database_file_name: String,
    pub has_geocoding_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            geocoder_endpoint: env::var("GEOCODER_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GEOCODER_ENDPOINT.to_string()),
            geocoding_api_key: env::var("GOOGLE_GEOCODING_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            region_hint: env::var("GEOCODE_REGION_HINT")
                .unwrap_or_else(|_| DEFAULT_REGION_HINT.to_string()),
            region_code: env::var("GEOCODE_REGION_CODE").unwrap_or_else(|_| "kr".to_string()),
            language: env::var("GEOCODE_LANGUAGE").unwrap_or_else(|_| "ko".to_string()),
            geocode_concurrency: parse_usize("GEOCODE_CONCURRENCY", 2)
                .clamp(1, MAX_GEOCODE_CONCURRENCY),
            geocode_rate_limit_qps: parse_u32("GEOCODE_RATE_LIMIT_QPS", 3).max(1),
            geocode_max_attempts: parse_u32("GEOCODE_MAX_ATTEMPTS", 3).max(1),
            geocode_backoff_ms: parse_u64("GEOCODE_BACKOFF_MS", 250),
            database_file_name: env::var("DATABASE_FILE_NAME")
                .unwrap_or_else(|_| "photo-routes.db".to_string()),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            geocoder_endpoint: self.geocoder_endpoint.clone(),
            region_hint: self.region_hint.clone(),
            region_code: self.region_code.clone(),
            language: self.language.clone(),
            geocode_concurrency: self.geocode_concurrency,
            geocode_rate_limit_qps: self.geocode_rate_limit_qps,
            geocode_max_attempts: self.geocode_max_attempts,
            database_file_name: self.database_file_name.clone(),
            has_geocoding_key: self.geocoding_api_key.is_some(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            geocoder_endpoint: DEFAULT_GEOCODER_ENDPOINT.to_string(),
            geocoding_api_key: None,
            region_hint: DEFAULT_REGION_HINT.to_string(),
            region_code: "kr".to_string(),
            language: "ko".to_string(),
            geocode_concurrency: 2,
            geocode_rate_limit_qps: 3,
            geocode_max_attempts: 3,
            geocode_backoff_ms: 250,
            database_file_name: "photo-routes.db".to_string(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("GOOGLE_GEOCODING_API_KEY", "secret");
        env::set_var("GEOCODE_CONCURRENCY", "16");
        env::set_var("GEOCODE_MAX_ATTEMPTS", "0");
        env::set_var("DATABASE_FILE_NAME", "custom.db");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.database_file_name, "custom.db");
        assert!(public.has_geocoding_key);
        assert!(config.geocoding_api_key.is_some());
        assert_eq!(public.geocode_concurrency, MAX_GEOCODE_CONCURRENCY);
        assert_eq!(public.geocode_max_attempts, 1);

        let serialized = serde_json::to_string(&public).unwrap();
        assert!(!serialized.contains("secret\""));
    }

    #[test]
    fn default_biases_queries_towards_korea() {
        let config = AppConfig::default();
        assert_eq!(config.region_hint, DEFAULT_REGION_HINT);
        assert_eq!(config.region_code, "kr");
        assert!(config.geocoding_api_key.is_none());
    }
}
