use std::io;

use thiserror::Error;

use crate::resolver::Unresolved;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no photos were selected")]
    NoPhotos,
    #[error("none of the photos could be placed on a map")]
    NoCoordinatesFound { unresolved: Vec<Unresolved> },
    #[error("route building was cancelled before any photo was processed")]
    Cancelled,
    #[error("geocoding failed: {0}")]
    Geocode(String),
    #[error("text detection failed: {0}")]
    Detection(String),
    #[error("failed to parse stored value: {0}")]
    Parse(String),
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl AppError {
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(
            self,
            AppError::NoPhotos | AppError::NoCoordinatesFound { .. } | AppError::Cancelled
        )
    }
}
