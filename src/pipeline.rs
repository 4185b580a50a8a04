use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::aggregator::{Diagnostics, RouteAggregator};
use crate::classifier::RoadNameClassifier;
use crate::detection::{annotate_record, TextDetector};
use crate::errors::AppError;
use crate::model::{PhotoRecord, Route};
use crate::resolver::Unresolved;

pub struct PhotoInput {
    pub record: PhotoRecord,
    pub image: Vec<u8>,
}

impl PhotoInput {
    pub fn new(record: PhotoRecord, image: impl Into<Vec<u8>>) -> Self {
        Self {
            record,
            image: image.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub route: Option<Route>,
    pub failure: Option<String>,
    pub unresolved: Vec<Unresolved>,
    pub failed_road_names: Vec<String>,
    pub recognized: usize,
    pub cancelled: bool,
}

impl BatchSummary {
    fn failed(err: AppError, recognized: usize) -> Self {
        let cancelled = matches!(err, AppError::Cancelled);
        let failure = err.to_string();
        let diagnostics = match err {
            AppError::NoCoordinatesFound { unresolved } => Diagnostics { unresolved },
            _ => Diagnostics::default(),
        };
        Self {
            route: None,
            failure: Some(failure),
            failed_road_names: diagnostics.failed_road_names(),
            unresolved: diagnostics.unresolved,
            recognized,
            cancelled,
        }
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }
}

pub struct RoutePipeline {
    detector: Arc<dyn TextDetector>,
    classifier: RoadNameClassifier,
    aggregator: RouteAggregator,
}

impl RoutePipeline {
    pub fn new(
        detector: Arc<dyn TextDetector>,
        classifier: RoadNameClassifier,
        aggregator: RouteAggregator,
    ) -> Self {
        Self {
            detector,
            classifier,
            aggregator,
        }
    }

    pub fn aggregator(&self) -> &RouteAggregator {
        &self.aggregator
    }

    /// Classifies every photo, then aggregates the batch into a route.
    ///
    /// A photo counts as processed only once its coordinate was resolved, so a
    /// cancellation during recognition yields no route.
    pub async fn run(&self, batch: Vec<PhotoInput>) -> BatchSummary {
        let mut records = Vec::with_capacity(batch.len());
        let mut recognized = 0;
        for PhotoInput { mut record, image } in batch {
            if self.aggregator.is_cancelled() {
                warn!("batch cancelled during text recognition");
                return BatchSummary::failed(AppError::Cancelled, recognized);
            }
            if annotate_record(self.detector.as_ref(), &self.classifier, &mut record, &image).await
            {
                recognized += 1;
            }
            records.push(record);
        }

        match self.aggregator.aggregate(records).await {
            Ok(aggregation) => {
                info!(
                    recognized,
                    unresolved = aggregation.diagnostics.count(),
                    "batch finished"
                );
                BatchSummary {
                    failed_road_names: aggregation.diagnostics.failed_road_names(),
                    unresolved: aggregation.diagnostics.unresolved,
                    route: Some(aggregation.route),
                    failure: None,
                    recognized,
                    cancelled: aggregation.cancelled,
                }
            }
            Err(err) => {
                warn!(error = %err, "batch produced no route");
                BatchSummary::failed(err, recognized)
            }
        }
    }
}
