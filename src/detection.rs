use async_trait::async_trait;
use tracing::{debug, warn};

use crate::classifier::RoadNameClassifier;
use crate::errors::AppResult;
use crate::model::{PhotoRecord, RecognizedCandidate};

#[async_trait]
pub trait TextDetector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> AppResult<Vec<RecognizedCandidate>>;
}

/// Fills in the road name of one record from its image.
///
/// Returns whether a name was assigned. A detection failure counts as "no text found".
pub async fn annotate_record(
    detector: &dyn TextDetector,
    classifier: &RoadNameClassifier,
    record: &mut PhotoRecord,
    image: &[u8],
) -> bool {
    if record.road_name_edited {
        debug!(photo_id = %record.id, "road name edited by user; skipping detection");
        return false;
    }

    let candidates = match detector.detect(image).await {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(?err, photo_id = %record.id, "text detection failed; treating as no text");
            Vec::new()
        }
    };

    match classifier.classify_scored(&candidates) {
        Some(winner) => {
            debug!(
                photo_id = %record.id,
                road_name = %winner.name,
                score = winner.score,
                "road name recognized"
            );
            record.road_name = Some(winner.name);
            record.ocr_confidence = winner.confidence;
            true
        }
        None => false,
    }
}
