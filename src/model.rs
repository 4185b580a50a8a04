use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::clean_candidate_text;
use crate::errors::AppResult;

/// WGS-84 position in decimal degrees. Ranges are not validated here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height <= 0.0 {
            return 0.0;
        }
        self.width / self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center_distance(&self) -> f64 {
        let cx = self.x + self.width / 2.0;
        let cy = self.y + self.height / 2.0;
        (cx - 0.5).abs() + (cy - 0.5).abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedCandidate {
    pub raw_text: String,
    pub cleaned_text: String,
    pub confidence: f64,
    pub bounding_box: Option<BoundingBox>,
    pub has_digit: bool,
}

impl RecognizedCandidate {
    pub fn new(
        raw_text: impl Into<String>,
        confidence: f64,
        bounding_box: Option<BoundingBox>,
    ) -> Self {
        let raw_text = raw_text.into();
        let cleaned_text = clean_candidate_text(&raw_text);
        let has_digit = raw_text.chars().any(|c| c.is_ascii_digit());
        Self {
            raw_text,
            cleaned_text,
            confidence: confidence.clamp(0.0, 1.0),
            bounding_box,
            has_digit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSource {
    Gps,
    Geocoded,
}

impl CoordinateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinateSource::Gps => "gps",
            CoordinateSource::Geocoded => "geocoded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "gps" => Some(CoordinateSource::Gps),
            "geocoded" => Some(CoordinateSource::Geocoded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub coordinate: Option<Coordinate>,
    pub coordinate_source: Option<CoordinateSource>,
    pub road_name: Option<String>,
    pub road_name_edited: bool,
    pub ocr_confidence: f64,
}

impl PhotoRecord {
    /// A record without a known capture time is stamped with the current time.
    pub fn new(captured_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            captured_at: captured_at.unwrap_or_else(Utc::now),
            coordinate: None,
            coordinate_source: None,
            road_name: None,
            road_name_edited: false,
            ocr_confidence: 0.0,
        }
    }

    pub fn with_gps(mut self, latitude: f64, longitude: f64) -> Self {
        self.coordinate = Some(Coordinate::new(latitude, longitude));
        self.coordinate_source = Some(CoordinateSource::Gps);
        self
    }

    pub fn with_road_name(mut self, name: impl Into<String>, confidence: f64) -> Self {
        self.road_name = Some(name.into());
        self.ocr_confidence = confidence;
        self
    }

    pub fn road_name(&self) -> Option<&str> {
        self.road_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn has_coordinate(&self) -> bool {
        self.coordinate.is_some()
    }

    pub(crate) fn cache_geocoded(&mut self, coordinate: Coordinate) {
        self.coordinate = Some(coordinate);
        self.coordinate_source = Some(CoordinateSource::Geocoded);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub name: String,
    pub anchor_date: DateTime<Utc>,
    pub photos: Vec<PhotoRecord>,
    pub coordinates: Vec<Coordinate>,
    pub total_distance_km: f64,
    pub duration_secs: i64,
    pub road_names: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Route {
    pub fn coordinates_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(&self.coordinates)?)
    }

    pub fn photo_position(&self, id: Uuid) -> Option<usize> {
        self.photos.iter().position(|photo| photo.id == id)
    }

    pub fn move_record(&mut self, from: usize, to: usize) -> bool {
        if from >= self.photos.len() || to >= self.photos.len() {
            return false;
        }
        let record = self.photos.remove(from);
        self.photos.insert(to, record);
        true
    }

    pub fn remove_record(&mut self, id: Uuid) -> Option<PhotoRecord> {
        let index = self.photo_position(id)?;
        Some(self.photos.remove(index))
    }

    /// Applies a manual road name correction. A blank name clears it.
    ///
    /// A coordinate geocoded from the old name is dropped so the next recalculation
    /// places the photo from the corrected one. GPS positions stay.
    pub fn rename_road(&mut self, id: Uuid, name: &str) -> bool {
        let Some(record) = self.photos.iter_mut().find(|photo| photo.id == id) else {
            return false;
        };
        let trimmed = name.trim();
        record.road_name = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        record.road_name_edited = true;
        if record.coordinate_source == Some(CoordinateSource::Geocoded) {
            record.coordinate = None;
            record.coordinate_source = None;
        }
        true
    }
}

pub fn default_route_name(date: NaiveDate) -> String {
    format!("Route on {}", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sample_route() -> Route {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        Route {
            id: Uuid::new_v4(),
            name: "test".into(),
            anchor_date: now,
            photos: vec![
                PhotoRecord::new(Some(now)).with_road_name("테헤란로", 0.9),
                PhotoRecord::new(Some(now)),
                PhotoRecord::new(Some(now)),
            ],
            coordinates: Vec::new(),
            total_distance_km: 0.0,
            duration_secs: 0,
            road_names: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn bounding_box_geometry() {
        let centred = BoundingBox::new(0.25, 0.45, 0.5, 0.1);
        assert!((centred.aspect_ratio() - 5.0).abs() < 1e-9);
        assert!(centred.center_distance() < 1e-9);
        assert!((centred.area() - 0.05).abs() < 1e-9);

        let corner = BoundingBox::new(0.0, 0.0, 0.1, 0.1);
        assert!((corner.center_distance() - 0.9).abs() < 1e-9);
        assert_eq!(BoundingBox::new(0.0, 0.0, 0.2, 0.0).aspect_ratio(), 0.0);
    }

    #[test]
    fn candidate_derives_cleaned_text_and_digit_flag() {
        let candidate = RecognizedCandidate::new(" 테헤란로  (강남) 123 ", 1.4, None);
        assert_eq!(candidate.cleaned_text, "테헤란로");
        assert!(candidate.has_digit);
        assert_eq!(candidate.confidence, 1.0);
    }

    #[test]
    fn blank_road_names_read_as_missing() {
        let record = PhotoRecord::new(None).with_road_name("   ", 0.5);
        assert!(record.road_name().is_none());
    }

    #[test]
    fn rename_marks_record_as_edited() {
        let mut route = sample_route();
        let id = route.photos[0].id;
        assert!(route.rename_road(id, "  "));
        assert!(route.photos[0].road_name.is_none());
        assert!(route.photos[0].road_name_edited);
        assert!(!route.rename_road(Uuid::new_v4(), "강남대로"));
    }

    #[test]
    fn rename_drops_geocoded_coordinate_but_keeps_gps() {
        let mut route = sample_route();
        route.photos[0].cache_geocoded(Coordinate::new(37.5006, 127.0364));
        route.photos[1] = PhotoRecord::new(None)
            .with_gps(37.5665, 126.978)
            .with_road_name("세종대로", 0.9);
        let geocoded = route.photos[0].id;
        let gps = route.photos[1].id;

        assert!(route.rename_road(geocoded, "을지로"));
        assert!(route.rename_road(gps, "종로"));

        assert!(route.photos[0].coordinate.is_none());
        assert!(route.photos[0].coordinate_source.is_none());
        assert_eq!(
            route.photos[1].coordinate,
            Some(Coordinate::new(37.5665, 126.978))
        );
        assert_eq!(route.photos[1].coordinate_source, Some(CoordinateSource::Gps));
    }

    #[test]
    fn moves_and_removes_records() {
        let mut route = sample_route();
        let first = route.photos[0].id;
        assert!(route.move_record(0, 2));
        assert_eq!(route.photo_position(first), Some(2));
        assert!(!route.move_record(0, 7));
        assert!(route.remove_record(first).is_some());
        assert_eq!(route.photos.len(), 2);
        assert!(route.remove_record(first).is_none());
    }
}
