use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::model::{Coordinate, CoordinateSource, PhotoRecord, Route};

#[derive(Clone)]
pub struct RouteStore {
    db: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredRouteSummary {
    pub id: Uuid,
    pub name: String,
    pub anchor_date: DateTime<Utc>,
    pub total_distance_km: f64,
    pub photo_count: usize,
}

struct PhotoRow {
    id: String,
    captured_at: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    coordinate_source: Option<String>,
    road_name: Option<String>,
    road_name_edited: bool,
    ocr_confidence: f64,
}

impl RouteStore {
    pub fn open<P: AsRef<Path>>(data_dir: P, database_file: &str) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(database_file);
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let connection = Connection::open_with_flags(&db_path, flags)?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        run_migrations(&connection)?;
        info!(target: "route_store", path = %db_path.display(), "route store opened");
        Ok(Self {
            db: Arc::new(Mutex::new(connection)),
            path: Some(db_path),
        })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let connection = Connection::open_in_memory()?;
        connection.execute("PRAGMA foreign_keys = ON", [])?;
        run_migrations(&connection)?;
        Ok(Self {
            db: Arc::new(Mutex::new(connection)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn save_route(&self, route: &Route) -> AppResult<()> {
        let coordinates_json = route.coordinates_json()?;
        let road_names_json = serde_json::to_string(&route.road_names)?;
        let route_id = route.id.to_string();

        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO routes (id, name, anchor_date, coordinates_json, total_distance_km,
                duration_secs, road_names_json, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                anchor_date = excluded.anchor_date,
                coordinates_json = excluded.coordinates_json,
                total_distance_km = excluded.total_distance_km,
                duration_secs = excluded.duration_secs,
                road_names_json = excluded.road_names_json,
                updated_at = excluded.updated_at",
            params![
                route_id,
                route.name,
                route.anchor_date.to_rfc3339(),
                coordinates_json,
                route.total_distance_km,
                route.duration_secs,
                road_names_json,
                route.created_at.to_rfc3339(),
                route.updated_at.to_rfc3339(),
            ],
        )?;

        tx.execute("DELETE FROM route_photos WHERE route_id = ?1", [&route_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO route_photos (id, route_id, position, captured_at, latitude, longitude,
                    coordinate_source, road_name, road_name_edited, ocr_confidence)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for (position, photo) in route.photos.iter().enumerate() {
                stmt.execute(params![
                    photo.id.to_string(),
                    route_id,
                    position as i64,
                    photo.captured_at.to_rfc3339(),
                    photo.coordinate.map(|c| c.latitude),
                    photo.coordinate.map(|c| c.longitude),
                    photo.coordinate_source.map(|s| s.as_str()),
                    photo.road_name,
                    photo.road_name_edited,
                    photo.ocr_confidence,
                ])?;
            }
        }
        tx.commit()?;

        debug!(
            target: "route_store",
            route_id = %route.id,
            photos = route.photos.len(),
            "route saved"
        );
        Ok(())
    }

    pub fn load_route(&self, id: Uuid) -> AppResult<Option<Route>> {
        let conn = self.db.lock();
        let header = conn
            .query_row(
                "SELECT name, anchor_date, coordinates_json, total_distance_km, duration_secs,
                    road_names_json, created_at, updated_at
                FROM routes WHERE id = ?1",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;
        let Some((name, anchor, coords, distance, duration, roads, created, updated)) = header
        else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT id, captured_at, latitude, longitude, coordinate_source, road_name,
                road_name_edited, ocr_confidence
            FROM route_photos WHERE route_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map([id.to_string()], |row| {
                Ok(PhotoRow {
                    id: row.get(0)?,
                    captured_at: row.get(1)?,
                    latitude: row.get(2)?,
                    longitude: row.get(3)?,
                    coordinate_source: row.get(4)?,
                    road_name: row.get(5)?,
                    road_name_edited: row.get(6)?,
                    ocr_confidence: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let photos = rows
            .into_iter()
            .map(photo_from_row)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Some(Route {
            id,
            name,
            anchor_date: parse_timestamp(&anchor)?,
            photos,
            coordinates: serde_json::from_str::<Vec<Coordinate>>(&coords)?,
            total_distance_km: distance,
            duration_secs: duration,
            road_names: serde_json::from_str(&roads)?,
            created_at: parse_timestamp(&created)?,
            updated_at: parse_timestamp(&updated)?,
        }))
    }

    pub fn list_routes(&self) -> AppResult<Vec<StoredRouteSummary>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT r.id, r.name, r.anchor_date, r.total_distance_km,
                (SELECT COUNT(*) FROM route_photos p WHERE p.route_id = r.id)
            FROM routes r
            ORDER BY r.anchor_date DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, name, anchor, distance, count)| {
                Ok(StoredRouteSummary {
                    id: parse_uuid(&id)?,
                    name,
                    anchor_date: parse_timestamp(&anchor)?,
                    total_distance_km: distance,
                    photo_count: count.max(0) as usize,
                })
            })
            .collect()
    }

    pub fn delete_route(&self, id: Uuid) -> AppResult<bool> {
        let conn = self.db.lock();
        let deleted = conn.execute("DELETE FROM routes WHERE id = ?1", [id.to_string()])?;
        Ok(deleted > 0)
    }
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS routes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            anchor_date TEXT NOT NULL,
            coordinates_json TEXT NOT NULL DEFAULT '[]',
            total_distance_km REAL NOT NULL DEFAULT 0,
            duration_secs INTEGER NOT NULL DEFAULT 0,
            road_names_json TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS route_photos (
            id TEXT NOT NULL,
            route_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            captured_at TEXT NOT NULL,
            latitude REAL,
            longitude REAL,
            coordinate_source TEXT,
            road_name TEXT,
            road_name_edited INTEGER NOT NULL DEFAULT 0 CHECK (road_name_edited IN (0, 1)),
            ocr_confidence REAL NOT NULL DEFAULT 0,
            PRIMARY KEY (route_id, id),
            FOREIGN KEY (route_id) REFERENCES routes(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_route_photos_route ON route_photos(route_id, position);
        "#,
    )?;
    Ok(())
}

fn photo_from_row(row: PhotoRow) -> AppResult<PhotoRecord> {
    let coordinate = match (row.latitude, row.longitude) {
        (Some(latitude), Some(longitude)) => Some(Coordinate::new(latitude, longitude)),
        _ => None,
    };
    Ok(PhotoRecord {
        id: parse_uuid(&row.id)?,
        captured_at: parse_timestamp(&row.captured_at)?,
        coordinate,
        coordinate_source: row
            .coordinate_source
            .as_deref()
            .and_then(CoordinateSource::parse),
        road_name: row.road_name,
        road_name_edited: row.road_name_edited,
        ocr_confidence: row.ocr_confidence,
    })
}

fn parse_uuid(value: &str) -> AppResult<Uuid> {
    Uuid::parse_str(value).map_err(|err| AppError::Parse(format!("invalid id {value}: {err}")))
}

fn parse_timestamp(value: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| AppError::Parse(format!("invalid timestamp {value}: {err}")))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::testing::at;

    fn sample_route() -> Route {
        let mut edited = PhotoRecord::new(Some(at(9, 30))).with_road_name("을지로", 0.0);
        edited.road_name_edited = true;
        let photos = vec![
            PhotoRecord::new(Some(at(9, 0)))
                .with_gps(37.5665, 126.9780)
                .with_road_name("세종대로", 0.9),
            edited,
            PhotoRecord::new(Some(at(10, 0))),
        ];
        Route {
            id: Uuid::new_v4(),
            name: "2024-05-01 세종대로".into(),
            anchor_date: at(9, 0),
            photos,
            coordinates: vec![Coordinate::new(37.5665, 126.9780)],
            total_distance_km: 0.0,
            duration_secs: 3600,
            road_names: vec!["세종대로".into(), "을지로".into()],
            created_at: at(11, 0),
            updated_at: at(11, 0),
        }
    }

    #[test]
    fn runs_migrations_and_creates_tables() {
        let dir = tempdir().unwrap();
        let store = RouteStore::open(dir.path(), "routes.db").unwrap();
        assert!(store.path().unwrap().ends_with("routes.db"));

        let conn = store.db.lock();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('routes','route_photos')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn saves_and_loads_route_graph() {
        let store = RouteStore::open_in_memory().unwrap();
        let route = sample_route();
        store.save_route(&route).unwrap();

        let loaded = store.load_route(route.id).unwrap().unwrap();
        assert_eq!(loaded.photos, route.photos);
        assert_eq!(loaded.name, route.name);
        assert_eq!(loaded.road_names, route.road_names);
        assert_eq!(loaded.duration_secs, 3600);
        assert_eq!(loaded.anchor_date, route.anchor_date);
        assert_eq!(loaded.coordinates.len(), 1);
        assert!((loaded.coordinates[0].latitude - 37.5665).abs() < 1e-9);
        assert!(store.load_route(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn saving_again_replaces_photos() {
        let store = RouteStore::open_in_memory().unwrap();
        let mut route = sample_route();
        store.save_route(&route).unwrap();

        let removed = route.photos[2].id;
        route.remove_record(removed);
        route.updated_at = at(12, 0);
        store.save_route(&route).unwrap();

        let loaded = store.load_route(route.id).unwrap().unwrap();
        assert_eq!(loaded.photos.len(), 2);
        assert_eq!(loaded.updated_at, at(12, 0));

        let summaries = store.list_routes().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].photo_count, 2);
    }

    #[test]
    fn same_photo_can_belong_to_two_routes() {
        let store = RouteStore::open_in_memory().unwrap();
        let original = sample_route();
        let mut copy = original.clone();
        copy.id = Uuid::new_v4();
        copy.name = "세종대로 copy".into();

        store.save_route(&original).unwrap();
        store.save_route(&copy).unwrap();

        let loaded = store.load_route(copy.id).unwrap().unwrap();
        assert_eq!(loaded.photos, original.photos);
        assert!(store.delete_route(original.id).unwrap());
        assert_eq!(store.load_route(copy.id).unwrap().unwrap().photos.len(), 3);
    }

    #[test]
    fn deletes_route_and_photos() {
        let store = RouteStore::open_in_memory().unwrap();
        let route = sample_route();
        store.save_route(&route).unwrap();

        assert!(store.delete_route(route.id).unwrap());
        assert!(!store.delete_route(route.id).unwrap());
        let orphans: i64 = store
            .db
            .lock()
            .query_row("SELECT COUNT(*) FROM route_photos", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }
}
