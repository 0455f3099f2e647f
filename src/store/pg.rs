use chrono::{DateTime, Utc};
use log::debug;
use postgres::error::SqlState;
use postgres::{GenericClient, Row};

use crate::error::{Error, FieldErrors};
use crate::models::{
    Coordinates, NewRoadSegment, NewSpeedReading, ReadingChanges, RoadSegment, SegmentChanges,
    SpeedReading, User,
};
use crate::store::{ImportOutcome, ReadingFilter, SegmentFilter, SegmentRecord, Store};
use crate::DbPool;

pub const CREATE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS road_segments (
    id SERIAL PRIMARY KEY,
    longitude_start DOUBLE PRECISION NOT NULL,
    latitude_start DOUBLE PRECISION NOT NULL,
    longitude_end DOUBLE PRECISION NOT NULL,
    latitude_end DOUBLE PRECISION NOT NULL,
    length DOUBLE PRECISION NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS speed_readings (
    id SERIAL PRIMARY KEY,
    road_segment_id INTEGER NOT NULL REFERENCES road_segments (id) ON DELETE CASCADE,
    average_speed DOUBLE PRECISION NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS speed_readings_segment_timestamp
    ON speed_readings (road_segment_id, timestamp DESC);
CREATE TABLE IF NOT EXISTS users (
    id SERIAL PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    is_admin BOOLEAN NOT NULL DEFAULT FALSE
);
CREATE TABLE IF NOT EXISTS api_tokens (
    key TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    created_at TIMESTAMPTZ NOT NULL
);
";

pub const DROP_SCHEMA: &str = "
DROP TABLE IF EXISTS api_tokens;
DROP TABLE IF EXISTS users;
DROP TABLE IF EXISTS speed_readings;
DROP TABLE IF EXISTS road_segments;
";

// Segment columns plus the reading count and the latest reading (by
// timestamp, then id) joined laterally.
const SEGMENT_SELECT: &str = "
SELECT s.id, s.longitude_start, s.latitude_start, s.longitude_end, s.latitude_end,
       s.length, s.created_at, s.updated_at,
       (SELECT COUNT(*) FROM speed_readings c WHERE c.road_segment_id = s.id) AS total_readings,
       l.id AS latest_id, l.average_speed AS latest_average_speed,
       l.timestamp AS latest_timestamp, l.created_at AS latest_created_at
FROM road_segments s
LEFT JOIN LATERAL (
    SELECT r.id, r.average_speed, r.timestamp, r.created_at
    FROM speed_readings r
    WHERE r.road_segment_id = s.id
    ORDER BY r.timestamp DESC, r.id DESC
    LIMIT 1
) l ON TRUE
";

const READING_COLUMNS: &str = "id, road_segment_id, average_speed, timestamp, created_at";

fn segment_from_row(row: &Row) -> RoadSegment {
    RoadSegment {
        id: row.get("id"),
        coordinates: Coordinates {
            longitude_start: row.get("longitude_start"),
            latitude_start: row.get("latitude_start"),
            longitude_end: row.get("longitude_end"),
            latitude_end: row.get("latitude_end"),
        },
        length: row.get("length"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn record_from_row(row: &Row) -> SegmentRecord {
    let segment = segment_from_row(row);
    let latest_id: Option<i32> = row.get("latest_id");
    let latest_reading = latest_id.map(|id| SpeedReading {
        id,
        road_segment: segment.id,
        average_speed: row.get("latest_average_speed"),
        timestamp: row.get("latest_timestamp"),
        created_at: row.get("latest_created_at"),
    });
    SegmentRecord {
        segment,
        total_readings: row.get("total_readings"),
        latest_reading,
    }
}

fn reading_from_row(row: &Row) -> SpeedReading {
    SpeedReading {
        id: row.get("id"),
        road_segment: row.get("road_segment_id"),
        average_speed: row.get("average_speed"),
        timestamp: row.get("timestamp"),
        created_at: row.get("created_at"),
    }
}

fn fetch_record<C: GenericClient>(db: &mut C, id: i32) -> Result<SegmentRecord, Error> {
    let query = format!("{} WHERE s.id = $1", SEGMENT_SELECT);
    let row = db
        .query_opt(query.as_str(), &[&id])?
        .ok_or_else(|| Error::segment_not_found(id))?;
    Ok(record_from_row(&row))
}

/// Locks the segment row against deletion for the rest of the transaction.
fn lock_segment<C: GenericClient>(db: &mut C, id: i32) -> Result<(), Error> {
    db.query_opt("SELECT id FROM road_segments WHERE id = $1 FOR KEY SHARE", &[&id])?
        .map(|_| ())
        .ok_or_else(|| Error::segment_not_found(id))
}

fn insert_reading<C: GenericClient>(
    db: &mut C,
    new: &NewSpeedReading,
    now: DateTime<Utc>,
) -> Result<SpeedReading, Error> {
    let query = format!(
        "INSERT INTO speed_readings (road_segment_id, average_speed, timestamp, created_at)
         VALUES ($1, $2, $3, $4) RETURNING {}",
        READING_COLUMNS
    );
    let row = db.query_one(
        query.as_str(),
        &[&new.road_segment, &new.average_speed, &new.timestamp, &now],
    )?;
    Ok(reading_from_row(&row))
}

fn insert_segment<C: GenericClient>(
    db: &mut C,
    new: &NewRoadSegment,
    now: DateTime<Utc>,
) -> Result<RoadSegment, Error> {
    let c = &new.coordinates;
    let row = db.query_one(
        "INSERT INTO road_segments
            (longitude_start, latitude_start, longitude_end, latitude_end, length, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $6)
         RETURNING *",
        &[
            &c.longitude_start,
            &c.latitude_start,
            &c.longitude_end,
            &c.latitude_end,
            &new.length,
            &now,
        ],
    )?;
    Ok(segment_from_row(&row))
}

/// Postgres-backed store. Each call checks a connection out of the pool and
/// runs inside its own transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> PgStore {
        PgStore { pool }
    }
}

impl Store for PgStore {
    fn list_segments(&self, filter: &SegmentFilter) -> Result<Vec<SegmentRecord>, Error> {
        let mut db = self.pool.get()?;
        let (lower, upper) = match filter.intensity {
            Some(level) => level.speed_band(),
            None => (None, None),
        };
        let query = format!(
            "{} WHERE ($1 = FALSE OR (l.id IS NOT NULL
                  AND ($2::FLOAT8 IS NULL OR l.average_speed > $2)
                  AND ($3::FLOAT8 IS NULL OR l.average_speed <= $3)))
             ORDER BY s.id",
            SEGMENT_SELECT
        );
        let rows = db.query(
            query.as_str(),
            &[&filter.intensity.is_some(), &lower, &upper],
        )?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    fn get_segment(&self, id: i32) -> Result<SegmentRecord, Error> {
        let mut db = self.pool.get()?;
        fetch_record(&mut *db, id)
    }

    fn create_segment(&self, new: &NewRoadSegment) -> Result<SegmentRecord, Error> {
        let mut db = self.pool.get()?;
        let segment = insert_segment(&mut *db, new, Utc::now())?;
        debug!("created road segment {}", segment.id);
        Ok(SegmentRecord {
            segment,
            total_readings: 0,
            latest_reading: None,
        })
    }

    fn update_segment(&self, id: i32, changes: &SegmentChanges) -> Result<SegmentRecord, Error> {
        let mut db = self.pool.get()?;
        let mut tx = db.transaction()?;
        let updated = tx.execute(
            "UPDATE road_segments SET
                longitude_start = COALESCE($2, longitude_start),
                latitude_start = COALESCE($3, latitude_start),
                longitude_end = COALESCE($4, longitude_end),
                latitude_end = COALESCE($5, latitude_end),
                length = COALESCE($6, length),
                updated_at = $7
             WHERE id = $1",
            &[
                &id,
                &changes.longitude_start,
                &changes.latitude_start,
                &changes.longitude_end,
                &changes.latitude_end,
                &changes.length,
                &Utc::now(),
            ],
        )?;
        if updated == 0 {
            return Err(Error::segment_not_found(id));
        }
        let record = fetch_record(&mut tx, id)?;
        tx.commit()?;
        Ok(record)
    }

    fn delete_segment(&self, id: i32) -> Result<(), Error> {
        let mut db = self.pool.get()?;
        // speed_readings go with it through ON DELETE CASCADE.
        match db.execute("DELETE FROM road_segments WHERE id = $1", &[&id])? {
            0 => Err(Error::segment_not_found(id)),
            _ => Ok(()),
        }
    }

    fn list_readings(&self, filter: &ReadingFilter) -> Result<Vec<SpeedReading>, Error> {
        let mut db = self.pool.get()?;
        let query = format!(
            "SELECT {} FROM speed_readings
             WHERE ($1::INT4 IS NULL OR road_segment_id = $1)
             ORDER BY timestamp DESC, id DESC",
            READING_COLUMNS
        );
        let rows = db.query(query.as_str(), &[&filter.road_segment])?;
        Ok(rows.iter().map(reading_from_row).collect())
    }

    fn get_reading(&self, id: i32) -> Result<SpeedReading, Error> {
        let mut db = self.pool.get()?;
        let query = format!("SELECT {} FROM speed_readings WHERE id = $1", READING_COLUMNS);
        db.query_opt(query.as_str(), &[&id])?
            .map(|row| reading_from_row(&row))
            .ok_or_else(|| Error::reading_not_found(id))
    }

    fn create_reading(&self, new: &NewSpeedReading) -> Result<SpeedReading, Error> {
        let mut db = self.pool.get()?;
        let mut tx = db.transaction()?;
        lock_segment(&mut tx, new.road_segment)?;
        let reading = insert_reading(&mut tx, new, Utc::now())?;
        tx.commit()?;
        debug!("created speed reading {} on segment {}", reading.id, reading.road_segment);
        Ok(reading)
    }

    fn update_reading(&self, id: i32, changes: &ReadingChanges) -> Result<SpeedReading, Error> {
        let mut db = self.pool.get()?;
        let mut tx = db.transaction()?;
        if let Some(segment_id) = changes.road_segment {
            lock_segment(&mut tx, segment_id)?;
        }
        let query = format!(
            "UPDATE speed_readings SET
                road_segment_id = COALESCE($2, road_segment_id),
                average_speed = COALESCE($3, average_speed),
                timestamp = COALESCE($4, timestamp)
             WHERE id = $1
             RETURNING {}",
            READING_COLUMNS
        );
        let row = tx
            .query_opt(
                query.as_str(),
                &[&id, &changes.road_segment, &changes.average_speed, &changes.timestamp],
            )?
            .ok_or_else(|| Error::reading_not_found(id))?;
        tx.commit()?;
        Ok(reading_from_row(&row))
    }

    fn delete_reading(&self, id: i32) -> Result<(), Error> {
        let mut db = self.pool.get()?;
        match db.execute("DELETE FROM speed_readings WHERE id = $1", &[&id])? {
            0 => Err(Error::reading_not_found(id)),
            _ => Ok(()),
        }
    }

    fn import_reading(
        &self,
        coordinates: &Coordinates,
        length: f64,
        average_speed: f64,
        at: DateTime<Utc>,
    ) -> Result<ImportOutcome, Error> {
        let mut db = self.pool.get()?;
        let mut tx = db.transaction()?;
        let existing = tx.query_opt(
            "SELECT id FROM road_segments
             WHERE longitude_start = $1 AND latitude_start = $2
               AND longitude_end = $3 AND latitude_end = $4
             ORDER BY id
             LIMIT 1
             FOR KEY SHARE",
            &[
                &coordinates.longitude_start,
                &coordinates.latitude_start,
                &coordinates.longitude_end,
                &coordinates.latitude_end,
            ],
        )?;
        let (segment_id, segment_created) = match existing {
            Some(row) => (row.get::<_, i32>(0), false),
            None => {
                let new = NewRoadSegment {
                    coordinates: *coordinates,
                    length,
                };
                (insert_segment(&mut tx, &new, at)?.id, true)
            }
        };
        let reading = insert_reading(
            &mut tx,
            &NewSpeedReading {
                road_segment: segment_id,
                average_speed,
                timestamp: at,
            },
            at,
        )?;
        tx.commit()?;
        Ok(ImportOutcome {
            segment_id,
            reading_id: reading.id,
            segment_created,
        })
    }

    fn create_user(&self, username: &str, is_admin: bool, token: &str) -> Result<User, Error> {
        let mut db = self.pool.get()?;
        let mut tx = db.transaction()?;
        let row = tx
            .query_one(
                "INSERT INTO users (username, is_admin) VALUES ($1, $2) RETURNING id",
                &[&username, &is_admin],
            )
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    let mut errors = FieldErrors::default();
                    errors.add("username", "A user with that username already exists.");
                    Error::Validation(errors)
                } else {
                    Error::Database(e)
                }
            })?;
        let id: i32 = row.get(0);
        tx.execute(
            "INSERT INTO api_tokens (key, user_id, created_at) VALUES ($1, $2, $3)",
            &[&token, &id, &Utc::now()],
        )?;
        tx.commit()?;
        Ok(User {
            id,
            username: username.to_string(),
            is_admin,
        })
    }

    fn user_for_token(&self, token: &str) -> Result<Option<User>, Error> {
        let mut db = self.pool.get()?;
        let row = db.query_opt(
            "SELECT u.id, u.username, u.is_admin
             FROM api_tokens t JOIN users u ON u.id = t.user_id
             WHERE t.key = $1",
            &[&token],
        )?;
        Ok(row.map(|row| User {
            id: row.get("id"),
            username: row.get("username"),
            is_admin: row.get("is_admin"),
        }))
    }
}
