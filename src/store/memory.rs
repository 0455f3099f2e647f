use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::models::{
    Coordinates, NewRoadSegment, NewSpeedReading, ReadingChanges, RoadSegment, SegmentChanges,
    SpeedReading, User,
};
use crate::store::{ImportOutcome, ReadingFilter, SegmentFilter, SegmentRecord, Store};

#[derive(Default)]
struct Tables {
    segments: BTreeMap<i32, RoadSegment>,
    readings: BTreeMap<i32, SpeedReading>,
    users: BTreeMap<i32, User>,
    tokens: HashMap<String, i32>,
    next_segment_id: i32,
    next_reading_id: i32,
    next_user_id: i32,
}

impl Tables {
    fn record(&self, segment: &RoadSegment) -> SegmentRecord {
        let mut total_readings = 0;
        let mut latest: Option<&SpeedReading> = None;
        for reading in self.readings.values().filter(|r| r.road_segment == segment.id) {
            total_readings += 1;
            if latest.map_or(true, |l| (reading.timestamp, reading.id) > (l.timestamp, l.id)) {
                latest = Some(reading);
            }
        }
        SegmentRecord {
            segment: segment.clone(),
            total_readings,
            latest_reading: latest.cloned(),
        }
    }

    fn insert_segment(&mut self, new: &NewRoadSegment, now: DateTime<Utc>) -> RoadSegment {
        self.next_segment_id += 1;
        let segment = RoadSegment {
            id: self.next_segment_id,
            coordinates: new.coordinates,
            length: new.length,
            created_at: now,
            updated_at: now,
        };
        self.segments.insert(segment.id, segment.clone());
        segment
    }

    fn insert_reading(&mut self, new: &NewSpeedReading, now: DateTime<Utc>) -> Result<SpeedReading, Error> {
        if !self.segments.contains_key(&new.road_segment) {
            return Err(Error::segment_not_found(new.road_segment));
        }
        self.next_reading_id += 1;
        let reading = SpeedReading {
            id: self.next_reading_id,
            road_segment: new.road_segment,
            average_speed: new.average_speed,
            timestamp: new.timestamp,
            created_at: now,
        };
        self.readings.insert(reading.id, reading.clone());
        Ok(reading)
    }
}

/// Store kept entirely in process memory. One mutex guards all tables, so
/// every operation is trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, Error> {
        self.tables
            .lock()
            .map_err(|_| Error::Store("memory store mutex poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn list_segments(&self, filter: &SegmentFilter) -> Result<Vec<SegmentRecord>, Error> {
        let tables = self.lock()?;
        Ok(tables
            .segments
            .values()
            .map(|s| tables.record(s))
            .filter(|r| filter.matches(r))
            .collect())
    }

    fn get_segment(&self, id: i32) -> Result<SegmentRecord, Error> {
        let tables = self.lock()?;
        let segment = tables.segments.get(&id).ok_or_else(|| Error::segment_not_found(id))?;
        Ok(tables.record(segment))
    }

    fn create_segment(&self, new: &NewRoadSegment) -> Result<SegmentRecord, Error> {
        let mut tables = self.lock()?;
        let segment = tables.insert_segment(new, Utc::now());
        Ok(tables.record(&segment))
    }

    fn update_segment(&self, id: i32, changes: &SegmentChanges) -> Result<SegmentRecord, Error> {
        let mut tables = self.lock()?;
        let segment = tables.segments.get_mut(&id).ok_or_else(|| Error::segment_not_found(id))?;
        changes.apply(segment, Utc::now());
        let segment = segment.clone();
        Ok(tables.record(&segment))
    }

    fn delete_segment(&self, id: i32) -> Result<(), Error> {
        let mut tables = self.lock()?;
        if tables.segments.remove(&id).is_none() {
            return Err(Error::segment_not_found(id));
        }
        tables.readings.retain(|_, r| r.road_segment != id);
        Ok(())
    }

    fn list_readings(&self, filter: &ReadingFilter) -> Result<Vec<SpeedReading>, Error> {
        let tables = self.lock()?;
        let mut readings: Vec<SpeedReading> = tables
            .readings
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        readings.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        Ok(readings)
    }

    fn get_reading(&self, id: i32) -> Result<SpeedReading, Error> {
        let tables = self.lock()?;
        tables.readings.get(&id).cloned().ok_or_else(|| Error::reading_not_found(id))
    }

    fn create_reading(&self, new: &NewSpeedReading) -> Result<SpeedReading, Error> {
        self.lock()?.insert_reading(new, Utc::now())
    }

    fn update_reading(&self, id: i32, changes: &ReadingChanges) -> Result<SpeedReading, Error> {
        let mut tables = self.lock()?;
        if let Some(segment_id) = changes.road_segment {
            if !tables.segments.contains_key(&segment_id) {
                return Err(Error::segment_not_found(segment_id));
            }
        }
        let reading = tables.readings.get_mut(&id).ok_or_else(|| Error::reading_not_found(id))?;
        changes.apply(reading);
        Ok(reading.clone())
    }

    fn delete_reading(&self, id: i32) -> Result<(), Error> {
        let mut tables = self.lock()?;
        match tables.readings.remove(&id) {
            Some(_) => Ok(()),
            None => Err(Error::reading_not_found(id)),
        }
    }

    fn import_reading(
        &self,
        coordinates: &Coordinates,
        length: f64,
        average_speed: f64,
        at: DateTime<Utc>,
    ) -> Result<ImportOutcome, Error> {
        let mut tables = self.lock()?;
        let existing = tables
            .segments
            .values()
            .find(|s| s.coordinates == *coordinates)
            .map(|s| s.id);
        let (segment_id, segment_created) = match existing {
            Some(id) => (id, false),
            None => {
                let new = NewRoadSegment {
                    coordinates: *coordinates,
                    length,
                };
                (tables.insert_segment(&new, at).id, true)
            }
        };
        let reading = tables.insert_reading(
            &NewSpeedReading {
                road_segment: segment_id,
                average_speed,
                timestamp: at,
            },
            at,
        )?;
        Ok(ImportOutcome {
            segment_id,
            reading_id: reading.id,
            segment_created,
        })
    }

    fn create_user(&self, username: &str, is_admin: bool, token: &str) -> Result<User, Error> {
        let mut tables = self.lock()?;
        if tables.users.values().any(|u| u.username == username) {
            let mut errors = crate::error::FieldErrors::default();
            errors.add("username", "A user with that username already exists.");
            return Err(Error::Validation(errors));
        }
        tables.next_user_id += 1;
        let user = User {
            id: tables.next_user_id,
            username: username.to_string(),
            is_admin,
        };
        tables.users.insert(user.id, user.clone());
        tables.tokens.insert(token.to_string(), user.id);
        Ok(user)
    }

    fn user_for_token(&self, token: &str) -> Result<Option<User>, Error> {
        let tables = self.lock()?;
        Ok(tables
            .tokens
            .get(token)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }
}
