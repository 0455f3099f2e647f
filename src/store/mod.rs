//! Storage seam. Every method is one atomic unit of work against the
//! backing store; callers never compose transactions themselves.

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::intensity::Intensity;
use crate::models::{
    Coordinates, NewRoadSegment, NewSpeedReading, ReadingChanges, RoadSegment, SegmentChanges,
    SpeedReading, User,
};

pub mod memory;
pub mod pg;

pub use self::memory::MemoryStore;
pub use self::pg::PgStore;

/// A segment together with the figures derived from its readings.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentRecord {
    pub segment: RoadSegment,
    pub total_readings: i64,
    /// Greatest `timestamp`, ties broken by greatest id.
    pub latest_reading: Option<SpeedReading>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SegmentFilter {
    /// Keep only segments whose latest reading classifies as this level.
    /// Segments without readings never match.
    pub intensity: Option<Intensity>,
}

impl SegmentFilter {
    pub fn matches(&self, record: &SegmentRecord) -> bool {
        match self.intensity {
            None => true,
            Some(level) => record
                .latest_reading
                .as_ref()
                .map_or(false, |r| r.intensity() == level),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadingFilter {
    pub road_segment: Option<i32>,
}

impl ReadingFilter {
    pub fn matches(&self, reading: &SpeedReading) -> bool {
        self.road_segment.map_or(true, |id| reading.road_segment == id)
    }
}

/// Result of importing one row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportOutcome {
    pub segment_id: i32,
    pub reading_id: i32,
    pub segment_created: bool,
}

pub trait Store: Send + Sync + 'static {
    /// Ordered by id ascending.
    fn list_segments(&self, filter: &SegmentFilter) -> Result<Vec<SegmentRecord>, Error>;
    fn get_segment(&self, id: i32) -> Result<SegmentRecord, Error>;
    fn create_segment(&self, new: &NewRoadSegment) -> Result<SegmentRecord, Error>;
    fn update_segment(&self, id: i32, changes: &SegmentChanges) -> Result<SegmentRecord, Error>;
    /// Removes the segment and all of its readings.
    fn delete_segment(&self, id: i32) -> Result<(), Error>;

    /// Ordered by reading timestamp descending.
    fn list_readings(&self, filter: &ReadingFilter) -> Result<Vec<SpeedReading>, Error>;
    fn get_reading(&self, id: i32) -> Result<SpeedReading, Error>;
    /// Fails with `NotFound` if the owning segment does not exist.
    fn create_reading(&self, new: &NewSpeedReading) -> Result<SpeedReading, Error>;
    fn update_reading(&self, id: i32, changes: &ReadingChanges) -> Result<SpeedReading, Error>;
    fn delete_reading(&self, id: i32) -> Result<(), Error>;

    /// Reuses the lowest-id segment with exactly these coordinates or creates
    /// one with `length`, then attaches a reading stamped `at`.
    fn import_reading(
        &self,
        coordinates: &Coordinates,
        length: f64,
        average_speed: f64,
        at: DateTime<Utc>,
    ) -> Result<ImportOutcome, Error>;

    fn create_user(&self, username: &str, is_admin: bool, token: &str) -> Result<User, Error>;
    fn user_for_token(&self, token: &str) -> Result<Option<User>, Error>;
}
