use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{Error, FieldErrors};
use crate::intensity::Intensity;

/// Start and end point of a segment, in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub longitude_start: f64,
    pub latitude_start: f64,
    pub longitude_end: f64,
    pub latitude_end: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoadSegment {
    pub id: i32,
    pub coordinates: Coordinates,
    /// Meters.
    pub length: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpeedReading {
    pub id: i32,
    pub road_segment: i32,
    /// km/h
    pub average_speed: f64,
    /// When the measurement was taken, not when the row was written.
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SpeedReading {
    pub fn intensity(&self) -> Intensity {
        Intensity::classify(self.average_speed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NewRoadSegment {
    pub coordinates: Coordinates,
    pub length: f64,
}

/// Partial replacement of a segment's writable fields.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SegmentChanges {
    pub longitude_start: Option<f64>,
    pub latitude_start: Option<f64>,
    pub longitude_end: Option<f64>,
    pub latitude_end: Option<f64>,
    pub length: Option<f64>,
}

impl SegmentChanges {
    /// Applies the changes and stamps `updated_at`.
    pub fn apply(&self, segment: &mut RoadSegment, now: DateTime<Utc>) {
        let c = &mut segment.coordinates;
        if let Some(v) = self.longitude_start {
            c.longitude_start = v;
        }
        if let Some(v) = self.latitude_start {
            c.latitude_start = v;
        }
        if let Some(v) = self.longitude_end {
            c.longitude_end = v;
        }
        if let Some(v) = self.latitude_end {
            c.latitude_end = v;
        }
        if let Some(v) = self.length {
            segment.length = v;
        }
        segment.updated_at = now;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NewSpeedReading {
    pub road_segment: i32,
    pub average_speed: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReadingChanges {
    pub road_segment: Option<i32>,
    pub average_speed: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ReadingChanges {
    pub fn apply(&self, reading: &mut SpeedReading) {
        if let Some(v) = self.road_segment {
            reading.road_segment = v;
        }
        if let Some(v) = self.average_speed {
            reading.average_speed = v;
        }
        if let Some(v) = self.timestamp {
            reading.timestamp = v;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub is_admin: bool,
}

const REQUIRED: &str = "This field is required.";

fn require<T>(value: Option<T>, field: &'static str, errors: &mut FieldErrors) -> Option<T> {
    if value.is_none() {
        errors.add(field, REQUIRED);
    }
    value
}

/// Request body for segment writes. Read-only fields (`id`, timestamps,
/// counts) are ignored if a client sends them.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct SegmentPayload {
    pub longitude_start: Option<f64>,
    pub latitude_start: Option<f64>,
    pub longitude_end: Option<f64>,
    pub latitude_end: Option<f64>,
    pub length: Option<f64>,
}

impl SegmentPayload {
    /// Full form, used by create and PUT: every field must be present.
    pub fn into_new(self) -> Result<NewRoadSegment, Error> {
        let mut errors = FieldErrors::default();
        let longitude_start = require(self.longitude_start, "longitude_start", &mut errors);
        let latitude_start = require(self.latitude_start, "latitude_start", &mut errors);
        let longitude_end = require(self.longitude_end, "longitude_end", &mut errors);
        let latitude_end = require(self.latitude_end, "latitude_end", &mut errors);
        let length = require(self.length, "length", &mut errors);

        match (longitude_start, latitude_start, longitude_end, latitude_end, length) {
            (Some(longitude_start), Some(latitude_start), Some(longitude_end), Some(latitude_end), Some(length)) => {
                Ok(NewRoadSegment {
                    coordinates: Coordinates {
                        longitude_start,
                        latitude_start,
                        longitude_end,
                        latitude_end,
                    },
                    length,
                })
            }
            _ => Err(Error::Validation(errors)),
        }
    }

    pub fn into_changes(self) -> SegmentChanges {
        SegmentChanges {
            longitude_start: self.longitude_start,
            latitude_start: self.latitude_start,
            longitude_end: self.longitude_end,
            latitude_end: self.latitude_end,
            length: self.length,
        }
    }
}

impl From<NewRoadSegment> for SegmentChanges {
    fn from(new: NewRoadSegment) -> SegmentChanges {
        SegmentChanges {
            longitude_start: Some(new.coordinates.longitude_start),
            latitude_start: Some(new.coordinates.latitude_start),
            longitude_end: Some(new.coordinates.longitude_end),
            latitude_end: Some(new.coordinates.latitude_end),
            length: Some(new.length),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct ReadingPayload {
    pub road_segment: Option<i32>,
    pub average_speed: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ReadingPayload {
    pub fn into_new(self) -> Result<NewSpeedReading, Error> {
        let mut errors = FieldErrors::default();
        let road_segment = require(self.road_segment, "road_segment", &mut errors);
        let average_speed = require(self.average_speed, "average_speed", &mut errors);
        let timestamp = require(self.timestamp, "timestamp", &mut errors);

        match (road_segment, average_speed, timestamp) {
            (Some(road_segment), Some(average_speed), Some(timestamp)) => Ok(NewSpeedReading {
                road_segment,
                average_speed,
                timestamp,
            }),
            _ => Err(Error::Validation(errors)),
        }
    }

    pub fn into_changes(self) -> ReadingChanges {
        ReadingChanges {
            road_segment: self.road_segment,
            average_speed: self.average_speed,
            timestamp: self.timestamp,
        }
    }
}

impl From<NewSpeedReading> for ReadingChanges {
    fn from(new: NewSpeedReading) -> ReadingChanges {
        ReadingChanges {
            road_segment: Some(new.road_segment),
            average_speed: Some(new.average_speed),
            timestamp: Some(new.timestamp),
        }
    }
}
