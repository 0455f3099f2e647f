//! Outward JSON shapes of segments and readings.
//!
//! The list endpoint uses [`SegmentSummary`] (no latest reading, keeps the
//! payload small); retrieve/create/update use [`SegmentDetail`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::intensity::Intensity;
use crate::models::SpeedReading;
use crate::store::SegmentRecord;

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct ReadingView {
    pub id: i32,
    pub road_segment: i32,
    /// km/h
    #[schema(example = 35.4)]
    pub average_speed: f64,
    pub intensity: Intensity,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<&SpeedReading> for ReadingView {
    fn from(reading: &SpeedReading) -> ReadingView {
        ReadingView {
            id: reading.id,
            road_segment: reading.road_segment,
            average_speed: reading.average_speed,
            intensity: reading.intensity(),
            timestamp: reading.timestamp,
            created_at: reading.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct SegmentSummary {
    pub id: i32,
    pub longitude_start: f64,
    pub latitude_start: f64,
    pub longitude_end: f64,
    pub latitude_end: f64,
    pub length: f64,
    pub total_readings: i64,
}

impl From<&SegmentRecord> for SegmentSummary {
    fn from(record: &SegmentRecord) -> SegmentSummary {
        let segment = &record.segment;
        SegmentSummary {
            id: segment.id,
            longitude_start: segment.coordinates.longitude_start,
            latitude_start: segment.coordinates.latitude_start,
            longitude_end: segment.coordinates.longitude_end,
            latitude_end: segment.coordinates.latitude_end,
            length: segment.length,
            total_readings: record.total_readings,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct SegmentDetail {
    #[serde(flatten)]
    pub summary: SegmentSummary,
    /// `null` when the segment has no readings yet.
    pub latest_reading: Option<ReadingView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&SegmentRecord> for SegmentDetail {
    fn from(record: &SegmentRecord) -> SegmentDetail {
        SegmentDetail {
            summary: SegmentSummary::from(record),
            latest_reading: record.latest_reading.as_ref().map(ReadingView::from),
            created_at: record.segment.created_at,
            updated_at: record.segment.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coordinates, RoadSegment};
    use chrono::TimeZone;
    use serde_json::json;

    fn record(latest: Option<SpeedReading>, total: i64) -> SegmentRecord {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        SegmentRecord {
            segment: RoadSegment {
                id: 7,
                coordinates: Coordinates {
                    longitude_start: 103.946,
                    latitude_start: 30.75,
                    longitude_end: 103.947,
                    latitude_end: 30.751,
                },
                length: 120.5,
                created_at: at,
                updated_at: at,
            },
            total_readings: total,
            latest_reading: latest,
        }
    }

    #[test]
    fn summary_has_counts_but_no_latest_reading() {
        let body = serde_json::to_value(SegmentSummary::from(&record(None, 4))).unwrap();
        assert_eq!(
            body,
            json!({
                "id": 7,
                "longitude_start": 103.946,
                "latitude_start": 30.75,
                "longitude_end": 103.947,
                "latitude_end": 30.751,
                "length": 120.5,
                "total_readings": 4
            })
        );
    }

    #[test]
    fn detail_without_readings_has_null_latest() {
        let body = serde_json::to_value(SegmentDetail::from(&record(None, 0))).unwrap();
        assert_eq!(body["total_readings"], 0);
        assert!(body["latest_reading"].is_null());
        assert_eq!(body["created_at"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn detail_embeds_latest_reading_with_intensity() {
        let at = Utc.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).unwrap();
        let reading = SpeedReading {
            id: 3,
            road_segment: 7,
            average_speed: 55.0,
            timestamp: at,
            created_at: at,
        };
        let body = serde_json::to_value(SegmentDetail::from(&record(Some(reading), 2))).unwrap();
        assert_eq!(body["latest_reading"]["id"], 3);
        assert_eq!(body["latest_reading"]["average_speed"], 55.0);
        assert_eq!(body["latest_reading"]["intensity"], "baixa");
        assert_eq!(body["latest_reading"]["timestamp"], "2024-05-02T08:30:00Z");
    }
}
