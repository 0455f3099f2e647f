//! Bulk load of road segments and speed readings from a CSV export.
//!
//! Expected header: `ID,Long_start,Lat_start,Long_end,Lat_end,Length,Speed`.
//! Segments are deduplicated on their four coordinates; every accepted row
//! yields one new reading stamped with the import time. Bad rows are counted
//! and skipped, never fatal.

use std::fs::File;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Deserialize;

use crate::error::Error;
use crate::models::Coordinates;
use crate::store::Store;

pub const DEFAULT_PATH: &str = "data/traffic_speed.csv";
const PROGRESS_EVERY: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("cannot open {path}: {source}")]
    Open { path: String, source: io::Error },
    #[error("cannot read CSV header: {0}")]
    Header(csv::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("malformed row: {0}")]
    Parse(#[from] csv::Error),
    #[error("row {source_id}: {field} is not a finite number")]
    NonFinite { source_id: i64, field: &'static str },
    #[error("row {source_id} rejected by store: {error}")]
    Store { source_id: i64, error: Error },
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "ID")]
    source_id: i64,
    #[serde(rename = "Long_start")]
    longitude_start: f64,
    #[serde(rename = "Lat_start")]
    latitude_start: f64,
    #[serde(rename = "Long_end")]
    longitude_end: f64,
    #[serde(rename = "Lat_end")]
    latitude_end: f64,
    #[serde(rename = "Length")]
    length: f64,
    #[serde(rename = "Speed")]
    speed: f64,
}

impl CsvRow {
    /// `f64` parsing accepts `NaN` and `inf`; neither is a usable measurement.
    fn check_finite(&self) -> Result<(), RowError> {
        let fields = [
            ("Long_start", self.longitude_start),
            ("Lat_start", self.latitude_start),
            ("Long_end", self.longitude_end),
            ("Lat_end", self.latitude_end),
            ("Length", self.length),
            ("Speed", self.speed),
        ];
        match fields.iter().find(|(_, value)| !value.is_finite()) {
            Some(&(field, _)) => Err(RowError::NonFinite {
                source_id: self.source_id,
                field,
            }),
            None => Ok(()),
        }
    }

    fn coordinates(&self) -> Coordinates {
        Coordinates {
            longitude_start: self.longitude_start,
            latitude_start: self.latitude_start,
            longitude_end: self.longitude_end,
            latitude_end: self.latitude_end,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub segments_created: usize,
    pub readings_created: usize,
    pub errors: usize,
}

pub fn import_path<P: AsRef<Path>>(
    store: &dyn Store,
    path: P,
    at: DateTime<Utc>,
) -> Result<ImportSummary, ImportError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ImportError::Open {
        path: path.display().to_string(),
        source,
    })?;
    info!("importing {}", path.display());
    import_reader(store, file, at)
}

pub fn import_reader<R: io::Read>(
    store: &dyn Store,
    reader: R,
    at: DateTime<Utc>,
) -> Result<ImportSummary, ImportError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    rdr.headers().map_err(ImportError::Header)?;

    let mut summary = ImportSummary::default();
    for (line, result) in rdr.deserialize::<CsvRow>().enumerate() {
        match import_row(store, result, at) {
            Ok(created) => {
                summary.readings_created += 1;
                if created {
                    summary.segments_created += 1;
                    if summary.segments_created % PROGRESS_EVERY == 0 {
                        info!("{} segments created so far", summary.segments_created);
                    }
                }
            }
            Err(e) => {
                summary.errors += 1;
                // +2: one for the header, one for 1-based numbering.
                warn!("skipping line {}: {}", line + 2, e);
            }
        }
    }

    info!(
        "import finished: {} segments created, {} readings created, {} errors",
        summary.segments_created, summary.readings_created, summary.errors
    );
    Ok(summary)
}

/// Returns whether a new segment had to be created for the row.
fn import_row(
    store: &dyn Store,
    row: Result<CsvRow, csv::Error>,
    at: DateTime<Utc>,
) -> Result<bool, RowError> {
    let row = row?;
    row.check_finite()?;
    let outcome = store
        .import_reading(&row.coordinates(), row.length, row.speed, at)
        .map_err(|error| RowError::Store {
            source_id: row.source_id,
            error,
        })?;
    debug!(
        "row {} -> segment {} reading {}",
        row.source_id, outcome.segment_id, outcome.reading_id
    );
    Ok(outcome.segment_created)
}
