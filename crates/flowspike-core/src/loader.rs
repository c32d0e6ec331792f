//! CSV input adapter for flow records.
//!
//! Expects a header row with `entity_id`, `date` and `flow_count` columns.
//! The raw security data set names these `l_ipn` and `f`; both spellings are
//! accepted. Other columns are ignored.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use tracing::info;

use crate::error::LoadError;
use crate::series::{EntityId, FlowRecord};

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "l_ipn")]
    entity_id: EntityId,
    date: String,
    #[serde(alias = "f")]
    flow_count: f64,
}

/// Parse `YYYY-MM-DD`, dropping any time-of-day part.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

pub fn read_csv<R: Read>(reader: R) -> Result<Vec<FlowRecord>, LoadError> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut records = Vec::new();

    for (i, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row?;
        // header is line 1
        let line = i as u64 + 2;
        let date = parse_date(&row.date).ok_or_else(|| LoadError::BadDate {
            line,
            value: row.date.clone(),
        })?;
        records.push(FlowRecord::new(row.entity_id, date, row.flow_count));
    }

    Ok(records)
}

pub fn load_csv(path: &Path) -> Result<Vec<FlowRecord>, LoadError> {
    let file = File::open(path)?;
    let records = read_csv(BufReader::new(file))?;
    info!(path = %path.display(), records = records.len(), "Loaded flow records");
    Ok(records)
}

pub fn write_csv<W: Write>(writer: W, records: &[FlowRecord]) -> Result<(), LoadError> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_csv(path: &Path, records: &[FlowRecord]) -> Result<(), LoadError> {
    let file = File::create(path)?;
    write_csv(file, records)?;
    info!(path = %path.display(), records = records.len(), "Wrote flow records");
    Ok(())
}
