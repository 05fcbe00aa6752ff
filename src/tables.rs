//! CSV adapters for the driver log, the booking query table and the feature output.

use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use csv::StringRecord;
use thiserror::Error;
use tracing::info;

use crate::event_log::{DriverState, RawDriverEvent};
use crate::features::{
    assert_schema_compatible, build_driver_state_schema, DriverStateRow, FeatureSchema,
    QueryRecord, RowStatus, SchemaError,
};

const ENTITY_COLUMNS: &[&str] = &["entity_id", "driver_id"];
const TIMESTAMP_COLUMNS: &[&str] = &["timestamp", "logged_at"];
const STATE_COLUMNS: &[&str] = &["state", "new_state"];
const PREV_TIMESTAMP_COLUMNS: &[&str] = &["prev_timestamp", "prev_logged_at"];
const ERROR_COLUMN: &str = "resolution_error";

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column {column}")]
    MissingColumn { column: &'static str },
    #[error("failed to parse field {field} value '{value}' on line {line}")]
    ParseField {
        field: &'static str,
        value: String,
        line: u64,
    },
    #[error("unsupported feature column {0}")]
    UnsupportedColumn(String),
    #[error("feature rows ({rows}) do not match query rows ({queries})")]
    RowCountMismatch { rows: usize, queries: usize },
    #[error("feature schema rejected: {0}")]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTableRow {
    pub query: QueryRecord,
    /// Every input cell, unchanged.
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTable {
    pub headers: Vec<String>,
    pub rows: Vec<QueryTableRow>,
}

impl QueryTable {
    pub fn queries(&self) -> Vec<QueryRecord> {
        self.rows.iter().map(|row| row.query.clone()).collect()
    }
}

pub fn read_event_table<R: Read>(reader: R) -> Result<Vec<RawDriverEvent>, TableError> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers()?.clone();
    let entity_idx = require_column(&headers, ENTITY_COLUMNS, "entity_id")?;
    let ts_idx = require_column(&headers, TIMESTAMP_COLUMNS, "timestamp")?;
    let state_idx = require_column(&headers, STATE_COLUMNS, "state")?;
    let prev_idx = find_column(&headers, PREV_TIMESTAMP_COLUMNS);

    let mut events = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record_line(&record);
        let prev_ts_ms_utc = match prev_idx {
            Some(idx) => parse_optional_timestamp(&record, idx, "prev_timestamp", line)?,
            None => None,
        };

        events.push(RawDriverEvent {
            entity_id: cell(&record, entity_idx).to_string(),
            ts_ms_utc: parse_required_timestamp(&record, ts_idx, "timestamp", line)?,
            state: parse_state(&record, state_idx, line)?,
            prev_ts_ms_utc,
        });
    }

    info!(
        component = "tables",
        event = "tables.events.read",
        rows = events.len(),
        has_prev_timestamp = prev_idx.is_some()
    );

    Ok(events)
}

pub fn read_query_table<R: Read>(reader: R) -> Result<QueryTable, TableError> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers()?.clone();
    let entity_idx = require_column(&headers, ENTITY_COLUMNS, "entity_id")?;
    let ts_idx = require_column(&headers, TIMESTAMP_COLUMNS, "timestamp")?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record_line(&record);
        rows.push(QueryTableRow {
            query: QueryRecord {
                entity_id: cell(&record, entity_idx).to_string(),
                ts_ms_utc: parse_required_timestamp(&record, ts_idx, "timestamp", line)?,
            },
            cells: record.iter().map(str::to_string).collect(),
        });
    }

    info!(
        component = "tables",
        event = "tables.queries.read",
        rows = rows.len(),
        columns = headers.len()
    );

    Ok(QueryTable {
        headers: headers.iter().map(str::to_string).collect(),
        rows,
    })
}

/// Writes the query cells followed by one cell per schema column and the error column.
///
/// `schema` must match the driver-state schema this crate builds, version and fingerprint.
pub fn write_feature_table<W: Write>(
    writer: W,
    table: &QueryTable,
    rows: &[DriverStateRow],
    schema: &FeatureSchema,
) -> Result<(), TableError> {
    let expected = build_driver_state_schema();
    assert_schema_compatible(expected.version, &expected.fingerprint, schema)?;

    if rows.len() != table.rows.len() {
        return Err(TableError::RowCountMismatch {
            rows: rows.len(),
            queries: table.rows.len(),
        });
    }

    let mut writer = csv::Writer::from_writer(writer);
    let mut header: Vec<&str> = table.headers.iter().map(String::as_str).collect();
    header.extend(schema.columns.iter().map(|column| column.name.as_str()));
    header.push(ERROR_COLUMN);
    writer.write_record(&header)?;

    for (input, row) in table.rows.iter().zip(rows) {
        let mut out = input.cells.clone();
        for column in &schema.columns {
            out.push(feature_cell(row, &column.name)?);
        }
        out.push(match &row.status {
            RowStatus::Failed { reason } => reason.to_string(),
            RowStatus::Resolved { .. } => String::new(),
        });
        writer.write_record(&out)?;
    }
    writer.flush()?;

    info!(
        component = "tables",
        event = "tables.features.written",
        rows = rows.len(),
        feature_columns = schema.columns.len()
    );

    Ok(())
}

pub fn load_event_table(path: &Path) -> Result<Vec<RawDriverEvent>, TableError> {
    read_event_table(std::fs::File::open(path)?)
}

pub fn load_query_table(path: &Path) -> Result<QueryTable, TableError> {
    read_query_table(std::fs::File::open(path)?)
}

pub fn save_feature_table(
    path: &Path,
    table: &QueryTable,
    rows: &[DriverStateRow],
    schema: &FeatureSchema,
) -> Result<(), TableError> {
    write_feature_table(std::fs::File::create(path)?, table, rows, schema)
}

/// Parses epoch milliseconds, RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    NAIVE_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(raw, format)
            .ok()
            .map(|naive| naive.and_utc().timestamp_millis())
    })
}

fn feature_cell(row: &DriverStateRow, column: &str) -> Result<String, TableError> {
    let RowStatus::Resolved {
        state,
        accumulated_cycles,
        ..
    } = &row.status
    else {
        return match column {
            "state" | "previous_state" | "was_in_ride" | "was_connected"
            | "accumulated_cycles" => Ok(String::new()),
            other => Err(TableError::UnsupportedColumn(other.to_string())),
        };
    };

    let value = match column {
        "state" => state.state.map(|s| s.as_str().to_string()),
        "previous_state" => state.previous_state.map(|s| s.as_str().to_string()),
        "was_in_ride" => state.was_in_ride.map(|v| v.to_string()),
        "was_connected" => state.was_connected.map(|v| v.to_string()),
        "accumulated_cycles" => accumulated_cycles.map(|v| v.to_string()),
        other => return Err(TableError::UnsupportedColumn(other.to_string())),
    };
    Ok(value.unwrap_or_default())
}

fn find_column(headers: &StringRecord, names: &[&str]) -> Option<usize> {
    names
        .iter()
        .find_map(|name| headers.iter().position(|header| header.trim() == *name))
}

fn require_column(
    headers: &StringRecord,
    names: &[&str],
    column: &'static str,
) -> Result<usize, TableError> {
    find_column(headers, names).ok_or(TableError::MissingColumn { column })
}

fn cell(record: &StringRecord, idx: usize) -> &str {
    record.get(idx).unwrap_or_default()
}

fn record_line(record: &StringRecord) -> u64 {
    record.position().map(|pos| pos.line()).unwrap_or_default()
}

fn parse_required_timestamp(
    record: &StringRecord,
    idx: usize,
    field: &'static str,
    line: u64,
) -> Result<i64, TableError> {
    let raw = cell(record, idx);
    parse_timestamp_ms(raw).ok_or_else(|| TableError::ParseField {
        field,
        value: raw.to_string(),
        line,
    })
}

fn parse_optional_timestamp(
    record: &StringRecord,
    idx: usize,
    field: &'static str,
    line: u64,
) -> Result<Option<i64>, TableError> {
    if cell(record, idx).trim().is_empty() {
        return Ok(None);
    }
    parse_required_timestamp(record, idx, field, line).map(Some)
}

fn parse_state(
    record: &StringRecord,
    idx: usize,
    line: u64,
) -> Result<Option<DriverState>, TableError> {
    let raw = cell(record, idx);
    if raw.trim().is_empty() {
        return Ok(None);
    }
    raw.parse::<DriverState>()
        .map(Some)
        .map_err(|_| TableError::ParseField {
            field: "state",
            value: raw.to_string(),
            line,
        })
}
