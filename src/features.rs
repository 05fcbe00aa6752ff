//! Driver-state features for a batch of booking queries.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cycles::count_completed_cycles;
use crate::event_log::EventLogIndex;
use crate::resolver::{lookup_state, ResolvedState, StateLookup, StateLookupError};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    Category,
    Bool,
    Count,
}

impl FeatureDType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Bool => "bool",
            Self::Count => "count",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub entity_id: String,
    pub ts_ms_utc: i64,
}

impl QueryRecord {
    pub fn new(entity_id: impl Into<String>, ts_ms_utc: i64) -> Self {
        Self {
            entity_id: entity_id.into(),
            ts_ms_utc,
        }
    }
}

/// How the state of a resolved row was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateCoverage {
    Matched,
    UnknownEntity,
    NoMatchingInterval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowStatus {
    Resolved {
        state: ResolvedState,
        accumulated_cycles: Option<u64>,
        coverage: StateCoverage,
    },
    Failed {
        reason: StateLookupError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverStateRow {
    pub query: QueryRecord,
    pub status: RowStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub parallel: bool,
    pub parallel_min_rows: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            parallel_min_rows: 1_024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub input_rows: u64,
    pub resolved_rows: u64,
    pub unknown_entity_rows: u64,
    pub no_coverage_rows: u64,
    pub failed_rows: u64,
    pub first_error: Option<String>,
}

pub fn build_driver_state_schema() -> FeatureSchema {
    let columns = vec![
        column("state", FeatureDType::Category),
        column("previous_state", FeatureDType::Category),
        column("was_in_ride", FeatureDType::Bool),
        column("was_connected", FeatureDType::Bool),
        column("accumulated_cycles", FeatureDType::Count),
    ];
    let fingerprint = schema_fingerprint(FEATURE_SCHEMA_VERSION, &columns);

    debug!(
        component = "features",
        event = "features.schema.built",
        version = FEATURE_SCHEMA_VERSION,
        column_count = columns.len(),
        fingerprint = %fingerprint
    );

    FeatureSchema {
        version: FEATURE_SCHEMA_VERSION,
        fingerprint,
        columns,
    }
}

/// Checks both the stamped fingerprint and one recomputed from `actual.columns`, so a
/// schema whose columns were edited after stamping is rejected too.
pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), SchemaError> {
    if expected_version != actual.version {
        return Err(SchemaError::VersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    let derived = schema_fingerprint(actual.version, &actual.columns);
    for fingerprint in [&actual.fingerprint, &derived] {
        if expected_fingerprint != fingerprint.as_str() {
            return Err(SchemaError::FingerprintMismatch {
                expected: expected_fingerprint.to_string(),
                actual: fingerprint.clone(),
            });
        }
    }

    Ok(())
}

/// Resolves one query. Pure in `(query, index)`.
pub fn resolve_query(index: &EventLogIndex, query: &QueryRecord) -> DriverStateRow {
    let status = match lookup_state(index, &query.entity_id, query.ts_ms_utc) {
        Ok(lookup) => {
            let coverage = match lookup {
                StateLookup::Matched(_) => StateCoverage::Matched,
                StateLookup::UnknownEntity => StateCoverage::UnknownEntity,
                StateLookup::NoMatchingInterval => StateCoverage::NoMatchingInterval,
            };
            RowStatus::Resolved {
                state: lookup.into_resolved(),
                accumulated_cycles: count_completed_cycles(
                    index,
                    &query.entity_id,
                    query.ts_ms_utc,
                ),
                coverage,
            }
        }
        Err(reason) => RowStatus::Failed { reason },
    };

    DriverStateRow {
        query: query.clone(),
        status,
    }
}

/// Resolves every query; the output has one row per query, in input order.
pub fn apply_driver_state_batch(
    queries: &[QueryRecord],
    index: &EventLogIndex,
    cfg: &BatchConfig,
) -> (Vec<DriverStateRow>, BatchReport) {
    let parallel = cfg.parallel && queries.len() >= cfg.parallel_min_rows.max(1);

    info!(
        component = "features",
        event = "features.batch.start",
        input_rows = queries.len(),
        entities = index.entity_count(),
        parallel
    );

    let rows: Vec<DriverStateRow> = if parallel {
        queries
            .par_iter()
            .map(|query| resolve_query(index, query))
            .collect()
    } else {
        queries
            .iter()
            .map(|query| resolve_query(index, query))
            .collect()
    };

    let report = summarize(&rows);

    info!(
        component = "features",
        event = "features.batch.finish",
        input_rows = report.input_rows,
        resolved_rows = report.resolved_rows,
        unknown_entity_rows = report.unknown_entity_rows,
        no_coverage_rows = report.no_coverage_rows,
        failed_rows = report.failed_rows
    );

    (rows, report)
}

fn summarize(rows: &[DriverStateRow]) -> BatchReport {
    let mut report = BatchReport {
        input_rows: rows.len() as u64,
        resolved_rows: 0,
        unknown_entity_rows: 0,
        no_coverage_rows: 0,
        failed_rows: 0,
        first_error: None,
    };

    for row in rows {
        match &row.status {
            RowStatus::Resolved { coverage, .. } => {
                report.resolved_rows += 1;
                match coverage {
                    StateCoverage::Matched => {}
                    StateCoverage::UnknownEntity => report.unknown_entity_rows += 1,
                    StateCoverage::NoMatchingInterval => report.no_coverage_rows += 1,
                }
            }
            RowStatus::Failed { reason } => {
                report.failed_rows += 1;
                warn!(
                    component = "features",
                    event = "features.batch.row_failed",
                    entity_id = %row.query.entity_id,
                    ts_ms_utc = row.query.ts_ms_utc,
                    reason = %reason
                );
                if report.first_error.is_none() {
                    report.first_error = Some(reason.to_string());
                }
            }
        }
    }

    report
}

fn column(name: &str, dtype: FeatureDType) -> FeatureColumn {
    FeatureColumn {
        name: name.to_string(),
        dtype,
    }
}

fn schema_fingerprint(version: u32, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{version};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(":");
        hasher.update(column.dtype.as_str());
        hasher.update(";");
    }
    hex::encode(hasher.finalize())
}
