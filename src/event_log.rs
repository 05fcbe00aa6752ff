//! Per-driver event log index.
//!
//! Turns the raw, unordered driver log into one timestamp-ordered, immutable
//! sequence per driver. Every event carries the timestamp of its predecessor so the
//! resolver can test the `(prev, ts]` window of a single candidate event.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    Connected,
    Disconnected,
    BeganRide,
    EndedRide,
}

impl DriverState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::BeganRide => "began_ride",
            Self::EndedRide => "ended_ride",
        }
    }

    pub fn was_in_ride(self) -> bool {
        matches!(self, Self::EndedRide)
    }

    pub fn was_connected(self) -> bool {
        matches!(self, Self::Disconnected | Self::EndedRide | Self::BeganRide)
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown driver state: {0}")]
pub struct UnknownDriverState(pub String);

impl FromStr for DriverState {
    type Err = UnknownDriverState;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            "began_ride" => Ok(Self::BeganRide),
            "ended_ride" => Ok(Self::EndedRide),
            other => Err(UnknownDriverState(other.to_string())),
        }
    }
}

/// One row of the driver log as it arrives, before grouping and sorting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDriverEvent {
    pub entity_id: String,
    pub ts_ms_utc: i64,
    pub state: Option<DriverState>,
    /// Link to the previous event when the source table already carries one.
    pub prev_ts_ms_utc: Option<i64>,
}

impl RawDriverEvent {
    pub fn new(entity_id: impl Into<String>, ts_ms_utc: i64, state: DriverState) -> Self {
        Self {
            entity_id: entity_id.into(),
            ts_ms_utc,
            state: Some(state),
            prev_ts_ms_utc: None,
        }
    }
}

/// An indexed event. `None` in the tri-state fields means the source row had no state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverEvent {
    pub ts_ms_utc: i64,
    pub prev_ts_ms_utc: Option<i64>,
    pub state: Option<DriverState>,
    pub previous_state: Option<DriverState>,
    pub was_in_ride: Option<bool>,
    pub was_connected: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    Reject,
    KeepFirst,
    KeepLast,
}

/// What to do with a `prev_timestamp` column already present in the source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrevLinkPolicy {
    /// Links always come from the sort order; disagreeing supplied links are counted.
    Recompute,
    /// A supplied link that disagrees with the sort order fails the build.
    Reject,
    /// Supplied links are kept as-is, so event windows may overlap or leave gaps.
    TrustSupplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBuildConfig {
    pub duplicate_policy: DuplicatePolicy,
    pub prev_link_policy: PrevLinkPolicy,
}

impl Default for IndexBuildConfig {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::Reject,
            prev_link_policy: PrevLinkPolicy::Recompute,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBuildReport {
    pub input_events: u64,
    pub indexed_events: u64,
    pub entities: u64,
    pub duplicates_removed: u64,
    pub inconsistent_prev_links: u64,
}

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("duplicate timestamp {ts_ms_utc} for entity {entity_id}")]
    DuplicateTimestamp { entity_id: String, ts_ms_utc: i64 },
    #[error(
        "prev timestamp {supplied_prev_ts_ms_utc} of event {ts_ms_utc} for entity {entity_id} does not match the preceding event"
    )]
    InconsistentPrevLink {
        entity_id: String,
        ts_ms_utc: i64,
        supplied_prev_ts_ms_utc: i64,
    },
}

/// Sorted history of a single driver plus the lookups derived from it.
#[derive(Debug, Clone)]
pub(crate) struct EntityLog {
    pub(crate) events: Vec<DriverEvent>,
    pub(crate) ride_starts_ms_utc: Vec<i64>,
    /// False when a kept supplied prev link disagrees with the sort order.
    pub(crate) links_follow_order: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EventLogIndex {
    entities: HashMap<String, EntityLog>,
}

impl EventLogIndex {
    pub fn events_for(&self, entity_id: &str) -> &[DriverEvent] {
        self.entities
            .get(entity_id)
            .map(|log| log.events.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains_entity(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn event_count(&self) -> usize {
        self.entities.values().map(|log| log.events.len()).sum()
    }

    pub(crate) fn entity(&self, entity_id: &str) -> Option<&EntityLog> {
        self.entities.get(entity_id)
    }
}

pub fn build_event_log_index(
    events: Vec<RawDriverEvent>,
    cfg: &IndexBuildConfig,
) -> Result<(EventLogIndex, IndexBuildReport), EventLogError> {
    info!(
        component = "event_log",
        event = "event_log.index.start",
        input_events = events.len(),
        duplicate_policy = ?cfg.duplicate_policy,
        prev_link_policy = ?cfg.prev_link_policy
    );

    let mut report = IndexBuildReport {
        input_events: events.len() as u64,
        indexed_events: 0,
        entities: 0,
        duplicates_removed: 0,
        inconsistent_prev_links: 0,
    };

    let mut grouped: HashMap<String, Vec<RawDriverEvent>> = HashMap::new();
    for event in events {
        grouped
            .entry(event.entity_id.clone())
            .or_default()
            .push(event);
    }

    let mut entities = HashMap::with_capacity(grouped.len());
    for (entity_id, mut rows) in grouped {
        // Stable sort keeps input order among equal timestamps for the tie-break.
        rows.sort_by_key(|row| row.ts_ms_utc);
        let rows = dedupe_timestamps(&entity_id, rows, cfg.duplicate_policy, &mut report)?;
        let log = link_entity_log(&entity_id, rows, cfg.prev_link_policy, &mut report)?;
        report.indexed_events += log.events.len() as u64;
        entities.insert(entity_id, log);
    }
    report.entities = entities.len() as u64;

    info!(
        component = "event_log",
        event = "event_log.index.finish",
        input_events = report.input_events,
        indexed_events = report.indexed_events,
        entities = report.entities,
        duplicates_removed = report.duplicates_removed,
        inconsistent_prev_links = report.inconsistent_prev_links
    );

    Ok((EventLogIndex { entities }, report))
}

fn dedupe_timestamps(
    entity_id: &str,
    rows: Vec<RawDriverEvent>,
    policy: DuplicatePolicy,
    report: &mut IndexBuildReport,
) -> Result<Vec<RawDriverEvent>, EventLogError> {
    let mut deduped: Vec<RawDriverEvent> = Vec::with_capacity(rows.len());
    for row in rows {
        let same_ts = deduped
            .last()
            .map(|existing| existing.ts_ms_utc == row.ts_ms_utc)
            .unwrap_or(false);
        if !same_ts {
            deduped.push(row);
            continue;
        }

        match policy {
            DuplicatePolicy::Reject => {
                return Err(EventLogError::DuplicateTimestamp {
                    entity_id: entity_id.to_string(),
                    ts_ms_utc: row.ts_ms_utc,
                });
            }
            DuplicatePolicy::KeepFirst => {}
            DuplicatePolicy::KeepLast => {
                if let Some(last) = deduped.last_mut() {
                    *last = row;
                }
            }
        }

        report.duplicates_removed += 1;
        debug!(
            component = "event_log",
            event = "event_log.index.duplicate_dropped",
            entity_id,
            policy = ?policy
        );
    }
    Ok(deduped)
}

fn link_entity_log(
    entity_id: &str,
    rows: Vec<RawDriverEvent>,
    policy: PrevLinkPolicy,
    report: &mut IndexBuildReport,
) -> Result<EntityLog, EventLogError> {
    let mut events = Vec::with_capacity(rows.len());
    let mut ride_starts_ms_utc = Vec::new();
    let mut links_follow_order = true;
    let mut previous: Option<(i64, Option<DriverState>)> = None;

    for row in rows {
        let derived_prev = previous.map(|(ts, _)| ts);
        let mismatched = row
            .prev_ts_ms_utc
            .filter(|supplied| Some(*supplied) != derived_prev);
        if let Some(supplied) = mismatched {
            if policy == PrevLinkPolicy::Reject {
                return Err(EventLogError::InconsistentPrevLink {
                    entity_id: entity_id.to_string(),
                    ts_ms_utc: row.ts_ms_utc,
                    supplied_prev_ts_ms_utc: supplied,
                });
            }
            report.inconsistent_prev_links += 1;
            warn!(
                component = "event_log",
                event = "event_log.index.prev_link_mismatch",
                entity_id,
                ts_ms_utc = row.ts_ms_utc,
                supplied_prev_ts_ms_utc = supplied,
                derived_prev_ts_ms_utc = ?derived_prev,
                policy = ?policy
            );
        }

        let prev_ts_ms_utc = match (policy, mismatched) {
            (PrevLinkPolicy::TrustSupplied, Some(supplied)) => {
                links_follow_order = false;
                Some(supplied)
            }
            _ => derived_prev,
        };

        if row.state == Some(DriverState::BeganRide) {
            ride_starts_ms_utc.push(row.ts_ms_utc);
        }

        events.push(DriverEvent {
            ts_ms_utc: row.ts_ms_utc,
            prev_ts_ms_utc,
            state: row.state,
            previous_state: previous.and_then(|(_, state)| state),
            was_in_ride: row.state.map(DriverState::was_in_ride),
            was_connected: row.state.map(DriverState::was_connected),
        });
        previous = Some((row.ts_ms_utc, row.state));
    }

    Ok(EntityLog {
        events,
        ride_starts_ms_utc,
        links_follow_order,
    })
}
