//! Point-in-time state resolution against the event log index.
//!
//! An event `e` covers a query at `t` when `prev(e) < t < ts(e)`, or when `e` has no
//! predecessor and `t < ts(e)`. A query exactly on an event timestamp is covered by
//! nothing and resolves to unknown.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event_log::{DriverEvent, DriverState, EventLogIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedState {
    pub state: Option<DriverState>,
    pub previous_state: Option<DriverState>,
    pub was_in_ride: Option<bool>,
    pub was_connected: Option<bool>,
}

impl ResolvedState {
    pub fn unknown() -> Self {
        Self {
            state: None,
            previous_state: None,
            was_in_ride: None,
            was_connected: None,
        }
    }

    fn from_event(event: &DriverEvent) -> Self {
        Self {
            state: event.state,
            previous_state: event.previous_state,
            was_in_ride: event.was_in_ride,
            was_connected: event.was_connected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateLookup {
    Matched(ResolvedState),
    UnknownEntity,
    /// The entity has history but no event window covers the query.
    NoMatchingInterval,
}

impl StateLookup {
    pub fn into_resolved(self) -> ResolvedState {
        match self {
            Self::Matched(resolved) => resolved,
            Self::UnknownEntity | Self::NoMatchingInterval => ResolvedState::unknown(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StateLookupError {
    #[error("{matches} event windows of entity {entity_id} cover timestamp {ts_ms_utc}")]
    AmbiguousMatch {
        entity_id: String,
        ts_ms_utc: i64,
        matches: usize,
    },
}

pub fn lookup_state(
    index: &EventLogIndex,
    entity_id: &str,
    ts_ms_utc: i64,
) -> Result<StateLookup, StateLookupError> {
    let Some(log) = index.entity(entity_id) else {
        return Ok(StateLookup::UnknownEntity);
    };
    if log.events.is_empty() {
        return Ok(StateLookup::UnknownEntity);
    }

    // Only events after `t` can cover it.
    let first_after = log.events.partition_point(|e| e.ts_ms_utc <= ts_ms_utc);
    let later = &log.events[first_after..];

    let matched = if log.links_follow_order {
        later.first().filter(|e| covers(e, ts_ms_utc))
    } else {
        unique_cover(entity_id, later, ts_ms_utc)?
    };

    Ok(match matched {
        Some(event) => StateLookup::Matched(ResolvedState::from_event(event)),
        None => StateLookup::NoMatchingInterval,
    })
}

pub fn resolve_state(
    index: &EventLogIndex,
    entity_id: &str,
    ts_ms_utc: i64,
) -> Result<ResolvedState, StateLookupError> {
    lookup_state(index, entity_id, ts_ms_utc).map(StateLookup::into_resolved)
}

fn covers(event: &DriverEvent, ts_ms_utc: i64) -> bool {
    if event.ts_ms_utc <= ts_ms_utc {
        return false;
    }
    match event.prev_ts_ms_utc {
        Some(prev) => prev < ts_ms_utc,
        None => true,
    }
}

// Supplied links can overlap, so every later window has to be checked.
fn unique_cover<'a>(
    entity_id: &str,
    later: &'a [DriverEvent],
    ts_ms_utc: i64,
) -> Result<Option<&'a DriverEvent>, StateLookupError> {
    let mut found = later.iter().filter(|e| covers(e, ts_ms_utc));
    let first = found.next();
    let extra = found.count();
    if extra > 0 {
        return Err(StateLookupError::AmbiguousMatch {
            entity_id: entity_id.to_string(),
            ts_ms_utc,
            matches: extra + 1,
        });
    }
    Ok(first)
}
