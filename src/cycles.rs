//! Completed-ride counting as of a query timestamp.

use crate::event_log::EventLogIndex;

/// Number of rides the driver had started strictly before `ts_ms_utc`.
///
/// `None` when the driver has no logged events at all. Every `began_ride` event is
/// considered, so the count is monotonic non-decreasing in `ts_ms_utc`. A log with no
/// ride events, such as a bare connect/disconnect bracket, counts 0 at every `t`.
pub fn count_completed_cycles(
    index: &EventLogIndex,
    entity_id: &str,
    ts_ms_utc: i64,
) -> Option<u64> {
    let log = index.entity(entity_id)?;
    if log.events.is_empty() {
        return None;
    }

    let started = log
        .ride_starts_ms_utc
        .partition_point(|start| *start < ts_ms_utc);
    Some(started as u64)
}
