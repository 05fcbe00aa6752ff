//! Point-in-time driver-state features for ride-hailing bookings.
//!
//! Current implemented scope:
//! - per-driver event log index with duplicate tie-break policies
//! - as-of state resolution over `(prev, ts]` event windows
//! - completed-ride counting as of a query timestamp
//! - order-preserving batch resolution with per-row failures
//! - CSV adapters for the driver log, booking queries and feature output

mod cycles;
mod event_log;
mod features;
mod observability;
mod resolver;
mod tables;

pub use cycles::count_completed_cycles;
pub use event_log::{
    build_event_log_index, DriverEvent, DriverState, DuplicatePolicy, EventLogError,
    EventLogIndex, IndexBuildConfig, IndexBuildReport, PrevLinkPolicy, RawDriverEvent,
    UnknownDriverState,
};
pub use features::{
    apply_driver_state_batch, assert_schema_compatible, build_driver_state_schema,
    resolve_query, BatchConfig, BatchReport, DriverStateRow, FeatureColumn, FeatureDType,
    FeatureSchema, QueryRecord, RowStatus, SchemaError, StateCoverage, FEATURE_SCHEMA_VERSION,
};
pub use observability::{
    init_logging, log_app_finish, log_app_start, log_inputs_selected, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use resolver::{lookup_state, resolve_state, ResolvedState, StateLookup, StateLookupError};
pub use tables::{
    load_event_table, load_query_table, parse_timestamp_ms, read_event_table, read_query_table,
    save_feature_table, write_feature_table, QueryTable, QueryTableRow, TableError,
};
