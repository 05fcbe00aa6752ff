use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use driver_state_features::{
    apply_driver_state_batch, build_event_log_index, log_app_finish, log_app_start,
    log_inputs_selected, BatchConfig, DriverState, DuplicatePolicy, IndexBuildConfig,
    LoggingConfig, PrevLinkPolicy, QueryRecord, RawDriverEvent,
};
use tracing::dispatcher::with_default;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriter;

#[derive(Clone, Default)]
struct CapturedLogs {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    fn contents(&self) -> String {
        let bytes = self.buf.lock().expect("log buffer lock should not be poisoned");
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

struct CapturedLogsWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogsWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedLogsWriter {
            buf: Arc::clone(&self.buf),
        }
    }
}

impl Write for CapturedLogsWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf
            .lock()
            .expect("log buffer lock should not be poisoned")
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn capture_logs(max_level: Level, f: impl FnOnce()) -> String {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(max_level)
        .with_writer(logs.clone())
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);

    with_default(&dispatch, f);
    logs.contents()
}

#[test]
fn index_build_logs_start_finish_and_prev_link_mismatch() {
    let logs = capture_logs(Level::INFO, || {
        let mut odd = RawDriverEvent::new("d1", 20, DriverState::EndedRide);
        odd.prev_ts_ms_utc = Some(1);
        let events = vec![RawDriverEvent::new("d1", 10, DriverState::BeganRide), odd];
        build_event_log_index(events, &IndexBuildConfig::default()).expect("index should build");
    });

    assert!(logs.contains("\"event\":\"event_log.index.start\""));
    assert!(logs.contains("\"event\":\"event_log.index.finish\""));
    assert!(logs.contains("\"event\":\"event_log.index.prev_link_mismatch\""));
}

#[test]
fn duplicate_drops_are_logged_at_debug() {
    let cfg = IndexBuildConfig {
        duplicate_policy: DuplicatePolicy::KeepLast,
        ..IndexBuildConfig::default()
    };
    let events = || {
        vec![
            RawDriverEvent::new("d1", 10, DriverState::Connected),
            RawDriverEvent::new("d1", 10, DriverState::Disconnected),
        ]
    };

    let info_logs = capture_logs(Level::INFO, || {
        build_event_log_index(events(), &cfg).expect("index should build");
    });
    let debug_logs = capture_logs(Level::DEBUG, || {
        build_event_log_index(events(), &cfg).expect("index should build");
    });

    assert!(!info_logs.contains("\"event\":\"event_log.index.duplicate_dropped\""));
    assert!(debug_logs.contains("\"event\":\"event_log.index.duplicate_dropped\""));
}

#[test]
fn failed_rows_are_logged_as_warnings() {
    let logs = capture_logs(Level::INFO, || {
        let mut widened = RawDriverEvent::new("d1", 20, DriverState::Disconnected);
        widened.prev_ts_ms_utc = Some(0);
        let events = vec![RawDriverEvent::new("d1", 10, DriverState::Connected), widened];
        let cfg = IndexBuildConfig {
            prev_link_policy: PrevLinkPolicy::TrustSupplied,
            ..IndexBuildConfig::default()
        };
        let (index, _) = build_event_log_index(events, &cfg).expect("index builds");

        let (_, report) = apply_driver_state_batch(
            &[QueryRecord::new("d1", 5)],
            &index,
            &BatchConfig::default(),
        );
        assert_eq!(report.failed_rows, 1);
    });

    assert!(logs.contains("\"event\":\"features.batch.start\""));
    assert!(logs.contains("\"event\":\"features.batch.row_failed\""));
    assert!(logs.contains("\"event\":\"features.batch.finish\""));
    assert!(logs.contains("\"level\":\"WARN\""));
}

#[test]
fn app_lifecycle_helpers_emit_baseline_events() {
    let logs = capture_logs(Level::INFO, || {
        log_app_start(&LoggingConfig::default());
        log_inputs_selected(
            Path::new("drivers.csv"),
            Path::new("queries.csv"),
            Path::new("features.csv"),
        );
        log_app_finish(4, 0, None);
    });

    assert!(logs.contains("\"event\":\"app.start\""));
    assert!(logs.contains("\"event\":\"inputs.selected\""));
    assert!(logs.contains("\"event\":\"app.finish\""));
}
