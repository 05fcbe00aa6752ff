use driver_state_features::{
    build_event_log_index, count_completed_cycles, lookup_state, resolve_state, DriverState,
    EventLogError, EventLogIndex, IndexBuildConfig, PrevLinkPolicy, RawDriverEvent,
    ResolvedState, StateLookup,
};

fn index_from(events: &[(&str, i64, DriverState)]) -> EventLogIndex {
    let raw = events
        .iter()
        .map(|(entity, ts, state)| RawDriverEvent::new(*entity, *ts, *state))
        .collect();
    build_event_log_index(raw, &IndexBuildConfig::default())
        .expect("index should build")
        .0
}

fn ride_driver() -> EventLogIndex {
    index_from(&[
        ("d1", 20, DriverState::EndedRide),
        ("d1", 5, DriverState::Connected),
        ("d1", 10, DriverState::BeganRide),
    ])
}

#[test]
fn query_before_first_event_takes_first_event_state() {
    let index = ride_driver();
    let resolved = resolve_state(&index, "d1", 3).expect("no ambiguity");

    assert_eq!(resolved.state, Some(DriverState::Connected));
    assert_eq!(resolved.previous_state, None);
    assert_eq!(resolved.was_in_ride, Some(false));
    assert_eq!(resolved.was_connected, Some(false));
}

#[test]
fn query_inside_window_takes_closing_event_state() {
    let index = ride_driver();
    let resolved = resolve_state(&index, "d1", 15).expect("no ambiguity");

    assert_eq!(resolved.state, Some(DriverState::EndedRide));
    assert_eq!(resolved.previous_state, Some(DriverState::BeganRide));
    assert_eq!(resolved.was_in_ride, Some(true));
    assert_eq!(resolved.was_connected, Some(true));
}

#[test]
fn query_after_last_event_is_unknown() {
    let index = ride_driver();
    assert_eq!(
        lookup_state(&index, "d1", 25).expect("no ambiguity"),
        StateLookup::NoMatchingInterval
    );
    assert_eq!(
        resolve_state(&index, "d1", 25).expect("no ambiguity"),
        ResolvedState::unknown()
    );
}

#[test]
fn query_on_an_event_timestamp_matches_no_window() {
    let index = ride_driver();
    for t in [5, 10, 20] {
        assert_eq!(
            lookup_state(&index, "d1", t).expect("no ambiguity"),
            StateLookup::NoMatchingInterval,
            "t={t}"
        );
    }
    assert_eq!(
        resolve_state(&index, "d1", 6).expect("no ambiguity").state,
        Some(DriverState::BeganRide)
    );
}

#[test]
fn driver_without_history_is_unknown_for_state_and_count() {
    let index = ride_driver();
    for t in [i64::MIN, 0, 15, i64::MAX] {
        assert_eq!(
            lookup_state(&index, "ghost", t).expect("no ambiguity"),
            StateLookup::UnknownEntity
        );
        assert_eq!(count_completed_cycles(&index, "ghost", t), None);
    }
}

#[test]
fn resolution_is_idempotent() {
    let index = ride_driver();
    for t in [0, 3, 7, 10, 15, 30] {
        assert_eq!(
            resolve_state(&index, "d1", t).expect("no ambiguity"),
            resolve_state(&index, "d1", t).expect("no ambiguity")
        );
        assert_eq!(
            count_completed_cycles(&index, "d1", t),
            count_completed_cycles(&index, "d1", t)
        );
    }
}

#[test]
fn connect_disconnect_only_driver_counts_zero_everywhere() {
    let index = index_from(&[
        ("d2", 100, DriverState::Connected),
        ("d2", 200, DriverState::Disconnected),
    ]);
    for t in [0, 100, 150, 200, 10_000] {
        assert_eq!(count_completed_cycles(&index, "d2", t), Some(0), "t={t}");
    }
}

#[test]
fn two_event_driver_with_a_ride_start_counts_that_ride() {
    let index = index_from(&[
        ("d2", 0, DriverState::Connected),
        ("d2", 10, DriverState::BeganRide),
    ]);
    assert_eq!(count_completed_cycles(&index, "d2", -1), Some(0));
    assert_eq!(count_completed_cycles(&index, "d2", 10), Some(0));
    assert_eq!(count_completed_cycles(&index, "d2", 20), Some(1));
}

#[test]
fn stale_supplied_prev_links_do_not_change_resolution() {
    let mut stale = RawDriverEvent::new("d1", 10, DriverState::BeganRide);
    stale.prev_ts_ms_utc = Some(8);
    let events = vec![
        RawDriverEvent::new("d1", 5, DriverState::Connected),
        stale,
        RawDriverEvent::new("d1", 20, DriverState::EndedRide),
    ];

    let (index, report) = build_event_log_index(events.clone(), &IndexBuildConfig::default())
        .expect("index should build");
    assert_eq!(report.inconsistent_prev_links, 1);
    assert_eq!(index.events_for("d1")[1].prev_ts_ms_utc, Some(5));

    let resolved = resolve_state(&index, "d1", 6).expect("links follow sort order");
    assert_eq!(resolved.state, Some(DriverState::BeganRide));
    assert_eq!(resolved.previous_state, Some(DriverState::Connected));
    assert_eq!(resolved.was_in_ride, Some(true));

    let reject = IndexBuildConfig {
        prev_link_policy: PrevLinkPolicy::Reject,
        ..IndexBuildConfig::default()
    };
    let err = build_event_log_index(events, &reject).expect_err("stale link must be rejected");
    assert!(matches!(
        err,
        EventLogError::InconsistentPrevLink {
            ts_ms_utc: 10,
            supplied_prev_ts_ms_utc: 8,
            ..
        }
    ));
}

#[test]
fn ride_count_is_strictly_before_and_covers_all_rides() {
    let index = index_from(&[
        ("d3", 1, DriverState::Connected),
        ("d3", 10, DriverState::BeganRide),
        ("d3", 20, DriverState::EndedRide),
        ("d3", 30, DriverState::BeganRide),
        ("d3", 40, DriverState::EndedRide),
        ("d3", 50, DriverState::BeganRide),
        ("d3", 60, DriverState::EndedRide),
        ("d3", 70, DriverState::Disconnected),
    ]);

    assert_eq!(count_completed_cycles(&index, "d3", 5), Some(0));
    assert_eq!(count_completed_cycles(&index, "d3", 10), Some(0));
    assert_eq!(count_completed_cycles(&index, "d3", 31), Some(2));
    assert_eq!(count_completed_cycles(&index, "d3", 100), Some(3));
}

#[test]
fn ride_count_is_monotonic_in_time() {
    let index = index_from(&[
        ("d4", 0, DriverState::Connected),
        ("d4", 3, DriverState::BeganRide),
        ("d4", 9, DriverState::EndedRide),
        ("d4", 12, DriverState::BeganRide),
        ("d4", 13, DriverState::EndedRide),
        ("d4", 40, DriverState::BeganRide),
    ]);

    let mut last = 0;
    for t in -5..60 {
        let count = count_completed_cycles(&index, "d4", t).expect("driver has history");
        assert!(count >= last, "count dropped at t={t}");
        last = count;
    }
    assert_eq!(last, 3);
}

#[test]
fn duplicate_timestamps_fail_the_build() {
    let err = build_event_log_index(
        vec![
            RawDriverEvent::new("d5", 1, DriverState::Connected),
            RawDriverEvent::new("d5", 1, DriverState::BeganRide),
        ],
        &IndexBuildConfig::default(),
    )
    .expect_err("duplicates must be rejected");

    match err {
        EventLogError::DuplicateTimestamp {
            entity_id,
            ts_ms_utc,
        } => {
            assert_eq!(entity_id, "d5");
            assert_eq!(ts_ms_utc, 1);
        }
        other => panic!("expected DuplicateTimestamp, got {other:?}"),
    }
}
