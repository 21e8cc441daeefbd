//! Scenario: tick spacing and the aggregated-snapshot throttle.
//!
//! # Invariants under test
//!
//! 1. Ticks are 5 s apart, 10 s after two minutes, 15 s after five minutes.
//! 2. The timeout fires at the deadline even when it falls inside an interval.
//! 3. The aggregated snapshot is skipped for the first 60 s and then queried at most every 30 s.
//! 4. The aggregated snapshot can complete a session the fast sources could not.
//! 5. A filter change is seen on the next tick.

use std::sync::Arc;
use std::time::Duration;

use dvt_engine::EngineState;
use dvt_expected::Cardinality;
use dvt_schemas::{MonitorEvent, SourceTag, TimeFilter};
use dvt_sources::SourceSet;
use dvt_testkit::{
    full_six_sensor_snapshot, obs, silent_sources, PausedClock, ScriptedSource, SessionFixture,
};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn interval_lengthens_as_the_session_ages() {
    let fx = SessionFixture::new(silent_sources(), Cardinality::Six, 6);
    let sink = fx.sink.clone();
    let started = Instant::now();

    assert_eq!(fx.session.run().await, EngineState::TimedOut);

    let tick_offsets: Vec<u64> = sink
        .records()
        .iter()
        .filter(|r| r.event.event_type() == "alarms_update")
        .map(|r| r.at.duration_since(started).as_secs())
        .collect();
    let expected: Vec<u64> = (0..120)
        .step_by(5)
        .chain((120..300).step_by(10))
        .chain((300..360).step_by(15))
        .collect();
    assert_eq!(tick_offsets, expected);

    let timeout_at = sink
        .records()
        .iter()
        .find(|r| r.event.is_terminal())
        .map(|r| r.at.duration_since(started).as_secs());
    assert_eq!(timeout_at, Some(360));
}

#[tokio::test(start_paused = true)]
async fn timeout_inside_an_interval_is_not_late() {
    // Each tick takes 3 s, so ticks start at 0, 8, .., 56 and the last wait
    // would run past the deadline.
    let slow = ScriptedSource::new(SourceTag::Lastval).with_delay(Duration::from_secs(3));
    let sources = SourceSet::new(
        Arc::new(ScriptedSource::new(SourceTag::Telemetry)),
        Arc::new(slow),
    );
    let fx = SessionFixture::new(sources, Cardinality::Three, 1);
    let sink = fx.sink.clone();
    let started = Instant::now();

    assert_eq!(fx.session.run().await, EngineState::TimedOut);
    let last = sink
        .records()
        .last()
        .map(|r| r.at.duration_since(started).as_secs());
    assert_eq!(last, Some(60));
    assert_eq!(sink.count("alarms_update"), 8);
}

#[tokio::test(start_paused = true)]
async fn aggregated_snapshot_is_throttled() {
    let aggregated = Arc::new(ScriptedSource::new(SourceTag::Aggregated));
    let sources = silent_sources().with_aggregated(aggregated.clone());
    let fx = SessionFixture::new(sources, Cardinality::Six, 3);

    assert_eq!(fx.session.run().await, EngineState::TimedOut);

    // Ticks at 60, 90, 120 and 150; 180 is the deadline.
    assert_eq!(aggregated.calls(), 4);
    assert!(aggregated.queries().iter().all(|q| q.range.is_none()));
}

#[tokio::test(start_paused = true)]
async fn aggregated_snapshot_fills_the_last_gap() {
    let base = PausedClock::DEFAULT_BASE_UNIX;
    let mut fast = full_six_sensor_snapshot(base, SourceTag::Lastval);
    fast.retain(|o| o.id != "EIT_PIROMETER");
    let aggregated = Arc::new(ScriptedSource::always(
        SourceTag::Aggregated,
        vec![obs("EIT_PIROMETER", base, SourceTag::Aggregated)],
    ));
    let sources = SourceSet::new(
        Arc::new(ScriptedSource::new(SourceTag::Telemetry)),
        Arc::new(ScriptedSource::always(SourceTag::Lastval, fast)),
    )
    .with_aggregated(aggregated.clone());
    let fx = SessionFixture::new(sources, Cardinality::Six, 10);
    let sink = fx.sink.clone();

    assert_eq!(fx.session.run().await, EngineState::Completed);
    assert_eq!(aggregated.calls(), 1);

    let pirometer = sink.events().into_iter().find_map(|e| match e {
        MonitorEvent::MetricFound(m) if m.metric_type == "EIT_PIROMETER" => Some(m),
        _ => None,
    });
    let pirometer = pirometer.expect("pirometer found");
    assert_eq!(pirometer.source, SourceTag::Aggregated);
    assert_eq!(pirometer.elapsed, "0:01:00");
}

#[tokio::test(start_paused = true)]
async fn filter_change_applies_on_the_next_tick() {
    let base = PausedClock::DEFAULT_BASE_UNIX;
    let stale = ScriptedSource::always(
        SourceTag::Lastval,
        vec![obs("EIT_WINDVEL", base - 3_600, SourceTag::Lastval)],
    );
    let sources = SourceSet::new(
        Arc::new(ScriptedSource::new(SourceTag::Telemetry)),
        Arc::new(stale),
    );
    let fx = SessionFixture::new(sources, Cardinality::Three, 10);
    let sink = fx.sink.clone();
    let filter = fx.filter;
    let cancel = fx.cancel.clone();
    let worker = tokio::spawn(fx.session.run());

    sink.wait_for_count("metrics_update", 1).await;
    assert_eq!(sink.count("metric_found"), 0);

    filter.send_replace(TimeFilter::historical());
    sink.wait_for_count("metric_found", 1).await;
    let events = sink.events();
    let found_at = events
        .iter()
        .position(|e| e.event_type() == "metric_found")
        .unwrap();
    let ticks_before = events[..found_at]
        .iter()
        .filter(|e| e.event_type() == "metrics_update")
        .count();
    assert_eq!(ticks_before, 1);

    cancel.cancel();
    assert_eq!(worker.await.unwrap(), EngineState::Stopped);
}
