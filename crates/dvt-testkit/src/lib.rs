//! Deterministic fakes for engine and daemon tests.
//!
//! Nothing here touches the network. Time comes from tokio's clock, so tests
//! that run with `start_paused = true` drive sessions through minutes of
//! ticks instantly.

use std::sync::Arc;

use dvt_config::EngineSettings;
use dvt_engine::{EngineContext, MonitorSession, SessionParams};
use dvt_expected::Cardinality;
use dvt_schemas::{Observation, SessionId, SourceTag, TimeFilter};
use dvt_sources::SourceSet;
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

mod clock;
mod sink;
mod sources;

pub use clock::PausedClock;
pub use sink::{Recorded, RecordingSink};
pub use sources::{ScriptedFlags, ScriptedSource};

/// Default device id used across scenarios.
pub const DEVICE: &str = "1:1:2:16:21:DIGIL_IND_0001";

pub fn obs(id: &str, ts: i64, source: SourceTag) -> Observation {
    Observation::new(id, json!(1), ts, source)
}

/// Every metric and primary alarm of a cardinality-6 device, stamped `ts`.
pub fn full_six_sensor_snapshot(ts: i64, source: SourceTag) -> Vec<Observation> {
    let expected = dvt_expected::resolve(dvt_expected::Cardinality::Six);
    let mut out: Vec<Observation> = expected
        .metrics
        .iter()
        .map(|m| obs(m, ts, source))
        .collect();
    out.extend(expected.alarms.ids().into_iter().map(|a| obs(a, ts, source)));
    out
}

/// Telemetry and last-value sources that answer with nothing.
pub fn silent_sources() -> SourceSet {
    SourceSet::new(
        Arc::new(ScriptedSource::new(SourceTag::Telemetry)),
        Arc::new(ScriptedSource::new(SourceTag::Lastval)),
    )
}

pub fn engine_context(sources: SourceSet, clock: Arc<PausedClock>) -> EngineContext {
    EngineContext {
        sources,
        settings: EngineSettings::default(),
        clock,
    }
}

/// A session wired to a recording sink, with its control handles.
pub struct SessionFixture {
    pub session: MonitorSession,
    pub sink: Arc<RecordingSink>,
    pub cancel: CancellationToken,
    pub filter: watch::Sender<TimeFilter>,
    pub clock: Arc<PausedClock>,
}

impl SessionFixture {
    pub fn new(sources: SourceSet, cardinality: Cardinality, timeout_minutes: u32) -> Self {
        Self::with_clock(
            sources,
            Arc::new(PausedClock::new()),
            cardinality,
            timeout_minutes,
        )
    }

    pub fn with_clock(
        sources: SourceSet,
        clock: Arc<PausedClock>,
        cardinality: Cardinality,
        timeout_minutes: u32,
    ) -> Self {
        let ctx = engine_context(sources, clock.clone());
        let (filter, filter_rx) = watch::channel(ctx.settings.default_time_filter);
        let sink = Arc::new(RecordingSink::new());
        let cancel = CancellationToken::new();
        let params = SessionParams {
            device_id: DEVICE.to_string(),
            location: ctx.settings.default_location.clone(),
            cardinality,
            timeout_minutes,
        };
        let session = MonitorSession::new(
            SessionId::new(),
            params,
            ctx,
            sink.clone(),
            filter_rx,
            cancel.clone(),
        );
        Self {
            session,
            sink,
            cancel,
            filter,
            clock,
        }
    }
}
