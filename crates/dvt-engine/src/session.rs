//! One monitoring session's worker: the tick loop.

use std::sync::Arc;
use std::time::Duration;

use dvt_config::EngineSettings;
use dvt_expected::{resolve, Cardinality};
use dvt_schemas::{MonitorEvent, MonitoringError, Observation, SessionId, TimeFilter};
use dvt_sources::{SourceError, SourceQuery, SourceSet, TimeRange};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::clock::{Clock, Renderer};
use crate::reconcile::{Reconciler, TickContext};
use crate::schedule::IntervalSchedule;
use crate::sink::EventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Running,
    Completed,
    TimedOut,
    Stopped,
}

/// Validated start parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub device_id: String,
    pub location: String,
    pub cardinality: Cardinality,
    pub timeout_minutes: u32,
}

impl SessionParams {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_minutes) * 60)
    }
}

/// What every session of a process shares.
#[derive(Clone)]
pub struct EngineContext {
    pub sources: SourceSet,
    pub settings: EngineSettings,
    pub clock: Arc<dyn Clock>,
}

pub struct MonitorSession {
    id: SessionId,
    params: SessionParams,
    ctx: EngineContext,
    sink: Arc<dyn EventSink>,
    filter: watch::Receiver<TimeFilter>,
    cancel: CancellationToken,
}

impl MonitorSession {
    pub fn new(
        id: SessionId,
        params: SessionParams,
        ctx: EngineContext,
        sink: Arc<dyn EventSink>,
        filter: watch::Receiver<TimeFilter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            params,
            ctx,
            sink,
            filter,
            cancel,
        }
    }

    /// Run until completion, timeout or cancellation. The returned state is
    /// never `Running`.
    pub async fn run(self) -> EngineState {
        let span = tracing::info_span!(
            "session",
            session_id = %self.id,
            device = %self.params.device_id
        );
        self.run_loop().instrument(span).await
    }

    async fn run_loop(self) -> EngineState {
        let settings = &self.ctx.settings;
        let clock = self.ctx.clock.clone();
        let schedule = IntervalSchedule::from_settings(settings);
        let timeout = self.params.timeout();
        let mut state = Reconciler::new(
            resolve(self.params.cardinality),
            settings.alarm_override_tolerance_secs,
            Renderer::from_zone_name(&settings.display_timezone),
        );
        let mut last_aggregated: Option<i64> = None;
        let started = clock.now_unix_millis();

        tracing::info!(
            cardinality = %self.params.cardinality,
            location = %self.params.location,
            timeout_minutes = self.params.timeout_minutes,
            sources = ?self.ctx.sources.describe(),
            "monitoring started"
        );

        loop {
            if self.cancel.is_cancelled() {
                return self.stopped();
            }
            let elapsed = clock.elapsed_since(started);
            if elapsed >= timeout {
                return self.timed_out(&state);
            }

            let tick = TickContext {
                now_unix: clock.now_unix(),
                elapsed_secs: elapsed.as_secs() as i64,
                filter: *self.filter.borrow(),
            };
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.stopped(),
                _ = self.tick(&mut state, &tick, &mut last_aggregated) => {}
            }

            if state.is_complete() {
                let elapsed = clock.elapsed_since(started);
                let done = TickContext {
                    elapsed_secs: elapsed.as_secs() as i64,
                    ..tick
                };
                self.emit(state.complete_event(&done));
                tracing::info!(duration_secs = done.elapsed_secs, "monitoring complete");
                return EngineState::Completed;
            }

            let elapsed = clock.elapsed_since(started);
            if elapsed >= timeout {
                return self.timed_out(&state);
            }
            let wait = schedule.interval_at(elapsed).min(timeout - elapsed);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.stopped(),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn tick(
        &self,
        state: &mut Reconciler,
        tick: &TickContext,
        last_aggregated: &mut Option<i64>,
    ) {
        let settings = &self.ctx.settings;
        let sources = &self.ctx.sources;
        let query = SourceQuery {
            device_id: self.params.device_id.clone(),
            location: self.params.location.clone(),
            range: Some(TimeRange::lookback(tick.now_unix, settings.lookback_secs)),
        };

        let (telemetry, lastval) =
            tokio::join!(sources.telemetry.fetch(&query), sources.lastval.fetch(&query));
        self.absorb(state, tick, sources.telemetry.tag().as_str(), telemetry);
        self.absorb(state, tick, sources.lastval.tag().as_str(), lastval);
        self.emit_all(state.adapt(tick));

        if state.has_missing() {
            if let Some(aggregated) = &sources.aggregated {
                let min_elapsed = settings.aggregated_min_elapsed_secs as i64;
                let min_interval = settings.aggregated_min_interval_secs as i64;
                let due = tick.elapsed_secs >= min_elapsed
                    && last_aggregated.map_or(true, |at| tick.elapsed_secs - at >= min_interval);
                if due {
                    *last_aggregated = Some(tick.elapsed_secs);
                    let snapshot = SourceQuery {
                        range: None,
                        ..query.clone()
                    };
                    let result = aggregated.fetch(&snapshot).await;
                    self.absorb(state, tick, aggregated.tag().as_str(), result);
                }
            }

            for corroborator in [&sources.flag_store, &sources.twin].into_iter().flatten() {
                let candidates = state.corroboration_candidates();
                if candidates.is_empty() {
                    break;
                }
                let result = corroborator
                    .check_alarms(&self.params.device_id, &candidates)
                    .await;
                self.absorb(state, tick, corroborator.name(), result);
            }
            self.emit_all(state.adapt(tick));
        }

        self.emit_all(state.updates(tick));
    }

    fn absorb(
        &self,
        state: &mut Reconciler,
        tick: &TickContext,
        source: &str,
        result: Result<Vec<Observation>, SourceError>,
    ) {
        match result {
            Ok(observations) => {
                tracing::debug!(source, count = observations.len(), "observations received");
                let events = state.ingest(&observations, tick);
                self.emit_all(events);
            }
            Err(err) => {
                tracing::warn!(source, kind = err.kind(), error = %err, "source query failed");
                self.emit(MonitorEvent::MonitoringError(MonitoringError {
                    error: format!("{source}: {err}"),
                }));
            }
        }
    }

    fn timed_out(&self, state: &Reconciler) -> EngineState {
        self.emit(state.timeout_event(self.params.timeout_minutes));
        tracing::info!(
            missing_metrics = state.missing_metrics().len(),
            missing_alarms = state.missing_alarms().len(),
            "monitoring timed out"
        );
        EngineState::TimedOut
    }

    fn stopped(&self) -> EngineState {
        tracing::info!("monitoring stopped");
        EngineState::Stopped
    }

    fn emit_all(&self, events: impl IntoIterator<Item = MonitorEvent>) {
        for ev in events {
            self.emit(ev);
        }
    }

    fn emit(&self, event: MonitorEvent) {
        self.sink.emit(&self.id, &event);
    }
}
