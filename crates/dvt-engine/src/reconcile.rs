//! Pure per-session reconciliation state.
//!
//! Turns observations into found/missing/other bookkeeping and the discovery
//! events that describe each change. No I/O and no clocks: the caller supplies
//! "now" and elapsed time through [`TickContext`], so every rule here is
//! testable with plain values.

use std::collections::{BTreeMap, BTreeSet};

use dvt_expected::{adapt, is_alarm_id, ExpectedAlarmSet, ExpectedSet};
use dvt_schemas::{
    AlarmFound, AlarmsUpdate, CompletedAlarms, CompletedMetrics, ConfigDetected, HistoryEntry,
    MetricFound, MetricsUpdate, MonitorEvent, MonitoringComplete, MonitoringTimeout,
    Observation, OtherAlarmFound, SourceTag, TimeFilter, TimeoutAlarms, TimeoutMetrics,
};
use serde_json::Value;

use crate::clock::{format_elapsed, Renderer};

/// Inputs that vary per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickContext {
    pub now_unix: i64,
    pub elapsed_secs: i64,
    pub filter: TimeFilter,
}

/// An accepted observation.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundEntry {
    pub value: Value,
    pub ts: i64,
    pub source: SourceTag,
}

impl From<&Observation> for FoundEntry {
    fn from(o: &Observation) -> Self {
        Self {
            value: o.value.clone(),
            ts: o.ts,
            source: o.source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    expected: ExpectedSet,
    metrics: BTreeMap<String, FoundEntry>,
    alarms: BTreeMap<String, FoundEntry>,
    other: BTreeMap<String, FoundEntry>,
    /// Every alarm id that passed the filter, expected or not.
    evidence: BTreeSet<String>,
    history: Vec<HistoryEntry>,
    override_tolerance_secs: i64,
    renderer: Renderer,
}

impl Reconciler {
    pub fn new(expected: ExpectedSet, override_tolerance_secs: i64, renderer: Renderer) -> Self {
        Self {
            expected,
            metrics: BTreeMap::new(),
            alarms: BTreeMap::new(),
            other: BTreeMap::new(),
            evidence: BTreeSet::new(),
            history: Vec::new(),
            override_tolerance_secs,
            renderer,
        }
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    pub fn expected_alarms(&self) -> &ExpectedAlarmSet {
        &self.expected.alarms
    }

    pub fn found_metric(&self, id: &str) -> Option<&FoundEntry> {
        self.metrics.get(id)
    }

    pub fn found_alarm(&self, id: &str) -> Option<&FoundEntry> {
        self.alarms.get(id)
    }

    pub fn other_alarm(&self, id: &str) -> Option<&FoundEntry> {
        self.other.get(id)
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn missing_metrics(&self) -> Vec<String> {
        self.expected
            .metrics
            .iter()
            .filter(|m| !self.metrics.contains_key(*m))
            .cloned()
            .collect()
    }

    pub fn missing_alarms(&self) -> Vec<String> {
        self.expected
            .alarms
            .ids()
            .into_iter()
            .filter(|a| !self.alarms.contains_key(*a))
            .map(str::to_string)
            .collect()
    }

    pub fn has_missing(&self) -> bool {
        !self.missing_metrics().is_empty() || !self.missing_alarms().is_empty()
    }

    pub fn is_complete(&self) -> bool {
        !self.has_missing()
    }

    /// Expected alarms that the flag store may still answer for: missing, or
    /// found only through a non-authoritative source.
    pub fn corroboration_candidates(&self) -> Vec<String> {
        self.expected
            .alarms
            .ids()
            .into_iter()
            .filter(|a| match self.alarms.get(*a) {
                None => true,
                Some(e) => !e.source.is_authoritative(),
            })
            .map(str::to_string)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Apply one adapter's observations in order. Returns the discovery
    /// events produced, already appended to the history.
    pub fn ingest(&mut self, observations: &[Observation], ctx: &TickContext) -> Vec<MonitorEvent> {
        let mut out = Vec::new();
        for obs in observations {
            if !ctx.filter.accepts(obs.ts, ctx.now_unix) {
                continue;
            }
            if is_alarm_id(&obs.id) {
                self.evidence.insert(obs.id.clone());
                self.accept_alarm(obs, ctx, &mut out);
            } else if self.expected.is_expected_metric(&obs.id) && !self.metrics.contains_key(&obs.id)
            {
                self.metrics.insert(obs.id.clone(), FoundEntry::from(obs));
                let ev = MonitorEvent::MetricFound(MetricFound {
                    metric_type: obs.id.clone(),
                    value: obs.value.clone(),
                    timestamp: self.renderer.timestamp(obs.ts),
                    elapsed: format_elapsed(ctx.elapsed_secs),
                    source: obs.source,
                });
                self.record(ev, &mut out);
            }
        }
        out
    }

    fn accept_alarm(&mut self, obs: &Observation, ctx: &TickContext, out: &mut Vec<MonitorEvent>) {
        if !self.expected.alarms.contains(&obs.id) {
            if !self.other.contains_key(&obs.id) {
                self.other.insert(obs.id.clone(), FoundEntry::from(obs));
                let ev = MonitorEvent::OtherAlarmFound(OtherAlarmFound {
                    alarm_type: obs.id.clone(),
                    value: obs.value.clone(),
                    timestamp: self.renderer.timestamp(obs.ts),
                    elapsed: format_elapsed(ctx.elapsed_secs),
                    is_expected: false,
                });
                self.record(ev, out);
            }
            return;
        }

        match self.alarms.get(&obs.id) {
            None => {}
            // The earlier-accepted source stands unless the new reading is
            // newer by more than the tolerance.
            Some(prev) if obs.ts.saturating_sub(prev.ts) > self.override_tolerance_secs => {
                tracing::debug!(
                    alarm = %obs.id,
                    from_source = %prev.source,
                    to_source = %obs.source,
                    gap_secs = obs.ts.saturating_sub(prev.ts),
                    "alarm overridden by newer observation"
                );
            }
            Some(_) => return,
        }

        self.alarms.insert(obs.id.clone(), FoundEntry::from(obs));
        let ev = self.alarm_found_event(&obs.id, &FoundEntry::from(obs), ctx);
        self.record(ev, out);
    }

    fn alarm_found_event(&self, id: &str, e: &FoundEntry, ctx: &TickContext) -> MonitorEvent {
        MonitorEvent::AlarmFound(AlarmFound {
            alarm_type: id.to_string(),
            value: e.value.clone(),
            timestamp: self.renderer.timestamp(e.ts),
            elapsed: format_elapsed(ctx.elapsed_secs),
            is_expected: true,
            source: e.source,
        })
    }

    // -----------------------------------------------------------------------
    // Adaptation
    // -----------------------------------------------------------------------

    /// Reshape the expected alarm set from the evidence so far. On a change:
    /// found alarms that are no longer expected move to "other", and "other"
    /// alarms that became expected are promoted into found immediately.
    pub fn adapt(&mut self, ctx: &TickContext) -> Vec<MonitorEvent> {
        let adaptation = adapt(&self.expected.alarms, &self.evidence);
        let Some(change) = adaptation.change else {
            return Vec::new();
        };
        self.expected.alarms = adaptation.set;

        let mut out = Vec::new();
        let ev = MonitorEvent::ConfigDetected(ConfigDetected {
            message: change.message(),
        });
        self.record(ev, &mut out);

        let stale: Vec<String> = self
            .alarms
            .keys()
            .filter(|id| !self.expected.alarms.contains(id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(entry) = self.alarms.remove(&id) {
                self.other.entry(id).or_insert(entry);
            }
        }

        let now_expected: Vec<String> = self
            .expected
            .alarms
            .ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        for id in now_expected {
            if let Some(entry) = self.other.remove(&id) {
                let ev = self.alarm_found_event(&id, &entry, ctx);
                self.alarms.insert(id, entry);
                self.record(ev, &mut out);
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Summaries
    // -----------------------------------------------------------------------

    pub fn updates(&self, ctx: &TickContext) -> [MonitorEvent; 2] {
        let last_check = self.renderer.timestamp(ctx.now_unix);
        [
            MonitorEvent::MetricsUpdate(MetricsUpdate {
                found_count: self.metrics.len(),
                total_expected: self.expected.metrics.len(),
                missing_list: self.missing_metrics(),
                last_check: last_check.clone(),
            }),
            MonitorEvent::AlarmsUpdate(AlarmsUpdate {
                found_count: self.alarms.len(),
                total_expected: self.expected.alarms.len(),
                missing_list: self.missing_alarms(),
                other_count: self.other.len(),
                last_check,
            }),
        ]
    }

    pub fn complete_event(&self, ctx: &TickContext) -> MonitorEvent {
        MonitorEvent::MonitoringComplete(MonitoringComplete {
            success: true,
            metrics: CompletedMetrics {
                total_found: self.metrics.len(),
                total_expected: self.expected.metrics.len(),
            },
            alarms: CompletedAlarms {
                total_found: self.alarms.len(),
                total_expected: self.expected.alarms.len(),
                other_alarms: values(&self.other),
            },
            duration: format_elapsed(ctx.elapsed_secs),
            history: self.history.clone(),
        })
    }

    pub fn timeout_event(&self, timeout_minutes: u32) -> MonitorEvent {
        MonitorEvent::MonitoringTimeout(MonitoringTimeout {
            message: format!("monitoring timed out after {timeout_minutes} minutes"),
            metrics: TimeoutMetrics {
                found: values(&self.metrics),
                missing: self.missing_metrics(),
            },
            alarms: TimeoutAlarms {
                found: values(&self.alarms),
                missing: self.missing_alarms(),
                other: values(&self.other),
            },
            history: self.history.clone(),
        })
    }

    fn record(&mut self, ev: MonitorEvent, out: &mut Vec<MonitorEvent>) {
        if let Some(entry) = ev.history_entry() {
            self.history.push(entry);
        }
        out.push(ev);
    }
}

fn values(map: &BTreeMap<String, FoundEntry>) -> BTreeMap<String, Value> {
    map.iter()
        .map(|(k, e)| (k.clone(), e.value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvt_expected::{ids::alarm_id, resolve, Cardinality};
    use serde_json::json;

    fn ctx(now: i64) -> TickContext {
        TickContext {
            now_unix: now,
            elapsed_secs: 5,
            filter: TimeFilter::historical(),
        }
    }

    fn reconciler(c: Cardinality) -> Reconciler {
        Reconciler::new(resolve(c), 300, Renderer::default())
    }

    fn obs(id: &str, ts: i64, source: SourceTag) -> Observation {
        Observation::new(id, json!(1), ts, source)
    }

    fn types(events: &[MonitorEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_type()).collect()
    }

    #[test]
    fn metrics_are_first_seen_wins() {
        let mut r = reconciler(Cardinality::Six);
        let first = Observation::new("EIT_WINDVEL", json!(3.0), 100, SourceTag::Telemetry);
        let later = Observation::new("EIT_WINDVEL", json!(9.0), 5_000, SourceTag::Lastval);
        assert_eq!(types(&r.ingest(&[first], &ctx(200))), vec!["metric_found"]);
        assert!(r.ingest(&[later], &ctx(6_000)).is_empty());
        assert_eq!(r.found_metric("EIT_WINDVEL").unwrap().value, json!(3.0));
    }

    #[test]
    fn unknown_non_alarm_ids_are_ignored() {
        let mut r = reconciler(Cardinality::Six);
        let events = r.ingest(&[obs("EIT_SOMETHING_ELSE", 100, SourceTag::Telemetry)], &ctx(100));
        assert!(events.is_empty());
        assert!(r.history().is_empty());
    }

    #[test]
    fn override_needs_gap_beyond_tolerance() {
        let id = alarm_id(32);
        let mut r = reconciler(Cardinality::Six);
        r.ingest(&[obs(&id, 1_000, SourceTag::Lastval)], &ctx(1_000));

        // 200s newer: earlier source stands.
        assert!(r.ingest(&[obs(&id, 1_200, SourceTag::Mongodb)], &ctx(1_400)).is_empty());
        // Exactly the tolerance: still no override.
        assert!(r.ingest(&[obs(&id, 1_300, SourceTag::Mongodb)], &ctx(1_400)).is_empty());
        assert_eq!(r.found_alarm(&id).unwrap().source, SourceTag::Lastval);

        let events = r.ingest(&[obs(&id, 1_350, SourceTag::Mongodb)], &ctx(1_400));
        assert_eq!(types(&events), vec!["alarm_found"]);
        let e = r.found_alarm(&id).unwrap();
        assert_eq!((e.ts, e.source), (1_350, SourceTag::Mongodb));
    }

    #[test]
    fn extreme_timestamps_override_without_overflow() {
        let id = alarm_id(32);
        let mut r = reconciler(Cardinality::Six);
        // Year 0001 from an ISO string, then a saturated numeric stamp.
        r.ingest(&[obs(&id, -62_135_596_800, SourceTag::Lastval)], &ctx(1_000));
        let events = r.ingest(&[obs(&id, i64::MAX, SourceTag::Mongodb)], &ctx(1_000));
        assert_eq!(types(&events), vec!["alarm_found"]);
        assert_eq!(r.found_alarm(&id).unwrap().source, SourceTag::Mongodb);

        let mut r = reconciler(Cardinality::Six);
        r.ingest(&[obs(&id, i64::MAX, SourceTag::Lastval)], &ctx(1_000));
        assert!(r.ingest(&[obs(&id, i64::MIN, SourceTag::Mongodb)], &ctx(1_000)).is_empty());
    }

    #[test]
    fn older_observation_never_overrides() {
        let id = alarm_id(32);
        let mut r = reconciler(Cardinality::Six);
        r.ingest(&[obs(&id, 5_000, SourceTag::Lastval)], &ctx(5_000));
        assert!(r.ingest(&[obs(&id, 100, SourceTag::Mongodb)], &ctx(5_000)).is_empty());
    }

    #[test]
    fn unexpected_alarms_go_to_other_once() {
        let mut r = reconciler(Cardinality::Six);
        let id = alarm_id(30);
        let events = r.ingest(
            &[obs(&id, 10, SourceTag::Lastval), obs(&id, 900, SourceTag::Lastval)],
            &ctx(1_000),
        );
        assert_eq!(types(&events), vec!["other_alarm_found"]);
        assert_eq!(r.other_alarm(&id).unwrap().ts, 10);
    }

    #[test]
    fn live_filter_discards_old_observations_entirely() {
        let mut r = reconciler(Cardinality::Three);
        let live = TickContext {
            now_unix: 10_000,
            elapsed_secs: 5,
            filter: TimeFilter::live(10),
        };
        let events = r.ingest(&[obs(&alarm_id(34), 1_000, SourceTag::Lastval)], &live);
        assert!(events.is_empty());
        // Not counted as evidence either.
        assert!(r.adapt(&live).is_empty());
    }

    #[test]
    fn swap_promotes_other_and_demotes_stale_found() {
        let mut r = reconciler(Cardinality::Three);
        let c = ctx(2_000);
        r.ingest(&[obs(&alarm_id(32), 1_000, SourceTag::Lastval)], &c);
        let events = r.ingest(
            &[
                obs(&alarm_id(34), 1_000, SourceTag::Lastval),
                obs(&alarm_id(38), 1_100, SourceTag::Lastval),
            ],
            &c,
        );
        assert_eq!(types(&events), vec!["other_alarm_found", "other_alarm_found"]);

        let events = r.adapt(&c);
        assert_eq!(
            types(&events),
            vec!["config_detected", "alarm_found", "alarm_found"]
        );
        assert!(r.found_alarm(&alarm_id(34)).is_some());
        assert!(r.found_alarm(&alarm_id(32)).is_none());
        assert!(r.other_alarm(&alarm_id(32)).is_some());
        assert_eq!(r.missing_alarms(), vec![alarm_id(42)]);
        // Adapting again without new evidence is a no-op.
        assert!(r.adapt(&c).is_empty());
    }

    #[test]
    fn corroboration_targets_missing_and_weakly_sourced() {
        let mut r = reconciler(Cardinality::Three);
        let c = ctx(2_000);
        r.ingest(
            &[
                obs(&alarm_id(32), 1_000, SourceTag::Lastval),
                obs(&alarm_id(36), 1_000, SourceTag::Mongodb),
            ],
            &c,
        );
        assert_eq!(r.corroboration_candidates(), vec![alarm_id(32), alarm_id(40)]);
    }

    #[test]
    fn updates_never_report_more_found_than_expected() {
        let mut r = reconciler(Cardinality::Six);
        let c = ctx(2_000);
        let all: Vec<Observation> = [30u8, 31, 32, 33, 34, 36, 38, 40, 42]
            .into_iter()
            .map(|n| obs(&alarm_id(n), 1_000, SourceTag::Lastval))
            .collect();
        r.ingest(&all, &c);
        r.adapt(&c);
        for ev in r.updates(&c) {
            match ev {
                MonitorEvent::MetricsUpdate(m) => assert!(m.found_count <= m.total_expected),
                MonitorEvent::AlarmsUpdate(a) => {
                    assert!(a.found_count <= a.total_expected);
                    assert_eq!(a.found_count, 7);
                    assert_eq!(a.other_count, 2);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn history_only_grows() {
        let mut r = reconciler(Cardinality::Six);
        let mut last = 0;
        for (i, n) in [32u8, 32, 33, 34].into_iter().enumerate() {
            let c = ctx(2_000 + i as i64);
            r.ingest(&[obs(&alarm_id(n), 1_000, SourceTag::Lastval)], &c);
            r.adapt(&c);
            assert!(r.history().len() >= last);
            last = r.history().len();
        }
        assert_eq!(last, 5);
    }
}
