//! Outbound event payloads.
//!
//! Field names are part of the wire contract with observers. The serde form of
//! [`MonitorEvent`] is `{"event": "<name>", "data": {..}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::SourceTag;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFound {
    pub metric_type: String,
    pub value: Value,
    pub timestamp: String,
    pub elapsed: String,
    pub source: SourceTag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmFound {
    pub alarm_type: String,
    pub value: Value,
    pub timestamp: String,
    pub elapsed: String,
    pub is_expected: bool,
    pub source: SourceTag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherAlarmFound {
    pub alarm_type: String,
    pub value: Value,
    pub timestamp: String,
    pub elapsed: String,
    pub is_expected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDetected {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsUpdate {
    pub found_count: usize,
    pub total_expected: usize,
    pub missing_list: Vec<String>,
    pub last_check: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmsUpdate {
    pub found_count: usize,
    pub total_expected: usize,
    pub missing_list: Vec<String>,
    pub other_count: usize,
    pub last_check: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedMetrics {
    pub total_found: usize,
    pub total_expected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedAlarms {
    pub total_found: usize,
    pub total_expected: usize,
    pub other_alarms: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringComplete {
    pub success: bool,
    pub metrics: CompletedMetrics,
    pub alarms: CompletedAlarms,
    pub duration: String,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutMetrics {
    pub found: BTreeMap<String, Value>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutAlarms {
    pub found: BTreeMap<String, Value>,
    pub missing: Vec<String>,
    pub other: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringTimeout {
    pub message: String,
    pub metrics: TimeoutMetrics,
    pub alarms: TimeoutAlarms,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringError {
    pub error: String,
}

/// Discovery events retained for the final summary, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entry", rename_all = "snake_case")]
pub enum HistoryEntry {
    Metric(MetricFound),
    Alarm(AlarmFound),
    OtherAlarm(OtherAlarmFound),
    Config(ConfigDetected),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum MonitorEvent {
    MetricFound(MetricFound),
    AlarmFound(AlarmFound),
    OtherAlarmFound(OtherAlarmFound),
    ConfigDetected(ConfigDetected),
    MetricsUpdate(MetricsUpdate),
    AlarmsUpdate(AlarmsUpdate),
    MonitoringComplete(MonitoringComplete),
    MonitoringTimeout(MonitoringTimeout),
    MonitoringError(MonitoringError),
}

impl MonitorEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            MonitorEvent::MetricFound(_) => "metric_found",
            MonitorEvent::AlarmFound(_) => "alarm_found",
            MonitorEvent::OtherAlarmFound(_) => "other_alarm_found",
            MonitorEvent::ConfigDetected(_) => "config_detected",
            MonitorEvent::MetricsUpdate(_) => "metrics_update",
            MonitorEvent::AlarmsUpdate(_) => "alarms_update",
            MonitorEvent::MonitoringComplete(_) => "monitoring_complete",
            MonitorEvent::MonitoringTimeout(_) => "monitoring_timeout",
            MonitorEvent::MonitoringError(_) => "monitoring_error",
        }
    }

    /// `monitoring_complete` and `monitoring_timeout` end a session.
    /// `monitoring_error` does not.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MonitorEvent::MonitoringComplete(_) | MonitorEvent::MonitoringTimeout(_)
        )
    }

    /// The payload alone, as observers receive it under the event name.
    pub fn payload(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    pub fn history_entry(&self) -> Option<HistoryEntry> {
        match self {
            MonitorEvent::MetricFound(m) => Some(HistoryEntry::Metric(m.clone())),
            MonitorEvent::AlarmFound(a) => Some(HistoryEntry::Alarm(a.clone())),
            MonitorEvent::OtherAlarmFound(o) => Some(HistoryEntry::OtherAlarm(o.clone())),
            MonitorEvent::ConfigDetected(c) => Some(HistoryEntry::Config(c.clone())),
            _ => None,
        }
    }
}
