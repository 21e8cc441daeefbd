use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

pub mod events;

pub use events::{
    AlarmFound, AlarmsUpdate, CompletedAlarms, CompletedMetrics, ConfigDetected, HistoryEntry,
    MetricFound, MetricsUpdate, MonitorEvent, MonitoringComplete, MonitoringError,
    MonitoringTimeout, OtherAlarmFound, TimeoutAlarms, TimeoutMetrics,
};

/// Opaque identity of one monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which backend produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Telemetry,
    Lastval,
    Aggregated,
    Mongodb,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Telemetry => "telemetry",
            SourceTag::Lastval => "lastval",
            SourceTag::Aggregated => "aggregated",
            SourceTag::Mongodb => "mongodb",
        }
    }

    /// The flag store is the only source that can confirm an alarm.
    pub fn is_authoritative(&self) -> bool {
        matches!(self, SourceTag::Mongodb)
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized reading: (id, value, unix seconds, source).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub value: Value,
    pub ts: i64,
    pub source: SourceTag,
}

impl Observation {
    pub fn new(id: impl Into<String>, value: Value, ts: i64, source: SourceTag) -> Self {
        Self {
            id: id.into(),
            value,
            ts,
            source,
        }
    }
}

/// Client-controlled recency filter applied to every observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeFilter {
    pub historical_mode: bool,
    pub time_window_minutes: u32,
}

impl TimeFilter {
    pub const DEFAULT_WINDOW_MINUTES: u32 = 10;

    pub fn live(time_window_minutes: u32) -> Self {
        Self {
            historical_mode: false,
            time_window_minutes,
        }
    }

    pub fn historical() -> Self {
        Self {
            historical_mode: true,
            time_window_minutes: Self::DEFAULT_WINDOW_MINUTES,
        }
    }

    /// Historical mode accepts everything. Live mode accepts observations no
    /// older than the window; timestamps ahead of `now_unix` pass.
    pub fn accepts(&self, ts: i64, now_unix: i64) -> bool {
        if self.historical_mode {
            return true;
        }
        let window_secs = i64::from(self.time_window_minutes) * 60;
        now_unix.saturating_sub(ts) <= window_secs
    }
}

impl Default for TimeFilter {
    fn default() -> Self {
        Self::live(Self::DEFAULT_WINDOW_MINUTES)
    }
}
