//! Wall clock seam and display formatting.

use std::time::Duration;

use chrono::DateTime;
use chrono_tz::Tz;

/// Source of wall-clock time for a session. Elapsed time, lookback windows
/// and the time filter are all derived from it.
pub trait Clock: Send + Sync {
    fn now_unix_millis(&self) -> i64;

    fn now_unix(&self) -> i64 {
        self.now_unix_millis().div_euclid(1000)
    }

    /// Time since `start_millis`; never negative.
    fn elapsed_since(&self, start_millis: i64) -> Duration {
        let ms = (self.now_unix_millis() - start_millis).max(0);
        Duration::from_millis(ms as u64)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Renders event timestamps in the operator's time zone.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    tz: Tz,
}

impl Renderer {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Unknown zone names fall back to UTC.
    pub fn from_zone_name(name: &str) -> Self {
        match name.parse::<Tz>() {
            Ok(tz) => Self { tz },
            Err(_) => {
                tracing::warn!(zone = name, "unknown display time zone; using UTC");
                Self { tz: Tz::UTC }
            }
        }
    }

    /// `dd/mm/yy - HH:MM:SS`.
    pub fn timestamp(&self, unix_secs: i64) -> String {
        match DateTime::from_timestamp(unix_secs, 0) {
            Some(dt) => dt
                .with_timezone(&self.tz)
                .format("%d/%m/%y - %H:%M:%S")
                .to_string(),
            None => unix_secs.to_string(),
        }
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self { tz: Tz::UTC }
    }
}

/// `H:MM:SS`, hours unbounded.
pub fn format_elapsed(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
