use dvt_engine::Clock;
use tokio::time::Instant;

/// Wall clock that advances with tokio's (possibly paused) clock.
#[derive(Debug, Clone, Copy)]
pub struct PausedClock {
    base_unix_millis: i64,
    anchor: Instant,
}

impl PausedClock {
    /// 2023-11-14T22:13:20Z.
    pub const DEFAULT_BASE_UNIX: i64 = 1_700_000_000;

    pub fn new() -> Self {
        Self::starting_at(Self::DEFAULT_BASE_UNIX)
    }

    pub fn starting_at(unix_secs: i64) -> Self {
        Self {
            base_unix_millis: unix_secs * 1000,
            anchor: Instant::now(),
        }
    }

    pub fn base_unix(&self) -> i64 {
        self.base_unix_millis / 1000
    }
}

impl Default for PausedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for PausedClock {
    fn now_unix_millis(&self) -> i64 {
        self.base_unix_millis + self.anchor.elapsed().as_millis() as i64
    }
}
