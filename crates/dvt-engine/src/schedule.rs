use std::time::Duration;

use dvt_config::{EngineSettings, IntervalStep};

/// Inter-tick wait that lengthens as the session ages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalSchedule {
    base: Duration,
    /// Sorted by `after_secs`.
    steps: Vec<IntervalStep>,
}

impl IntervalSchedule {
    pub fn new(base: Duration, mut steps: Vec<IntervalStep>) -> Self {
        steps.sort_by_key(|s| s.after_secs);
        Self { base, steps }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.base_interval_secs.max(1)),
            settings.interval_steps.clone(),
        )
    }

    /// The last step whose threshold has been reached wins.
    pub fn interval_at(&self, elapsed: Duration) -> Duration {
        self.steps
            .iter()
            .rev()
            .find(|s| elapsed.as_secs() >= s.after_secs)
            .map(|s| Duration::from_secs(s.interval_secs.max(1)))
            .unwrap_or(self.base)
    }
}

impl Default for IntervalSchedule {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}
