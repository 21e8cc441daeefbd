//! Read-only data source adapters.
//!
//! Every adapter resolves to `Ok(observations)` or a typed [`SourceError`];
//! none retries. Process-wide credentials (bearer token, tunneled connection)
//! live in [`SharedResources`] and are handed to the adapters that need them.

use async_trait::async_trait;
use dvt_schemas::{Observation, SourceTag};

mod digil;
mod error;
pub mod flag_store;
#[cfg(feature = "mongo")]
pub mod mongo;
pub mod normalize;
mod resources;
mod token;

pub use digil::{AggregatedSnapshotAdapter, LastValueAdapter, TelemetryAdapter};
pub use error::SourceError;
pub use flag_store::{
    FlagStoreAdapter, FlagStoreBackend, FlagStoreConnector, TunnelManager, TwinAdapter,
};
pub use resources::{SharedResources, SourceSet};
pub use token::TokenProvider;

/// Inclusive unix-seconds range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    /// `[now - width, now]`.
    pub fn lookback(now_unix: i64, width_secs: i64) -> Self {
        Self {
            start: now_unix - width_secs,
            end: now_unix,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuery {
    pub device_id: String,
    /// Location / UI tag the telemetry service partitions devices by.
    pub location: String,
    pub range: Option<TimeRange>,
}

/// Telemetry, last-value and aggregated snapshot adapters.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    fn tag(&self) -> SourceTag;

    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<Observation>, SourceError>;
}

/// Alarm corroboration adapters; asked only about specific alarm ids.
#[async_trait]
pub trait AlarmFlagSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check_alarms(
        &self,
        device_id: &str,
        alarm_ids: &[String],
    ) -> Result<Vec<Observation>, SourceError>;
}
