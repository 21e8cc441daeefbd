//! Typed view of the merged configuration document.
//!
//! Every field has a default so an empty document yields a runnable config.

use anyhow::{Context, Result};
use dvt_schemas::TimeFilter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub daemon: DaemonSettings,
    pub engine: EngineSettings,
    pub sources: SourceSettings,
}

impl MonitorConfig {
    pub fn from_json(v: &Value) -> Result<Self> {
        serde_json::from_value(v.clone()).context("config does not match the monitor schema")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub bind_addr: String,
    pub cors_origins: Vec<String>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8899".to_string(),
            cors_origins: vec![
                "http://localhost:1420".to_string(),
                "http://127.0.0.1:1420".to_string(),
            ],
        }
    }
}

/// Interval switch-over: once `after_secs` have elapsed, wait `interval_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalStep {
    pub after_secs: u64,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub base_interval_secs: u64,
    pub interval_steps: Vec<IntervalStep>,
    pub lookback_secs: i64,
    pub alarm_override_tolerance_secs: i64,
    pub aggregated_min_elapsed_secs: u64,
    pub aggregated_min_interval_secs: u64,
    pub display_timezone: String,
    pub default_time_filter: TimeFilter,
    pub default_location: String,
    pub default_cardinality: u8,
    pub default_timeout_minutes: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_interval_secs: 5,
            interval_steps: vec![
                IntervalStep {
                    after_secs: 120,
                    interval_secs: 10,
                },
                IntervalStep {
                    after_secs: 300,
                    interval_secs: 15,
                },
            ],
            lookback_secs: 300,
            alarm_override_tolerance_secs: 300,
            aggregated_min_elapsed_secs: 60,
            aggregated_min_interval_secs: 30,
            display_timezone: "Europe/Rome".to_string(),
            default_time_filter: TimeFilter::default(),
            default_location: "Lazio".to_string(),
            default_cardinality: 6,
            default_timeout_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub telemetry: TelemetrySettings,
    pub backend: BackendSettings,
    pub auth: AuthSettings,
    pub flag_store: FlagStoreSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl TelemetrySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            base_url: "http://apidigil-ese-onesait-ese.apps.clusteriot.opencs.servizi.prv"
                .to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Internal endpoints are served with self-signed certificates.
    pub accept_invalid_certs: bool,
}

impl BackendSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "https://digil-back-end-onesait.servizi.prv".to_string(),
            timeout_secs: 30,
            accept_invalid_certs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub token_url: String,
    /// Env var NAMES, never values.
    pub client_id_env: String,
    pub client_secret_env: String,
    pub refresh_margin_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            token_url: "https://rh-sso.apps.clusterzac.opencs.servizi.prv/auth/realms/DigilV2/protocol/openid-connect/token".to_string(),
            client_id_env: "DVT_SSO_CLIENT_ID".to_string(),
            client_secret_env: "DVT_SSO_CLIENT_SECRET".to_string(),
            refresh_margin_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagStoreSettings {
    pub enabled: bool,
    /// Env var NAME holding the connection string.
    pub uri_env: String,
    pub database: String,
    pub collection: String,
    /// Local end of the forwarded tunnel.
    pub tunnel_local_addr: String,
    pub query_timeout_secs: u64,
    pub reconnect_backoff_secs: u64,
}

impl FlagStoreSettings {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }
}

impl Default for FlagStoreSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            uri_env: "DVT_MONGO_URI".to_string(),
            database: "digil".to_string(),
            collection: "unsolicited".to_string(),
            tunnel_local_addr: "127.0.0.1:27018".to_string(),
            query_timeout_secs: 5,
            reconnect_backoff_secs: 30,
        }
    }
}
