//! Command handler modules for dvt-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod check;
pub mod monitor;

use anyhow::{Context, Result};
use dvt_config::{load_monitor_config, resolve_secrets, MonitorConfig};
use dvt_expected::Cardinality;
use dvt_sources::{SharedResources, SourceSet};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// `--config` paths in merge order; none means built-in defaults.
pub fn load_config(paths: &[String]) -> Result<MonitorConfig> {
    if paths.is_empty() {
        debug!("no --config given; using built-in defaults");
        return Ok(MonitorConfig::default());
    }
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let (loaded, cfg) = load_monitor_config(&path_refs).context("load --config")?;
    info!(config_hash = %loaded.config_hash, "config loaded");
    Ok(cfg)
}

/// Production adapters for `cfg`.
pub fn wire_sources(cfg: &MonitorConfig) -> SourceSet {
    let secrets = resolve_secrets(cfg);
    let resources = SharedResources::from_settings(&cfg.sources, &secrets);
    let sources = SourceSet::from_settings(&cfg.sources, &resources);
    debug!(sources = ?sources.describe(), "data sources configured");
    sources
}

/// `--sensors`, falling back to the configured default.
pub fn parse_cardinality(sensors: Option<u8>, cfg: &MonitorConfig) -> Result<Cardinality> {
    let n = sensors.unwrap_or(cfg.engine.default_cardinality);
    Cardinality::try_from(n).map_err(|e| anyhow::anyhow!("invalid --sensors: {e}"))
}

/// `--device`, trimmed; empty is rejected.
pub fn parse_device(device: &str) -> Result<String> {
    let device = device.trim();
    if device.is_empty() {
        anyhow::bail!("--device must not be empty");
    }
    Ok(device.to_string())
}
