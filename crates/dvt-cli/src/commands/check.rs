//! `dvt check-metrics`: one telemetry query over the last N minutes.

use std::collections::BTreeMap;
use std::process::ExitCode;

use anyhow::{Context, Result};
use dvt_engine::{Clock, Renderer, SystemClock};
use dvt_expected::ExpectedSet;
use dvt_schemas::Observation;
use dvt_sources::{SourceQuery, TimeRange};

use super::{load_config, parse_cardinality, parse_device, wire_sources};

pub struct CheckArgs {
    pub device: String,
    pub sensors: Option<u8>,
    pub ui: Option<String>,
    pub minutes: u32,
    pub config_paths: Vec<String>,
}

/// Expected metrics split into present (with their newest timestamp) and
/// absent, in expected order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsReport {
    pub found: Vec<(String, i64)>,
    pub missing: Vec<String>,
}

impl MetricsReport {
    pub fn build(expected: &ExpectedSet, observations: &[Observation]) -> Self {
        let mut newest: BTreeMap<&str, i64> = BTreeMap::new();
        for o in observations {
            let ts = newest.entry(o.id.as_str()).or_insert(o.ts);
            *ts = (*ts).max(o.ts);
        }

        let mut found = Vec::new();
        let mut missing = Vec::new();
        for m in &expected.metrics {
            match newest.get(m.as_str()) {
                Some(ts) => found.push((m.clone(), *ts)),
                None => missing.push(m.clone()),
            }
        }
        Self { found, missing }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

pub async fn run(args: CheckArgs) -> Result<ExitCode> {
    if args.minutes == 0 {
        anyhow::bail!("--minutes must be at least 1");
    }
    let cfg = load_config(&args.config_paths)?;
    let device_id = parse_device(&args.device)?;
    let cardinality = parse_cardinality(args.sensors, &cfg)?;
    let expected = dvt_expected::resolve(cardinality);
    let sources = wire_sources(&cfg);

    let now = SystemClock.now_unix();
    let query = SourceQuery {
        device_id: device_id.clone(),
        location: args
            .ui
            .unwrap_or_else(|| cfg.engine.default_location.clone()),
        range: Some(TimeRange::lookback(now, i64::from(args.minutes) * 60)),
    };
    let observations = sources
        .telemetry
        .fetch(&query)
        .await
        .context("telemetry query failed")?;

    let report = MetricsReport::build(&expected, &observations);
    let renderer = Renderer::from_zone_name(&cfg.engine.display_timezone);

    println!("device_id={}", device_id);
    println!("sensors={}", cardinality);
    println!("window_minutes={}", args.minutes);
    println!(
        "found={} expected={}",
        report.found.len(),
        expected.metrics.len()
    );
    for (id, ts) in &report.found {
        println!("found_metric={} last_seen={}", id, renderer.timestamp(*ts));
    }
    for id in &report.missing {
        println!("missing_metric={}", id);
    }

    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvt_expected::Cardinality;
    use dvt_schemas::SourceTag;
    use serde_json::json;

    fn obs(id: &str, ts: i64) -> Observation {
        Observation::new(id, json!(1.5), ts, SourceTag::Telemetry)
    }

    #[test]
    fn full_snapshot_is_complete() {
        let expected = dvt_expected::resolve(Cardinality::Three);
        let observations: Vec<Observation> =
            expected.metrics.iter().map(|m| obs(m, 100)).collect();

        let report = MetricsReport::build(&expected, &observations);
        assert!(report.is_complete());
        assert_eq!(report.found.len(), expected.metrics.len());
    }

    #[test]
    fn missing_keeps_expected_order_and_found_keeps_newest() {
        let expected = dvt_expected::resolve(Cardinality::Six);
        let first = expected.metrics[0].clone();
        let observations = vec![
            obs(&first, 100),
            obs(&first, 250),
            obs(&first, 200),
            obs("NOT_A_METRIC", 300),
        ];

        let report = MetricsReport::build(&expected, &observations);
        assert_eq!(report.found, vec![(first, 250)]);
        assert_eq!(report.missing, expected.metrics[1..].to_vec());
        assert!(!report.is_complete());
    }
}
