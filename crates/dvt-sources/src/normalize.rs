//! Raw payload -> [`Observation`] normalization.
//!
//! Backends disagree on clocks and encodings: telemetry stamps entries in
//! milliseconds, the flag store mixes numbers, ISO strings and extended JSON.
//! Everything here converts to unix seconds. An entry whose timestamp cannot be
//! determined is dropped and counted; only a wrong top-level shape fails the
//! whole payload.

use chrono::{DateTime, Utc};
use dvt_schemas::{Observation, SourceTag};
use serde_json::{Map, Value};

use crate::SourceError;

/// Values above this are milliseconds.
const MILLIS_THRESHOLD: f64 = 1e10;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub observations: Vec<Observation>,
    pub discarded: usize,
}

impl Normalized {
    fn push(&mut self, id: Option<&str>, value: Value, ts: Option<i64>, source: SourceTag) {
        match (id.map(str::trim).filter(|s| !s.is_empty()), ts) {
            (Some(id), Some(ts)) => self.observations.push(Observation::new(id, value, ts, source)),
            _ => self.discarded += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Unix seconds from a number (s or ms), numeric string, RFC 3339 string,
/// or an extended-JSON wrapper (`$date`, `$numberLong`).
pub fn unix_seconds(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_f64().and_then(seconds_from_number),
        Value::String(s) => {
            let t = s.trim();
            if let Ok(n) = t.parse::<f64>() {
                return seconds_from_number(n);
            }
            DateTime::parse_from_rfc3339(t)
                .ok()
                .map(|dt| dt.with_timezone(&Utc).timestamp())
        }
        Value::Object(map) => map
            .get("$date")
            .or_else(|| map.get("$numberLong"))
            .and_then(unix_seconds),
        _ => None,
    }
}

fn seconds_from_number(n: f64) -> Option<i64> {
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    let secs = if n > MILLIS_THRESHOLD { n / 1000.0 } else { n };
    Some(secs.floor() as i64)
}

/// Flag store documents: `receivedOn`, then `timestamp`, then the device's
/// own `payload.metrics.TIMESTAMP.value`.
pub fn document_timestamp(doc: &Value) -> Option<i64> {
    doc.get("receivedOn")
        .and_then(unix_seconds)
        .or_else(|| doc.get("timestamp").and_then(unix_seconds))
        .or_else(|| {
            doc.pointer("/payload/metrics/TIMESTAMP/value")
                .and_then(unix_seconds)
        })
}

// ---------------------------------------------------------------------------
// Payload shapes
// ---------------------------------------------------------------------------

/// `{"tm": [{"timestamp": ms, "metrics": [{"metricType", "val"}]}]}`.
/// Metrics inherit their entry's timestamp.
pub fn telemetry_payload(body: &Value) -> Result<Normalized, SourceError> {
    entry_list(body, "tm", SourceTag::Telemetry)
}

/// `{"lastVal": [{"timestamp"?, "metrics": [{"metricType", "val", "timestamp"?}]}]}`.
/// A metric's own timestamp wins over its entry's.
pub fn lastval_payload(body: &Value) -> Result<Normalized, SourceError> {
    entry_list(body, "lastVal", SourceTag::Lastval)
}

fn entry_list(body: &Value, container: &str, source: SourceTag) -> Result<Normalized, SourceError> {
    let obj = body
        .as_object()
        .ok_or_else(|| SourceError::Malformed(format!("{source}: body is not an object")))?;
    let entries = match obj.get(container) {
        None => {
            return Err(SourceError::Malformed(format!(
                "{source}: missing '{container}'"
            )))
        }
        Some(Value::Null) => return Ok(Normalized::default()),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(SourceError::Malformed(format!(
                "{source}: '{container}' is not a list"
            )))
        }
    };

    let mut out = Normalized::default();
    for entry in entries {
        let entry_ts = entry.get("timestamp").and_then(unix_seconds);
        let Some(metrics) = entry.get("metrics").and_then(Value::as_array) else {
            out.discarded += 1;
            continue;
        };
        for metric in metrics {
            let ts = metric
                .get("timestamp")
                .and_then(unix_seconds)
                .or(entry_ts);
            let value = metric.get("val").cloned().unwrap_or(Value::Null);
            out.push(
                metric.get("metricType").and_then(Value::as_str),
                value,
                ts,
                source,
            );
        }
    }
    Ok(out)
}

/// `{"metrics": {"<id>": {"value": v, "timestamp": t}}}`.
pub fn aggregated_payload(body: &Value) -> Result<Normalized, SourceError> {
    let metrics = body
        .get("metrics")
        .and_then(Value::as_object)
        .ok_or_else(|| SourceError::Malformed("aggregated: missing 'metrics' map".to_string()))?;
    let fallback = body.get("timestamp").and_then(unix_seconds);
    Ok(metric_map(metrics, fallback, SourceTag::Aggregated, |_| true))
}

/// Observations for the requested alarm ids present in a twin document's
/// `payload.metrics` map. The document timestamp backs entries without one.
pub fn twin_observations(doc: &Value, alarm_ids: &[String]) -> Normalized {
    let Some(metrics) = doc.pointer("/payload/metrics").and_then(Value::as_object) else {
        return Normalized::default();
    };
    metric_map(metrics, document_timestamp(doc), SourceTag::Mongodb, |id| {
        alarm_ids.iter().any(|a| a == id)
    })
}

fn metric_map(
    metrics: &Map<String, Value>,
    fallback_ts: Option<i64>,
    source: SourceTag,
    wanted: impl Fn(&str) -> bool,
) -> Normalized {
    let mut out = Normalized::default();
    for (id, entry) in metrics {
        if !wanted(id) {
            continue;
        }
        let (value, ts) = match entry {
            Value::Object(fields) => (
                fields.get("value").cloned().unwrap_or(Value::Null),
                fields.get("timestamp").and_then(unix_seconds).or(fallback_ts),
            ),
            scalar => (scalar.clone(), fallback_ts),
        };
        out.push(Some(id), value, ts, source);
    }
    out
}
