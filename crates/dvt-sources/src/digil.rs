//! HTTP adapters for the telemetry service and the device backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dvt_schemas::{Observation, SourceTag};
use serde_json::Value;

use crate::normalize::{self, Normalized};
use crate::token::TokenProvider;
use crate::{ObservationSource, SourceError, SourceQuery};

async fn read_json(resp: reqwest::Response, context: &str) -> Result<Value, SourceError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(SourceError::from_status(status, context));
    }
    let body = resp.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| SourceError::Malformed(format!("{context}: invalid json: {e}")))
}

fn finish(source: SourceTag, device: &str, n: Normalized) -> Vec<Observation> {
    if n.discarded > 0 {
        tracing::debug!(
            source = %source,
            device,
            discarded = n.discarded,
            "observations without id or timestamp dropped"
        );
    }
    n.observations
}

fn range_params(q: &SourceQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("ui", q.location.clone()),
        ("deviceID", q.device_id.clone()),
    ];
    if let Some(r) = q.range {
        params.push(("startDate", r.start.to_string()));
        params.push(("endDate", r.end.to_string()));
    }
    params
}

// ---------------------------------------------------------------------------
// Telemetry (ranged) and last-value snapshot
// ---------------------------------------------------------------------------

/// Ranged telemetry: `GET /api/v1/tm`.
#[derive(Debug, Clone)]
pub struct TelemetryAdapter {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl TelemetryAdapter {
    pub fn new_with_base_url(base_url: String, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            timeout,
        }
    }

    fn url(&self) -> String {
        format!("{}/api/v1/tm", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ObservationSource for TelemetryAdapter {
    fn tag(&self) -> SourceTag {
        SourceTag::Telemetry
    }

    async fn fetch(&self, q: &SourceQuery) -> Result<Vec<Observation>, SourceError> {
        let resp = self
            .http
            .get(self.url())
            .query(&range_params(q))
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await?;
        let body = read_json(resp, "telemetry").await?;
        let n = normalize::telemetry_payload(&body)?;
        Ok(finish(SourceTag::Telemetry, &q.device_id, n))
    }
}

/// Last known value per metric: `GET /api/v1/lastval`.
#[derive(Debug, Clone)]
pub struct LastValueAdapter {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl LastValueAdapter {
    pub fn new_with_base_url(base_url: String, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            timeout,
        }
    }

    fn url(&self) -> String {
        format!("{}/api/v1/lastval", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ObservationSource for LastValueAdapter {
    fn tag(&self) -> SourceTag {
        SourceTag::Lastval
    }

    async fn fetch(&self, q: &SourceQuery) -> Result<Vec<Observation>, SourceError> {
        let resp = self
            .http
            .get(self.url())
            .query(&range_params(q))
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await?;
        let body = read_json(resp, "lastval").await?;
        let n = normalize::lastval_payload(&body)?;
        Ok(finish(SourceTag::Lastval, &q.device_id, n))
    }
}

// ---------------------------------------------------------------------------
// Aggregated per-device snapshot (authenticated backend)
// ---------------------------------------------------------------------------

/// Comprehensive per-device dump: `GET /api/v1/digils/{device}/data`.
/// Slow; the engine calls it only as a throttled fallback.
#[derive(Debug, Clone)]
pub struct AggregatedSnapshotAdapter {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    token: Arc<TokenProvider>,
}

impl AggregatedSnapshotAdapter {
    pub fn new_with_base_url(
        base_url: String,
        timeout: Duration,
        token: Arc<TokenProvider>,
        accept_invalid_certs: bool,
    ) -> Self {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "backend client builder failed; using defaults");
                reqwest::Client::new()
            });
        Self {
            http,
            base_url,
            timeout,
            token,
        }
    }

    fn url(&self, device_id: &str) -> Result<reqwest::Url, SourceError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| SourceError::Unavailable(format!("aggregated: bad base url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::Unavailable("aggregated: base url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["api", "v1", "digils", device_id, "data"]);
        Ok(url)
    }
}

#[async_trait]
impl ObservationSource for AggregatedSnapshotAdapter {
    fn tag(&self) -> SourceTag {
        SourceTag::Aggregated
    }

    async fn fetch(&self, q: &SourceQuery) -> Result<Vec<Observation>, SourceError> {
        let bearer = self.token.bearer().await?;
        let resp = self
            .http
            .get(self.url(&q.device_id)?)
            .query(&[("ui", q.location.as_str())])
            .bearer_auth(bearer)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await?;
        let body = match read_json(resp, "aggregated").await {
            Err(SourceError::Unauthorized(detail)) => {
                // Stale or revoked token; the next call refreshes.
                self.token.invalidate().await;
                return Err(SourceError::Unauthorized(detail));
            }
            other => other?,
        };
        let n = normalize::aggregated_payload(&body)?;
        Ok(finish(SourceTag::Aggregated, &q.device_id, n))
    }
}
