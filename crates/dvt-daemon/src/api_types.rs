//! Request and response types for the dvt-daemon HTTP and WebSocket surface.
//!
//! No business logic lives here.

use dvt_engine::{SessionInfo, StartRequest};
use dvt_schemas::{MonitoringError, SessionId, TimeFilter};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// /v1/sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionInfo>,
}

/// `monitoring_started` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartedResponse {
    pub message: String,
    pub session_id: SessionId,
}

/// `monitoring_stopped` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoppedResponse {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// /v1/ws
// ---------------------------------------------------------------------------

/// Inbound frames: `{"event": "<name>", "data": {..}}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WsRequest {
    StartUnifiedMonitoring(StartRequest),
    StopMonitoring,
    UpdateTimeFilter(TimeFilter),
}

/// Replies to inbound frames. Session events are forwarded as
/// [`dvt_schemas::MonitorEvent`], which shares this wire shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WsReply {
    MonitoringStarted(StartedResponse),
    MonitoringStopped(StoppedResponse),
    FilterUpdated(TimeFilter),
    MonitoringError(MonitoringError),
}

impl WsReply {
    pub fn error(msg: impl Into<String>) -> Self {
        WsReply::MonitoringError(MonitoringError { error: msg.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_frames_parse() {
        let start: WsRequest = serde_json::from_value(json!({
            "event": "start_unified_monitoring",
            "data": {"device_id": "D1", "num_sensors": 3, "ui": "Lazio", "timeout_minutes": 2}
        }))
        .unwrap();
        let WsRequest::StartUnifiedMonitoring(req) = start else {
            panic!("wrong variant");
        };
        assert_eq!(req.cardinality, Some(3));
        assert_eq!(req.location.as_deref(), Some("Lazio"));

        let stop: WsRequest =
            serde_json::from_value(json!({"event": "stop_monitoring"})).unwrap();
        assert_eq!(stop, WsRequest::StopMonitoring);

        let filter: WsRequest = serde_json::from_value(json!({
            "event": "update_time_filter",
            "data": {"historical_mode": true, "time_window_minutes": 30}
        }))
        .unwrap();
        assert_eq!(
            filter,
            WsRequest::UpdateTimeFilter(TimeFilter {
                historical_mode: true,
                time_window_minutes: 30
            })
        );
    }

    #[test]
    fn replies_use_event_and_data() {
        let v = serde_json::to_value(WsReply::MonitoringStopped(StoppedResponse {
            message: "monitoring stopped".to_string(),
        }))
        .unwrap();
        assert_eq!(v["event"], "monitoring_stopped");
        assert_eq!(v["data"]["message"], "monitoring stopped");
    }
}
