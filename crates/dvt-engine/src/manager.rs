//! Registry of active sessions and their lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dvt_expected::{Cardinality, UnsupportedCardinality};
use dvt_schemas::{SessionId, TimeFilter};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::session::{EngineContext, MonitorSession, SessionParams};
use crate::sink::EventSink;

/// `start_unified_monitoring` body. Omitted fields take the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    pub device_id: String,
    #[serde(rename = "num_sensors")]
    pub cardinality: Option<u8>,
    #[serde(rename = "ui")]
    pub location: Option<String>,
    pub timeout_minutes: Option<u32>,
}

impl StartRequest {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }
}

/// Start-time configuration errors. The session is never created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error(transparent)]
    Cardinality(#[from] UnsupportedCardinality),
    #[error("timeout must be at least 1 minute")]
    InvalidTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
}

/// Snapshot of one active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub device_id: String,
    pub cardinality: Cardinality,
    pub location: String,
    pub timeout_minutes: u32,
    pub created_at: DateTime<Utc>,
    pub filter: TimeFilter,
}

struct SessionEntry {
    info: SessionInfo,
    filter: watch::Sender<TimeFilter>,
    cancel: CancellationToken,
}

pub struct SessionManager {
    ctx: EngineContext,
    sessions: Arc<Mutex<HashMap<SessionId, SessionEntry>>>,
    root: CancellationToken,
}

impl SessionManager {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            root: CancellationToken::new(),
        }
    }

    /// Validate the request, register the session and spawn its worker.
    pub async fn start(
        &self,
        req: StartRequest,
        sink: Arc<dyn EventSink>,
    ) -> Result<SessionId, StartError> {
        let params = self.validate(req)?;
        let id = SessionId::new();
        let initial_filter = self.ctx.settings.default_time_filter;
        let (filter_tx, filter_rx) = watch::channel(initial_filter);
        let cancel = self.root.child_token();

        let info = SessionInfo {
            session_id: id,
            device_id: params.device_id.clone(),
            cardinality: params.cardinality,
            location: params.location.clone(),
            timeout_minutes: params.timeout_minutes,
            created_at: Utc::now(),
            filter: initial_filter,
        };
        // Registered before the worker starts so a stop issued right after
        // start always finds it.
        self.sessions.lock().await.insert(
            id,
            SessionEntry {
                info,
                filter: filter_tx,
                cancel: cancel.clone(),
            },
        );

        let session =
            MonitorSession::new(id, params, self.ctx.clone(), sink, filter_rx, cancel);
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let outcome = session.run().await;
            sessions.lock().await.remove(&id);
            tracing::debug!(session_id = %id, outcome = ?outcome, "session released");
        });

        Ok(id)
    }

    fn validate(&self, req: StartRequest) -> Result<SessionParams, StartError> {
        let defaults = &self.ctx.settings;
        let device_id = req.device_id.trim().to_string();
        if device_id.is_empty() {
            return Err(StartError::MissingParameter("device_id"));
        }
        let location = req
            .location
            .unwrap_or_else(|| defaults.default_location.clone())
            .trim()
            .to_string();
        if location.is_empty() {
            return Err(StartError::MissingParameter("ui"));
        }
        let cardinality =
            Cardinality::try_from(req.cardinality.unwrap_or(defaults.default_cardinality))?;
        let timeout_minutes = req
            .timeout_minutes
            .unwrap_or(defaults.default_timeout_minutes);
        if timeout_minutes < 1 {
            return Err(StartError::InvalidTimeout);
        }
        Ok(SessionParams {
            device_id,
            location,
            cardinality,
            timeout_minutes,
        })
    }

    /// Replace the session's filter; the worker reads it on its next tick.
    pub async fn update_time_filter(
        &self,
        id: &SessionId,
        filter: TimeFilter,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions
            .get_mut(id)
            .ok_or(SessionError::UnknownSession(*id))?;
        entry.filter.send_replace(filter);
        entry.info.filter = filter;
        tracing::info!(
            session_id = %id,
            historical_mode = filter.historical_mode,
            window_minutes = filter.time_window_minutes,
            "time filter updated"
        );
        Ok(())
    }

    /// Signal cancellation. The worker exits within one wait interval and
    /// releases its entry. Returns `false` for unknown ids.
    pub async fn stop(&self, id: &SessionId) -> bool {
        match self.sessions.lock().await.get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// The observer connection went away. Same as [`SessionManager::stop`].
    pub async fn disconnect(&self, id: &SessionId) -> bool {
        self.stop(id).await
    }

    pub async fn is_active(&self, id: &SessionId) -> bool {
        self.sessions.lock().await.contains_key(id)
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut out: Vec<SessionInfo> = self
            .sessions
            .lock()
            .await
            .values()
            .map(|e| e.info.clone())
            .collect();
        out.sort_by_key(|i| i.created_at);
        out
    }

    /// Cancel every session, including ones started later.
    pub fn shutdown(&self) {
        self.root.cancel();
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
