//! Shared runtime state for dvt-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. Each session gets its
//! own broadcast bus; WebSocket and SSE observers subscribe to it.

use std::collections::HashMap;
use std::sync::Arc;

use dvt_engine::{EngineContext, EventSink, SessionManager, StartError, StartRequest};
use dvt_schemas::{MonitorEvent, SessionId};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

/// Events buffered per observer before it starts lagging.
pub const BUS_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// BusSink
// ---------------------------------------------------------------------------

/// Fans a session's events out to every subscriber of its bus.
#[derive(Debug, Clone)]
pub struct BusSink {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventSink for BusSink {
    fn emit(&self, session: &SessionId, event: &MonitorEvent) {
        // No subscribers is fine: HTTP-started sessions may not be watched yet.
        if self.tx.send(event.clone()).is_err() {
            tracing::trace!(session_id = %session, event = event.event_type(), "no observers");
        }
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    pub build: BuildInfo,
    pub sessions: SessionManager,
    /// Senders of live sessions. The worker holds the other sender, so a
    /// bus closes once the session ends and its entry is dropped here.
    buses: Arc<RwLock<HashMap<SessionId, broadcast::Sender<MonitorEvent>>>>,
}

impl AppState {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            build: BuildInfo {
                service: "dvt-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            sessions: SessionManager::new(ctx),
            buses: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a session and subscribe to it before its first tick.
    pub async fn start_session(
        &self,
        req: StartRequest,
    ) -> Result<(SessionId, broadcast::Receiver<MonitorEvent>), StartError> {
        let (tx, rx) = broadcast::channel(BUS_CAPACITY);
        let ended = tx.subscribe();
        let sink = Arc::new(BusSink { tx: tx.clone() });
        let id = self.sessions.start(req, sink).await?;
        self.buses.write().await.insert(id, tx);
        tokio::spawn(release_when_ended(Arc::clone(&self.buses), id, ended));
        self.prune().await;
        Ok((id, rx))
    }

    pub async fn subscribe(&self, id: &SessionId) -> Option<broadcast::Receiver<MonitorEvent>> {
        self.prune().await;
        self.buses.read().await.get(id).map(|tx| tx.subscribe())
    }

    /// Stop a session and drop its bus. `false` if the id is unknown.
    pub async fn stop_session(&self, id: &SessionId) -> bool {
        let stopped = self.sessions.stop(id).await;
        self.buses.write().await.remove(id);
        stopped
    }

    /// The observer's connection went away.
    pub async fn disconnect(&self, id: &SessionId) -> bool {
        let stopped = self.sessions.disconnect(id).await;
        self.buses.write().await.remove(id);
        stopped
    }

    /// Drop buses of sessions that have ended.
    async fn prune(&self) {
        let active: Vec<SessionId> = self
            .sessions
            .list()
            .await
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        self.buses
            .write()
            .await
            .retain(|id, _| active.contains(id));
    }
}

/// Drop a session's bus once it emits its terminal event or its worker
/// exits, so subscribers see the stream close.
async fn release_when_ended(
    buses: Arc<RwLock<HashMap<SessionId, broadcast::Sender<MonitorEvent>>>>,
    id: SessionId,
    mut rx: broadcast::Receiver<MonitorEvent>,
) {
    loop {
        match rx.recv().await {
            Ok(ev) if ev.is_terminal() => break,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    if buses.write().await.remove(&id).is_some() {
        tracing::debug!(session_id = %id, "session bus released");
    }
}
