//! Alarm flag store reached through a forwarded tunnel.
//!
//! The store holds device-twin documents. Each load-sensor alarm is backed by
//! two calculated boolean flags (`<FLAG>_calc`); a document where either flag
//! is `true` corroborates the alarm. The twin adapter reads the newest
//! document's own copy of the alarm ids.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dvt_expected::flags_for_alarm;
use dvt_schemas::{Observation, SourceTag};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::normalize::{document_timestamp, twin_observations};
use crate::{AlarmFlagSource, SourceError};

// ---------------------------------------------------------------------------
// Backend seam
// ---------------------------------------------------------------------------

/// A live connection to the store.
#[async_trait]
pub trait FlagStoreBackend: Send + Sync {
    async fn health_check(&self) -> Result<(), SourceError>;

    /// Newest document of `device_id` where `payload.metrics.<flag>_calc.value == true`.
    async fn latest_flag_document(
        &self,
        device_id: &str,
        flag: &str,
    ) -> Result<Option<Value>, SourceError>;

    /// Newest document of `device_id`.
    async fn latest_twin_document(&self, device_id: &str) -> Result<Option<Value>, SourceError>;
}

/// Opens connections (tunnel check + client handshake).
#[async_trait]
pub trait FlagStoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn FlagStoreBackend>, SourceError>;
}

// ---------------------------------------------------------------------------
// Tunnel manager
// ---------------------------------------------------------------------------

struct TunnelState {
    conn: Option<Arc<dyn FlagStoreBackend>>,
    last_failed_connect: Option<Instant>,
}

/// Shared handle to the tunneled connection. Connecting is serialized; a
/// failed connect is not retried until `reconnect_backoff` has passed.
pub struct TunnelManager {
    connector: Arc<dyn FlagStoreConnector>,
    reconnect_backoff: Duration,
    state: Mutex<TunnelState>,
}

impl std::fmt::Debug for TunnelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelManager")
            .field("reconnect_backoff", &self.reconnect_backoff)
            .finish()
    }
}

impl TunnelManager {
    pub fn new(connector: Arc<dyn FlagStoreConnector>, reconnect_backoff: Duration) -> Self {
        Self {
            connector,
            reconnect_backoff,
            state: Mutex::new(TunnelState {
                conn: None,
                last_failed_connect: None,
            }),
        }
    }

    /// The live connection, or `Unavailable` when it cannot be established or
    /// fails its health check. A failed health check drops the connection.
    pub async fn connection(&self) -> Result<Arc<dyn FlagStoreBackend>, SourceError> {
        let conn = {
            let mut st = self.state.lock().await;
            match st.conn.clone() {
                Some(conn) => conn,
                None => {
                    if let Some(at) = st.last_failed_connect {
                        if at.elapsed() < self.reconnect_backoff {
                            return Err(SourceError::Unavailable(
                                "flag store tunnel down; reconnect backing off".to_string(),
                            ));
                        }
                    }
                    match self.connector.connect().await {
                        Ok(conn) => {
                            tracing::info!("flag store connection established");
                            st.last_failed_connect = None;
                            st.conn = Some(conn.clone());
                            conn
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "flag store connect failed");
                            st.last_failed_connect = Some(Instant::now());
                            return Err(e);
                        }
                    }
                }
            }
        };

        if let Err(e) = conn.health_check().await {
            let mut st = self.state.lock().await;
            if st.conn.as_ref().is_some_and(|c| Arc::ptr_eq(c, &conn)) {
                st.conn = None;
            }
            return Err(SourceError::Unavailable(format!(
                "flag store health check failed: {e}"
            )));
        }
        Ok(conn)
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.conn.is_some()
    }
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

/// Boolean `_calc` flags backing each alarm.
#[derive(Debug, Clone)]
pub struct FlagStoreAdapter {
    tunnel: Arc<TunnelManager>,
}

impl FlagStoreAdapter {
    pub fn new(tunnel: Arc<TunnelManager>) -> Self {
        Self { tunnel }
    }
}

#[async_trait]
impl AlarmFlagSource for FlagStoreAdapter {
    fn name(&self) -> &'static str {
        "flag_store"
    }

    async fn check_alarms(
        &self,
        device_id: &str,
        alarm_ids: &[String],
    ) -> Result<Vec<Observation>, SourceError> {
        let conn = self.tunnel.connection().await?;
        let mut out = Vec::new();
        for alarm in alarm_ids {
            let Some(flags) = flags_for_alarm(alarm) else {
                continue;
            };
            let mut newest: Option<i64> = None;
            for flag in &flags {
                let Some(doc) = conn.latest_flag_document(device_id, flag).await? else {
                    continue;
                };
                match document_timestamp(&doc) {
                    Some(ts) => newest = Some(newest.map_or(ts, |n| n.max(ts))),
                    None => tracing::debug!(device_id, flag = %flag, "flag document without timestamp"),
                }
            }
            if let Some(ts) = newest {
                out.push(Observation::new(
                    alarm.clone(),
                    Value::Bool(true),
                    ts,
                    SourceTag::Mongodb,
                ));
            }
        }
        Ok(out)
    }
}

/// The device twin's own copy of the alarm ids.
#[derive(Debug, Clone)]
pub struct TwinAdapter {
    tunnel: Arc<TunnelManager>,
}

impl TwinAdapter {
    pub fn new(tunnel: Arc<TunnelManager>) -> Self {
        Self { tunnel }
    }
}

#[async_trait]
impl AlarmFlagSource for TwinAdapter {
    fn name(&self) -> &'static str {
        "twin"
    }

    async fn check_alarms(
        &self,
        device_id: &str,
        alarm_ids: &[String],
    ) -> Result<Vec<Observation>, SourceError> {
        let conn = self.tunnel.connection().await?;
        let Some(doc) = conn.latest_twin_document(device_id).await? else {
            return Ok(Vec::new());
        };
        Ok(twin_observations(&doc, alarm_ids).observations)
    }
}
