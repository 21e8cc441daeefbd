//! Wiring of adapters and the process-wide resources they share.

use std::sync::Arc;
use std::time::Duration;

use dvt_config::{ResolvedSecrets, SourceSettings};

use crate::flag_store::{FlagStoreAdapter, FlagStoreConnector, TunnelManager, TwinAdapter};
use crate::token::TokenProvider;
use crate::{
    AggregatedSnapshotAdapter, AlarmFlagSource, LastValueAdapter, ObservationSource,
    TelemetryAdapter,
};

/// Bearer token and tunnel handles, created once per process and shared by
/// every session's adapters.
#[derive(Debug, Clone, Default)]
pub struct SharedResources {
    pub token: Option<Arc<TokenProvider>>,
    pub tunnel: Option<Arc<TunnelManager>>,
}

impl SharedResources {
    pub fn from_settings(settings: &SourceSettings, secrets: &ResolvedSecrets) -> Self {
        let token = match (&secrets.sso_client_id, &secrets.sso_client_secret) {
            (Some(id), Some(secret)) => Some(Arc::new(TokenProvider::new(
                settings.auth.token_url.clone(),
                id.clone(),
                secret.clone(),
                Duration::from_secs(settings.auth.refresh_margin_secs),
                settings.backend.accept_invalid_certs,
            ))),
            _ => {
                tracing::warn!(
                    client_id_env = %settings.auth.client_id_env,
                    client_secret_env = %settings.auth.client_secret_env,
                    "SSO credentials not set; aggregated snapshot source disabled"
                );
                None
            }
        };

        let tunnel = flag_store_connector(settings, secrets).map(|connector| {
            Arc::new(TunnelManager::new(
                connector,
                settings.flag_store.reconnect_backoff(),
            ))
        });

        Self { token, tunnel }
    }
}

#[cfg(feature = "mongo")]
fn flag_store_connector(
    settings: &SourceSettings,
    secrets: &ResolvedSecrets,
) -> Option<Arc<dyn FlagStoreConnector>> {
    let fs = &settings.flag_store;
    if !fs.enabled {
        return None;
    }
    let Some(uri) = secrets.flag_store_uri.clone() else {
        tracing::warn!(uri_env = %fs.uri_env, "flag store URI not set; flag store disabled");
        return None;
    };
    let connector: Arc<dyn FlagStoreConnector> = Arc::new(crate::mongo::MongoConnector::new(
        uri,
        fs.database.clone(),
        fs.collection.clone(),
        fs.tunnel_local_addr.clone(),
        fs.query_timeout(),
    ));
    Some(connector)
}

#[cfg(not(feature = "mongo"))]
fn flag_store_connector(
    settings: &SourceSettings,
    _secrets: &ResolvedSecrets,
) -> Option<Arc<dyn FlagStoreConnector>> {
    if settings.flag_store.enabled {
        tracing::warn!("built without the `mongo` feature; flag store disabled");
    }
    None
}

/// Every adapter a session may call. Optional sources are skipped by the
/// engine when absent.
#[derive(Clone)]
pub struct SourceSet {
    pub telemetry: Arc<dyn ObservationSource>,
    pub lastval: Arc<dyn ObservationSource>,
    pub aggregated: Option<Arc<dyn ObservationSource>>,
    pub flag_store: Option<Arc<dyn AlarmFlagSource>>,
    pub twin: Option<Arc<dyn AlarmFlagSource>>,
}

impl SourceSet {
    pub fn new(
        telemetry: Arc<dyn ObservationSource>,
        lastval: Arc<dyn ObservationSource>,
    ) -> Self {
        Self {
            telemetry,
            lastval,
            aggregated: None,
            flag_store: None,
            twin: None,
        }
    }

    pub fn with_aggregated(mut self, source: Arc<dyn ObservationSource>) -> Self {
        self.aggregated = Some(source);
        self
    }

    pub fn with_flag_store(mut self, source: Arc<dyn AlarmFlagSource>) -> Self {
        self.flag_store = Some(source);
        self
    }

    pub fn with_twin(mut self, source: Arc<dyn AlarmFlagSource>) -> Self {
        self.twin = Some(source);
        self
    }

    /// Production wiring from config.
    pub fn from_settings(settings: &SourceSettings, resources: &SharedResources) -> Self {
        let tm = &settings.telemetry;
        let mut set = SourceSet::new(
            Arc::new(TelemetryAdapter::new_with_base_url(
                tm.base_url.clone(),
                tm.timeout(),
            )),
            Arc::new(LastValueAdapter::new_with_base_url(
                tm.base_url.clone(),
                tm.timeout(),
            )),
        );
        if let Some(token) = &resources.token {
            set = set.with_aggregated(Arc::new(AggregatedSnapshotAdapter::new_with_base_url(
                settings.backend.base_url.clone(),
                settings.backend.timeout(),
                token.clone(),
                settings.backend.accept_invalid_certs,
            )));
        }
        if let Some(tunnel) = &resources.tunnel {
            set = set
                .with_flag_store(Arc::new(FlagStoreAdapter::new(tunnel.clone())))
                .with_twin(Arc::new(TwinAdapter::new(tunnel.clone())));
        }
        set
    }

    /// Names of the configured sources, for startup logging.
    pub fn describe(&self) -> Vec<&'static str> {
        let mut out = vec![self.telemetry.tag().as_str(), self.lastval.tag().as_str()];
        if let Some(a) = &self.aggregated {
            out.push(a.tag().as_str());
        }
        if let Some(f) = &self.flag_store {
            out.push(f.name());
        }
        if let Some(t) = &self.twin {
            out.push(t.name());
        }
        out
    }
}
