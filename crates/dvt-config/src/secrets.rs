//! Secret resolution from the environment.
//!
//! The config holds env var NAMES; values are read here once and never logged.

use serde_json::Value;

use crate::MonitorConfig;

/// Resolved secret values. `None` means the named env var was unset or blank.
#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    pub sso_client_id: Option<String>,
    pub sso_client_secret: Option<String>,
    pub flag_store_uri: Option<String>,
}

impl ResolvedSecrets {
    pub fn has_sso_credentials(&self) -> bool {
        self.sso_client_id.is_some() && self.sso_client_secret.is_some()
    }
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "sso_client_id",
                &self.sso_client_id.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "sso_client_secret",
                &self.sso_client_secret.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "flag_store_uri",
                &self.flag_store_uri.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Resolve a named environment variable; blank counts as unset.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

pub fn resolve_secrets(cfg: &MonitorConfig) -> ResolvedSecrets {
    resolve_secrets_with(cfg, resolve_env)
}

fn resolve_secrets_with(
    cfg: &MonitorConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> ResolvedSecrets {
    let auth = &cfg.sources.auth;
    ResolvedSecrets {
        sso_client_id: lookup(&auth.client_id_env),
        sso_client_secret: lookup(&auth.client_secret_env),
        flag_store_uri: lookup(&cfg.sources.flag_store.uri_env),
    }
}

/// Env var names referenced by a raw config document, for diagnostics.
pub fn referenced_env_names(config_json: &Value) -> Vec<String> {
    ["/sources/auth/client_id_env", "/sources/auth/client_secret_env", "/sources/flag_store/uri_env"]
        .iter()
        .filter_map(|p| config_json.pointer(p)?.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn debug_never_prints_values() {
        let s = ResolvedSecrets {
            sso_client_id: Some("client-abc".to_string()),
            sso_client_secret: Some("very-secret".to_string()),
            flag_store_uri: Some("mongodb://u:p@h".to_string()),
        };
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("very-secret"));
        assert!(!dbg.contains("client-abc"));
        assert!(dbg.contains("<REDACTED>"));
    }

    #[test]
    fn names_come_from_config() {
        let mut cfg = MonitorConfig::default();
        cfg.sources.auth.client_id_env = "MY_ID".to_string();
        let env: HashMap<&str, &str> = [("MY_ID", "abc"), ("DVT_SSO_CLIENT_SECRET", "xyz")]
            .into_iter()
            .collect();
        let s = resolve_secrets_with(&cfg, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.sso_client_id.as_deref(), Some("abc"));
        assert!(s.has_sso_credentials());
        assert!(s.flag_store_uri.is_none());
    }

    #[test]
    fn referenced_names_skip_blank_entries() {
        let v = serde_json::json!({
            "sources": { "auth": { "client_id_env": "A", "client_secret_env": " " } }
        });
        assert_eq!(referenced_env_names(&v), vec!["A".to_string()]);
    }
}
