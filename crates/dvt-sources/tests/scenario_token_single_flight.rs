//! Concurrent sessions share one token refresh.

use std::sync::Arc;
use std::time::Duration;

use dvt_sources::{SourceError, TokenProvider};
use httpmock::prelude::*;
use serde_json::json;

fn provider(url: String) -> Arc<TokenProvider> {
    Arc::new(TokenProvider::new(
        url,
        "client".to_string(),
        "secret".to_string(),
        Duration::from_secs(10),
        false,
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_trigger_one_refresh() {
    let server = MockServer::start_async().await;
    let token = server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .delay(Duration::from_millis(150))
                .json_body(json!({"access_token": "shared", "expires_in": 300}));
        })
        .await;

    let p = provider(server.url("/token"));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let p = p.clone();
        handles.push(tokio::spawn(async move { p.bearer().await }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap().unwrap(), "shared");
    }
    assert_eq!(token.hits_async().await, 1);

    // Cached afterwards.
    assert_eq!(p.bearer().await.unwrap(), "shared");
    assert_eq!(token.hits_async().await, 1);
}

#[tokio::test]
async fn rejected_credentials_are_unauthorized() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(401).json_body(json!({"error": "invalid_client"}));
        })
        .await;

    let err = provider(server.url("/token")).bearer().await.unwrap_err();
    assert!(matches!(err, SourceError::Unauthorized(_)), "got {err:?}");
}

#[tokio::test]
async fn short_lived_tokens_are_refreshed() {
    let server = MockServer::start_async().await;
    let token = server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            // Lifetime below the refresh margin: never cached.
            then.status(200)
                .json_body(json!({"access_token": "brief", "expires_in": 5}));
        })
        .await;

    let p = provider(server.url("/token"));
    p.bearer().await.unwrap();
    p.bearer().await.unwrap();
    assert_eq!(token.hits_async().await, 2);
}
