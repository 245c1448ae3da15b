//! Request pipeline integration tests

mod common;

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::FnTransport;
use wallet_transport::pipeline::HttpResponse;
use wallet_transport::{
    CredentialPair, CredentialStore, PipelineConfig, RequestOptions, RequestPipeline,
    TieredCache, TransportError,
};

fn signed_in(access: &str) -> Arc<CredentialStore> {
    Arc::new(CredentialStore::with_pair(CredentialPair::new(
        access,
        Some("refresh-1".to_string()),
    )))
}

fn reqwest_pipeline(server: &MockServer, credentials: Arc<CredentialStore>) -> RequestPipeline {
    RequestPipeline::with_reqwest(
        PipelineConfig::new(server.uri()),
        credentials,
        Arc::new(TieredCache::with_defaults()),
    )
    .unwrap()
}

#[derive(Debug, Deserialize, PartialEq)]
struct Balance {
    currency: String,
    amount: i64,
}

#[tokio::test]
async fn test_get_over_http_with_bearer_and_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/accounts/acc-1/balance"))
        .and(query_param("currency", "EUR"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"currency": "EUR", "amount": 1250})))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = reqwest_pipeline(&server, signed_in("token-1"));
    let balance: Balance = pipeline
        .get(
            "/accounts/{accountId}/balance",
            RequestOptions::get()
                .path_param("accountId", "acc-1")
                .query("currency", "EUR")
                .query("cursor", serde_json::Value::Null),
        )
        .await
        .unwrap();

    assert_eq!(balance, Balance { currency: "EUR".into(), amount: 1250 });
    assert_eq!(pipeline.metrics().successes, 1);
}

#[tokio::test]
async fn test_error_body_parsed_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transfers"))
        .respond_with(
            ResponseTemplate::new(422)
                .set_body_json(json!({"code": "INSUFFICIENT_FUNDS", "message": "Balance too low"})),
        )
        .mount(&server)
        .await;

    let pipeline = reqwest_pipeline(&server, signed_in("token-1"));
    let err = pipeline
        .request("/transfers", RequestOptions::post(json!({"amount": 10_000})))
        .await
        .unwrap_err();

    match err {
        TransportError::Http { status, code, message } => {
            assert_eq!(status, 422);
            assert_eq!(code.as_deref(), Some("INSUFFICIENT_FUNDS"));
            assert_eq!(message, "Balance too low");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_expired_token_refreshed_once_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/wallet/balances"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"code": "TOKEN_EXPIRED", "message": "expired"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refreshToken": "refresh-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "fresh", "refreshToken": "refresh-2"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/wallet/balances"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"currency": "EUR", "amount": 5}])))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = signed_in("stale");
    let pipeline = reqwest_pipeline(&server, Arc::clone(&credentials));
    let balances = assert_ok!(pipeline.request("/wallet/balances", RequestOptions::get()).await);

    assert_eq!(balances, json!([{"currency": "EUR", "amount": 5}]));
    let pair = credentials.get().await.unwrap();
    assert_eq!(pair.access_token, "fresh");
    assert_eq!(pair.refresh_token.as_deref(), Some("refresh-2"));
}

#[tokio::test(start_paused = true)]
async fn test_cache_ttl_scenario() {
    let transport = FnTransport::new(|_| Ok(HttpResponse::new(200, r#"{"status":"verified"}"#)));
    let pipeline = RequestPipeline::new(
        PipelineConfig::new("https://api.test"),
        transport.clone(),
        signed_in("token-1"),
        Arc::new(TieredCache::with_defaults()),
    );
    let options = || {
        RequestOptions::get()
            .query("include", "documents")
            .cached(Some(Duration::from_millis(10_000)))
    };

    // t = 0 populates the cache
    pipeline.request("/kyc/status", options()).await.unwrap();
    assert_eq!(transport.requests().len(), 1);

    // t = 5000 is served from cache
    tokio::time::advance(Duration::from_millis(5_000)).await;
    let cached = pipeline.request("/kyc/status", options()).await.unwrap();
    assert_eq!(cached, json!({"status": "verified"}));
    assert_eq!(transport.requests().len(), 1);

    // t = 11000 goes back to the network
    tokio::time::advance(Duration::from_millis(6_000)).await;
    pipeline.request("/kyc/status", options()).await.unwrap();
    assert_eq!(transport.requests().len(), 2);

    let metrics = pipeline.metrics();
    assert_eq!(metrics.requests, 3);
    assert_eq!(metrics.cache_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_delays_then_exhausted() {
    let transport = FnTransport::new(|_| Ok(HttpResponse::new(503, r#"{"message":"maintenance"}"#)));
    let pipeline = RequestPipeline::new(
        PipelineConfig::new("https://api.test"),
        transport.clone(),
        signed_in("token-1"),
        Arc::new(TieredCache::with_defaults()),
    );

    let err = assert_err!(pipeline.request("/wallet/balances", RequestOptions::get()).await);
    assert_eq!(err.status(), Some(503));
    assert_eq!(err.to_string(), "HTTP 503: maintenance");

    let sent = transport.sent_at();
    assert_eq!(sent.len(), 3);
    common::assert_near(sent[1] - sent[0], Duration::from_millis(1_000));
    common::assert_near(sent[2] - sent[1], Duration::from_millis(2_000));
    assert_eq!(pipeline.metrics().retries, 2);
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let transport = FnTransport::new(|request| {
        if request.url.ends_with("/auth/refresh") {
            return Ok(HttpResponse::new(200, r#"{"accessToken":"fresh"}"#));
        }
        match request.header("authorization") {
            Some("Bearer fresh") => Ok(HttpResponse::new(200, r#"{"ok":true}"#)),
            _ => Ok(HttpResponse::new(401, "")),
        }
    });
    let pipeline = RequestPipeline::new(
        PipelineConfig::new("https://api.test"),
        transport.clone(),
        signed_in("stale"),
        Arc::new(TieredCache::with_defaults()),
    );

    let (a, b) = tokio::join!(
        pipeline.request("/wallet/balances", RequestOptions::get()),
        pipeline.request("/wallet/transactions", RequestOptions::get()),
    );
    assert_ok!(a);
    assert_ok!(b);
    assert_eq!(transport.count_path("/auth/refresh"), 1);
}

#[tokio::test]
async fn test_missing_refresh_token_fails_closed() {
    let transport = FnTransport::new(|_| Ok(HttpResponse::new(401, r#"{"message":"expired"}"#)));
    let credentials = Arc::new(CredentialStore::with_pair(CredentialPair::new("only-access", None)));
    let pipeline = RequestPipeline::new(
        PipelineConfig::new("https://api.test"),
        transport.clone(),
        Arc::clone(&credentials),
        Arc::new(TieredCache::with_defaults()),
    );

    let err = pipeline.request("/wallet/balances", RequestOptions::get()).await.unwrap_err();
    assert!(err.is_auth());
    assert!(!credentials.is_authenticated().await);
    assert_eq!(transport.count_path("/auth/refresh"), 0);
}
