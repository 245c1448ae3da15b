//! Request pipeline
//!
//! Layers URL templating, response caching, bearer credentials, timeouts,
//! retry with backoff, and one-shot credential renewal over an [`HttpTransport`].
//!
//! ```text
//! request ─▶ template/query ─▶ cache? ─hit─▶ payload
//!                                  │miss
//!                     ┌────────────▼─────────────┐
//!                     │ retry loop (RetryPolicy) │
//!                     │   attach token           │
//!                     │   send (timeout)         │
//!                     │   401 ─▶ renew once ─▶ resend
//!                     └────────────┬─────────────┘
//!                                  ▼
//!                      populate cache ─▶ payload
//! ```

pub mod metrics;
pub mod retry;
pub mod transport;
pub mod url;

pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use retry::{retry_with_backoff, RetryOutcome, RetryPolicy};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{CredentialPair, CredentialStore};
use crate::cache::{CacheKey, TieredCache};
use crate::types::{Result, TransportError};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Base URL every relative endpoint is joined to
    pub base_url: String,
    /// Timeout for requests that do not set their own
    pub default_timeout: Duration,
    pub retry: RetryPolicy,
    /// Endpoint used for credential renewal
    pub refresh_endpoint: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            default_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            refresh_endpoint: "/auth/refresh".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub path_params: Vec<(String, String)>,
    pub query: Vec<(String, Value)>,
    /// Serve from and populate the cache (GET only)
    pub cache: bool,
    /// Cache TTL; the cache default applies when unset
    pub cache_ttl: Option<Duration>,
    /// Send without credentials and never attempt renewal
    pub skip_auth: bool,
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self::with_body(Method::Post, body)
    }

    pub fn put(body: Value) -> Self {
        Self::with_body(Method::Put, body)
    }

    pub fn patch(body: Value) -> Self {
        Self::with_body(Method::Patch, body)
    }

    pub fn delete() -> Self {
        Self {
            method: Method::Delete,
            ..Self::default()
        }
    }

    fn with_body(method: Method, body: Value) -> Self {
        Self {
            method,
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn path_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.path_params.push((name.into(), value.to_string()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn cached(mut self, ttl: Option<Duration>) -> Self {
        self.cache = true;
        self.cache_ttl = ttl;
        self
    }

    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Issues REST calls against the wallet service
pub struct RequestPipeline {
    config: PipelineConfig,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<CredentialStore>,
    cache: Arc<TieredCache>,
    metrics: PipelineMetrics,
    /// Serializes renewals so concurrent 401s share one refresh call
    renew_lock: Mutex<()>,
}

impl RequestPipeline {
    pub fn new(
        config: PipelineConfig,
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<CredentialStore>,
        cache: Arc<TieredCache>,
    ) -> Self {
        Self {
            config,
            transport,
            credentials,
            cache,
            metrics: PipelineMetrics::default(),
            renew_lock: Mutex::new(()),
        }
    }

    /// Pipeline over the default reqwest transport
    pub fn with_reqwest(
        config: PipelineConfig,
        credentials: Arc<CredentialStore>,
        cache: Arc<TieredCache>,
    ) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Ok(Self::new(config, transport, credentials, cache))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Issue a request and return the JSON payload (`null` for empty bodies)
    pub async fn request(&self, endpoint: &str, options: RequestOptions) -> Result<Value> {
        self.metrics.record_request();
        let result = self.execute(endpoint, &options).await;
        match &result {
            Ok(_) => self.metrics.record_success(),
            Err(e) => {
                self.metrics.record_error();
                debug!(endpoint = %endpoint, error = %e, "Request failed");
            }
        }
        result
    }

    /// Issue a request and deserialize the payload into `T`
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T> {
        let value = self.request(endpoint, options).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str, options: RequestOptions) -> Result<T> {
        self.request_json(endpoint, RequestOptions { method: Method::Get, ..options })
            .await
    }

    pub async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: Value) -> Result<T> {
        self.request_json(endpoint, RequestOptions::post(body)).await
    }

    pub async fn put<T: DeserializeOwned>(&self, endpoint: &str, body: Value) -> Result<T> {
        self.request_json(endpoint, RequestOptions::put(body)).await
    }

    pub async fn patch<T: DeserializeOwned>(&self, endpoint: &str, body: Value) -> Result<T> {
        self.request_json(endpoint, RequestOptions::patch(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        self.request_json(endpoint, RequestOptions::delete()).await
    }

    async fn execute(&self, endpoint: &str, options: &RequestOptions) -> Result<Value> {
        let path = url::resolve_template(endpoint, &options.path_params)?;
        let query = url::encode_query(&options.query);
        let target = url::join_url(&self.config.base_url, &path, &query);

        let cache_key = (options.method == Method::Get && options.cache)
            .then(|| CacheKey::new(&path, &options.path_params, &options.query).to_storage_key());

        if let Some(key) = &cache_key {
            if let Some(payload) = self.cache.get(key).await {
                self.metrics.record_cache_hit();
                return Ok(payload);
            }
        }

        let renewable = !options.skip_auth && path != self.config.refresh_endpoint;
        let renewal_spent = AtomicBool::new(false);

        let outcome = retry_with_backoff(&self.config.retry, |attempt| {
            self.attempt(&target, options, renewable, &renewal_spent, attempt)
        })
        .await;
        self.metrics.record_retries(outcome.attempts().saturating_sub(1));
        let payload = outcome.into_result()?;

        if let Some(key) = &cache_key {
            let ttl = options.cache_ttl.unwrap_or_else(|| self.cache.default_ttl());
            self.cache.set(key, payload.clone(), ttl).await;
        }
        Ok(payload)
    }

    async fn attempt(
        &self,
        url: &str,
        options: &RequestOptions,
        renewable: bool,
        renewal_spent: &AtomicBool,
        attempt: u32,
    ) -> Result<Value> {
        let token = if options.skip_auth {
            None
        } else {
            self.credentials.access_token().await
        };

        debug!(method = %options.method, url = %url, attempt = attempt, "Sending request");
        let response = self.send_once(url, options, token.as_deref()).await?;

        if response.status != 401 || !renewable {
            return Self::finish(response);
        }

        if renewal_spent.swap(true, Ordering::SeqCst) {
            // Renewal already used by an earlier attempt of this call
            self.credentials.clear().await;
            return Err(response.into_error());
        }

        let original = response.into_error();
        let fresh = match self.renew(token.as_deref()).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(error = %e, "Credential renewal failed");
                return Err(original);
            }
        };

        let retried = self.send_once(url, options, Some(&fresh)).await?;
        if retried.status == 401 {
            warn!(url = %url, "Request rejected after credential renewal");
            self.credentials.clear().await;
            return Err(TransportError::Auth(
                "Credential rejected after renewal".to_string(),
            ));
        }
        Self::finish(retried)
    }

    fn finish(response: HttpResponse) -> Result<Value> {
        if response.is_success() {
            response.json()
        } else {
            Err(response.into_error())
        }
    }

    async fn send_once(
        &self,
        url: &str,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<HttpResponse> {
        let mut headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("X-Request-Id".to_string(), Uuid::new_v4().to_string()),
        ];
        if options.body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        if let Some(token) = token {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        headers.extend(options.headers.iter().cloned());

        let request = HttpRequest {
            method: options.method,
            url: url.to_string(),
            headers,
            body: options.body.clone(),
        };
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        self.send_with_timeout(request, timeout).await
    }

    async fn send_with_timeout(&self, request: HttpRequest, timeout: Duration) -> Result<HttpResponse> {
        let label = format!("{} {}", request.method, request.url);
        // Dropping the send future on expiry cancels the in-flight call
        match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(format!(
                "{} exceeded {}ms",
                label,
                timeout.as_millis()
            ))),
        }
    }

    /// Obtain a fresh access token, or clear credentials and fail.
    ///
    /// `stale` is the token the failing request carried. When the store
    /// already holds a different token another caller renewed in the meantime.
    async fn renew(&self, stale: Option<&str>) -> Result<String> {
        let _guard = self.renew_lock.lock().await;

        let current = self.credentials.get().await;
        if let Some(pair) = &current {
            if Some(pair.access_token.as_str()) != stale {
                debug!("Credential already renewed by a concurrent request");
                return Ok(pair.access_token.clone());
            }
        }

        let Some(refresh_token) = current.and_then(|pair| pair.refresh_token) else {
            self.credentials.clear().await;
            return Err(TransportError::Auth("No refresh token available".to_string()));
        };

        info!(endpoint = %self.config.refresh_endpoint, "Renewing credentials");
        let request = HttpRequest {
            method: Method::Post,
            url: url::join_url(&self.config.base_url, &self.config.refresh_endpoint, ""),
            headers: vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
                ("X-Request-Id".to_string(), Uuid::new_v4().to_string()),
            ],
            body: Some(json!({ "refreshToken": refresh_token })),
        };

        let renewed = match self.send_with_timeout(request, self.config.default_timeout).await {
            Ok(response) if response.is_success() => response
                .json()
                .and_then(|body| serde_json::from_value::<RefreshResponse>(body).map_err(Into::into)),
            Ok(response) => Err(response.into_error()),
            Err(e) => Err(e),
        };

        match renewed {
            Ok(body) => {
                self.metrics.record_refresh(true);
                let pair = CredentialPair::new(
                    body.access_token.clone(),
                    body.refresh_token.or(Some(refresh_token)),
                );
                self.credentials.set(pair).await;
                info!("Credentials renewed");
                Ok(body.access_token)
            }
            Err(e) => {
                self.metrics.record_refresh(false);
                self.credentials.clear().await;
                Err(TransportError::Auth(format!("Refresh failed: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Transport that replays canned responses and records requests
    #[derive(Default)]
    struct ScriptedTransport {
        responses: StdMutex<VecDeque<Result<HttpResponse>>>,
        requests: StdMutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<HttpResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: StdMutex::new(responses.into()),
                requests: StdMutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("script exhausted".into())))
        }
    }

    fn pipeline(transport: Arc<ScriptedTransport>, credentials: CredentialStore) -> RequestPipeline {
        RequestPipeline::new(
            PipelineConfig::new("https://api.test"),
            transport,
            Arc::new(credentials),
            Arc::new(TieredCache::with_defaults()),
        )
    }

    fn signed_in() -> CredentialStore {
        CredentialStore::with_pair(CredentialPair::new("access-1", Some("refresh-1".into())))
    }

    #[tokio::test]
    async fn test_attaches_bearer_and_request_id() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(200, r#"{"ok":true}"#))]);
        let pipeline = pipeline(transport.clone(), signed_in());

        let value = pipeline
            .request(
                "/accounts/{id}",
                RequestOptions::get().path_param("id", 7).query("expand", "limits"),
            )
            .await
            .unwrap();

        assert_eq!(value, json!({"ok": true}));
        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "https://api.test/accounts/7?expand=limits");
        assert_eq!(sent.header("authorization"), Some("Bearer access-1"));
        assert!(sent.header("x-request-id").is_some());
    }

    #[tokio::test]
    async fn test_skip_auth_sends_no_token() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(401, ""))]);
        let pipeline = pipeline(transport.clone(), signed_in());

        let err = pipeline
            .request("/public", RequestOptions::get().skip_auth())
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Auth(_)));
        assert_eq!(transport.requests().len(), 1);
        assert!(transport.requests()[0].header("authorization").is_none());
        // Credentials untouched, nothing was renewed
        assert!(pipeline.credentials().is_authenticated().await);
    }

    #[tokio::test]
    async fn test_renews_once_and_replays() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::new(401, r#"{"code":"TOKEN_EXPIRED","message":"expired"}"#)),
            Ok(HttpResponse::new(200, r#"{"accessToken":"access-2"}"#)),
            Ok(HttpResponse::new(200, r#"{"balance":10}"#)),
        ]);
        let pipeline = pipeline(transport.clone(), signed_in());

        let value = pipeline.request("/wallet/balance", RequestOptions::get()).await.unwrap();
        assert_eq!(value, json!({"balance": 10}));

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].url, "https://api.test/auth/refresh");
        assert!(requests[1].header("authorization").is_none());
        assert_eq!(requests[1].body, Some(json!({"refreshToken": "refresh-1"})));
        assert_eq!(requests[2].header("authorization"), Some("Bearer access-2"));

        // Old refresh token kept when the server does not rotate it
        let pair = pipeline.credentials().get().await.unwrap();
        assert_eq!(pair.access_token, "access-2");
        assert_eq!(pair.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(pipeline.metrics().refreshes, 1);
    }

    #[tokio::test]
    async fn test_second_401_is_auth_error() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::new(401, "")),
            Ok(HttpResponse::new(200, r#"{"accessToken":"access-2","refreshToken":"refresh-2"}"#)),
            Ok(HttpResponse::new(401, "")),
        ]);
        let pipeline = pipeline(transport.clone(), signed_in());

        let err = pipeline.request("/wallet/balance", RequestOptions::get()).await.unwrap_err();
        assert!(matches!(err, TransportError::Auth(_)));
        assert_eq!(transport.requests().len(), 3);
        assert!(!pipeline.credentials().is_authenticated().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_not_repeated_across_retries() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::new(401, "")),
            Ok(HttpResponse::new(200, r#"{"accessToken":"access-2"}"#)),
            Ok(HttpResponse::new(503, "")),
            Ok(HttpResponse::new(401, "")),
        ]);
        let pipeline = pipeline(transport.clone(), signed_in());

        let err = pipeline.request("/wallet/balance", RequestOptions::get()).await.unwrap_err();
        assert!(matches!(err, TransportError::Auth(_)));

        let requests = transport.requests();
        assert_eq!(requests.len(), 4);
        let refreshes = requests.iter().filter(|r| r.url.ends_with("/auth/refresh")).count();
        assert_eq!(refreshes, 1);
        // The retry after the 5xx carries the renewed token
        assert_eq!(requests[3].header("authorization"), Some("Bearer access-2"));
        assert_eq!(pipeline.metrics().refreshes, 1);
        assert!(!pipeline.credentials().is_authenticated().await);
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_credentials() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::new(401, r#"{"message":"expired"}"#)),
            Ok(HttpResponse::new(400, r#"{"message":"refresh revoked"}"#)),
        ]);
        let pipeline = pipeline(transport.clone(), signed_in());

        let err = pipeline.request("/wallet/balance", RequestOptions::get()).await.unwrap_err();
        match err {
            TransportError::Auth(message) => assert_eq!(message, "expired"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!pipeline.credentials().is_authenticated().await);
        assert_eq!(pipeline.metrics().refresh_failures, 1);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(
            404,
            r#"{"code":"NOT_FOUND","message":"No such account"}"#,
        ))]);
        let pipeline = pipeline(transport.clone(), signed_in());

        let err = pipeline.request("/accounts/9", RequestOptions::get()).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(pipeline.metrics().errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_retried_then_succeeds() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::new(503, "")),
            Ok(HttpResponse::new(200, "[]")),
        ]);
        let pipeline = pipeline(transport.clone(), signed_in());

        let value = pipeline.request("/wallet/transactions", RequestOptions::get()).await.unwrap();
        assert_eq!(value, json!([]));
        assert_eq!(pipeline.metrics().retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_surfaces_timeout_error() {
        struct Hanging;

        #[async_trait]
        impl HttpTransport for Hanging {
            async fn send(&self, _request: HttpRequest) -> Result<HttpResponse> {
                std::future::pending().await
            }
        }

        let config = PipelineConfig {
            retry: RetryPolicy::none(),
            ..PipelineConfig::new("https://api.test")
        };
        let pipeline = RequestPipeline::new(
            config,
            Arc::new(Hanging),
            Arc::new(CredentialStore::in_memory()),
            Arc::new(TieredCache::with_defaults()),
        );

        let err = pipeline
            .request("/slow", RequestOptions::get().timeout(Duration::from_millis(250)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_post_not_cached() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpResponse::new(201, r#"{"id":"t1"}"#)),
            Ok(HttpResponse::new(201, r#"{"id":"t2"}"#)),
        ]);
        let pipeline = pipeline(transport.clone(), signed_in());

        let mut options = RequestOptions::post(json!({"amount": 5}));
        options.cache = true;
        pipeline.request("/transfers", options.clone()).await.unwrap();
        pipeline.request("/transfers", options).await.unwrap();
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(
            transport.requests()[0].header("content-type"),
            Some("application/json")
        );
    }
}
