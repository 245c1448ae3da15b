//! Sign-in, sign-up and logout flows
//!
//! Each flow fetches a server challenge, hands it to a [`CredentialCeremony`]
//! for signing, and exchanges the resulting assertion for a credential pair.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::credentials::CredentialPair;
use crate::pipeline::{RequestOptions, RequestPipeline};
use crate::types::{Result, TransportError};

/// Produces a signed assertion for a server-issued challenge.
///
/// Opaque to the transport core: it either returns an assertion or fails.
#[async_trait]
pub trait CredentialCeremony: Send + Sync {
    async fn assert(&self, challenge: &Value) -> anyhow::Result<Value>;
}

/// Auth endpoints, relative to the pipeline base URL
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    pub challenge: String,
    pub verify: String,
    pub register_challenge: String,
    pub register: String,
    pub logout: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            challenge: "/auth/challenge".to_string(),
            verify: "/auth/verify".to_string(),
            register_challenge: "/auth/register/challenge".to_string(),
            register: "/auth/register".to_string(),
            logout: "/auth/logout".to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl From<TokenResponse> for CredentialPair {
    fn from(response: TokenResponse) -> Self {
        CredentialPair::new(response.access_token, response.refresh_token)
    }
}

pub struct AuthClient {
    pipeline: Arc<RequestPipeline>,
    endpoints: AuthEndpoints,
}

impl AuthClient {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self::with_endpoints(pipeline, AuthEndpoints::default())
    }

    pub fn with_endpoints(pipeline: Arc<RequestPipeline>, endpoints: AuthEndpoints) -> Self {
        Self { pipeline, endpoints }
    }

    /// Authenticate an existing account and store the issued pair
    pub async fn sign_in(
        &self,
        identifier: &str,
        ceremony: &dyn CredentialCeremony,
    ) -> Result<CredentialPair> {
        let challenge = self
            .pipeline
            .request(
                &self.endpoints.challenge,
                RequestOptions::post(json!({ "identifier": identifier })).skip_auth(),
            )
            .await?;

        let assertion = run_ceremony(ceremony, &challenge).await?;
        let pair = self
            .exchange(
                &self.endpoints.verify,
                json!({ "identifier": identifier, "assertion": assertion }),
            )
            .await?;
        info!("Signed in");
        Ok(pair)
    }

    /// Register a new account and store the issued pair
    pub async fn sign_up(
        &self,
        identifier: &str,
        profile: Value,
        ceremony: &dyn CredentialCeremony,
    ) -> Result<CredentialPair> {
        let challenge = self
            .pipeline
            .request(
                &self.endpoints.register_challenge,
                RequestOptions::post(json!({ "identifier": identifier, "profile": profile }))
                    .skip_auth(),
            )
            .await?;

        let assertion = run_ceremony(ceremony, &challenge).await?;
        let pair = self
            .exchange(
                &self.endpoints.register,
                json!({ "identifier": identifier, "profile": profile, "assertion": assertion }),
            )
            .await?;
        info!("Account registered");
        Ok(pair)
    }

    /// Revoke the session server-side (best effort), then drop local credentials
    /// and cached responses.
    pub async fn logout(&self) {
        if self.pipeline.credentials().is_authenticated().await {
            let options = RequestOptions::post(json!({}));
            if let Err(e) = self.pipeline.request(&self.endpoints.logout, options).await {
                warn!(error = %e, "Server-side logout failed");
            }
        }
        self.pipeline.credentials().clear().await;
        self.pipeline.cache().clear().await;
        info!("Signed out");
    }

    async fn exchange(&self, endpoint: &str, body: Value) -> Result<CredentialPair> {
        let response: TokenResponse = self
            .pipeline
            .request_json(endpoint, RequestOptions::post(body).skip_auth())
            .await?;
        let pair = CredentialPair::from(response);
        self.pipeline.credentials().set(pair.clone()).await;
        Ok(pair)
    }
}

async fn run_ceremony(ceremony: &dyn CredentialCeremony, challenge: &Value) -> Result<Value> {
    ceremony
        .assert(challenge)
        .await
        .map_err(|e| TransportError::Auth(format!("Credential ceremony failed: {}", e)))
}
