//! Credential provisioning client
//!
//! Fetches a short-lived voice token for the agent identity from the
//! backend token endpoint. No retries and no caching: every provisioning
//! attempt asks for a fresh token.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::types::{AgentIdentity, VoiceToken};

/// Source of voice access tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self, identity: &AgentIdentity) -> VoiceResult<VoiceToken>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// `GET {base}/call/token?identity=...` over HTTP
#[derive(Debug, Clone)]
pub struct HttpTokenClient {
    http_client: reqwest::Client,
    base_url: Url,
    bearer_token: Option<String>,
}

impl HttpTokenClient {
    pub fn new(base_url: &str, timeout: Duration) -> VoiceResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| VoiceError::InvalidConfiguration {
            field: "token_endpoint".to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(VoiceError::InvalidConfiguration {
                field: "token_endpoint".to_string(),
                reason: "must be an absolute http(s) URL".to_string(),
            });
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            bearer_token: None,
        })
    }

    pub fn from_config(config: &SessionConfig) -> VoiceResult<Self> {
        let client = Self::new(&config.token_endpoint, config.request_timeout())?;
        Ok(match &config.bearer_token {
            Some(bearer) => client.with_bearer_token(bearer.clone()),
            None => client,
        })
    }

    /// Authenticate requests with the dashboard session credential
    pub fn with_bearer_token(mut self, bearer: impl Into<String>) -> Self {
        self.bearer_token = Some(bearer.into());
        self
    }

    /// Full token URL for an identity
    pub fn token_url(&self, identity: &AgentIdentity) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["call", "token"]);
        }
        url.query_pairs_mut().append_pair("identity", identity.as_str());
        url
    }
}

#[async_trait]
impl TokenProvider for HttpTokenClient {
    async fn fetch_token(&self, identity: &AgentIdentity) -> VoiceResult<VoiceToken> {
        let url = self.token_url(identity);
        debug!(identity = %identity, "Requesting voice token");

        let mut request = self.http_client.get(url);
        if let Some(bearer) = &self.bearer_token {
            request = request.bearer_auth(bearer);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Token endpoint rejected the request");
            return Err(VoiceError::TokenEndpointStatus { status: status.as_u16() });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::token_fetch(format!("malformed token response: {}", e)))?;

        if body.token.trim().is_empty() {
            return Err(VoiceError::token_fetch("token endpoint returned an empty token"));
        }
        Ok(VoiceToken::new(body.token))
    }
}
