//! Client for the identity provider's OAuth2 and user API

use crate::config::SsoConfig;
use crate::models::{Identity, ProviderEnvelope, Resource, ResourceSet, Token, TokenResponse};
use http::header::AUTHORIZATION;
use log::{debug, error};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur while talking to the identity provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network failure, unexpected HTTP status or undecodable body
    #[error("Provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The provider answered with an error of its own
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Invalid provider URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Identity provider client
#[derive(Clone)]
pub struct ProviderClient {
    client: Client,
    config: Arc<SsoConfig>,
}

impl ProviderClient {
    /// Create a new provider client
    pub fn new(client: Client, config: Arc<SsoConfig>) -> Self {
        Self { client, config }
    }

    /// Builds the HTTP client used for provider calls
    pub fn create_http_client(timeout: u64) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(Duration::from_secs(timeout))
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
    }

    /// URL of the provider's authorize endpoint; `state` comes back on the callback
    pub fn authorize_url(&self, state: &str) -> Result<Url, ProviderError> {
        let client_id = self.config.client_id.to_string();
        let url = Url::parse_with_params(
            &self.config.provider_url("/oauth2/authorize"),
            &[
                ("client_id", client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", self.config.effective_scope()),
                ("state", state),
            ],
        )?;
        Ok(url)
    }

    /// Exchange an authorization code for an access token.
    ///
    /// Codes are single-use, so a failure is never retried here.
    pub async fn exchange_code(&self, code: &str) -> Result<Token, ProviderError> {
        let url = self.config.provider_url("/oauth2/token");
        let client_id = self.config.client_id.to_string();

        debug!("Exchanging authorization code at {}", url);

        let response: TokenResponse = self
            .client
            .post(&url)
            .query(&[
                ("client_id", client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
            ])
            .send()
            .await?
            .json()
            .await?;

        if !response.error.is_empty() {
            return Err(ProviderError::Provider(format!(
                "{}:{}",
                response.error, response.error_description
            )));
        }

        Ok(response.token)
    }

    /// Fetch the identity the token belongs to
    pub async fn fetch_identity(&self, token: &Token) -> Result<Identity, ProviderError> {
        self.get_envelope::<Identity>("/api/user", token).await
    }

    /// Fetch the resources granted to the token's user
    pub async fn fetch_resources(&self, token: &Token) -> Result<ResourceSet, ProviderError> {
        let resources = self
            .get_envelope::<Vec<Resource>>("/api/userResources", token)
            .await?;
        debug!("Loaded {} resources from provider", resources.len());
        Ok(resources.into_iter().collect())
    }

    /// Revoke an access token
    pub async fn revoke_token(&self, token: &Token) -> Result<(), ProviderError> {
        let url = self.config.provider_url("/oauth2/token");

        self.client
            .delete(&url)
            .query(&[("access_token", token.access_token.as_str())])
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn get_envelope<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &Token,
    ) -> Result<T, ProviderError> {
        let url = self.config.provider_url(path);

        debug!("Fetching {} from provider", path);

        let envelope: ProviderEnvelope<T> = self
            .client
            .get(&url)
            .header(AUTHORIZATION, token.authorization_header())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if envelope.res_code != 0 {
            error!(
                "Provider rejected {} with code {}: {}",
                path, envelope.res_code, envelope.res_msg
            );
            return Err(ProviderError::Provider(envelope.res_msg));
        }

        envelope
            .data
            .ok_or_else(|| ProviderError::Provider(format!("{path} returned no data")))
    }
}
