use crate::{
    auth::AuthService,
    config::Settings,
    provider::ProviderClient,
    session::{create_storage, SessionBackend, SessionError, SessionStorage},
};
use log::warn;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while assembling the application state
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to create session storage: {0}")]
    Session(#[from] SessionError),
    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub sessions: Arc<SessionStorage>,
    pub auth: AuthService,
    pub upstream_client: Arc<Client>,
}

impl AppState {
    fn create_upstream_client(timeout: u64) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(Duration::from_secs(timeout))
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            // Upstream redirects are passed through to the client
            .redirect(reqwest::redirect::Policy::none())
            .build()
    }

    pub async fn new(settings: Settings) -> Result<Self, StateError> {
        let storage = create_storage(&settings.session).await?;
        Self::with_storage(settings, storage)
    }

    /// Builds the state around an already created session storage
    pub fn with_storage(settings: Settings, storage: SessionStorage) -> Result<Self, StateError> {
        let sso = Arc::new(settings.sso.clone());
        let provider = ProviderClient::new(
            ProviderClient::create_http_client(sso.client_timeout)?,
            sso.clone(),
        );
        let upstream_client = Self::create_upstream_client(settings.upstream.client_timeout)?;

        Ok(Self {
            settings: Arc::new(settings),
            sessions: Arc::new(storage),
            auth: AuthService::new(sso, provider),
            upstream_client: Arc::new(upstream_client),
        })
    }

    /// Whether the session storage can serve requests
    pub async fn health_check(&self) -> bool {
        match self.sessions.health_check().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Session storage health check failed: {}", e);
                false
            }
        }
    }

    #[cfg(test)]
    pub fn for_testing(settings: &Settings) -> Self {
        let storage = crate::session::memory::InMemorySessions::new(
            settings.session.ttl,
            settings.session.memory.capacity,
        )
        .expect("Failed to create test session storage");
        Self::with_storage(settings.clone(), SessionStorage::InMemory(storage))
            .expect("Failed to create test state")
    }
}
