use crate::config::SsoConfig;
use crate::models::{CachedUser, ResourceSet, Token};
use crate::provider::{ProviderClient, ProviderError};
use crate::session::{SessionError, SessionStore};
use http::HeaderMap;
use log::{debug, error, info, warn};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

pub mod policy;
pub mod refresh;

pub use policy::{PolicyDenied, PolicyTable};
use refresh::Freshness;

/// Session key holding the serialized [`CachedUser`]
pub const SESSION_USER_KEY: &str = "user";

/// Header set by browsers' XHR and fetch helpers
pub const XHR_HEADER: &str = "x-requested-with";

/// Errors that stop a request from being authenticated or authorized
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No user in session")]
    SessionAbsent,
    #[error("Session user could not be refreshed")]
    SessionStale,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Session storage failed: {0}")]
    Session(#[from] SessionError),
    #[error("Access denied: {0}")]
    Denied(#[from] PolicyDenied),
}

/// Whether the request was issued programmatically rather than by navigation
pub fn is_xhr(headers: &HeaderMap) -> bool {
    headers
        .get(XHR_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("XMLHttpRequest"))
}

/// Login, session and access checks on top of the provider client
#[derive(Clone)]
pub struct AuthService {
    config: Arc<SsoConfig>,
    provider: ProviderClient,
    policy: Arc<PolicyTable>,
}

impl AuthService {
    pub fn new(config: Arc<SsoConfig>, provider: ProviderClient) -> Self {
        let policy = PolicyTable::from_url_control(config.url_control.as_ref());
        info!("Loaded {} access control rules", policy.len());
        Self {
            config,
            provider,
            policy: Arc::new(policy),
        }
    }

    pub fn config(&self) -> &SsoConfig {
        &self.config
    }

    /// Provider authorize URL that returns to `state` after login
    pub fn authorize_url(&self, state: &str) -> Result<Url, AuthError> {
        Ok(self.provider.authorize_url(state)?)
    }

    /// Exchanges the callback code and stores the resulting user in the session
    pub async fn login(
        &self,
        session: &dyn SessionStore,
        code: &str,
        now: i64,
    ) -> Result<CachedUser, AuthError> {
        let token = self.provider.exchange_code(code).await?;
        let user = self.build_user(token, now).await?;
        session.regenerate().await?;
        store_user(session, &user).await?;
        info!(
            "User '{}' logged in with {} resources",
            user.identity.id,
            user.resources.len()
        );
        Ok(user)
    }

    /// Loads identity, and resources when auto-loading is enabled, for a new token.
    ///
    /// A failed resource load keeps the identity with an empty resource set and
    /// `cached_at = 0`, so the next request retries it, unless resources are
    /// required at login.
    pub async fn build_user(&self, token: Token, now: i64) -> Result<CachedUser, AuthError> {
        let identity = self.provider.fetch_identity(&token).await?;

        if !self.config.auto_load_resource {
            return Ok(CachedUser {
                identity,
                resources: ResourceSet::new(),
                token,
                cached_at: now,
            });
        }

        let (resources, cached_at) = match self.provider.fetch_resources(&token).await {
            Ok(resources) => (resources, now),
            Err(e) if self.config.require_resources_on_login => return Err(e.into()),
            Err(e) => {
                error!(
                    "Failed to load resources for user '{}', continuing without: {}",
                    identity.id, e
                );
                (ResourceSet::new(), 0)
            }
        };

        Ok(CachedUser {
            identity,
            resources,
            token,
            cached_at,
        })
    }

    /// Returns the session user, refreshing it when stale
    pub async fn check_session(
        &self,
        session: &dyn SessionStore,
        now: i64,
    ) -> Result<CachedUser, AuthError> {
        let cached = load_user(session).await?;
        if cached.is_none() {
            return Err(AuthError::SessionAbsent);
        }

        match refresh::ensure_fresh(
            &self.provider,
            cached,
            now,
            self.config.cache_ttl(),
            self.config.auto_load_resource,
        )
        .await
        {
            Freshness::Fresh(user) => Ok(user),
            Freshness::Refreshed(user) => {
                if let Err(e) = store_user(session, &user).await {
                    warn!(
                        "Failed to store refreshed user '{}': {}",
                        user.identity.id, e
                    );
                }
                Ok(user)
            }
            Freshness::NeedsLogin => Err(AuthError::SessionStale),
        }
    }

    /// The session user, or the anonymous user when there is none
    pub async fn current_user(&self, session: &dyn SessionStore) -> CachedUser {
        match load_user(session).await {
            Ok(Some(user)) => user,
            Ok(None) => CachedUser::anonymous(),
            Err(e) => {
                warn!("Failed to read session user: {}", e);
                CachedUser::anonymous()
            }
        }
    }

    /// Checks the user against the access policy for a route
    pub fn authorize(
        &self,
        user: &CachedUser,
        method: &str,
        url_pattern: &str,
    ) -> Result<(), AuthError> {
        self.policy.check(user, method, url_pattern)?;
        Ok(())
    }

    /// Revokes the session token and clears the session.
    ///
    /// Revocation is best effort; the session is cleared regardless.
    pub async fn logout(&self, session: &dyn SessionStore) {
        let user = self.current_user(session).await;

        if user.token.access_token.is_empty() {
            debug!("Logout without a token, skipping revocation");
        } else if let Err(e) = self.provider.revoke_token(&user.token).await {
            error!(
                "Failed to revoke token of user '{}': {}",
                user.identity.id, e
            );
        }

        if let Err(e) = session.clear().await {
            error!("Failed to clear session: {}", e);
        } else {
            info!("User '{}' logged out", user.identity.id);
        }
    }
}

/// Reads the cached user; an undecodable entry counts as absent
pub async fn load_user(session: &dyn SessionStore) -> Result<Option<CachedUser>, SessionError> {
    let Some(bytes) = session.get(SESSION_USER_KEY).await? else {
        return Ok(None);
    };
    match serde_json::from_slice(&bytes) {
        Ok(user) => Ok(Some(user)),
        Err(e) => {
            warn!("Discarding undecodable session user: {}", e);
            Ok(None)
        }
    }
}

pub async fn store_user(session: &dyn SessionStore, user: &CachedUser) -> Result<(), SessionError> {
    let bytes = serde_json::to_vec(user)?;
    session.set(SESSION_USER_KEY, bytes).await
}
