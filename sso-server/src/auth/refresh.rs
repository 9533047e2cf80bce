//! Staleness policy for session-cached users

use crate::models::{CachedUser, Token};
use crate::provider::{ProviderClient, ProviderError};
use log::{debug, info, warn};

/// What to do with the cached user of the current request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    /// No cached user; the client has to log in
    NeedsLogin,
    /// The cached user can be served as is
    Serve,
    /// The cached user is stale and must be reloaded from the provider
    Refresh,
}

/// Decides whether a cached user is fresh.
///
/// A user is stale when `now - cached_at > ttl`; a non-positive TTL marks
/// every user stale. Staleness only matters when `auto_refresh` is enabled.
pub fn decide(cached: Option<&CachedUser>, now: i64, ttl: i64, auto_refresh: bool) -> RefreshDecision {
    let Some(user) = cached else {
        return RefreshDecision::NeedsLogin;
    };
    if !auto_refresh {
        return RefreshDecision::Serve;
    }
    if ttl <= 0 || now.saturating_sub(user.cached_at) > ttl {
        RefreshDecision::Refresh
    } else {
        RefreshDecision::Serve
    }
}

/// Outcome of [`ensure_fresh`]
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    /// The cached user was served unchanged
    Fresh(CachedUser),
    /// The user was reloaded and must be written back to the session
    Refreshed(CachedUser),
    /// No usable user; the client has to log in again
    NeedsLogin,
}

/// Serves the cached user or reloads it from the provider when stale.
///
/// A failed reload is reported as [`Freshness::NeedsLogin`]; it never
/// serves the stale user.
pub async fn ensure_fresh(
    provider: &ProviderClient,
    cached: Option<CachedUser>,
    now: i64,
    ttl: i64,
    auto_refresh: bool,
) -> Freshness {
    match decide(cached.as_ref(), now, ttl, auto_refresh) {
        RefreshDecision::NeedsLogin => Freshness::NeedsLogin,
        RefreshDecision::Serve => match cached {
            Some(user) => Freshness::Fresh(user),
            None => Freshness::NeedsLogin,
        },
        RefreshDecision::Refresh => {
            let Some(user) = cached else {
                return Freshness::NeedsLogin;
            };
            debug!(
                "Cached user '{}' is stale (cached_at={}, now={}, ttl={})",
                user.identity.id, user.cached_at, now, ttl
            );
            match reload_user(provider, user.token, now).await {
                Ok(fresh) => {
                    info!(
                        "Refreshed user '{}' with {} resources",
                        fresh.identity.id,
                        fresh.resources.len()
                    );
                    Freshness::Refreshed(fresh)
                }
                Err(e) => {
                    warn!("Failed to refresh user '{}': {}", user.identity.id, e);
                    Freshness::NeedsLogin
                }
            }
        }
    }
}

/// Fetches identity and resources for an existing token
pub async fn reload_user(
    provider: &ProviderClient,
    token: Token,
    now: i64,
) -> Result<CachedUser, ProviderError> {
    let (identity, resources) = tokio::try_join!(
        provider.fetch_identity(&token),
        provider.fetch_resources(&token)
    )?;
    Ok(CachedUser {
        identity,
        resources,
        token,
        cached_at: now,
    })
}
