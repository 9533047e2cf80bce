//! Request filters guarding the protected routes.
//!
//! `check_login` runs first: it completes a provider callback when the
//! request carries `?code=`, otherwise it requires a fresh session user.
//! The authority checks then match that user against the access policy,
//! keyed by the route pattern for named routes and by the canonical path
//! for requests forwarded upstream.

use crate::api::upstream::UpstreamPath;
use crate::auth::{is_xhr, AuthError};
use crate::errors::{detail_response, found, ApiError};
use crate::models::CachedUser;
use crate::session::Session;
use crate::state::AppState;
use axum::{
    extract::{MatchedPath, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use log::{debug, error, info, warn};
use serde::Deserialize;
use utoipa::IntoParams;

/// Query parameters the provider appends when redirecting back after login
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct CallbackQuery {
    /// Single-use authorization code
    pub code: Option<String>,
    /// URL to return to after login
    pub state: Option<String>,
}

impl CallbackQuery {
    /// The authorization code, if present and non-empty
    pub(crate) fn code(&self) -> Option<&str> {
        self.code.as_deref().filter(|code| !code.is_empty())
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn request_session(request: &Request) -> Result<Session, ApiError> {
    request.extensions().get::<Session>().cloned().ok_or_else(|| {
        error!("Session layer is not installed");
        ApiError::internal("Session unavailable")
    })
}

/// Path and query of the request, used as the post-login return target
fn return_target(request: &Request) -> String {
    request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string())
}

/// Post-login target carried in `state`, limited to a path on this site.
///
/// Anything else, including scheme-relative `//host` and `/\host`
/// forms, falls back to `/`.
pub(crate) fn safe_return_target(target: Option<&str>) -> &str {
    match target {
        Some(target)
            if target.starts_with('/')
                && !target.starts_with("//")
                && !target.starts_with("/\\")
                && !target.chars().any(char::is_control) =>
        {
            target
        }
        _ => "/",
    }
}

/// XHR clients get 401; browsers are sent to the provider's authorize page
pub(crate) fn redirect_to_login(state: &AppState, xhr: bool, return_to: &str) -> Response {
    if xhr {
        return ApiError::unauthorized(&state.auth.config().messages.unauthenticated)
            .into_response();
    }
    match state.auth.authorize_url(return_to) {
        Ok(url) => found(url.as_str()),
        Err(e) => {
            error!("Failed to build authorize URL: {}", e);
            ApiError::internal("Failed to build login URL").into_response()
        }
    }
}

/// Exchanges the callback code and answers the callback request.
///
/// On failure the client restarts the login flow, returning to the requested
/// `state` target rather than to the callback URL carrying the spent code.
pub(crate) async fn complete_login(
    state: &AppState,
    session: &Session,
    code: &str,
    return_to: Option<&str>,
    xhr: bool,
) -> Response {
    let return_to = safe_return_target(return_to);

    match state.auth.login(session, code, unix_now()).await {
        Ok(user) => {
            debug!("Login callback completed for '{}'", user.identity.id);
            if xhr {
                detail_response(StatusCode::OK, &state.auth.config().messages.login_success)
            } else {
                found(return_to)
            }
        }
        Err(e) => {
            error!("Login failed: {}", e);
            redirect_to_login(state, xhr, return_to)
        }
    }
}

/// Requires an authenticated session user, completing provider callbacks on the way
pub(super) async fn check_login(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let session = match request_session(&request) {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };
    let xhr = is_xhr(request.headers());

    let callback = Query::<CallbackQuery>::try_from_uri(request.uri())
        .map(|Query(query)| query)
        .unwrap_or_default();
    if let Some(code) = callback.code() {
        return complete_login(&state, &session, code, callback.state.as_deref(), xhr).await;
    }

    match state.auth.check_session(&session, unix_now()).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(AuthError::SessionAbsent) => {
            debug!("No session user for {}, redirecting to login", request.uri());
            redirect_to_login(&state, xhr, &return_target(&request))
        }
        Err(e) => {
            info!("Session rejected for {}: {}", request.uri(), e);
            redirect_to_login(&state, xhr, &return_target(&request))
        }
    }
}

/// Policy check for named routes, keyed by the matched route pattern
pub(super) async fn check_route_authority(
    State(state): State<AppState>,
    matched: MatchedPath,
    request: Request,
    next: Next,
) -> Response {
    let route = matched.as_str().to_string();
    authorize_request(&state, &route, request, next).await
}

/// Policy check for requests bound for the upstream, keyed by the canonical
/// path that is forwarded
pub(super) async fn check_upstream_authority(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(path) = UpstreamPath::parse(request.uri().path()) else {
        debug!("Rejecting undecodable path {}", request.uri().path());
        return ApiError::bad_request("Invalid request path").into_response();
    };
    authorize_request(&state, &path.to_string(), request, next).await
}

/// Matches the session user against the access policy for `route`
async fn authorize_request(
    state: &AppState,
    route: &str,
    request: Request,
    next: Next,
) -> Response {
    let xhr = is_xhr(request.headers());

    let cached = request.extensions().get::<CachedUser>().cloned();
    let session = request.extensions().get::<Session>().cloned();
    let user = match (cached, session) {
        (Some(user), _) => user,
        (None, Some(session)) => state.auth.current_user(&session).await,
        (None, None) => CachedUser::anonymous(),
    };

    match state.auth.authorize(&user, request.method().as_str(), route) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            warn!(
                "Denied {} {} for user '{}': {}",
                request.method(),
                route,
                user.identity.id,
                e
            );
            if xhr {
                ApiError::forbidden(&state.auth.config().messages.forbidden).into_response()
            } else {
                StatusCode::FORBIDDEN.into_response()
            }
        }
    }
}
