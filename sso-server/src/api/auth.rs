use crate::api::filters::{complete_login, safe_return_target, CallbackQuery};
use crate::auth::is_xhr;
use crate::errors::{detail_response, found, ApiError};
use crate::models::{CachedUser, CurrentUserResponse};
use crate::openapi::AUTH_TAG;
use crate::session::Session;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use log::error;
use serde::Deserialize;
use utoipa::IntoParams;

/// Parameters of the logout endpoint
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct LogoutQuery {
    /// URL to return to after logging in again
    pub state: Option<String>,
}

/// Completes a login started by a single-page application
#[utoipa::path(
    get,
    path = "/login",
    tag = AUTH_TAG,
    params(CallbackQuery),
    responses(
        (status = 200, description = "Logged in (XHR clients)"),
        (status = 302, description = "Logged in, or login restarted after a failed code exchange"),
        (status = 400, description = "Missing authorization code"),
        (status = 401, description = "Code exchange failed (XHR clients)")
    )
)]
pub(crate) async fn login(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(code) = query.code() else {
        return ApiError::bad_request("Missing authorization code").into_response();
    };
    complete_login(
        &state,
        &session,
        code,
        query.state.as_deref(),
        is_xhr(&headers),
    )
    .await
}

/// Revokes the session token, clears the session and restarts the login flow
#[utoipa::path(
    get,
    path = "/logout",
    tag = AUTH_TAG,
    params(LogoutQuery),
    responses(
        (status = 200, description = "Logged out (XHR clients)"),
        (status = 302, description = "Logged out, redirected to the provider's authorize page")
    )
)]
pub(crate) async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    headers: HeaderMap,
    Query(query): Query<LogoutQuery>,
) -> Response {
    state.auth.logout(&session).await;

    if is_xhr(&headers) {
        return detail_response(StatusCode::OK, &state.auth.config().messages.logout_success);
    }

    match state
        .auth
        .authorize_url(safe_return_target(query.state.as_deref()))
    {
        Ok(url) => found(url.as_str()),
        Err(e) => {
            error!("Failed to build authorize URL: {}", e);
            ApiError::internal("Failed to build login URL").into_response()
        }
    }
}

/// Identity and resources of the logged-in user
#[utoipa::path(
    get,
    path = "/api/me",
    tag = AUTH_TAG,
    responses(
        (status = 200, description = "Current user", body = CurrentUserResponse),
        (status = 302, description = "Not logged in, redirected to the provider"),
        (status = 401, description = "Not logged in (XHR clients)"),
        (status = 403, description = "Access denied by policy")
    )
)]
pub(crate) async fn current_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    user: Option<Extension<CachedUser>>,
) -> Json<CurrentUserResponse> {
    let user = match user {
        Some(Extension(user)) => user,
        None => state.auth.current_user(&session).await,
    };
    Json(CurrentUserResponse::from(&user))
}
