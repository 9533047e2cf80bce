pub(crate) mod auth;
mod filters;
pub(crate) mod health;
mod session;
mod upstream;

use crate::api::filters::{check_login, check_route_authority, check_upstream_authority};
use crate::api::session::session_layer;
use crate::api::upstream::forward_to_upstream;
use crate::state::AppState;
use axum::{handler::Handler, middleware, routing::get, Router};
use tower_cookies::CookieManagerLayer;

/// Combines all API routes into a single router
pub(super) fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(public_routes())
        .merge(protected_routes(state))
        // Every route gets a session, including the public login and logout endpoints
        .layer(middleware::from_fn_with_state(state.clone(), session_layer))
        .layer(CookieManagerLayer::new())
}

/// Routes reachable without a logged-in user
fn public_routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .route("/login", get(auth::login))
        .route("/logout", get(auth::logout))
}

/// Routes that require a logged-in user allowed by the access policy
fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/me", get(auth::current_user))
        // Named routes are keyed by their route pattern
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            check_route_authority,
        ))
        // Everything else is forwarded to the upstream application, keyed by
        // the canonical form of the path that is forwarded
        .fallback(forward_to_upstream.layer(middleware::from_fn_with_state(
            state.clone(),
            check_upstream_authority,
        )))
        // `layer` rather than `route_layer` so the fallback is covered too.
        // It wraps the policy checks above, so the login check runs first.
        .layer(middleware::from_fn_with_state(state.clone(), check_login))
}
