use crate::config::SessionConfig;
use crate::session::Session;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use log::debug;
use tower_cookies::{cookie::SameSite, Cookie, Cookies};

/// Binds a [`Session`] to every request and keeps the client's cookie in step.
///
/// The session is added to the request extensions. A cookie is sent when a
/// new session was written to or the id was regenerated, and removed when a
/// known session was cleared.
pub(super) async fn session_layer(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request,
    next: Next,
) -> Response {
    let config = &state.settings.session;

    let session = match cookies.get(&config.cookie_name) {
        Some(cookie) if !cookie.value().is_empty() => {
            Session::resume(cookie.value(), state.sessions.clone()).await
        }
        _ => Session::fresh(state.sessions.clone()),
    };
    request.extensions_mut().insert(session.clone());

    let response = next.run(request).await;

    if session.is_cleared() {
        if !session.is_new() {
            debug!("Removing cleared session cookie");
            cookies.remove(session_cookie(config, String::new()));
        }
    } else if session.is_regenerated() || (session.is_new() && session.is_modified()) {
        debug!("Issuing session cookie");
        cookies.add(session_cookie(config, session.id()));
    }

    response
}

/// The session cookie lives as long as the browser session; the store's idle
/// expiry decides when the session itself ends.
fn session_cookie(config: &SessionConfig, id: String) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), id))
        .path("/")
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(SameSite::Lax)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestFixture;
    use http::header::SET_COOKIE;
    use http::StatusCode;

    #[test]
    fn test_session_cookie_attributes() {
        let mut config = SessionConfig::in_memory(3600);
        let cookie = session_cookie(&config, "abc".to_string());
        assert_eq!(cookie.name(), "sso_session");
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), None);
        assert_ne!(cookie.secure(), Some(true));

        config.cookie_secure = true;
        assert_eq!(session_cookie(&config, "abc".to_string()).secure(), Some(true));
    }

    #[tokio::test]
    async fn test_untouched_session_sets_no_cookie() {
        let fixture = TestFixture::new().await;
        let response = fixture.get("/health").await;
        response.assert_ok();
        assert!(response.header(SET_COOKIE).is_none());

        // Neither does an unknown cookie on a public route
        let response = fixture
            .get_with_cookie("/health", "sso_session=never-issued")
            .await;
        response.assert_status(StatusCode::OK);
        assert!(response.header(SET_COOKIE).is_none());
    }
}
