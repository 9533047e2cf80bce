use crate::api::{auth, health};
use crate::models::{CurrentUserResponse, Identity};
use crate::state::AppState;
use axum::{routing::get, Json, Router};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const AUTH_TAG: &str = "Authentication API";

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        health::ready_check,
        auth::login,
        auth::logout,
        auth::current_user,
    ),
    components(schemas(CurrentUserResponse, Identity, health::Health)),
    tags(
        (name = HEALTH_TAG, description = "Health check endpoints"),
        (name = AUTH_TAG, description = "Login, logout and current user endpoints"),
    ),
    info(
        title = "SSO Gateway API",
        description = "Single sign-on authorization layer in front of a protected application",
        version = "0.1.0"
    )
)]
pub(crate) struct ApiDoc;

/// Handler for the OpenAPI JSON document endpoint
async fn openapi_json_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Creates a router for OpenAPI documentation routes
pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/openapi.json", get(openapi_json_handler))
        .merge(Scalar::with_url("/scalar", ApiDoc::openapi()))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::TestFixture;

    #[tokio::test]
    async fn test_openapi_document_lists_routes() {
        let fixture = TestFixture::new().await;
        let response = fixture.get("/openapi.json").await;
        response.assert_ok();

        let paths = response.json["paths"].as_object().unwrap();
        for path in ["/health", "/ready", "/login", "/logout", "/api/me"] {
            assert!(paths.contains_key(path), "missing {path}");
        }
    }

    #[tokio::test]
    async fn test_scalar_is_public() {
        let fixture = TestFixture::new().await;
        fixture.get("/scalar").await.assert_ok();
    }
}
