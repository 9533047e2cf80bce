use crate::auth::XHR_HEADER;
use crate::config::Settings;
use crate::create_app;
use crate::session::SessionStorage;
use crate::state::AppState;
use axum::body::Body;
use axum::Router;
use http::header::{AsHeaderName, COOKIE, SET_COOKIE};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use serde_json::Value;
use tower::ServiceExt;
use wiremock::MockServer;

/// Test fixture for setting up a complete test environment with mocked services.
///
/// The fixture starts mock servers for the identity provider and the
/// upstream application, wires the settings to them and builds the app.
///
/// # Examples
///
/// ```rust
/// #[tokio::test]
/// async fn test_endpoint() {
///     let fixture = TestFixture::new().await;
///
///     Mock::given(matchers::method("GET"))
///         .and(matchers::path("/api/user"))
///         .respond_with(ResponseTemplate::new(200).set_body_json(json!({
///             "res_code": 0,
///             "data": {"id": "u-1"}
///         })))
///         .mount(&fixture.provider_mock)
///         .await;
///
///     let response = fixture.get_xhr("/api/me", Some(&cookie)).await;
///     response.assert_ok();
/// }
/// ```
pub struct TestFixture {
    /// The application router
    pub app: Router,
    /// Application state, sharing its session storage with the router
    pub state: AppState,
    /// Configuration settings
    pub settings: Settings,
    /// Mock server for the identity provider
    pub provider_mock: MockServer,
    /// Mock server for the upstream application
    pub upstream_mock: MockServer,
}

impl TestFixture {
    /// Creates a new test fixture with mock servers for the provider and upstream.
    pub async fn new() -> Self {
        Self::setup_logger(LevelFilter::Debug);

        let provider_mock = MockServer::start().await;
        let upstream_mock = MockServer::start().await;

        let settings = Settings::for_test_with_mocks(&provider_mock, &upstream_mock);
        let state = AppState::for_testing(&settings);
        let app = create_app(state.clone());

        Self {
            app,
            state,
            settings,
            provider_mock,
            upstream_mock,
        }
    }

    /// Initializes the test logger; repeated calls are ignored.
    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    /// Rebuilds the app after `settings` changed, keeping the existing sessions
    pub fn rebuild(&mut self) {
        let storage: SessionStorage = (*self.state.sessions).clone();
        self.state = AppState::with_storage(self.settings.clone(), storage)
            .expect("Failed to rebuild test state");
        self.app = create_app(self.state.clone());
    }

    /// Replaces the access policy with the given `route -> resources` rules
    pub fn with_url_control(&mut self, rules: &[(&str, &str)]) {
        self.settings.sso.url_control = Some(
            rules
                .iter()
                .map(|(route, resources)| (route.to_string(), resources.to_string()))
                .collect(),
        );
        self.rebuild();
    }

    /// Creates a request builder for the given method and URI.
    pub fn request_builder(&self, method: Method, uri: impl AsRef<str>) -> http::request::Builder {
        Request::builder().method(method).uri(uri.as_ref())
    }

    /// Sends a browser-style GET request without a session.
    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        let request = self
            .request_builder(Method::GET, uri)
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Sends a browser-style GET request carrying the given `name=value` cookie.
    pub async fn get_with_cookie(&self, uri: impl AsRef<str>, cookie: &str) -> TestResponse {
        self.request_with_cookie(Method::GET, uri, cookie).await
    }

    /// Sends a body-less request with any method carrying the given cookie.
    pub async fn request_with_cookie(
        &self,
        method: Method,
        uri: impl AsRef<str>,
        cookie: &str,
    ) -> TestResponse {
        let request = self
            .request_builder(method, uri)
            .header(COOKIE, cookie)
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Sends a GET request marked as XHR, optionally with a cookie.
    pub async fn get_xhr(&self, uri: impl AsRef<str>, cookie: Option<&str>) -> TestResponse {
        let mut builder = self
            .request_builder(Method::GET, uri)
            .header(XHR_HEADER, "XMLHttpRequest");
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        let request = builder.body(Body::empty()).expect("Failed to build request");
        self.send(request).await
    }

    /// Sends a request and returns a TestResponse.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        let body = String::from_utf8_lossy(&bytes).to_string();
        // Non-JSON and empty bodies parse to an empty object
        let json = serde_json::from_slice(&bytes).unwrap_or_else(|_| serde_json::json!({}));

        TestResponse {
            status,
            headers,
            body,
            json,
        }
    }
}

/// Response from a test request with convenient access to status, headers and body.
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw response body
    pub body: String,
    /// Response body as JSON (empty object if absent or not JSON)
    pub json: Value,
}

impl TestResponse {
    /// Asserts that the response has the expected status code.
    ///
    /// # Panics
    ///
    /// Panics if the status code doesn't match the expected value.
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status, expected,
            "Expected status {} but got {} with body: {}",
            expected, self.status, self.body
        );
        self
    }

    /// Asserts that the response status is OK (200).
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    /// Value of a response header, if present and valid UTF-8
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// The `name=value` pair of the session cookie set by the response.
    ///
    /// # Panics
    ///
    /// Panics if the response did not set the cookie.
    pub fn session_cookie(&self, name: &str) -> String {
        let prefix = format!("{name}=");
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .find(|pair| pair.starts_with(&prefix))
            .map(|pair| pair.to_string())
            .unwrap_or_else(|| panic!("Response did not set the '{name}' cookie"))
    }
}
