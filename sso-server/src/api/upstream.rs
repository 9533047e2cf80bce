use crate::errors::ApiError;
use crate::models::CachedUser;
use crate::state::AppState;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Response, StatusCode},
    response::IntoResponse,
};
use http_body_util::LengthLimitError;
use log::{debug, error, warn};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::error::Error as StdError;
use std::fmt;
use tower_cookies::Cookie;

/// Header carrying the authenticated user's id to the upstream application
pub const USER_ID_HEADER: &str = "x-sso-user-id";

/// Request headers that describe this hop rather than the request
const HOP_HEADERS: [HeaderName; 5] = [
    header::HOST,
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Characters escaped when a canonical segment is written back into a URL
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b';')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Canonical form of a request path bound for the upstream.
///
/// The policy is matched against this form and the upstream receives it, so
/// every spelling of a path is checked the way the upstream will read it:
/// percent-escapes are decoded, `;` parameters dropped, empty and `.`
/// segments skipped and `..` resolved.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UpstreamPath {
    segments: Vec<String>,
}

impl UpstreamPath {
    /// Returns `None` when the decoded path is not UTF-8
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        let decoded = percent_decode_str(raw).decode_utf8().ok()?;
        let mut segments: Vec<String> = Vec::new();
        for segment in decoded.split('/') {
            let segment = segment.split_once(';').map_or(segment, |(head, _)| head);
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                _ => segments.push(segment.to_string()),
            }
        }
        Some(Self { segments })
    }

    /// The path as sent upstream, re-escaped segment by segment
    pub(crate) fn encoded(&self) -> String {
        let segments: Vec<String> = self
            .segments
            .iter()
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect();
        format!("/{}", segments.join("/"))
    }
}

impl fmt::Display for UpstreamPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// The `Cookie` header without the session cookie, or `None` if nothing is left
fn without_session_cookie(value: &HeaderValue, session_cookie: &str) -> Option<HeaderValue> {
    let raw = value.to_str().ok()?;
    let kept: Vec<String> = Cookie::split_parse(raw)
        .filter_map(Result::ok)
        .filter(|cookie| cookie.name() != session_cookie)
        .map(|cookie| cookie.stripped().to_string())
        .collect();
    if kept.is_empty() {
        return None;
    }
    HeaderValue::from_str(&kept.join("; ")).ok()
}

/// Forward authorized requests to the protected upstream application
pub(super) async fn forward_to_upstream(
    State(state): State<AppState>,
    req: Request,
) -> impl IntoResponse {
    let Some(path) = UpstreamPath::parse(req.uri().path()) else {
        return ApiError::bad_request("Invalid request path").into_response();
    };
    let target = match req.uri().query() {
        Some(query) => format!("{}?{}", path.encoded(), query),
        None => path.encoded(),
    };

    let Some(url) = state.settings.upstream.get_url(&target) else {
        debug!("No upstream configured for {} {}", req.method(), target);
        return ApiError::not_found("Not Found").into_response();
    };

    debug!("Forwarding request to upstream: {} {}", req.method(), url);
    let mut req_builder = state.upstream_client.request(req.method().clone(), &url);

    let session_cookie = &state.settings.session.cookie_name;
    for (key, value) in req.headers() {
        if HOP_HEADERS.contains(key) || key.as_str() == USER_ID_HEADER {
            continue;
        }
        if *key == header::COOKIE {
            if let Some(value) = without_session_cookie(value, session_cookie) {
                req_builder = req_builder.header(key, value);
            }
            continue;
        }
        req_builder = req_builder.header(key, value);
    }

    if let Some(user) = req.extensions().get::<CachedUser>() {
        match HeaderValue::from_str(&user.identity.id) {
            Ok(value) => req_builder = req_builder.header(USER_ID_HEADER, value),
            Err(e) => warn!("User id '{}' is not a valid header: {}", user.identity.id, e),
        }
    }

    let body_bytes = match to_bytes(req.into_body(), state.settings.upstream.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) if e.source().is_some_and(|source| source.is::<LengthLimitError>()) => {
            warn!("Request body for {} exceeds the upstream limit", target);
            return ApiError::new("Request body too large", StatusCode::PAYLOAD_TOO_LARGE)
                .into_response();
        }
        Err(_) => return ApiError::bad_request("Failed to read request body").into_response(),
    };
    if !body_bytes.is_empty() {
        req_builder = req_builder.body(body_bytes);
    }

    match req_builder.send().await {
        Ok(response) => {
            let status = response.status();
            let headers = response.headers().clone();
            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Failed to read upstream response body: {}", e);
                    return ApiError::bad_gateway("Failed to read upstream response")
                        .into_response();
                }
            };

            let mut resp = Response::new(Body::from(bytes));
            *resp.status_mut() = status;
            for (key, value) in headers.iter() {
                if HOP_HEADERS.contains(key) {
                    continue;
                }
                resp.headers_mut().append(key, value.clone());
            }
            resp
        }
        Err(e) => {
            error!(
                "Failed to reach upstream: {} ({:?})\nURL: {}\nSource error: {:?}",
                e,
                e.status(),
                url,
                e.source()
            );

            if e.is_timeout() {
                ApiError::new(
                    "Request timed out while connecting to upstream",
                    StatusCode::GATEWAY_TIMEOUT,
                )
                .into_response()
            } else if e.is_connect() {
                ApiError::bad_gateway("Connection error occurred while connecting to upstream")
                    .into_response()
            } else {
                ApiError::bad_gateway(format!("Failed to send request: {}", e)).into_response()
            }
        }
    }
}
