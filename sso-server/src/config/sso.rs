//! Identity provider (SSO) configuration

use confique::Config;
use std::collections::HashMap;

/// Scope requested from the provider when none is configured
pub const DEFAULT_SCOPE: &str = "all:all";

/// OAuth2 client registration and access policy
#[derive(Debug, Config, Clone)]
pub struct SsoConfig {
    /// OAuth2 client id issued by the provider
    #[config(env = "SSO_CLIENT_ID")]
    pub client_id: i64,

    /// OAuth2 client secret issued by the provider
    #[config(env = "SSO_CLIENT_SECRET")]
    pub client_secret: String,

    /// Callback URI registered with the provider
    #[config(env = "SSO_REDIRECT_URI")]
    pub redirect_uri: String,

    /// Provider base URL, e.g. https://sso.example.com
    #[config(env = "SSO_HOST")]
    pub host: String,

    /// Load the user's resources at login and refresh them when stale (default: false)
    #[config(env = "SSO_AUTO_LOAD_RESOURCE", default = false)]
    pub auto_load_resource: bool,

    /// Scope requested on the authorize redirect (default: all:all)
    #[config(env = "SSO_SCOPE", default = "all:all")]
    pub scope: String,

    /// Seconds a cached identity may be served before a full refresh.
    /// Required when `auto_load_resource` is enabled.
    #[config(env = "SSO_CACHE_EXPIRE")]
    pub cache_expire: Option<i64>,

    /// Fail the login when the resource fetch fails instead of storing an
    /// identity-only session (default: false)
    #[config(env = "SSO_REQUIRE_RESOURCES_ON_LOGIN", default = false)]
    pub require_resources_on_login: bool,

    /// Timeout for provider calls in seconds (default: 60)
    #[config(env = "SSO_CLIENT_TIMEOUT", default = 60)]
    pub client_timeout: u64,

    /// Route access control: `url` or `method:url` mapped to `|`-separated resource keys
    pub url_control: Option<HashMap<String, String>>,

    /// Response texts shown to programmatic clients
    #[config(nested)]
    pub messages: MessagesConfig,
}

/// Localizable response bodies for XHR clients
#[derive(Debug, Config, Clone)]
pub struct MessagesConfig {
    #[config(env = "SSO_MESSAGES_LOGIN_SUCCESS", default = "Login succeeded")]
    pub login_success: String,

    #[config(
        env = "SSO_MESSAGES_UNAUTHENTICATED",
        default = "Unauthenticated or authorization failed, access denied"
    )]
    pub unauthenticated: String,

    #[config(
        env = "SSO_MESSAGES_FORBIDDEN",
        default = "Authenticated, but access denied: the current user has no permission to access this content"
    )]
    pub forbidden: String,

    #[config(env = "SSO_MESSAGES_LOGOUT_SUCCESS", default = "Logout succeeded")]
    pub logout_success: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            login_success: "Login succeeded".to_string(),
            unauthenticated: "Unauthenticated or authorization failed, access denied".to_string(),
            forbidden: "Authenticated, but access denied: the current user has no permission to access this content".to_string(),
            logout_success: "Logout succeeded".to_string(),
        }
    }
}

impl SsoConfig {
    /// Effective refresh TTL in seconds (0 when resources are not auto-loaded)
    pub fn cache_ttl(&self) -> i64 {
        self.cache_expire.unwrap_or(0)
    }

    /// Scope to request, falling back to the default for blank values
    pub fn effective_scope(&self) -> &str {
        if self.scope.trim().is_empty() {
            DEFAULT_SCOPE
        } else {
            &self.scope
        }
    }

    /// Provider URL for the given path
    pub fn provider_url(&self, path: &str) -> String {
        let host = self.host.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{host}{path}")
        } else {
            format!("{host}/{path}")
        }
    }
}
