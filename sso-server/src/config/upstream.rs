use confique::Config;

/// The protected application requests are proxied to once authorized
#[derive(Debug, Config, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the upstream application; unmatched routes return 404 when unset
    #[config(env = "SSO_UPSTREAM_URL")]
    pub url: Option<String>,

    /// The timeout for upstream requests in seconds (default: 60)
    #[config(env = "SSO_UPSTREAM_CLIENT_TIMEOUT", default = 60)]
    pub client_timeout: u64,

    /// Largest request body forwarded upstream, in bytes (default: 10 MiB)
    #[config(env = "SSO_UPSTREAM_MAX_BODY_SIZE", default = 10485760)]
    pub max_body_size: usize,
}

impl UpstreamConfig {
    /// Returns the upstream URL for the given path and query, if an upstream is configured
    pub fn get_url<S: Into<String>>(&self, path: S) -> Option<String> {
        let base = self.url.as_deref()?.trim_end_matches('/');
        let path = path.into();
        if path.starts_with('/') {
            Some(format!("{base}{path}"))
        } else {
            Some(format!("{base}/{path}"))
        }
    }
}
