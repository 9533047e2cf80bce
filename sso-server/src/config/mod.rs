pub(crate) use crate::config::session::{SessionConfig, SessionStoreKind};
#[cfg(test)]
pub(crate) use crate::config::sso::MessagesConfig;
pub(crate) use crate::config::sso::SsoConfig;
pub(crate) use crate::config::upstream::UpstreamConfig;
use confique::Config;
use std::path::Path;
use thiserror::Error;
use url::Url;

pub mod session;
pub mod sso;
pub mod upstream;

/// Config file read when `SSO_CONFIG_FILE` is not set; a missing file is ignored
pub const DEFAULT_CONFIG_FILE: &str = "sso.toml";

/// Errors raised while loading or validating the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] confique::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure for the SSO server
#[derive(Debug, Config, Clone)]
pub struct Settings {
    /// The port the server will listen to (default: 7788)
    #[config(env = "SSO_PORT", default = 7788)]
    pub port: u16,

    /// Identity provider configuration
    #[config(nested)]
    pub sso: SsoConfig,

    /// Session store configuration
    #[config(nested)]
    pub session: SessionConfig,

    /// Protected upstream application
    #[config(nested)]
    pub upstream: UpstreamConfig,
}

impl Settings {
    /// Loads the configuration from `SSO_*` environment variables layered over
    /// the TOML file named by `SSO_CONFIG_FILE` (default `sso.toml`)
    pub fn new() -> Result<Self, ConfigError> {
        let path =
            std::env::var("SSO_CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::from_file(path)
    }

    /// Loads the configuration from the environment and the given TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = Settings::builder()
            .env()
            .file(path.as_ref())
            .load()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the cross-field constraints the loader cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sso = &self.sso;
        if sso.client_id <= 0 {
            return Err(ConfigError::Invalid(format!(
                "sso.client_id is invalid: {}",
                sso.client_id
            )));
        }
        if sso.client_secret.trim().is_empty() {
            return Err(ConfigError::Invalid("sso.client_secret is required".into()));
        }
        if sso.redirect_uri.trim().is_empty() {
            return Err(ConfigError::Invalid("sso.redirect_uri is required".into()));
        }
        Url::parse(&sso.host)
            .map_err(|e| ConfigError::Invalid(format!("sso.host is invalid: {e}")))?;
        if sso.auto_load_resource && sso.cache_expire.is_none() {
            return Err(ConfigError::Invalid(
                "sso.cache_expire is required when sso.auto_load_resource is enabled".into(),
            ));
        }
        if self.session.store == SessionStoreKind::Redis && self.session.redis.url.is_empty() {
            return Err(ConfigError::Invalid(
                "session.redis.url is required for the redis session store".into(),
            ));
        }
        if let Some(upstream) = &self.upstream.url {
            Url::parse(upstream)
                .map_err(|e| ConfigError::Invalid(format!("upstream.url is invalid: {e}")))?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn for_test_with_mocks(
        provider_mock: &wiremock::MockServer,
        upstream_mock: &wiremock::MockServer,
    ) -> Self {
        Self {
            port: 0, // Let the OS choose a port
            sso: SsoConfig {
                client_id: 1001,
                client_secret: "test_client_secret".to_string(),
                redirect_uri: "http://localhost:7788/callback".to_string(),
                host: provider_mock.uri(),
                auto_load_resource: true,
                scope: "all:all".to_string(),
                cache_expire: Some(300),
                require_resources_on_login: false,
                client_timeout: 5,
                url_control: None,
                messages: MessagesConfig::default(),
            },
            session: SessionConfig::in_memory(3600),
            upstream: UpstreamConfig {
                url: Some(upstream_mock.uri()),
                client_timeout: 5,
                max_body_size: 1024 * 1024,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.toml", name, std::process::id()));
        let mut file = std::fs::File::create(&path).expect("Failed to create config file");
        file.write_all(contents.as_bytes())
            .expect("Failed to write config file");
        path
    }

    #[test]
    fn test_load_from_file() {
        let path = write_config(
            "sso-load",
            r#"
port = 9000

[sso]
client_id = 17
client_secret = "s3cret"
redirect_uri = "http://app.local/callback"
host = "https://sso.example.com"
auto_load_resource = true
cache_expire = 120

[sso.url_control]
"/admin" = "manage_users|audit"
"GET:/reports" = "reports"

[session]
store = "in-memory"
"#,
        );

        let settings = Settings::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.port, 9000);
        assert_eq!(settings.sso.client_id, 17);
        assert!(settings.sso.auto_load_resource);
        assert_eq!(settings.sso.cache_expire, Some(120));
        assert_eq!(settings.sso.scope, "all:all");
        assert!(!settings.sso.require_resources_on_login);
        assert_eq!(settings.session.store, SessionStoreKind::InMemory);
        assert_eq!(settings.session.cookie_name, "sso_session");
        assert_eq!(settings.session.ttl, 86400);
        assert!(settings.upstream.url.is_none());
        assert_eq!(settings.upstream.max_body_size, 10 * 1024 * 1024);

        let url_control = settings.sso.url_control.unwrap();
        assert_eq!(url_control.get("/admin").unwrap(), "manage_users|audit");
        assert_eq!(url_control.get("GET:/reports").unwrap(), "reports");
    }

    #[test]
    fn test_auto_load_requires_cache_expire() {
        let path = write_config(
            "sso-no-expire",
            r#"
[sso]
client_id = 17
client_secret = "s3cret"
redirect_uri = "http://app.local/callback"
host = "https://sso.example.com"
auto_load_resource = true
"#,
        );

        let result = Settings::from_file(&path);
        std::fs::remove_file(&path).ok();

        match result {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("cache_expire")),
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let provider = "http://provider.local";
        let mut settings = Settings {
            port: 0,
            sso: SsoConfig {
                client_id: 1,
                client_secret: "secret".to_string(),
                redirect_uri: "http://app.local/callback".to_string(),
                host: provider.to_string(),
                auto_load_resource: false,
                scope: "all:all".to_string(),
                cache_expire: None,
                require_resources_on_login: false,
                client_timeout: 60,
                url_control: None,
                messages: MessagesConfig::default(),
            },
            session: SessionConfig::in_memory(60),
            upstream: UpstreamConfig {
                url: None,
                client_timeout: 60,
                max_body_size: 1024 * 1024,
            },
        };
        assert!(settings.validate().is_ok());

        settings.sso.client_id = 0;
        assert!(settings.validate().is_err());
        settings.sso.client_id = 1;

        settings.sso.host = "not a url".to_string();
        assert!(settings.validate().is_err());
        settings.sso.host = provider.to_string();

        settings.session.store = SessionStoreKind::Redis;
        assert!(settings.validate().is_err());
        settings.session.redis.url = "redis://localhost:6379".to_string();
        assert!(settings.validate().is_ok());
    }
}
