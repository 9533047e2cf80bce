use confique::Config;
use serde::Deserialize;

/// Specifies which session store implementation to use
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStoreKind {
    #[default]
    InMemory,
    Redis,
}

/// Configuration for the session subsystem
#[derive(Debug, Config, Clone)]
pub struct SessionConfig {
    /// Session store type: "in-memory" (default) or "redis"
    #[config(env = "SSO_SESSION_STORE", default = "in-memory")]
    pub store: SessionStoreKind,

    /// Idle lifetime of a session in seconds (default: 1 day)
    #[config(env = "SSO_SESSION_TTL", default = 86400)]
    pub ttl: u64,

    /// Name of the cookie carrying the session id (default: sso_session)
    #[config(env = "SSO_SESSION_COOKIE_NAME", default = "sso_session")]
    pub cookie_name: String,

    /// Mark the session cookie `Secure` (default: false)
    #[config(env = "SSO_SESSION_COOKIE_SECURE", default = false)]
    pub cookie_secure: bool,

    /// In-memory store specific configuration
    #[config(nested)]
    pub memory: InMemoryConfig,

    /// Redis store specific configuration
    #[config(nested)]
    pub redis: RedisConfig,
}

/// In-memory session store configuration options
#[derive(Debug, Config, Clone)]
pub struct InMemoryConfig {
    /// Maximum capacity in MiB (default: 64 MiB)
    #[config(env = "SSO_SESSION_MEMORY_CAPACITY", default = 64)]
    pub capacity: usize,
}

/// Redis session store configuration options
#[derive(Debug, Config, Clone)]
pub struct RedisConfig {
    /// Redis connection string
    #[config(env = "SSO_SESSION_REDIS_URL", default = "")]
    pub url: String,
}

impl SessionConfig {
    /// In-memory session configuration, used by tests and as a fallback
    pub fn in_memory(ttl: u64) -> Self {
        Self {
            store: SessionStoreKind::InMemory,
            ttl,
            cookie_name: "sso_session".to_string(),
            cookie_secure: false,
            memory: InMemoryConfig { capacity: 64 },
            redis: RedisConfig { url: String::new() },
        }
    }
}
