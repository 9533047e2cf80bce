use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use log::{debug, warn};
use rand::Rng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

pub mod memory;
pub mod redis;

/// Errors that can occur during session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to parse value: {0}")]
    Deserialization(String),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Per-client key/value storage.
///
/// Values written through one session are never visible through another;
/// `clear` drops every key of the session at once.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SessionError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), SessionError>;

    async fn clear(&self) -> Result<(), SessionError>;

    /// Moves the session's values to a new id; the old id stops working
    async fn regenerate(&self) -> Result<(), SessionError>;
}

/// Storage backend holding serialized session records.
///
/// Implementations must be thread-safe (Send + Sync) and cloneable so a
/// single backend can serve every request handler.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Store a value, resetting its expiry
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T)
        -> Result<(), SessionError>;

    /// Retrieve a value
    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, SessionError>;

    /// Checks that the backend can serve requests
    async fn health_check(&self) -> Result<(), String>;

    /// Delete a value
    async fn delete(&self, key: &str) -> Result<(), SessionError>;
}

/// Session storage chosen at startup from the configuration
#[derive(Clone)]
pub enum SessionStorage {
    /// In-memory storage using Moka; sessions are lost on restart
    InMemory(memory::InMemorySessions),
    /// Redis-backed storage shared between server instances
    Redis(redis::RedisSessions),
}

#[async_trait]
impl SessionBackend for SessionStorage {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), SessionError> {
        match self {
            Self::InMemory(store) => store.set(key, value).await,
            Self::Redis(store) => store.set(key, value).await,
        }
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, SessionError> {
        match self {
            Self::InMemory(store) => store.get(key).await,
            Self::Redis(store) => store.get(key).await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::InMemory(store) => store.health_check().await,
            Self::Redis(store) => store.health_check().await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        match self {
            Self::InMemory(store) => store.delete(key).await,
            Self::Redis(store) => store.delete(key).await,
        }
    }
}

/// Creates the session storage selected by the configuration
pub async fn create_storage(
    config: &crate::config::SessionConfig,
) -> Result<SessionStorage, SessionError> {
    match config.store {
        crate::config::SessionStoreKind::InMemory => {
            let store = memory::InMemorySessions::new(config.ttl, config.memory.capacity)
                .map_err(SessionError::Config)?;
            Ok(SessionStorage::InMemory(store))
        }
        crate::config::SessionStoreKind::Redis => {
            if config.redis.url.is_empty() {
                return Err(SessionError::Config(
                    "Redis URL is required for Redis sessions".to_string(),
                ));
            }
            let store = redis::RedisSessions::new(&config.redis.url, config.ttl)
                .await
                .map_err(SessionError::Config)?;
            Ok(SessionStorage::Redis(store))
        }
    }
}

/// Everything stored for one session, as persisted by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(with = "encoded_values", default)]
    values: HashMap<String, Vec<u8>>,
}

mod encoded_values {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(
        values: &HashMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: HashMap<&String, String> = values
            .iter()
            .map(|(key, value)| (key, STANDARD.encode(value)))
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<String, Vec<u8>>, D::Error> {
        HashMap::<String, String>::deserialize(deserializer)?
            .into_iter()
            .map(|(key, value)| {
                STANDARD
                    .decode(value)
                    .map(|bytes| (key, bytes))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

/// Generates a new random session id (256 bits, base64url)
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Backend key for a session id; raw ids are never stored
fn storage_key(session_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    format!("sso:session:{:x}", hasher.finalize())
}

/// Handle to the session of the current client.
///
/// Clones share the same id and flags, so the session layer sees what the
/// handlers did, including an id regenerated at login.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: RwLock<String>,
    storage: Arc<SessionStorage>,
    is_new: bool,
    modified: AtomicBool,
    regenerated: AtomicBool,
    cleared: AtomicBool,
}

impl Session {
    /// Binds to the session named by the client's cookie.
    ///
    /// Ids the backend holds no record for were not issued by us (or have
    /// expired) and get a fresh session instead.
    pub async fn resume(id: &str, storage: Arc<SessionStorage>) -> Self {
        match storage.get::<SessionRecord>(&storage_key(id)).await {
            Ok(Some(_)) => Self::build(id.to_string(), storage, false),
            Ok(None) => {
                debug!("Unknown session id, starting a new session");
                Self::fresh(storage)
            }
            Err(e) => {
                warn!("Failed to load session, starting a new one: {}", e);
                Self::fresh(storage)
            }
        }
    }

    /// Starts a session with a fresh id
    pub fn fresh(storage: Arc<SessionStorage>) -> Self {
        Self::build(generate_session_id(), storage, true)
    }

    fn build(id: String, storage: Arc<SessionStorage>, is_new: bool) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: RwLock::new(id),
                storage,
                is_new,
                modified: AtomicBool::new(false),
                regenerated: AtomicBool::new(false),
                cleared: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> String {
        match self.inner.id.read() {
            Ok(id) => id.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn storage_key(&self) -> String {
        storage_key(&self.id())
    }

    /// Whether the id was generated for this request
    pub fn is_new(&self) -> bool {
        self.inner.is_new
    }

    /// Whether anything was written to the session during this request
    pub fn is_modified(&self) -> bool {
        self.inner.modified.load(Ordering::SeqCst)
    }

    /// Whether the id changed during this request
    pub fn is_regenerated(&self) -> bool {
        self.inner.regenerated.load(Ordering::SeqCst)
    }

    /// Whether the session was cleared and nothing was written since
    pub fn is_cleared(&self) -> bool {
        self.inner.cleared.load(Ordering::SeqCst)
    }

    async fn load(&self) -> Result<SessionRecord, SessionError> {
        Ok(self
            .inner
            .storage
            .get::<SessionRecord>(&self.storage_key())
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl SessionStore for Session {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SessionError> {
        Ok(self.load().await?.values.remove(key))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), SessionError> {
        let mut record = self.load().await?;
        record.values.insert(key.to_string(), value);
        self.inner.storage.set(&self.storage_key(), &record).await?;
        self.inner.modified.store(true, Ordering::SeqCst);
        self.inner.cleared.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> Result<(), SessionError> {
        self.inner.storage.delete(&self.storage_key()).await?;
        self.inner.cleared.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn regenerate(&self) -> Result<(), SessionError> {
        let old_key = self.storage_key();
        let record = self.load().await?;
        let new_id = generate_session_id();

        if !record.values.is_empty() {
            self.inner.storage.set(&storage_key(&new_id), &record).await?;
        }
        self.inner.storage.delete(&old_key).await?;

        match self.inner.id.write() {
            Ok(mut id) => *id = new_id,
            Err(poisoned) => *poisoned.into_inner() = new_id,
        }
        self.inner.regenerated.store(true, Ordering::SeqCst);
        Ok(())
    }
}
