use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// Identity id reported for requests without a session
pub const ANONYMOUS_USER_ID: &str = "anonymous";

/// Authenticated principal as reported by the provider's `/api/user`
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Default)]
pub struct Identity {
    /// Unique user id
    pub id: String,
    /// Full name shown to humans
    #[serde(rename = "fullname", default)]
    pub display_name: String,
    /// Directory distinguished name
    #[serde(rename = "dn", default)]
    pub directory_name: String,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            id: ANONYMOUS_USER_ID.to_string(),
            display_name: "Anonymous".to_string(),
            directory_name: String::new(),
        }
    }
}

/// A permission granted to a user. Policies compare against `key`, not `id`.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct Resource {
    pub id: i64,
    #[serde(default)]
    pub description: String,
    /// Policy key, carried in the provider's `data` field
    #[serde(rename = "data", alias = "key")]
    pub key: String,
}

/// Resources of a user indexed by lower-cased key.
///
/// A set is always built whole from a provider response and replaced as a
/// unit; it is never patched in place.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct ResourceSet(HashMap<String, Resource>);

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(&key.to_lowercase())
    }

    pub fn get(&self, key: &str) -> Option<&Resource> {
        self.0.get(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sorted resource keys
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.0.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl FromIterator<Resource> for ResourceSet {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|resource| (resource.key.to_lowercase(), resource))
                .collect(),
        )
    }
}

/// OAuth2 access token issued by the provider
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Token {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub scope: String,
}

impl Token {
    /// Value of the `Authorization` header for provider calls
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Body of the provider's token endpoint: either a token or an error pair
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TokenResponse {
    #[serde(flatten)]
    pub token: Token,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub error_description: String,
}

/// Response envelope used by the provider's `/api/*` endpoints
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderEnvelope<T> {
    /// 0 on success
    pub res_code: i32,
    #[serde(default)]
    pub res_msg: String,
    pub data: Option<T>,
}

/// Session-cached view of an authenticated user
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CachedUser {
    pub identity: Identity,
    pub resources: ResourceSet,
    pub token: Token,
    /// Unix seconds of the last successful resource load; 0 when never loaded
    pub cached_at: i64,
}

impl CachedUser {
    /// Placeholder user for requests without a session; holds no resources
    pub fn anonymous() -> Self {
        Self {
            identity: Identity::anonymous(),
            resources: ResourceSet::new(),
            token: Token::default(),
            cached_at: 0,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.identity.id == ANONYMOUS_USER_ID && self.token.access_token.is_empty()
    }
}

/// Identity and permissions of the current user, as returned by `/api/me`
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct CurrentUserResponse {
    pub identity: Identity,
    /// Keys of the resources the user holds
    pub resources: Vec<String>,
    /// Unix seconds of the last resource load
    pub cached_at: i64,
}

impl From<&CachedUser> for CurrentUserResponse {
    fn from(user: &CachedUser) -> Self {
        Self {
            identity: user.identity.clone(),
            resources: user.resources.keys(),
            cached_at: user.cached_at,
        }
    }
}
