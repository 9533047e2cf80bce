use crate::models::CachedUser;
use log::debug;
use std::collections::HashMap;
use thiserror::Error;

/// A route rule the user failed to satisfy
#[derive(Debug, Clone, PartialEq, Error)]
#[error("rule '{rule}' requires resource '{resource}'")]
pub struct PolicyDenied {
    pub rule: String,
    pub resource: String,
}

/// Route access policy, read-only once built.
///
/// Keys are `url` (any method) or `method:url`, both lower-cased. When both
/// exist for a route the user must satisfy both.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    rules: HashMap<String, Vec<String>>,
}

impl PolicyTable {
    /// Builds the table from `url_control` entries whose values are `|`-separated resource keys
    pub fn from_url_control(url_control: Option<&HashMap<String, String>>) -> Self {
        let rules = url_control
            .into_iter()
            .flatten()
            .map(|(route, resources)| {
                let resources = resources
                    .split('|')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect();
                (route.trim().to_lowercase(), resources)
            })
            .collect();
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Checks the route-wide rule, then the method-specific rule
    pub fn check(
        &self,
        user: &CachedUser,
        method: &str,
        url_pattern: &str,
    ) -> Result<(), PolicyDenied> {
        let url_pattern = url_pattern.to_lowercase();
        let method_key = format!("{}:{}", method.to_lowercase(), url_pattern);

        for key in [url_pattern, method_key] {
            if let Some(required) = self.rules.get(&key) {
                if let Some(missing) = required.iter().find(|r| !user.resources.contains(r)) {
                    return Err(PolicyDenied {
                        rule: key,
                        resource: missing.clone(),
                    });
                }
                debug!("Rule '{}' satisfied for user '{}'", key, user.identity.id);
            }
        }

        Ok(())
    }

    pub fn is_authorized(&self, user: &CachedUser, method: &str, url_pattern: &str) -> bool {
        self.check(user, method, url_pattern).is_ok()
    }
}
