//! User directory: the external collaborator that knows who users are.
//!
//! The ride core only needs three facts about a user: whether they drive,
//! their aggregate rating, and how a rider can reach them. Lookups may be
//! remote, so every call is async and callers go through [`CachedDirectory`]
//! to bound them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    /// Name the user registers under with the rendezvous service.
    pub username: String,
    #[serde(default)]
    pub is_driver: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl UserProfile {
    /// Profile assumed for a user the directory has never heard of.
    pub fn unregistered(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: user_id.to_string(),
            is_driver: true,
            rating: None,
            phone: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory lookup timed out after {0:?}")]
    Timeout(Duration),
    #[error("directory unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, serde_json::Error),
}

pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` means the user is unknown.
    fn profile<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<UserProfile>, DirectoryError>>;
}

/// Rating of `user_id`, or `None` when it cannot be determined.
pub async fn rating_of(directory: &dyn UserDirectory, user_id: &str) -> Option<f64> {
    match directory.profile(user_id).await {
        Ok(profile) => profile.and_then(|p| p.rating),
        Err(_) => None,
    }
}

// ── In-memory directory ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryDirectory {
    users: DashMap<String, UserProfile>,
    open_registration: bool,
}

impl InMemoryDirectory {
    pub fn new(open_registration: bool) -> Self {
        Self {
            users: DashMap::new(),
            open_registration,
        }
    }

    /// Load a JSON array of profiles.
    pub fn from_file(path: &Path, open_registration: bool) -> Result<Self, DirectoryError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DirectoryError::ReadFailed(path.to_path_buf(), e))?;
        let profiles: Vec<UserProfile> = serde_json::from_str(&text)
            .map_err(|e| DirectoryError::ParseFailed(path.to_path_buf(), e))?;
        let directory = Self::new(open_registration);
        for profile in profiles {
            directory.upsert(profile);
        }
        Ok(directory)
    }

    pub fn upsert(&self, profile: UserProfile) {
        self.users.insert(profile.user_id.clone(), profile);
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserDirectory for InMemoryDirectory {
    fn profile<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<UserProfile>, DirectoryError>> {
        Box::pin(async move {
            if let Some(p) = self.users.get(user_id) {
                return Ok(Some(p.clone()));
            }
            Ok(self
                .open_registration
                .then(|| UserProfile::unregistered(user_id)))
        })
    }
}

// ── Caching / bounding wrapper ────────────────────────────────────────────────

/// Wraps a directory with a TTL cache and a per-lookup timeout.
///
/// Timeouts and failures are not cached; the next lookup tries again.
pub struct CachedDirectory {
    inner: Arc<dyn UserDirectory>,
    ttl: Duration,
    timeout: Duration,
    cache: DashMap<String, (Instant, Option<UserProfile>)>,
}

impl CachedDirectory {
    pub fn new(inner: Arc<dyn UserDirectory>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            inner,
            ttl,
            timeout,
            cache: DashMap::new(),
        }
    }

    fn cached(&self, user_id: &str) -> Option<Option<UserProfile>> {
        let entry = self.cache.get(user_id)?;
        let (at, profile) = entry.value();
        (at.elapsed() < self.ttl).then(|| profile.clone())
    }

    /// Drop cached entries older than the TTL.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.cache.retain(|_, (at, _)| at.elapsed() < ttl);
    }
}

impl UserDirectory for CachedDirectory {
    fn profile<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<UserProfile>, DirectoryError>> {
        Box::pin(async move {
            if let Some(hit) = self.cached(user_id) {
                return Ok(hit);
            }
            match tokio::time::timeout(self.timeout, self.inner.profile(user_id)).await {
                Ok(Ok(profile)) => {
                    if !self.ttl.is_zero() {
                        self.cache
                            .insert(user_id.to_string(), (Instant::now(), profile.clone()));
                    }
                    Ok(profile)
                }
                Ok(Err(e)) => {
                    tracing::warn!(user_id, error = %e, "directory lookup failed");
                    Err(e)
                }
                Err(_) => {
                    tracing::warn!(user_id, timeout = ?self.timeout, "directory lookup timed out");
                    Err(DirectoryError::Timeout(self.timeout))
                }
            }
        })
    }
}
