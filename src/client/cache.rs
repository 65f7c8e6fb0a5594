//! Client-local caches: the advisory identity copy and fetched pages.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{MessagePage, SessionUser};

/// Locally persisted copy of the signed-in user.
///
/// Only used to render optimistically on reload; never proof of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedIdentity {
    pub user: SessionUser,
    pub authenticated: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
}

impl CachedIdentity {
    #[must_use]
    pub fn signed_in(user: SessionUser) -> Self {
        Self {
            user,
            authenticated: true,
            cached_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Storage for [`CachedIdentity`] (the browser's local storage, a file, ...).
///
/// Methods are infallible: the cache is advisory, so implementations log
/// and swallow their own failures.
pub trait IdentityCache: Send + Sync + 'static {
    fn load(&self) -> Option<CachedIdentity>;
    fn store(&self, identity: &CachedIdentity);
    fn clear(&self);
}

impl<T: IdentityCache> IdentityCache for Arc<T> {
    fn load(&self) -> Option<CachedIdentity> {
        (**self).load()
    }

    fn store(&self, identity: &CachedIdentity) {
        (**self).store(identity);
    }

    fn clear(&self) {
        (**self).clear();
    }
}

#[derive(Debug, Default)]
pub struct MemoryIdentityCache {
    slot: Mutex<Option<CachedIdentity>>,
}

impl MemoryIdentityCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityCache for MemoryIdentityCache {
    fn load(&self) -> Option<CachedIdentity> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, identity: &CachedIdentity) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());
    }

    fn clear(&self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Identity cache kept in a JSON file.
#[derive(Debug, Clone)]
pub struct FileIdentityCache {
    path: PathBuf,
}

impl FileIdentityCache {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityCache for FileIdentityCache {
    fn load(&self) -> Option<CachedIdentity> {
        let content = match std::fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "Identity cache unreadable");
                return None;
            }
        };
        match serde_json::from_slice(&content) {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::warn!(error = %e, "Identity cache corrupt; ignoring");
                None
            }
        }
    }

    fn store(&self, identity: &CachedIdentity) {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&self.path, serde_json::to_vec(identity)?)
        };
        if let Err(e) = write() {
            tracing::warn!(error = %e, path = %self.path.display(), "Identity cache write failed");
        }
    }

    fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(error = %e, "Identity cache removal failed"),
        }
    }
}

/// Fetched message pages, keyed by cursor (`""` for the first page).
///
/// Shared by the fetch orchestrator, which fills it, and the session
/// reconciler, which empties it on sign-out.
#[derive(Debug, Default)]
pub struct PageCache {
    pages: Mutex<HashMap<String, MessagePage>>,
}

impl PageCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, cursor: &str) -> Option<MessagePage> {
        self.lock().get(cursor).cloned()
    }

    pub fn insert(&self, cursor: &str, page: MessagePage) {
        self.lock().insert(cursor.to_owned(), page);
    }

    pub fn remove(&self, cursor: &str) {
        self.lock().remove(cursor);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MessagePage>> {
        self.pages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
