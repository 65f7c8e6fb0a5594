use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crate::error::{BoxError, Error};
use crate::persist::JsonMapFile;
use crate::types::{ProviderGrant, UserId};

/// Server-side persistence of each user's Gmail grant (at most one per user).
///
/// Only [`GmailAuthorizationManager`](super::GmailAuthorizationManager)
/// writes through this trait.
///
/// # Example
///
/// ```rust,ignore
/// impl GrantStore for PgGrants {
///     async fn load(&self, user_id: &UserId) -> Result<Option<ProviderGrant>, BoxError> {
///         Ok(self.db.find_grant(user_id).await?)
///     }
///     // ...
/// }
/// ```
pub trait GrantStore: Send + Sync + 'static {
    fn load(
        &self,
        user_id: &UserId,
    ) -> impl Future<Output = Result<Option<ProviderGrant>, BoxError>> + Send;

    /// Insert or replace the user's grant.
    fn save(
        &self,
        user_id: &UserId,
        grant: ProviderGrant,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;

    fn remove(&self, user_id: &UserId) -> impl Future<Output = Result<(), BoxError>> + Send;
}

impl<T: GrantStore> GrantStore for Arc<T> {
    fn load(
        &self,
        user_id: &UserId,
    ) -> impl Future<Output = Result<Option<ProviderGrant>, BoxError>> + Send {
        (**self).load(user_id)
    }

    fn save(
        &self,
        user_id: &UserId,
        grant: ProviderGrant,
    ) -> impl Future<Output = Result<(), BoxError>> + Send {
        (**self).save(user_id, grant)
    }

    fn remove(&self, user_id: &UserId) -> impl Future<Output = Result<(), BoxError>> + Send {
        (**self).remove(user_id)
    }
}

/// Object-safe wrapper for GrantStore (needed for `Arc<dyn>`).
pub(crate) trait GrantStoreDyn: Send + Sync {
    fn load_dyn<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, Result<Option<ProviderGrant>, BoxError>>;

    fn save_dyn<'a>(
        &'a self,
        user_id: &'a UserId,
        grant: ProviderGrant,
    ) -> BoxFuture<'a, Result<(), BoxError>>;

    fn remove_dyn<'a>(&'a self, user_id: &'a UserId) -> BoxFuture<'a, Result<(), BoxError>>;
}

impl<T: GrantStore> GrantStoreDyn for T {
    fn load_dyn<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, Result<Option<ProviderGrant>, BoxError>> {
        self.load(user_id).boxed()
    }

    fn save_dyn<'a>(
        &'a self,
        user_id: &'a UserId,
        grant: ProviderGrant,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        self.save(user_id, grant).boxed()
    }

    fn remove_dyn<'a>(&'a self, user_id: &'a UserId) -> BoxFuture<'a, Result<(), BoxError>> {
        self.remove(user_id).boxed()
    }
}

/// Process-local grant store. Grants are lost on restart.
#[derive(Default)]
pub struct InMemoryGrantStore {
    grants: RwLock<HashMap<UserId, ProviderGrant>>,
}

impl InMemoryGrantStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl GrantStore for InMemoryGrantStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<ProviderGrant>, BoxError> {
        Ok(self.grants.read().await.get(user_id).cloned())
    }

    async fn save(&self, user_id: &UserId, grant: ProviderGrant) -> Result<(), BoxError> {
        self.grants.write().await.insert(user_id.clone(), grant);
        Ok(())
    }

    async fn remove(&self, user_id: &UserId) -> Result<(), BoxError> {
        self.grants.write().await.remove(user_id);
        Ok(())
    }
}

/// Grant store backed by a JSON file, surviving process restarts.
pub struct FileGrantStore {
    file: JsonMapFile<UserId, ProviderGrant>,
}

impl FileGrantStore {
    /// Open (or lazily create) the grant file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if an existing file cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        Ok(Self {
            file: JsonMapFile::open(path).await?,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl GrantStore for FileGrantStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<ProviderGrant>, BoxError> {
        Ok(self.file.get(user_id).await)
    }

    async fn save(&self, user_id: &UserId, grant: ProviderGrant) -> Result<(), BoxError> {
        self.file
            .update(|m| {
                m.insert(user_id.clone(), grant);
            })
            .await?;
        Ok(())
    }

    async fn remove(&self, user_id: &UserId) -> Result<(), BoxError> {
        self.file
            .update(|m| {
                m.remove(user_id);
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn grant(token: &str) -> ProviderGrant {
        ProviderGrant {
            access_token: token.into(),
            refresh_token: Some("rt".into()),
            expires_at: OffsetDateTime::from_unix_timestamp(1_900_000_000).unwrap(),
            scopes: ["scope-a".to_string()].into_iter().collect(),
        }
    }

    fn alice() -> UserId {
        UserId::from("alice".to_string())
    }

    #[tokio::test]
    async fn memory_store_replaces_and_removes() {
        let store = InMemoryGrantStore::new();
        assert!(store.load(&alice()).await.unwrap().is_none());

        store.save(&alice(), grant("one")).await.unwrap();
        store.save(&alice(), grant("two")).await.unwrap();
        assert_eq!(
            store.load(&alice()).await.unwrap().unwrap().access_token,
            "two"
        );

        store.remove(&alice()).await.unwrap();
        assert!(store.load(&alice()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.json");

        let store = FileGrantStore::open(&path).await.unwrap();
        store.save(&alice(), grant("persisted")).await.unwrap();
        drop(store);

        let reopened = FileGrantStore::open(&path).await.unwrap();
        assert_eq!(reopened.path(), path.as_path());
        assert_eq!(reopened.load(&alice()).await.unwrap(), Some(grant("persisted")));
    }
}
