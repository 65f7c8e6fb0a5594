//! Ready-made session and user stores.
//!
//! The file stores keep sessions and users across restarts; the in-memory
//! stores suit tests and single-process development servers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{BoxError, Error};
use crate::middleware::{NewSession, Session, SessionStore, UserStore};
use crate::persist::JsonMapFile;
use crate::pkce::generate_session_token;
use crate::types::{Identity, SessionId, SessionUser, UserId};

fn new_session(session: NewSession) -> Session {
    Session::from_new(
        SessionId::from(generate_session_token()),
        session,
        OffsetDateTime::now_utc(),
    )
}

/// Process-local session store.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, expired ones included.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: NewSession) -> Result<Session, BoxError> {
        let session = new_session(session);
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn find(&self, session_id: &SessionId) -> Result<Option<Session>, BoxError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), BoxError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

/// Session store backed by a JSON file.
pub struct FileSessionStore {
    file: JsonMapFile<SessionId, Session>,
}

impl FileSessionStore {
    /// Open (or lazily create) the session file at `path`.
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

    /// Drop every session that expired before `now`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the file cannot be rewritten.
    pub async fn purge_expired(&self, now: OffsetDateTime) -> Result<usize, Error> {
        self.file
            .update(|sessions| {
                let before = sessions.len();
                sessions.retain(|_, s| !s.is_expired(now));
                before - sessions.len()
            })
            .await
    }
}

impl SessionStore for FileSessionStore {
    async fn create(&self, session: NewSession) -> Result<Session, BoxError> {
        let session = new_session(session);
        let stored = session.clone();
        self.file
            .update(|sessions| sessions.insert(stored.id.clone(), stored))
            .await?;
        Ok(session)
    }

    async fn find(&self, session_id: &SessionId) -> Result<Option<Session>, BoxError> {
        Ok(self.file.get(session_id).await)
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), BoxError> {
        self.file
            .update(|sessions| {
                sessions.remove(session_id);
            })
            .await?;
        Ok(())
    }
}

fn new_user(identity: &Identity) -> SessionUser {
    let id = UserId::from(ulid::Ulid::new().to_string());
    tracing::info!(user_id = %id, "New user created");
    SessionUser {
        id,
        email: identity.email.clone(),
        name: identity.name.clone(),
    }
}

fn refresh_user(users: &mut HashMap<String, SessionUser>, identity: &Identity) -> SessionUser {
    let user = users
        .entry(identity.subject.clone())
        .or_insert_with(|| new_user(identity));
    user.email.clone_from(&identity.email);
    user.name.clone_from(&identity.name);
    user.clone()
}

/// Users keyed by identity subject, with ULID user ids.
///
/// Email and display name are refreshed from the identity on every sign-in.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, SessionUser>>,
}

impl InMemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserStore for InMemoryUserStore {
    async fn find_or_create(&self, identity: &Identity) -> Result<SessionUser, BoxError> {
        Ok(refresh_user(&mut *self.users.write().await, identity))
    }
}

/// [`InMemoryUserStore`] persisted to a JSON file keyed by subject.
pub struct FileUserStore {
    file: JsonMapFile<String, SessionUser>,
}

impl FileUserStore {
    /// Open (or lazily create) the user file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if an existing file cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        Ok(Self {
            file: JsonMapFile::open(path).await?,
        })
    }
}

impl UserStore for FileUserStore {
    async fn find_or_create(&self, identity: &Identity) -> Result<SessionUser, BoxError> {
        Ok(self.file.update(|users| refresh_user(users, identity)).await?)
    }
}
