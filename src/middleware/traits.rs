use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::types::{NewSession, Session};
use crate::error::BoxError;
use crate::types::{Identity, SessionId, SessionUser};

/// Consumer-provided user management.
///
/// Called after a credential is verified to find or create the user. The
/// returned [`SessionUser`] is stored in the session.
///
/// # Example
///
/// ```rust,ignore
/// impl UserStore for MyAppState {
///     async fn find_or_create(&self, identity: &Identity) -> Result<SessionUser, BoxError> {
///         let user = match self.repo.find_by_subject(&identity.subject).await? {
///             Some(user) => user,
///             None => self.repo.create(identity).await?,
///         };
///         Ok(user.into())
///     }
/// }
/// ```
pub trait UserStore: Send + Sync + 'static {
    /// Find the user for `identity.subject`, creating one on first sign-in.
    fn find_or_create(
        &self,
        identity: &Identity,
    ) -> impl Future<Output = Result<SessionUser, BoxError>> + Send;
}

/// Consumer-provided session persistence.
///
/// Implementations must be safe for concurrent use; the only shared key is
/// the session token. Expiry is enforced by the middleware, which deletes
/// sessions it finds expired.
///
/// # Example
///
/// ```rust,ignore
/// impl SessionStore for MyAppState {
///     async fn create(&self, session: NewSession) -> Result<Session, BoxError> {
///         let id = SessionId::from(generate_session_token());
///         let session = Session::from_new(id, session, OffsetDateTime::now_utc());
///         self.db.insert_session(&session).await?;
///         Ok(session)
///     }
///
///     async fn find(&self, id: &SessionId) -> Result<Option<Session>, BoxError> {
///         self.db.find_session(id).await
///     }
///
///     async fn delete(&self, id: &SessionId) -> Result<(), BoxError> {
///         self.db.delete_session(id).await
///     }
/// }
/// ```
pub trait SessionStore: Send + Sync + 'static {
    /// Create a new session under a fresh opaque token.
    fn create(&self, session: NewSession)
    -> impl Future<Output = Result<Session, BoxError>> + Send;

    fn find(
        &self,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<Option<Session>, BoxError>> + Send;

    /// Delete a session (sign-out or expiry). Deleting an unknown id is not an error.
    fn delete(&self, session_id: &SessionId) -> impl Future<Output = Result<(), BoxError>> + Send;
}

impl<T: SessionStore> SessionStore for Arc<T> {
    fn create(&self, session: NewSession) -> impl Future<Output = Result<Session, BoxError>> + Send {
        (**self).create(session)
    }

    fn find(
        &self,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<Option<Session>, BoxError>> + Send {
        (**self).find(session_id)
    }

    fn delete(&self, session_id: &SessionId) -> impl Future<Output = Result<(), BoxError>> + Send {
        (**self).delete(session_id)
    }
}

/// Object-safe wrapper for UserStore (needed for `Arc<dyn>`).
pub(crate) trait UserStoreDyn: Send + Sync {
    fn find_or_create_dyn<'a>(
        &'a self,
        identity: &'a Identity,
    ) -> BoxFuture<'a, Result<SessionUser, BoxError>>;
}

impl<T: UserStore> UserStoreDyn for T {
    fn find_or_create_dyn<'a>(
        &'a self,
        identity: &'a Identity,
    ) -> BoxFuture<'a, Result<SessionUser, BoxError>> {
        self.find_or_create(identity).boxed()
    }
}

/// Object-safe wrapper for SessionStore (needed for `Arc<dyn>`).
pub(crate) trait SessionStoreDyn: Send + Sync {
    fn create_dyn(&self, session: NewSession) -> BoxFuture<'_, Result<Session, BoxError>>;

    fn find_dyn<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<Session>, BoxError>>;

    fn delete_dyn<'a>(&'a self, session_id: &'a SessionId) -> BoxFuture<'a, Result<(), BoxError>>;
}

impl<T: SessionStore> SessionStoreDyn for T {
    fn create_dyn(&self, session: NewSession) -> BoxFuture<'_, Result<Session, BoxError>> {
        self.create(session).boxed()
    }

    fn find_dyn<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> BoxFuture<'a, Result<Option<Session>, BoxError>> {
        self.find(session_id).boxed()
    }

    fn delete_dyn<'a>(&'a self, session_id: &'a SessionId) -> BoxFuture<'a, Result<(), BoxError>> {
        self.delete(session_id).boxed()
    }
}
