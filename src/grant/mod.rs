//! Gmail grant persistence and lifecycle.
//!
//! [`GrantStore`] is the storage contract; [`GmailAuthorizationManager`] is the
//! only writer, handling consent, single-flight refresh and revocation.

mod manager;
mod store;

pub use manager::GmailAuthorizationManager;
pub use store::{FileGrantStore, GrantStore, InMemoryGrantStore};
