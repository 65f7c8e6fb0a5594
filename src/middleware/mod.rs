//! Axum surface: sign-in, session status, sign-out and the Gmail endpoints.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use inboxkit::middleware::{ServerConfig, api_routes};
//! use inboxkit::{FileGrantStore, FileSessionStore, InMemoryUserStore};
//!
//! // 1. Configure from environment
//! let config = ServerConfig::from_env()?;
//!
//! // 2. Pick stores (or implement UserStore / SessionStore / GrantStore)
//! let sessions = FileSessionStore::open("data/sessions.json").await?;
//! let grants = FileGrantStore::open("data/grants.json").await?;
//!
//! // 3. Mount the routes
//! let app = axum::Router::new()
//!     .merge(api_routes(config, InMemoryUserStore::new(), sessions, grants));
//! ```

mod config;
mod cookies;
mod error;
mod extractor;
mod routes;
mod state;
mod traits;
mod types;

pub use config::ServerConfig;
pub use error::AuthError;
pub use extractor::AuthUser;
pub use routes::api_routes;
pub use traits::{SessionStore, UserStore};
pub use types::{NewSession, Session};

/// Re-export cookie key type for builder API.
pub use axum_extra::extract::cookie::Key as CookieKey;
