//! OAuth authentication
//!
//! Handles:
//! - Provider OAuth flow
//! - Session cookies
//! - Signed-in extractor

pub mod client;
mod middleware;
mod oauth;
pub mod session;
pub mod state;
pub mod token;

pub use client::{AuthenticatedClient, OAuthClient};
pub use middleware::SignedIn;
pub use oauth::auth_router;
pub use session::{Session, SessionStore};
pub use state::StateToken;
pub use token::{OAuthToken, StoredToken};

/// Session key holding the provider token
pub const TOKEN_SESSION_KEY: &str = "oauth-token";
