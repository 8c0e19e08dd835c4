//! OAuth 2.0 refresh-token exchange against the external authorization server.
//!
//! The authorization-code flow itself is handled elsewhere; this module only
//! turns a stored refresh token into a fresh token pair.

mod provider;
mod refresh;

pub use provider::{OAuthProviderConfig, DEFAULT_TOKEN_URL};
pub use refresh::{HttpRefreshClient, RefreshClient};
