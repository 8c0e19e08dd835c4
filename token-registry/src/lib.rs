//! Provider-agnostic access to delegated credentials.
//!
//! Libraries that call third-party APIs on behalf of a user need a usable
//! access token, but they must not depend on the application that owns the
//! credential storage. This crate defines the seam between the two.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       Consumer (any library)             │
//! │  - Holds a TokenRegistry clone           │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       TokenRegistry                      │
//! │  - TokenGetter / TokenStatusChecker      │
//! │  - Unregistered fallback (fail safe)     │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       Owning application                 │
//! │  - Credential storage and refresh        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Core Types
//!
//! - [`TokenGetter`] - Resolves a principal to a usable access token
//! - [`TokenStatusChecker`] - Reports whether a principal was ever connected
//! - [`TokenRegistry`] - Wiring point handed to consumers at construction
//! - [`Unregistered`] - Default implementation that answers "nothing"
//!
//! # Wiring a Registry
//!
//! ```no_run
//! use async_trait::async_trait;
//! use anyhow::Result;
//! use std::sync::Arc;
//! use token_registry::{AccessToken, TokenGetter, TokenRegistry};
//!
//! struct FixedToken;
//!
//! #[async_trait]
//! impl TokenGetter for FixedToken {
//!     async fn get_token(&self, _principal_id: &str) -> Result<Option<AccessToken>> {
//!         Ok(Some(AccessToken::new("gho_example")))
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let registry = TokenRegistry::new().register_token_getter(Arc::new(FixedToken));
//! let token = registry.access_token("user-1").await?;
//! assert!(token.is_some());
//! # Ok(())
//! # }
//! ```

mod getter;
mod registry;

pub use getter::{AccessToken, TokenGetter, TokenPresence, TokenStatusChecker};
pub use registry::{TokenRegistry, Unregistered};
