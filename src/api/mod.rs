// Internal HTTP API

pub mod credentials;

pub use credentials::{create_credentials_router, CredentialsAppState};
