// Internal HTTP API
pub mod api;

// Admin bearer token checks
pub mod auth;

// File and environment configuration
pub mod config;

// Wiring between the manager and token consumers
pub mod consumer;

// Encrypted credential storage
pub mod credentials;

// Error vocabulary
pub mod error;

// Credential lifecycle (refresh, invalidation)
pub mod manager;

// Authorization server client
pub mod oauth;
