//! Registry module for Docker Registry HTTP API v2 / OCI distribution access
//!
//! Token exchange, manifest and blob fetches, retry policy and the persistent
//! bearer token cache.

pub mod auth;
pub mod client;
pub mod retry;
pub mod token_cache;

pub use auth::TokenGrant;
pub use client::{RegistryClient, RegistryClientBuilder};
pub use retry::RetryPolicy;
pub use token_cache::{
    ExpiryValidator, ProbeValidator, TokenCache, TokenRecord, TokenStore, TokenValidator,
};
