//! Error types for the provider client.

use beacon_resolver::ResolveError;

/// Errors surfaced by the provider's public API.
///
/// Transport failures are not here: they are recovered internally by the
/// reconnection policy and observable through state queries and events.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("service name must not be empty")]
    InvalidName,

    #[error("service port must be non-zero")]
    InvalidPort,

    #[error("service {0:?} is already provided")]
    AlreadyProvided(String),

    #[error("invalid endpoint URL: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("unsupported endpoint scheme {0:?} (expected ws or wss)")]
    UnsupportedScheme(String),

    #[error("resolver setup failed: {0}")]
    Resolver(#[from] ResolveError),
}
