//! DNS-SRV record resolution for beacon service providers.
//!
//! A discovery host is often published as a bare name whose concrete
//! location lives in SRV records. This crate provides the [`RecordResolver`]
//! seam the provider consults before every connection attempt, a production
//! [`DnsResolver`] backed by hickory, and a [`StaticResolver`] for pinned
//! targets and tests.

pub mod dns;
pub mod types;

// Re-export primary types.
pub use dns::DnsResolver;
pub use types::{RecordResolver, ResolveFuture, SrvTarget, StaticResolver};

/// Errors for record resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("resolver configuration error: {0}")]
    Config(String),

    #[error("SRV lookup failed: {0}")]
    Lookup(String),
}
