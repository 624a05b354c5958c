//! Provider side of a service-discovery mesh.
//!
//! Announces named local services to a remote discovery endpoint over
//! persistent WebSocket connections, keeps each announcement alive with
//! a shared keepalive timer, and re-establishes dropped connections on a
//! fixed delay.

pub mod client;
mod connection;
mod endpoint;
pub mod error;
mod keepalive;
mod pumps;
mod reconnect;
pub mod types;

pub use client::Provider;
pub use error::ProviderError;
pub use types::{ConnectionState, ProviderConfig, ProviderEvent};
