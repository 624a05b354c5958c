//! Resolver trait and target types.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::ResolveError;

/// A concrete host/port answered by a record lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrvTarget {
    pub host: String,
    pub port: u16,
}

impl SrvTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// A boxed future returned by [`RecordResolver::lookup`].
pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<SrvTarget>, ResolveError>> + Send + 'a>>;

/// Looks up the concrete location published for a symbolic host name.
///
/// The provider consults the resolver on every connection attempt, so a
/// changed record is picked up on the next reconnect without restarting
/// anything. Returning `Ok(None)` means "no record published"; the caller
/// decides what to fall back to.
pub trait RecordResolver: Send + Sync {
    fn lookup<'a>(&'a self, host: &'a str) -> ResolveFuture<'a>;
}

/// Resolver with a fixed answer table.
///
/// Useful when the discovery host is pinned in configuration rather than
/// published in DNS, and for exercising resolution paths in tests.
#[derive(Debug, Default)]
pub struct StaticResolver {
    targets: HashMap<String, SrvTarget>,
}

impl StaticResolver {
    /// Creates an empty resolver (every lookup answers `None`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fixed target for a host name.
    pub fn with_target(mut self, host: impl Into<String>, target: SrvTarget) -> Self {
        self.targets.insert(host.into(), target);
        self
    }
}

impl RecordResolver for StaticResolver {
    fn lookup<'a>(&'a self, host: &'a str) -> ResolveFuture<'a> {
        Box::pin(async move { Ok(self.targets.get(host).cloned()) })
    }
}
