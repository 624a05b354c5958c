//! The provider client: registration surface, validation, and queries.

use std::collections::HashMap;
use std::sync::Arc;

use beacon_resolver::{DnsResolver, RecordResolver};
use tokio::sync::broadcast;
use tracing::info;
use url::Url;

use crate::endpoint;
use crate::error::ProviderError;
use crate::reconnect::{self, ProviderContext, Registration};
use crate::types::{ConnectionState, ProviderConfig, ProviderEvent};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Client announcing local services to a discovery endpoint.
///
/// Each provided service gets its own persistent WebSocket connection
/// carrying the announcement in its URL; the connection staying open is
/// the liveness signal. A shared timer pings live connections, and
/// dropped connections are re-established on a fixed delay (or removed,
/// with reconnection disabled).
///
/// All background work runs as detached Tokio tasks: nothing here keeps
/// the process alive on its own.
pub struct Provider {
    endpoint: Url,
    /// The endpoint text named a port, so connect attempts never go
    /// through record resolution.
    explicit_port: bool,
    ctx: ProviderContext,
}

impl Provider {
    /// Creates a provider announcing to `endpoint`, resolving symbolic
    /// hosts through the system DNS configuration.
    ///
    /// The endpoint scheme defaults to `ws`; any query string on the
    /// endpoint itself is dropped.
    pub fn new(endpoint: &str, config: ProviderConfig) -> Result<Self, ProviderError> {
        let resolver = Arc::new(DnsResolver::from_system_conf()?);
        Self::with_resolver(endpoint, config, resolver)
    }

    /// Creates a provider with a custom discovery-record resolver.
    pub fn with_resolver(
        endpoint: &str,
        config: ProviderConfig,
        resolver: Arc<dyn RecordResolver>,
    ) -> Result<Self, ProviderError> {
        let explicit_port = endpoint::names_explicit_port(endpoint);
        let endpoint = endpoint::normalize_endpoint(endpoint)?;
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            endpoint,
            explicit_port,
            ctx: ProviderContext::new(config, resolver, events_tx),
        })
    }

    /// Announces a local service listening on `port`.
    ///
    /// Extra options travel as URL query parameters next to `service`
    /// and `port`. The connection is established in the background:
    /// watch [`subscribe`](Self::subscribe) or poll
    /// [`connected`](Self::connected) for the outcome. Returns `&self`
    /// so registrations chain.
    pub async fn provide(
        &self,
        name: &str,
        port: u16,
        options: Option<HashMap<String, String>>,
    ) -> Result<&Self, ProviderError> {
        if name.is_empty() {
            return Err(ProviderError::InvalidName);
        }
        if port == 0 {
            return Err(ProviderError::InvalidPort);
        }

        let url = endpoint::service_url(&self.endpoint, name, port, options.as_ref());
        let epoch = self.ctx.next_epoch();
        {
            let mut registry = self.ctx.registry.lock().await;
            if registry.contains_key(name) {
                return Err(ProviderError::AlreadyProvided(name.to_string()));
            }
            registry.insert(
                name.to_string(),
                Registration {
                    url,
                    explicit_port: self.explicit_port,
                    state: ConnectionState::Connecting,
                    epoch,
                    handle: None,
                },
            );
        }

        info!(service = %name, port, "providing service");
        tokio::spawn(reconnect::connect_registration(
            self.ctx.clone(),
            name.to_string(),
            epoch,
        ));
        Ok(self)
    }

    /// Stops providing a service. Never fails; an unknown name is a
    /// silent no-op.
    ///
    /// A live connection is closed gracefully, a pending connect or
    /// retry dies on its existence re-check, and one `Stopped` event is
    /// emitted.
    pub async fn stop(&self, name: &str) {
        let Some(reg) = reconnect::cleanup(&self.ctx, name, None).await else {
            return;
        };
        if let Some(conn) = reg.handle {
            tokio::spawn(conn.close());
        }
        info!(service = %name, "stopped providing");
    }

    /// Returns `true` iff the named service is currently connected.
    /// Unknown names answer `false`.
    pub async fn connected(&self, name: &str) -> bool {
        self.state(name).await == Some(ConnectionState::Connected)
    }

    /// Returns the connection state for a provided service.
    pub async fn state(&self, name: &str) -> Option<ConnectionState> {
        self.ctx.registry.lock().await.get(name).map(|reg| reg.state)
    }

    /// Names of all currently provided services, in no particular order.
    pub async fn services(&self) -> Vec<String> {
        self.ctx.registry.lock().await.keys().cloned().collect()
    }

    /// Subscribes to provider events. Every subscriber receives every
    /// event emitted after its subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.ctx.events_tx.subscribe()
    }

    /// Stops every provided service.
    pub async fn shutdown(&self) {
        for name in self.services().await {
            self.stop(&name).await;
        }
    }
}
