//! Public types for the provider client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay between reconnection attempts unless overridden.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Interval between keepalive pings unless overridden.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Connection state for a provided service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Endpoint resolution or WebSocket handshake in progress.
    Connecting,
    /// Connected to the discovery endpoint; the service is announced.
    Connected,
    /// Connection lost, a retry is pending.
    Reconnecting,
}

/// Events emitted by the provider.
///
/// Any number of observers may subscribe; each gets every event emitted
/// after its subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderEvent {
    /// The named service connected to the discovery endpoint and is
    /// now announced. Fires again after every successful reconnect.
    Providing(String),
    /// The named service was removed, either by [`stop`] or because its
    /// connection dropped with reconnection disabled.
    ///
    /// [`stop`]: crate::Provider::stop
    Stopped(String),
}

/// Configuration for a [`Provider`](crate::Provider).
///
/// Set at construction, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Whether dropped connections are re-established. When `false` a
    /// dropped connection removes its registration.
    pub reconnect: bool,
    /// Fixed delay between reconnection attempts. Retries are unbounded
    /// and evenly spaced; there is no backoff.
    pub reconnect_delay: Duration,
    /// Interval of the shared keepalive timer pinging live connections.
    pub ping_interval: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            ping_interval: DEFAULT_PING_INTERVAL,
        }
    }
}
