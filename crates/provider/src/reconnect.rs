//! Connection lifecycle transitions and the fixed-delay reconnection policy.
//!
//! Contains the shared [`ProviderContext`], the registry entry type, and
//! the free functions driving connect attempts and drop handling.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use beacon_resolver::RecordResolver;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::connection::{Connection, DownReason};
use crate::endpoint;
use crate::keepalive;
use crate::types::{ConnectionState, ProviderConfig, ProviderEvent};

/// Shared state passed to free functions for connection lifecycle and
/// reconnection. Avoids threading six separate Arc parameters.
#[derive(Clone)]
pub(crate) struct ProviderContext {
    pub(crate) config: ProviderConfig,
    pub(crate) resolver: Arc<dyn RecordResolver>,
    pub(crate) registry: Arc<Mutex<HashMap<String, Registration>>>,
    pub(crate) events_tx: broadcast::Sender<ProviderEvent>,
    /// Handle of the running keepalive task, if any.
    pub(crate) keepalive: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
    epochs: Arc<AtomicU64>,
}

impl ProviderContext {
    pub(crate) fn new(
        config: ProviderConfig,
        resolver: Arc<dyn RecordResolver>,
        events_tx: broadcast::Sender<ProviderEvent>,
    ) -> Self {
        Self {
            config,
            resolver,
            registry: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            keepalive: Arc::new(std::sync::Mutex::new(None)),
            epochs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Hands out a client-unique marker for one connect attempt.
    pub(crate) fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::Relaxed)
    }
}

/// One provided service's entry in the registry.
pub(crate) struct Registration {
    /// Connection URL with the announcement query baked in; reused
    /// verbatim for every reconnect attempt.
    pub(crate) url: Url,
    /// The configured endpoint named a port in its text, so resolution
    /// is skipped even when `url.port()` reads `None` for a
    /// scheme-default port.
    pub(crate) explicit_port: bool,
    pub(crate) state: ConnectionState,
    /// Marker of the connect attempt this entry currently belongs to.
    /// Reports carrying any other value come from a superseded
    /// connection and are discarded.
    pub(crate) epoch: u64,
    pub(crate) handle: Option<Connection>,
}

/// Removes a registration and emits its terminal `Stopped`, both under
/// the registry lock so no later event for the name can slip in front.
/// With `epoch` set the removal only applies while the entry still
/// belongs to that connect attempt; a name stopped and provided again
/// meanwhile is left alone. Stops the keepalive timer with the last
/// registration. Returns the removed entry for teardown, `None` when
/// nothing was removed.
pub(crate) async fn cleanup(
    ctx: &ProviderContext,
    name: &str,
    epoch: Option<u64>,
) -> Option<Registration> {
    let mut registry = ctx.registry.lock().await;
    if let Some(expected) = epoch {
        if registry.get(name).is_none_or(|reg| reg.epoch != expected) {
            debug!(service = %name, "removal for superseded connection skipped");
            return None;
        }
    }
    let reg = registry.remove(name)?;
    if registry.is_empty() {
        keepalive::stop(ctx);
    }
    let _ = ctx.events_tx.send(ProviderEvent::Stopped(name.to_string()));
    Some(reg)
}

/// Reacts to a dropped connection: unexpected close, read error, connect
/// failure, or keepalive failure.
///
/// Reports for unknown names, stale epochs, or registrations already in
/// `Reconnecting` are ignored, which makes duplicate reports harmless.
/// With reconnection disabled the registration is removed exactly as
/// [`stop`](crate::Provider::stop) would.
pub(crate) async fn connection_down(
    ctx: &ProviderContext,
    name: &str,
    epoch: u64,
    reason: DownReason,
) {
    let old_handle;
    let retrying;
    {
        let mut registry = ctx.registry.lock().await;
        let Some(reg) = registry.get_mut(name) else {
            debug!(service = %name, "drop report for unknown service ignored");
            return;
        };
        if reg.epoch != epoch {
            debug!(service = %name, "drop report from superseded connection ignored");
            return;
        }
        if reg.state == ConnectionState::Reconnecting {
            return;
        }
        warn!(service = %name, %reason, "connection down");
        old_handle = reg.handle.take();
        retrying = ctx.config.reconnect;
        if retrying {
            reg.state = ConnectionState::Reconnecting;
        }
    }

    if retrying {
        let delay = ctx.config.reconnect_delay;
        debug!(service = %name, delay_ms = delay.as_millis() as u64, "retrying after delay");
        tokio::spawn(retry_after(ctx.clone(), name.to_string(), epoch, delay));
    } else {
        info!(service = %name, "reconnect disabled, stopping");
        // Epoch is re-verified under the removal lock: a stop plus a
        // fresh provide landing since the check above must keep the new
        // registration.
        cleanup(ctx, name, Some(epoch)).await;
    }
    drop(old_handle);
}

/// Sleeps the fixed reconnect delay, then retries iff the registration
/// still exists and is still waiting. There is no token to cancel a
/// pending retry; this re-check is the cancellation guard.
///
/// Returns a boxed future to break the recursive type cycle with
/// [`Connection::open`] (whose read pump reports the drop that spawns
/// this function).
pub(crate) fn retry_after(
    ctx: ProviderContext,
    name: String,
    epoch: u64,
    delay: Duration,
) -> Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        tokio::time::sleep(delay).await;

        let next_epoch = {
            let mut registry = ctx.registry.lock().await;
            let Some(reg) = registry.get_mut(&name) else {
                debug!(service = %name, "service stopped during retry delay");
                return;
            };
            if reg.epoch != epoch || reg.state != ConnectionState::Reconnecting {
                debug!(service = %name, "retry superseded");
                return;
            }
            let next = ctx.next_epoch();
            reg.epoch = next;
            reg.state = ConnectionState::Connecting;
            next
        };

        connect_registration(ctx, name, next_epoch).await;
    })
}

/// Runs one connect attempt for a registration: resolve the stored URL,
/// open the WebSocket, install the handle.
///
/// The registration is re-checked under the lock after the handshake; a
/// stop or supersession that happened meanwhile wins and the fresh
/// connection is torn down again.
pub(crate) async fn connect_registration(ctx: ProviderContext, name: String, epoch: u64) {
    let (url, explicit_port) = {
        let registry = ctx.registry.lock().await;
        let Some(reg) = registry.get(&name) else {
            return;
        };
        if reg.epoch != epoch || reg.state != ConnectionState::Connecting {
            return;
        }
        (reg.url.clone(), reg.explicit_port)
    };

    let target = endpoint::resolve(&url, explicit_port, ctx.resolver.as_ref()).await;
    info!(service = %name, url = %target, "connecting");

    match Connection::open(&target, &ctx, &name, epoch).await {
        Ok(conn) => {
            let mut registry = ctx.registry.lock().await;
            match registry.get_mut(&name) {
                Some(reg) if reg.epoch == epoch && reg.state == ConnectionState::Connecting => {
                    reg.handle = Some(conn);
                    reg.state = ConnectionState::Connected;
                    info!(service = %name, "providing");
                    // Emitted before the lock is released: a stop
                    // landing after install orders its Stopped strictly
                    // after this event.
                    let _ = ctx.events_tx.send(ProviderEvent::Providing(name.clone()));
                    keepalive::ensure_running(&ctx);
                }
                _ => {
                    debug!(service = %name, "registration gone before handshake finished");
                }
            }
        }
        Err(e) => {
            warn!(service = %name, error = %e, "connect failed");
            connection_down(&ctx, &name, epoch, DownReason::Errored(e.to_string())).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use beacon_resolver::StaticResolver;

    fn test_ctx(reconnect: bool, reconnect_delay: Duration) -> ProviderContext {
        let config = ProviderConfig {
            reconnect,
            reconnect_delay,
            ping_interval: Duration::from_secs(60),
        };
        let (events_tx, _) = broadcast::channel(16);
        ProviderContext::new(config, Arc::new(StaticResolver::new()), events_tx)
    }

    async fn insert(ctx: &ProviderContext, name: &str, state: ConnectionState, epoch: u64) {
        ctx.registry.lock().await.insert(
            name.to_string(),
            Registration {
                url: Url::parse("ws://127.0.0.1:9/?service=web&port=8080").unwrap(),
                explicit_port: true,
                state,
                epoch,
                handle: None,
            },
        );
    }

    async fn state_of(ctx: &ProviderContext, name: &str) -> Option<ConnectionState> {
        ctx.registry.lock().await.get(name).map(|r| r.state)
    }

    #[tokio::test]
    async fn down_report_for_unknown_service_is_ignored() {
        let ctx = test_ctx(true, Duration::from_millis(50));
        connection_down(&ctx, "ghost", 0, DownReason::Closed).await;
        assert!(ctx.registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn down_report_with_stale_epoch_is_ignored() {
        let ctx = test_ctx(true, Duration::from_millis(50));
        insert(&ctx, "web", ConnectionState::Connected, 7).await;

        connection_down(&ctx, "web", 3, DownReason::Closed).await;
        assert_eq!(state_of(&ctx, "web").await, Some(ConnectionState::Connected));
    }

    #[tokio::test]
    async fn down_report_marks_reconnecting() {
        let ctx = test_ctx(true, Duration::from_secs(60));
        insert(&ctx, "web", ConnectionState::Connected, 7).await;

        connection_down(&ctx, "web", 7, DownReason::Closed).await;
        assert_eq!(
            state_of(&ctx, "web").await,
            Some(ConnectionState::Reconnecting)
        );

        // A second report for the same epoch changes nothing.
        connection_down(&ctx, "web", 7, DownReason::Errored("ping failed".into())).await;
        assert_eq!(
            state_of(&ctx, "web").await,
            Some(ConnectionState::Reconnecting)
        );
    }

    #[tokio::test]
    async fn down_report_with_reconnect_disabled_removes_and_emits() {
        let ctx = test_ctx(false, Duration::from_millis(50));
        let mut events = ctx.events_tx.subscribe();
        insert(&ctx, "web", ConnectionState::Connected, 7).await;

        connection_down(&ctx, "web", 7, DownReason::Closed).await;

        assert!(ctx.registry.lock().await.is_empty());
        assert_eq!(events.try_recv(), Ok(ProviderEvent::Stopped("web".into())));
    }

    #[tokio::test]
    async fn down_report_schedules_a_retry_that_fires() {
        let ctx = test_ctx(true, Duration::from_millis(20));
        insert(&ctx, "web", ConnectionState::Connected, 999).await;

        connection_down(&ctx, "web", 999, DownReason::Closed).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        // The scheduled retry consumed epoch 999 and re-entered the
        // connect cycle against the refused address.
        let registry = ctx.registry.lock().await;
        let reg = registry.get("web").expect("still registered");
        assert_ne!(reg.epoch, 999);
        assert_ne!(reg.state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn cleanup_ignores_superseded_epoch() {
        let ctx = test_ctx(false, Duration::from_millis(50));
        let mut events = ctx.events_tx.subscribe();
        // The name was stopped and provided again; epoch 7 is history.
        insert(&ctx, "web", ConnectionState::Connecting, 9).await;

        assert!(cleanup(&ctx, "web", Some(7)).await.is_none());

        assert_eq!(
            state_of(&ctx, "web").await,
            Some(ConnectionState::Connecting)
        );
        assert_eq!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retry_is_noop_after_stop() {
        let ctx = test_ctx(true, Duration::from_secs(3));
        // The registration was removed while the retry slept.
        let handle = tokio::spawn(retry_after(
            ctx.clone(),
            "web".into(),
            5,
            Duration::from_secs(3),
        ));

        handle.await.expect("retry task");
        assert!(ctx.registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn retry_fires_for_waiting_registration() {
        let ctx = test_ctx(true, Duration::from_secs(60));
        insert(&ctx, "web", ConnectionState::Reconnecting, 5).await;

        // Connecting to 127.0.0.1:9 is refused; the attempt must still
        // consume the old epoch and re-enter the lifecycle.
        retry_after(ctx.clone(), "web".into(), 5, Duration::from_millis(10)).await;

        let registry = ctx.registry.lock().await;
        let reg = registry.get("web").expect("still registered");
        assert_ne!(reg.epoch, 5);
        assert_ne!(reg.state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn retry_superseded_by_state_change_is_noop() {
        let ctx = test_ctx(true, Duration::from_secs(60));
        insert(&ctx, "web", ConnectionState::Connected, 5).await;

        retry_after(ctx.clone(), "web".into(), 5, Duration::from_millis(10)).await;

        let registry = ctx.registry.lock().await;
        let reg = registry.get("web").expect("still registered");
        assert_eq!(reg.epoch, 5);
        assert_eq!(reg.state, ConnectionState::Connected);
    }

    #[test]
    fn epochs_are_never_reused() {
        let ctx = test_ctx(true, Duration::from_millis(50));
        let a = ctx.next_epoch();
        let b = ctx.next_epoch();
        assert_ne!(a, b);
    }
}
