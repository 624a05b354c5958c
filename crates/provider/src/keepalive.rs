//! Shared keepalive timer pinging every live connection.

use tokio_tungstenite::tungstenite;
use tracing::{debug, error};

use crate::connection::DownReason;
use crate::reconnect::{self, ProviderContext};

/// Starts the keepalive task unless one is already running.
///
/// Called on every Connected transition. The timer is shared by all of
/// the client's registrations and lives only while at least one has a
/// connection to ping.
pub(crate) fn ensure_running(ctx: &ProviderContext) {
    let Ok(mut slot) = ctx.keepalive.lock() else {
        return;
    };
    if slot.as_ref().is_some_and(|task| !task.is_finished()) {
        return;
    }
    debug!(
        interval_ms = ctx.config.ping_interval.as_millis() as u64,
        "starting keepalive timer"
    );
    *slot = Some(tokio::spawn(run(ctx.clone())));
}

/// Aborts the keepalive task. Called when the registry empties.
pub(crate) fn stop(ctx: &ProviderContext) {
    let Ok(mut slot) = ctx.keepalive.lock() else {
        return;
    };
    if let Some(task) = slot.take() {
        debug!("stopping keepalive timer");
        task.abort();
    }
}

/// Timer loop. Each tick pings every registration holding a live
/// connection; a refused ping means that connection is gone and its
/// registration goes through the drop handler. A tick that finds no
/// live connection ends the task; the next Connected transition starts
/// a fresh one.
async fn run(ctx: ProviderContext) {
    let mut interval = tokio::time::interval(ctx.config.ping_interval);
    interval.tick().await; // Skip immediate first tick.

    loop {
        interval.tick().await;

        let targets: Vec<(String, u64, tokio::sync::mpsc::Sender<tungstenite::Message>)> = ctx
            .registry
            .lock()
            .await
            .iter()
            .filter_map(|(name, reg)| {
                reg.handle
                    .as_ref()
                    .map(|handle| (name.clone(), reg.epoch, handle.write_tx.clone()))
            })
            .collect();

        if targets.is_empty() {
            break;
        }

        for (name, epoch, write_tx) in targets {
            let ping = tungstenite::Message::Ping(vec![].into());
            if write_tx.send(ping).await.is_err() {
                error!(service = %name, "keepalive ping failed");
                reconnect::connection_down(
                    &ctx,
                    &name,
                    epoch,
                    DownReason::Errored("keepalive ping failed".into()),
                )
                .await;
            }
        }
    }

    debug!("no live connections, keepalive timer stopping");
    if let Ok(mut slot) = ctx.keepalive.lock() {
        *slot = None;
    }

    // A connection that went live between the empty snapshot and the slot
    // clearing saw an occupied slot and did not start a timer; restart
    // for it here.
    let revive = ctx
        .registry
        .lock()
        .await
        .values()
        .any(|reg| reg.handle.is_some());
    if revive {
        ensure_running(&ctx);
    }
}
