//! WebSocket read pump — watches connection liveness.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::connection::DownReason;

/// Reads messages from the WebSocket until the connection drops.
///
/// The discovery endpoint pushes nothing the provider consumes; the pump
/// answers server pings and watches for the connection going away. Returns
/// the reason the connection went down, or `None` when cancelled (local
/// teardown is not a drop to react to).
pub(crate) async fn read_pump<S>(
    mut read: S,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) -> Option<DownReason>
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,

            msg = read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        trace!("received ping, sending pong");
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    Some(Ok(tungstenite::Message::Pong(_))) => {
                        trace!("received pong");
                    }
                    Some(Ok(tungstenite::Message::Close(_))) => {
                        debug!("received close frame");
                        return Some(DownReason::Closed);
                    }
                    Some(Ok(_)) => {} // Text/Binary — ignore
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        return Some(DownReason::Errored(e.to_string()));
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        return Some(DownReason::Closed);
                    }
                }
            }
        }
    }
}
