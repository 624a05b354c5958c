//! WebSocket write pump — serialises outbound frames.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::connection::CLOSE_GRACE;

/// Writes queued frames to the WebSocket.
///
/// A queued Close frame is terminal: it is sent and the pump exits. On
/// cancellation or channel close the pump sends its own Close frame on
/// the way out so the peer sees a clean shutdown.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                match msg {
                    Some(msg) => {
                        let is_close = matches!(msg, tungstenite::Message::Close(_));
                        if let Err(e) = write.send(msg).await {
                            error!("WebSocket write error: {e}");
                            return;
                        }
                        if is_close {
                            debug!("close frame sent");
                            return;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let close = write.send(tungstenite::Message::Close(None));
    let _ = tokio::time::timeout(CLOSE_GRACE, close).await;
}
