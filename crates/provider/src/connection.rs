//! WebSocket transport handle for a single registration.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::pumps;
use crate::reconnect::{self, ProviderContext};

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const CLOSE_GRACE: Duration = Duration::from_secs(1);

const WRITE_CHANNEL_CAPACITY: usize = 32;

/// Errors opening a connection. Internal: a failed open feeds the
/// reconnection policy instead of surfacing to the caller.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ConnectError {
    #[error("connect timed out")]
    Timeout,

    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),
}

/// Why a connection went down, as observed by the read pump.
#[derive(Debug)]
pub(crate) enum DownReason {
    Closed,
    Errored(String),
}

impl std::fmt::Display for DownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownReason::Closed => write!(f, "closed by peer"),
            DownReason::Errored(e) => write!(f, "transport error: {e}"),
        }
    }
}

/// Live transport for one registration: a write channel feeding the write
/// pump, plus the pump tasks and their cancellation token.
///
/// Dropping the handle cancels and aborts the pumps without a close
/// handshake; [`Connection::close`] tears down gracefully.
pub(crate) struct Connection {
    pub(crate) write_tx: mpsc::Sender<tungstenite::Message>,
    pub(crate) cancel: CancellationToken,
    pub(crate) read_task: Option<JoinHandle<()>>,
    pub(crate) write_task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Opens the WebSocket and spawns the read/write pumps.
    ///
    /// When the read pump later observes a close or error, it reports the
    /// drop to the transition handler under `name` and `epoch`; a handle
    /// superseded by then carries a stale epoch and the report is ignored.
    pub(crate) async fn open(
        url: &Url,
        ctx: &ProviderContext,
        name: &str,
        epoch: u64,
    ) -> Result<Self, ConnectError> {
        let (ws_stream, _response) =
            tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| ConnectError::Timeout)??;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(WRITE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let write_task = tokio::spawn(pumps::write::write_pump(write, write_rx, cancel.clone()));

        let read_task = {
            let ctx = ctx.clone();
            let name = name.to_string();
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Some(reason) = pumps::read::read_pump(read, write_tx, cancel).await {
                    reconnect::connection_down(&ctx, &name, epoch, reason).await;
                }
            })
        };

        Ok(Self {
            write_tx,
            cancel,
            read_task: Some(read_task),
            write_task: Some(write_task),
        })
    }

    /// Gracefully closes the connection: the peer sees a Close frame
    /// before the pumps are torn down.
    pub(crate) async fn close(mut self) {
        let _ = self
            .write_tx
            .send(tungstenite::Message::Close(None))
            .await;
        if let Some(mut write_task) = self.write_task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut write_task).await.is_err() {
                write_task.abort();
            }
        }
        self.cancel.cancel();
        if let Some(mut read_task) = self.read_task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut read_task).await.is_err() {
                read_task.abort();
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = &self.read_task {
            task.abort();
        }
        if let Some(task) = &self.write_task {
            task.abort();
        }
    }
}
