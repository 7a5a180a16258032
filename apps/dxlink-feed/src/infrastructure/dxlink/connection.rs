//! DXLink Connection Task
//!
//! One tokio task owns each socket. It runs the receive loop, feeds frames
//! through the [`Handshake`], performs every send the handshake asks for, and
//! reports [`FeedEvent`]s to the owner's sink. The owner keeps a
//! [`ConnectionHandle`] and never touches the socket directly.
//!
//! # Teardown
//!
//! `close()` cancels the task; `shutdown(bound)` cancels and joins it, aborting
//! the task if it has not finished within `bound`. Both are idempotent, and
//! dropping the handle cancels the task.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::codec::CodecError;
use super::handshake::{Effect, Handshake, HandshakeError};
use super::messages::ClientMessage;
use crate::application::ports::FeedEventSink;
use crate::domain::streaming::FeedEvent;
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Time allowed for the close frame to go out during teardown.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// Error Types
// =============================================================================

/// Feed connection errors.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Could not reach or open the WebSocket.
    #[error("connection failed: {0}")]
    Connection(String),

    /// WebSocket failure after the connection was open.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The server rejected the feed token.
    #[error("feed token rejected after {attempts} attempts")]
    AuthRejected {
        /// `AUTH` messages sent.
        attempts: u32,
    },

    /// The server reported an error before the feed was ready.
    #[error("protocol error {error}: {message}")]
    Protocol {
        /// Error code.
        error: String,
        /// Description.
        message: String,
    },

    /// A frame could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An outbound frame could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The connection ended.
    #[error("connection closed")]
    Closed,
}

impl From<HandshakeError> for FeedError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::AuthRejected { attempts } => Self::AuthRejected { attempts },
        }
    }
}

// =============================================================================
// Connection Handle
// =============================================================================

/// Owner's side of a running connection task.
#[derive(Debug)]
pub struct ConnectionHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), FeedError>>>,
}

impl ConnectionHandle {
    /// Ask the task to close the socket and stop. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the task has stopped (or was already joined).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Close and join the task, aborting it if `bound` elapses.
    ///
    /// Returns the task's own outcome the first time; later calls return `Ok`.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the connection, if any.
    pub async fn shutdown(&mut self, bound: Duration) -> Result<(), FeedError> {
        self.close();

        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        match tokio::time::timeout(bound, &mut task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => Err(FeedError::Connection(format!(
                "connection task failed: {join_error}"
            ))),
            Err(_) => {
                warn!(?bound, "Connection task did not stop in time, aborting");
                task.abort();
                Ok(())
            }
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Opens DXLink connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedConnection;

impl FeedConnection {
    /// Connect to `url` and spawn the task that drives `handshake`.
    ///
    /// The TCP connect, TLS and WebSocket upgrade together must finish within
    /// `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Connection`] if the WebSocket cannot be opened in time.
    pub async fn open<S>(
        url: &str,
        connect_timeout: Duration,
        handshake: Handshake,
        sink: S,
    ) -> Result<ConnectionHandle, FeedError>
    where
        S: FeedEventSink,
    {
        info!(url = %url, "Connecting to DXLink");

        let (ws_stream, _response) =
            tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| {
                    FeedError::Connection(format!("{url}: timed out after {connect_timeout:?}"))
                })?
                .map_err(|e| FeedError::Connection(format!("{url}: {e}")))?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(ws_stream, handshake, sink, cancel.clone()));

        Ok(ConnectionHandle {
            cancel,
            task: Some(task),
        })
    }
}

async fn run<S>(
    ws_stream: WsStream,
    mut handshake: Handshake,
    mut sink: S,
    cancel: CancellationToken,
) -> Result<(), FeedError>
where
    S: FeedEventSink,
{
    metrics::record_connection_opened();
    let (mut write, mut read) = ws_stream.split();

    let outcome = drive(&mut write, &mut read, &mut handshake, &mut sink, &cancel).await;
    handshake.on_close();

    if tokio::time::timeout(CLOSE_FRAME_TIMEOUT, write.close())
        .await
        .is_err()
    {
        debug!("Close frame not flushed in time");
    }
    metrics::record_connection_closed();

    let reason = match &outcome {
        Ok(()) => None,
        Err(e) => {
            warn!(error = %e, "DXLink connection ended with error");
            Some(e.to_string())
        }
    };
    sink.handle(FeedEvent::Closed { reason });

    outcome
}

async fn drive<S>(
    write: &mut WsWrite,
    read: &mut WsRead,
    handshake: &mut Handshake,
    sink: &mut S,
    cancel: &CancellationToken,
) -> Result<(), FeedError>
where
    S: FeedEventSink,
{
    if apply(handshake.on_open(), write, sink).await? {
        return Ok(());
    }

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("Connection cancelled by owner");
                return Ok(());
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_frame_received();
                        let message = match handshake.codec().decode_message(&text) {
                            Ok(message) => message,
                            Err(e) => {
                                metrics::record_decode_error();
                                debug!(error = %e, "Skipping undecodable frame");
                                continue;
                            }
                        };
                        let effects = handshake.on_message(message)?;
                        if apply(effects, write, sink).await? {
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "Server sent close frame");
                        return Err(FeedError::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        info!("DXLink stream ended");
                        return Err(FeedError::Closed);
                    }
                }
            }
        }
    }
}

/// Apply handshake effects. Returns `true` when the connection should close.
async fn apply<S>(
    effects: Vec<Effect>,
    write: &mut WsWrite,
    sink: &mut S,
) -> Result<bool, FeedError>
where
    S: FeedEventSink,
{
    for effect in effects {
        match effect {
            Effect::Send(message) => send(write, &message).await?,
            Effect::Ready => sink.handle(FeedEvent::Ready),
            Effect::Records(records) => {
                if let Some(first) = records.first() {
                    metrics::record_records_decoded(first.kind(), records.len());
                }
                sink.handle(FeedEvent::Records(records));
            }
            Effect::ServerError { error, message } => {
                sink.handle(FeedEvent::ServerError { error, message });
            }
            Effect::Close => return Ok(true),
        }
    }
    Ok(false)
}

async fn send(write: &mut WsWrite, message: &ClientMessage) -> Result<(), FeedError> {
    if matches!(message, ClientMessage::Auth(_)) {
        metrics::record_auth_attempt();
    }
    let json = message.to_json()?;
    debug!(kind = message.kind(), "Sending frame");
    write.send(Message::Text(json.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::dxlink::codec::CompactCodec;
    use crate::infrastructure::dxlink::handshake::HandshakeConfig;

    #[tokio::test]
    async fn shutdown_without_task_is_ok() {
        let mut handle = ConnectionHandle {
            cancel: CancellationToken::new(),
            task: None,
        };
        assert!(handle.is_finished());
        assert!(handle.shutdown(Duration::from_millis(10)).await.is_ok());
        handle.close();
    }

    #[tokio::test]
    async fn shutdown_aborts_stuck_task() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), FeedError>(())
        });
        let mut handle = ConnectionHandle {
            cancel: CancellationToken::new(),
            task: Some(task),
        };

        assert!(!handle.is_finished());
        assert!(handle.shutdown(Duration::from_millis(20)).await.is_ok());
        assert!(handle.is_finished());
        // Second call is a no-op.
        assert!(handle.shutdown(Duration::from_millis(20)).await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_returns_task_outcome() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            token.cancelled().await;
            Err::<(), _>(FeedError::AuthRejected { attempts: 3 })
        });
        let mut handle = ConnectionHandle {
            cancel,
            task: Some(task),
        };

        let outcome = handle.shutdown(Duration::from_secs(1)).await;
        assert!(matches!(outcome, Err(FeedError::AuthRejected { attempts: 3 })));
    }

    #[tokio::test]
    async fn open_unreachable_url_fails() {
        let handshake = Handshake::new(
            HandshakeConfig::default(),
            "token",
            CompactCodec::default(),
            Vec::new(),
        );
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let result = FeedConnection::open(
            "ws://127.0.0.1:1/realtime",
            Duration::from_secs(1),
            handshake,
            tx,
        )
        .await;
        assert!(matches!(result, Err(FeedError::Connection(_))));
    }

    #[tokio::test]
    async fn open_times_out_on_stalled_upgrade() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let handshake = Handshake::new(
            HandshakeConfig::default(),
            "token",
            CompactCodec::default(),
            Vec::new(),
        );
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let started = std::time::Instant::now();
        let result = FeedConnection::open(
            &format!("ws://{addr}/realtime"),
            Duration::from_millis(200),
            handshake,
            tx,
        )
        .await;

        assert!(matches!(result, Err(FeedError::Connection(ref m)) if m.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(2));
        server.abort();
    }

    #[test]
    fn handshake_error_maps_to_auth_rejected() {
        let err: FeedError = HandshakeError::AuthRejected { attempts: 2 }.into();
        assert_eq!(err.to_string(), "feed token rejected after 2 attempts");
    }
}
