//! Scripted DXLink server for integration tests.
//!
//! Answers the handshake the way the production server does and, once a
//! `FEED_SUBSCRIPTION` arrives, replays the scripted `FEED_DATA` payloads.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// Feed channel the client requests.
pub const FEED_CHANNEL: u64 = 3;

/// Server behavior for one test.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Token the server accepts; `None` accepts any token.
    pub accept_token: Option<String>,
    /// `data` arrays sent as `FEED_DATA` frames after the subscription.
    pub feed_data: Vec<Value>,
    /// Send a `KEEPALIVE` before the scripted data.
    pub keepalive_before_data: bool,
    /// Close the socket after the scripted data.
    pub close_after_data: bool,
}

impl Script {
    /// Accept any token and send `feed_data`.
    #[must_use]
    pub fn with_data(feed_data: Vec<Value>) -> Self {
        Self {
            feed_data,
            ..Self::default()
        }
    }
}

/// Running mock server.
pub struct MockServer {
    url: String,
    received: Arc<Mutex<Vec<Value>>>,
    closed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Bind an ephemeral port and serve `script` to every connection.
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let task = {
            let received = Arc::clone(&received);
            let closed = Arc::clone(&closed);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(
                        stream,
                        script.clone(),
                        Arc::clone(&received),
                        Arc::clone(&closed),
                    ));
                }
            })
        };

        Self {
            url: format!("ws://{addr}/realtime"),
            received,
            closed,
            task,
        }
    }

    /// WebSocket URL of the server.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Every frame received so far.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    /// `type` of every frame received so far.
    pub fn received_types(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|frame| frame["type"].as_str().map(str::to_string))
            .collect()
    }

    /// Number of received frames of `kind`.
    pub fn count(&self, kind: &str) -> usize {
        self.received_types().iter().filter(|t| *t == kind).count()
    }

    /// Wait until a client connection has ended.
    pub async fn wait_closed(&self, bound: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + bound;
        while tokio::time::Instant::now() < deadline {
            if self.closed.load(Ordering::SeqCst) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until a frame of `kind` has been received.
    pub async fn wait_for(&self, kind: &str, bound: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + bound;
        while tokio::time::Instant::now() < deadline {
            if self.count(kind) > 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.count(kind) > 0
    }
}

/// Listener that accepts TCP connections and never answers the upgrade.
pub struct SilentServer {
    url: String,
    task: JoinHandle<()>,
}

impl SilentServer {
    /// Bind an ephemeral port and hold every accepted socket open.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        Self {
            url: format!("ws://{addr}/realtime"),
            task,
        }
    }

    /// WebSocket URL of the server.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for SilentServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    script: Script,
    received: Arc<Mutex<Vec<Value>>>,
    closed: Arc<AtomicBool>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    while let Some(Ok(message)) = ws.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        received.lock().push(frame.clone());

        let replies = match frame["type"].as_str() {
            Some("SETUP") => vec![
                json!({
                    "type": "SETUP",
                    "channel": 0,
                    "version": "0.1-mock",
                    "keepaliveTimeout": 60,
                    "acceptKeepaliveTimeout": 60
                }),
                auth_state("UNAUTHORIZED"),
            ],
            Some("AUTH") => {
                let token = frame["token"].as_str().unwrap_or_default();
                let accepted = script.accept_token.as_deref().is_none_or(|t| t == token);
                vec![auth_state(if accepted { "AUTHORIZED" } else { "UNAUTHORIZED" })]
            }
            Some("CHANNEL_REQUEST") => vec![json!({
                "type": "CHANNEL_OPENED",
                "channel": frame["channel"],
                "service": "FEED",
                "parameters": {"contract": "AUTO"}
            })],
            Some("FEED_SETUP") => vec![json!({
                "type": "FEED_CONFIG",
                "channel": frame["channel"],
                "dataFormat": "COMPACT",
                "aggregationPeriod": 0.1
            })],
            Some("FEED_SUBSCRIPTION") => {
                let mut replies = Vec::new();
                if script.keepalive_before_data {
                    replies.push(json!({"type": "KEEPALIVE", "channel": 0}));
                }
                replies.extend(script.feed_data.iter().map(|data| {
                    json!({"type": "FEED_DATA", "channel": FEED_CHANNEL, "data": data})
                }));
                replies
            }
            _ => Vec::new(),
        };

        let subscribed = frame["type"] == "FEED_SUBSCRIPTION";
        for reply in replies {
            if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                break;
            }
        }
        if subscribed && script.close_after_data {
            let _ = ws.close(None).await;
            break;
        }
    }

    closed.store(true, Ordering::SeqCst);
}

fn auth_state(state: &str) -> Value {
    json!({"type": "AUTH_STATE", "channel": 0, "state": state})
}
