//! WebSocket client.
//!
//! One connection per [`connect`] call, modelled as a task that owns the
//! socket. The caller holds a [`WsHandle`] for outbound commands and an
//! event receiver for inbound traffic. Keeping the socket inside its own
//! task means a pending read or write never outlives cancellation rules:
//! dropping or cancelling the handle winds the task down and the
//! [`WsEvent::Closed`] notification fires exactly once per connection.
//!
//! Reconnection is deliberately *not* handled here; the feed handler owns
//! the restart policy because a reconnect implies a book resync.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use ds_core::types::Timestamp;

use crate::adapter::Endpoint;

/// Events delivered to the connection's owner, in order.
#[derive(Debug)]
pub enum WsEvent {
    /// Handshake complete; queued outbound text is being flushed.
    Opened,
    /// A text frame, stamped at receipt.
    Frame {
        payload: String,
        ts_recv: Timestamp,
    },
    /// The connection is gone. Emitted exactly once, last.
    Closed { reason: String },
}

/// Commands accepted by the connection task.
#[derive(Debug)]
enum WsCommand {
    SendText(String),
    Close,
    Cancel,
}

/// Connection tuning knobs.
#[derive(Debug, Clone)]
pub struct WsOptions {
    /// Deadline for resolve + TCP + TLS + WS handshake.
    pub connect_timeout: Duration,
    /// Protocol-level ping cadence; `None` disables idle pings.
    pub ping_interval: Option<Duration>,
    /// TLS on by default; loopback tests disable it.
    pub tls: bool,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ping_interval: None,
            tls: true,
        }
    }
}

/// Command handle for one connection.
///
/// Cheap to clone; all senders feed the same FIFO. Sending before the
/// connection opens is legal: the text is flushed once the handshake
/// completes.
#[derive(Debug, Clone)]
pub struct WsHandle {
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
}

impl WsHandle {
    /// Queue a text frame.
    pub fn send_text(&self, text: String) {
        let _ = self.cmd_tx.send(WsCommand::SendText(text));
    }

    /// Graceful close: a WS close frame, then teardown.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }

    /// Hard close: drop the socket without the closing handshake.
    pub fn cancel(&self) {
        let _ = self.cmd_tx.send(WsCommand::Cancel);
    }
}

/// Open a connection to `endpoint` and return its command handle plus the
/// event stream. The task runs until the connection dies for any reason.
pub fn connect(endpoint: &Endpoint, opts: WsOptions) -> (WsHandle, mpsc::Receiver<WsEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::channel(1024);

    let scheme = if opts.tls { "wss" } else { "ws" };
    let url = format!(
        "{scheme}://{}:{}{}",
        endpoint.host, endpoint.port, endpoint.target
    );

    tokio::spawn(run_connection(url, opts, cmd_rx, event_tx));

    (WsHandle { cmd_tx }, event_rx)
}

/// The connection task: handshake, then a read/command/ping loop.
///
/// Every exit path funnels through the single `Closed` send at the bottom,
/// which is what guarantees the exactly-once close notification.
async fn run_connection(
    url: String,
    opts: WsOptions,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    event_tx: mpsc::Sender<WsEvent>,
) {
    let connect = tokio_tungstenite::connect_async(&url);
    let stream = match tokio::time::timeout(opts.connect_timeout, connect).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            tracing::warn!(url = %url, error = %e, "WebSocket connect failed");
            let _ = event_tx
                .send(WsEvent::Closed {
                    reason: format!("connect failed: {e}"),
                })
                .await;
            return;
        }
        Err(_) => {
            tracing::warn!(url = %url, "WebSocket connect deadline exceeded");
            let _ = event_tx
                .send(WsEvent::Closed {
                    reason: "connect timed out".to_string(),
                })
                .await;
            return;
        }
    };

    tracing::info!(url = %url, "WebSocket connected");
    if event_tx.send(WsEvent::Opened).await.is_err() {
        return;
    }

    let (mut sink, mut stream) = stream.split();

    // A disabled ping interval still needs a future for select; park it on
    // an effectively-infinite cadence.
    let ping_every = opts
        .ping_interval
        .unwrap_or(Duration::from_secs(60 * 60 * 24));
    let mut ping_timer = tokio::time::interval(ping_every);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_timer.tick().await; // first tick fires immediately; swallow it

    let reason: String = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(WsCommand::SendText(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        break format!("write failed: {e}");
                    }
                }
                Some(WsCommand::Close) => {
                    // Best effort closing handshake; the connection is
                    // ending either way.
                    let _ = sink.send(Message::Close(None)).await;
                    break "closed by client".to_string();
                }
                Some(WsCommand::Cancel) | None => {
                    break "cancelled".to_string();
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(payload))) => {
                    let frame = WsEvent::Frame {
                        payload,
                        ts_recv: Timestamp::now(),
                    };
                    if event_tx.send(frame).await.is_err() {
                        break "receiver dropped".to_string();
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        break format!("pong failed: {e}");
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!("pong received");
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "close frame received");
                    break "closed by server".to_string();
                }
                Some(Ok(_)) => {
                    // Binary / raw frames are not part of any depth
                    // protocol we speak.
                    tracing::trace!("ignoring non-text frame");
                }
                Some(Err(e)) => {
                    break format!("read failed: {e}");
                }
                None => {
                    break "stream ended".to_string();
                }
            },
            _ = ping_timer.tick() => {
                if opts.ping_interval.is_some() {
                    if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                        break format!("ping failed: {e}");
                    }
                }
            }
        }
    };

    tracing::info!(url = %url, reason = %reason, "WebSocket closed");
    let _ = event_tx.send(WsEvent::Closed { reason }).await;
}
