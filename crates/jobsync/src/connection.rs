//! Job channel connection lifecycle.
//!
//! The connection task opens the per-user WebSocket, runs a session
//! (resync, heartbeat, inbound routing, outbound queue) until the socket
//! drops, then schedules a reconnect. Deliberate disconnects cancel the
//! task through its [`CancellationToken`], and no reconnect follows.
//!
//! [`ChannelLink`] is the shared view of the connection: its published
//! [`ConnectionState`] and the outbound queue of the live session.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::error::ChannelError;
use crate::messages::ClientMessage;
use crate::reconnect::{next_delay, wait_for_retry, with_jitter};
use crate::router::{route_text, RouteOutcome};
use crate::store::JobStore;
use crate::subscriptions::SubscriptionManager;

/// The raw WebSocket stream type used for the job channel.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
    /// The channel dropped unexpectedly; a reconnect attempt is pending.
    ReconnectScheduled,
}

/// Connection state as seen by consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Why the channel is down, while a reconnect is pending.
    pub error: Option<String>,
    /// Reconnect attempts since the last successful connection.
    pub attempt: u32,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Shared connection state plus the outbound queue of the live session.
pub struct ChannelLink {
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
}

impl ChannelLink {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            state,
            outbound: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    /// Queue a message on the live session.
    ///
    /// Returns `false` without queuing when no session is connected.
    pub fn send(&self, message: ClientMessage) -> bool {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    pub(crate) fn attach(&self, tx: mpsc::UnboundedSender<ClientMessage>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        self.state.send_replace(ConnectionState {
            status: ConnectionStatus::Connected,
            error: None,
            attempt: 0,
        });
    }

    pub(crate) fn detach(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub(crate) fn mark_reconnect_scheduled(&self, error: String, attempt: u32) {
        self.detach();
        self.state.send_replace(ConnectionState {
            status: ConnectionStatus::ReconnectScheduled,
            error: Some(error),
            attempt,
        });
    }

    pub(crate) fn mark_disconnected(&self) {
        self.detach();
        self.state.send_replace(ConnectionState::default());
    }
}

impl Default for ChannelLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the connection task needs, shared with the client.
#[derive(Clone)]
pub(crate) struct ChannelContext {
    pub config: Arc<SyncConfig>,
    pub store: JobStore,
    pub subscriptions: SubscriptionManager,
    pub link: Arc<ChannelLink>,
}

/// Open the WebSocket, bounded by `timeout`.
pub async fn open_channel(url: &str, timeout: Duration) -> Result<WsStream, ChannelError> {
    match tokio::time::timeout(timeout, connect_async(url)).await {
        Err(_) => Err(ChannelError::Timeout(timeout.as_millis() as u64)),
        Ok(Err(e)) => Err(ChannelError::Connection(format!(
            "Failed to connect to job channel at {url}: {e}"
        ))),
        Ok(Ok((ws_stream, _response))) => Ok(ws_stream),
    }
}

/// How a session ended.
#[derive(Debug)]
enum SessionEnd {
    /// Deliberate disconnect.
    Cancelled,
    /// Unexpected loss; carries the reason shown to consumers.
    Lost(String),
}

/// Core connection loop: connect -> session -> wait -> reconnect.
///
/// Runs until `cancel` is triggered.
pub(crate) async fn run_connection_loop(ctx: ChannelContext, cancel: CancellationToken) {
    let url = ctx.config.channel_url();
    let reconnect = ctx.config.reconnect.clone();
    let mut delay = reconnect.initial_delay;
    let mut attempt = 0u32;

    loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => None,
            result = open_channel(&url, ctx.config.connect_timeout) => Some(result),
        };

        let reason = match opened {
            None => break,
            Some(Ok(ws_stream)) => {
                tracing::info!(url = %url, attempt, "Connected to job channel");
                attempt = 0;
                delay = reconnect.initial_delay;
                match run_session(ws_stream, &ctx, &cancel).await {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Lost(reason) => reason,
                }
            }
            Some(Err(e)) => {
                tracing::error!(url = %url, error = %e, "Job channel connection failed");
                e.to_string()
            }
        };

        if cancel.is_cancelled() {
            break;
        }

        attempt += 1;
        let wait = with_jitter(delay, reconnect.jitter);
        tracing::warn!(
            attempt,
            delay_ms = wait.as_millis() as u64,
            reason = %reason,
            "Job channel lost, reconnect scheduled",
        );
        ctx.link.mark_reconnect_scheduled(reason, attempt);

        if !wait_for_retry(wait, &cancel).await {
            break;
        }
        delay = next_delay(delay, &reconnect);
    }

    ctx.link.mark_disconnected();
    tracing::info!(url = %url, "Job channel closed");
}

/// Drive one connected session until it ends.
///
/// Publishes the connected state, sends the resync batch, then multiplexes
/// the heartbeat timer, the optional pong deadline, the outbound queue and
/// inbound frames with `tokio::select!`.
async fn run_session(
    ws_stream: WsStream,
    ctx: &ChannelContext,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut sink, mut stream) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    ctx.link.attach(tx);

    let end = 'session: {
        for message in ctx.subscriptions.resync_messages(&ctx.store) {
            if let Err(e) = send_client_message(&mut sink, &message).await {
                break 'session SessionEnd::Lost(e.to_string());
            }
        }

        let period = ctx.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ping_sent_at: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        tracing::debug!(error = %e, "Failed to send close frame");
                    }
                    break 'session SessionEnd::Cancelled;
                }
                _ = pong_deadline(ping_sent_at, ctx.config.pong_timeout) => {
                    break 'session SessionEnd::Lost("Heartbeat pong timed out".to_string());
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = send_client_message(&mut sink, &ClientMessage::Ping).await {
                        tracing::error!(error = %e, "Failed to send heartbeat");
                        break 'session SessionEnd::Lost(e.to_string());
                    }
                    ping_sent_at.get_or_insert_with(Instant::now);
                    tracing::debug!("Heartbeat ping sent");
                }
                Some(message) = rx.recv() => {
                    if let Err(e) = send_client_message(&mut sink, &message).await {
                        tracing::error!(error = %e, "Failed to send channel message");
                        break 'session SessionEnd::Lost(e.to_string());
                    }
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if route_text(&text, &ctx.store) == RouteOutcome::Pong {
                                ping_sent_at = None;
                            }
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            // Handled automatically by tungstenite.
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Job channel closed by server");
                            break 'session SessionEnd::Lost("Connection closed by server".to_string());
                        }
                        Some(Ok(Message::Binary(_) | Message::Frame(_))) => {
                            tracing::trace!("Ignoring non-text frame");
                        }
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "Job channel receive error");
                            break 'session SessionEnd::Lost(e.to_string());
                        }
                        None => {
                            tracing::info!("Job channel stream exhausted");
                            break 'session SessionEnd::Lost("Connection lost".to_string());
                        }
                    }
                }
            }
        }
    };

    ctx.link.detach();
    end
}

/// Resolves once an unanswered ping has been outstanding for `timeout`.
/// Never resolves when no ping is outstanding or no timeout is set.
fn pong_deadline(
    sent_at: Option<Instant>,
    timeout: Option<Duration>,
) -> impl Future<Output = ()> {
    async move {
        match (sent_at, timeout) {
            (Some(sent_at), Some(timeout)) => tokio::time::sleep_until(sent_at + timeout).await,
            _ => std::future::pending().await,
        }
    }
}

/// Serialize and send one client message as a text frame.
async fn send_client_message<S>(sink: &mut S, message: &ClientMessage) -> Result<(), ChannelError>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = message
        .to_json()
        .map_err(|e| ChannelError::Protocol(format!("Failed to encode message: {e}")))?;
    tracing::trace!(message = %json, "Sending channel message");
    sink.send(Message::Text(json))
        .await
        .map_err(|e| ChannelError::Protocol(e.to_string()))
}
