//! WebSocket transport built on `tokio-tungstenite`.
//!
//! Each call to [`Transport::connect`] spawns one connection task that owns
//! the WebSocket stream for that connection's whole life:
//!
//! ```text
//!   Session::send ──► outbound mpsc ──┐
//!                                     ▼
//!   Transport::disconnect ──► close ──► connection task ◄──► server
//!                                     │
//!   Session::run ◄── TransportEvent ◄─┘  (Connected / Message / Disconnected)
//! ```
//!
//! `send` only queues a frame on the outbound channel, so it never blocks the
//! caller.  The task writes frames in queue order.
//!
//! Every attempt ends with exactly one `Disconnected` event, whether it failed
//! to connect, was closed by the server or was closed by `disconnect`.  The
//! connection slot is released before that event is emitted, so a reconnect
//! issued while handling it is accepted.
//!
//! [`WebSocketTransport::close`] is the shutdown path: it asks the task to send
//! a close frame and waits, up to a grace period, for the slot to be released.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::transport::{Transport, TransportError, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// State of the single connection slot.
#[derive(Debug)]
struct Link {
    outbound: mpsc::UnboundedSender<String>,
    close: Option<oneshot::Sender<()>>,
    /// `false` while the WebSocket handshake is still running.
    open: bool,
}

/// [`Transport`] over a client WebSocket connection.
#[derive(Debug)]
pub struct WebSocketTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    link: Arc<Mutex<Option<Link>>>,
    /// Notified every time a connection task releases the slot.
    released: Arc<Notify>,
}

impl WebSocketTransport {
    /// Creates the transport and the receiver its events arrive on.
    ///
    /// Hand the receiver to `Session::run`.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            events,
            link: Arc::new(Mutex::new(None)),
            released: Arc::new(Notify::new()),
        };
        (transport, rx)
    }

    /// Closes the current connection and waits up to `grace` for its task to
    /// finish sending the close frame.
    ///
    /// Returns `true` once no connection is left, `false` if the grace period
    /// ran out first.
    pub async fn close(&self, grace: Duration) -> bool {
        let released = self.released.notified();
        tokio::pin!(released);
        released.as_mut().enable();

        if self.link.lock().is_none() {
            return true;
        }
        self.disconnect();
        tokio::time::timeout(grace, released).await.is_ok()
    }
}

impl Transport for WebSocketTransport {
    /// Must be called from within a Tokio runtime.
    fn connect(&self, endpoint: &str) {
        let mut link = self.link.lock();
        if link.is_some() {
            debug!("connect ignored: a connection attempt is already in flight");
            return;
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        *link = Some(Link {
            outbound: outbound_tx,
            close: Some(close_tx),
            open: false,
        });

        let connection = Connection {
            endpoint: endpoint.to_owned(),
            session_id: Uuid::new_v4().to_string(),
            events: self.events.clone(),
            link: Arc::clone(&self.link),
            released: Arc::clone(&self.released),
        };
        tokio::spawn(connection.run(outbound_rx, close_rx));
    }

    fn send(&self, text: String) -> Result<(), TransportError> {
        match self.link.lock().as_ref() {
            Some(link) if link.open => link
                .outbound
                .send(text)
                .map_err(|_| TransportError::ChannelClosed),
            _ => Err(TransportError::NotConnected),
        }
    }

    fn disconnect(&self) {
        let mut link = self.link.lock();
        match link.as_mut().and_then(|link| link.close.take()) {
            // The task may already be on its way out; nothing left to close then.
            Some(close) => {
                let _ = close.send(());
            }
            None => debug!("disconnect ignored: no open connection"),
        }
    }
}

// ── Connection task ───────────────────────────────────────────────────────────

struct Connection {
    endpoint: String,
    session_id: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    link: Arc<Mutex<Option<Link>>>,
    released: Arc<Notify>,
}

impl Connection {
    async fn run(
        self,
        outbound: mpsc::UnboundedReceiver<String>,
        mut close: oneshot::Receiver<()>,
    ) {
        let attempt = tokio::select! {
            result = connect_async(self.endpoint.as_str()) => Some(result),
            _ = &mut close => None,
        };

        match attempt {
            Some(Ok((ws, _response))) => {
                if let Some(link) = self.link.lock().as_mut() {
                    link.open = true;
                }
                info!(session_id = %self.session_id, endpoint = %self.endpoint, "websocket open");
                self.emit(TransportEvent::Connected {
                    session_id: self.session_id.clone(),
                });
                self.pump(ws, outbound, close).await;
            }
            Some(Err(e)) => warn!(endpoint = %self.endpoint, "websocket connect failed: {e}"),
            None => debug!("connect aborted by disconnect"),
        }

        *self.link.lock() = None;
        self.released.notify_waiters();
        self.emit(TransportEvent::Disconnected {
            session_id: self.session_id.clone(),
        });
    }

    /// Moves frames in both directions until either side closes.
    async fn pump(
        &self,
        ws: WsStream,
        mut outbound: mpsc::UnboundedReceiver<String>,
        mut close: oneshot::Receiver<()>,
    ) {
        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                biased;

                _ = &mut close => {
                    debug!(session_id = %self.session_id, "closing websocket");
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }

                Some(text) = outbound.recv() => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        warn!(session_id = %self.session_id, "websocket write failed: {e}");
                        break;
                    }
                }

                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if !self.emit(TransportEvent::Message(text)) {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(reason))) => {
                        debug!(session_id = %self.session_id, ?reason, "server closed websocket");
                        break;
                    }
                    // Control frames are answered by tungstenite; binary frames are not part
                    // of the protocol.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session_id = %self.session_id, "websocket read failed: {e}");
                        break;
                    }
                    None => break,
                },
            }
        }
    }

    /// Returns `false` once nobody is listening for events any more.
    fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
