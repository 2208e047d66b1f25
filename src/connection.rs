//! The single reusable connection of a playback session.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::messages::{ControlMessage, GenericMessage, SpeakRequest};
use crate::ws::WebSocket;

/// Events surfaced by the connection to the session state machine.
#[derive(Debug, Clone)]
pub enum ConnEvent {
    /// The connection finished opening.
    Opened,
    /// A control message arrived.
    Control(ControlMessage),
    /// A binary audio fragment arrived.
    Fragment(Vec<u8>),
    /// The peer closed the connection.
    Closed,
    /// The transport failed.
    Errored(String),
}

/// Owns the at-most-one WebSocket shared by every request of a session.
///
/// The connection is created lazily on the first request and reused after
/// that. A request made before the connection exists is parked in a single
/// pending slot and sent exactly once when `Opened` fires. After the
/// connection dies, [`teardown`](Self::teardown) discards the handle so
/// the next request opens a fresh one.
pub struct SessionConnection {
    endpoint: String,
    conn: Option<Arc<WebSocket>>,
    pending: Option<SpeakRequest>,
    events_tx: mpsc::UnboundedSender<ConnEvent>,
    reader: Option<JoinHandle<()>>,
}

impl SessionConnection {
    /// Creates an unopened connection that will report events on
    /// `events_tx` once opened.
    pub fn new(endpoint: impl Into<String>, events_tx: mpsc::UnboundedSender<ConnEvent>) -> Self {
        Self {
            endpoint: endpoint.into(),
            conn: None,
            pending: None,
            events_tx,
            reader: None,
        }
    }

    /// Returns true if a connection currently exists.
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Opens the connection if none exists. Repeated calls are no-ops.
    pub async fn ensure_open(&mut self) -> Result<(), Error> {
        if self.conn.is_some() {
            return Ok(());
        }

        let ws = Arc::new(WebSocket::connect(&self.endpoint).await?);
        self.conn = Some(Arc::clone(&ws));
        self.reader = Some(tokio::spawn(read_loop(ws, self.events_tx.clone())));
        Ok(())
    }

    /// Sends a synthesis request, opening the connection first if needed.
    ///
    /// While no connection exists the request is parked and delivered on
    /// `Opened` via [`flush_pending`](Self::flush_pending); an earlier
    /// parked request is never displaced by the open itself.
    pub async fn request(&mut self, req: SpeakRequest) -> Result<(), Error> {
        if self.conn.is_none() {
            debug!(text_len = req.text.len(), "Parking request until the connection opens");
            self.pending = Some(req);
            return self.ensure_open().await;
        }
        self.send(&req).await
    }

    /// Sends the parked request, if any.
    pub async fn flush_pending(&mut self) -> Result<(), Error> {
        match self.pending.take() {
            Some(req) => self.send(&req).await,
            None => Ok(()),
        }
    }

    async fn send(&self, req: &SpeakRequest) -> Result<(), Error> {
        let conn = self.conn.as_ref().ok_or(Error::NotConnected)?;
        let json = serde_json::to_string(req)?;
        debug!(json = %json, "Sending synthesis request");
        conn.send_text(&json).await
    }

    /// Discards the connection, closing it if still up, along with any
    /// parked request. The next request starts from scratch.
    pub async fn teardown(&mut self) {
        self.pending = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(conn) = self.conn.take() {
            let _ = conn.close().await;
            info!("Connection torn down");
        }
    }
}

/// Pumps incoming frames into session events until the stream ends.
///
/// Text frames are classified by their `type` tag; binary frames pass
/// through as fragments in transport order. Pings are answered here so the
/// session never sees them.
async fn read_loop(ws: Arc<WebSocket>, events_tx: mpsc::UnboundedSender<ConnEvent>) {
    let _ = events_tx.send(ConnEvent::Opened);

    loop {
        let msg = match ws.recv().await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                info!("Connection stream ended");
                let _ = events_tx.send(ConnEvent::Closed);
                return;
            }
            Err(e) => {
                error!(error = %e, "Connection failed");
                let _ = events_tx.send(ConnEvent::Errored(e.to_string()));
                return;
            }
        };

        match msg {
            Message::Text(text) => {
                let control = serde_json::from_str::<GenericMessage>(&text)
                    .ok()
                    .and_then(|msg| ControlMessage::from_tag(&msg.msg_type));
                match control {
                    Some(control) => {
                        debug!(control = ?control, "Control message received");
                        if events_tx.send(ConnEvent::Control(control)).is_err() {
                            return;
                        }
                    }
                    None => {
                        warn!(raw = %text, "Ignoring unrecognized control message");
                    }
                }
            }
            Message::Binary(data) => {
                debug!(bytes = data.len(), "Audio fragment received");
                if events_tx.send(ConnEvent::Fragment(data)).is_err() {
                    return;
                }
            }
            Message::Ping(data) => {
                let _ = ws.send_pong(data).await;
            }
            Message::Pong(_) | Message::Frame(_) => {}
            Message::Close(frame) => {
                debug!(frame = ?frame, "Close frame received");
                let _ = events_tx.send(ConnEvent::Closed);
                return;
            }
        }
    }
}
