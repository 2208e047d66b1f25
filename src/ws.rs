//! WebSocket connection wrapper.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::Error;

const CONN_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// WebSocket connection wrapper.
///
/// Write and read halves are locked independently so requests can go out
/// while the read loop is parked waiting for the peer. There is no receive
/// timeout: the session connection idles for as long as the user does.
pub struct WebSocket {
    write: Mutex<futures_util::stream::SplitSink<WsStream, Message>>,
    read: Mutex<futures_util::stream::SplitStream<WsStream>>,
}

impl WebSocket {
    /// Opens a new WebSocket connection to the given URL.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        info!(url = %url, "WebSocket connecting");

        let (ws_stream, _) = timeout(CONN_TIMEOUT, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| Error::ConnectionTimeout)?
            .map_err(Error::WebSocket)?;

        info!(url = %url, "WebSocket connected");

        let (write, read) = ws_stream.split();

        Ok(Self {
            write: Mutex::new(write),
            read: Mutex::new(read),
        })
    }

    /// Sends a text message.
    pub async fn send_text(&self, text: &str) -> Result<(), Error> {
        let mut writer = self.write.lock().await;
        writer
            .send(Message::Text(text.to_string()))
            .await
            .map_err(Error::WebSocket)
    }

    /// Sends a pong in reply to a ping.
    pub async fn send_pong(&self, data: Vec<u8>) -> Result<(), Error> {
        debug!("Sending pong");
        let mut writer = self.write.lock().await;
        writer
            .send(Message::Pong(data))
            .await
            .map_err(Error::WebSocket)
    }

    /// Receives the next message.
    ///
    /// Returns `Ok(None)` when the stream has ended.
    pub async fn recv(&self) -> Result<Option<Message>, Error> {
        let mut reader = self.read.lock().await;
        match reader.next().await {
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(e)) => Err(Error::WebSocket(e)),
            None => Ok(None),
        }
    }

    /// Closes the WebSocket connection.
    pub async fn close(&self) -> Result<(), Error> {
        info!("WebSocket closing");
        let mut writer = self.write.lock().await;
        let _ = writer.send(Message::Close(None)).await;
        let _ = writer.close().await;
        info!("WebSocket closed");
        Ok(())
    }
}
