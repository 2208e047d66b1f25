//! The session state machine driving synthesis playback.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::buffer::FragmentBuffer;
use crate::connection::{ConnEvent, SessionConnection};
use crate::error::Error;
use crate::messages::{ControlMessage, SpeakRequest};
use crate::playback::{AudioPlayer, PlaybackEvent};

/// Visible playback status of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayStatus {
    /// Nothing in flight; a play intent starts a new request.
    Idle,
    /// A request is in flight and fragments are accumulating.
    Loading,
    /// Assembled audio is playing.
    Playing,
}

/// User intents accepted by a running session.
#[derive(Debug, Clone)]
pub enum Command {
    /// Request synthesis and playback of `text`.
    Play {
        /// Text to synthesize.
        text: String,
        /// Model identifier; the configured default applies when `None`.
        model: Option<String>,
    },
    /// Halt playback.
    Stop,
    /// Stop everything, tear the connection down and end the run loop.
    Shutdown,
}

/// Notifications for the UI layer rendering the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// The play status changed; update the play button.
    Status(PlayStatus),
    /// A play intent was rejected before anything was sent.
    ValidationError(String),
    /// Playback finished naturally; clear the text input.
    ClearInput,
    /// The first request went out; disable the model selector.
    ModelLocked,
    /// Decoding or audio output failed and the session returned to idle.
    PlaybackFailed(String),
}

/// Configuration for a playback session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint of the synthesis server.
    pub endpoint: String,
    /// Model identifier sent when a play intent carries none.
    pub model: String,
}

impl SessionConfig {
    /// Creates a configuration for the given endpoint with the default
    /// model.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: crate::DEFAULT_MODEL.to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(crate::DEFAULT_ENDPOINT)
    }
}

/// Cloneable handle for issuing user intents to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands_tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    /// Requests synthesis and playback of `text`.
    pub fn play(&self, text: impl Into<String>, model: Option<&str>) -> Result<(), Error> {
        self.send(Command::Play {
            text: text.into(),
            model: model.map(str::to_string),
        })
    }

    /// Halts playback.
    pub fn stop(&self) -> Result<(), Error> {
        self.send(Command::Stop)
    }

    /// Ends the session run loop.
    pub fn shutdown(&self) -> Result<(), Error> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<(), Error> {
        self.commands_tx
            .send(command)
            .map_err(|_| Error::SessionClosed)
    }
}

/// A speech-synthesis playback session.
///
/// Owns the play status, the fragment buffer, the connection and the audio
/// player; every mutation happens inside [`run`](Self::run), which
/// multiplexes user commands, connection events and playback events one at
/// a time. The session is reusable indefinitely: each completed or aborted
/// attempt returns it to [`PlayStatus::Idle`].
pub struct Session {
    config: SessionConfig,
    status: PlayStatus,
    buffer: FragmentBuffer,
    connection: SessionConnection,
    player: AudioPlayer,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    conn_rx: mpsc::UnboundedReceiver<ConnEvent>,
    playback_rx: Option<mpsc::UnboundedReceiver<PlaybackEvent>>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
    model_locked: bool,
    session_id: String,
}

impl Session {
    /// Creates an idle session and the receiver of its UI notifications.
    pub fn new(config: SessionConfig) -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let connection = SessionConnection::new(config.endpoint.clone(), conn_tx);

        let session = Self {
            config,
            status: PlayStatus::Idle,
            buffer: FragmentBuffer::new(),
            connection,
            player: AudioPlayer::new(),
            commands_tx,
            commands_rx,
            conn_rx,
            playback_rx: None,
            ui_tx,
            model_locked: false,
            session_id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
        };
        (session, ui_rx)
    }

    /// Returns a handle for issuing intents while [`run`](Self::run) owns
    /// the session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            commands_tx: self.commands_tx.clone(),
        }
    }

    /// Current play status.
    pub fn status(&self) -> PlayStatus {
        self.status
    }

    /// Runs the session until [`Command::Shutdown`] arrives.
    pub async fn run(&mut self) {
        info!(session_id = %self.session_id, endpoint = %self.config.endpoint, "Session running");

        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(Command::Play { text, model }) => {
                        if let Err(e) = self.play(&text, model).await {
                            debug!(error = %e, "Play intent rejected");
                        }
                    }
                    Some(Command::Stop) => self.stop(),
                    Some(Command::Shutdown) | None => break,
                },
                Some(event) = self.conn_rx.recv() => self.on_conn_event(event).await,
                event = playback_recv(self.playback_rx.as_mut()) => match event {
                    Some(event) => self.on_playback_event(event),
                    None => self.playback_rx = None,
                },
            }
        }

        self.shutdown().await;
        info!(session_id = %self.session_id, "Session ended");
    }

    /// Handles a play intent.
    ///
    /// Ignored unless the session is idle; empty text is rejected with a
    /// validation notification and no state change.
    pub async fn play(&mut self, text: &str, model: Option<String>) -> Result<(), Error> {
        if self.status != PlayStatus::Idle {
            debug!(status = ?self.status, "Play intent ignored while busy");
            return Ok(());
        }
        if text.is_empty() {
            warn!("Play intent with empty text");
            self.notify(UiEvent::ValidationError("Please add text!".to_string()));
            return Err(Error::EmptyText);
        }

        if !self.model_locked {
            self.model_locked = true;
            self.notify(UiEvent::ModelLocked);
        }

        let model = model.unwrap_or_else(|| self.config.model.clone());
        let req = SpeakRequest::new(text, Some(model));

        self.set_status(PlayStatus::Loading);
        if let Err(e) = self.connection.request(req).await {
            error!(error = %e, "Failed to send synthesis request");
            self.abort_connection().await;
            return Err(e);
        }
        Ok(())
    }

    /// Handles a stop intent. Only acts while playing; idempotent
    /// otherwise.
    pub fn stop(&mut self) {
        if self.status != PlayStatus::Playing {
            debug!(status = ?self.status, "Stop intent ignored");
            return;
        }
        info!("Stopping playback");
        self.player.stop();
        self.playback_rx = None;
        self.buffer.clear();
        self.set_status(PlayStatus::Idle);
    }

    async fn on_conn_event(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Opened => {
                info!("Connection opened");
                if let Err(e) = self.connection.flush_pending().await {
                    error!(error = %e, "Failed to send deferred request");
                    self.abort_connection().await;
                }
            }
            ConnEvent::Control(control) => self.on_control(control),
            ConnEvent::Fragment(data) => {
                if self.status == PlayStatus::Loading {
                    debug!(bytes = data.len(), buffered = self.buffer.len(), "Buffering fragment");
                    self.buffer.append(data);
                } else {
                    warn!(bytes = data.len(), status = ?self.status, "Discarding stray fragment");
                }
            }
            ConnEvent::Closed => {
                info!("Connection closed");
                self.abort_connection().await;
            }
            ConnEvent::Errored(reason) => {
                error!(error = %reason, "Connection error");
                self.abort_connection().await;
            }
        }
    }

    fn on_control(&mut self, control: ControlMessage) {
        match control {
            ControlMessage::Open => {
                debug!("Peer synthesis stream open");
            }
            ControlMessage::Error => {
                error!("Peer reported a synthesis error");
                self.abort_stream();
            }
            ControlMessage::Close => {
                info!("Peer closed the synthesis stream");
                self.abort_stream();
            }
            ControlMessage::Flushed => self.on_flushed(),
        }
    }

    /// End of stream: assemble the buffered fragments and start playback.
    fn on_flushed(&mut self) {
        if self.status != PlayStatus::Loading {
            warn!(status = ?self.status, "Flushed outside an active stream");
            return;
        }
        if self.playback_rx.is_some() {
            warn!("Flushed repeated for the same stream");
            return;
        }

        let payload = self.buffer.assemble();
        info!(
            fragments = self.buffer.len(),
            bytes = payload.len(),
            "Stream complete, starting playback"
        );
        self.buffer.clear();
        self.playback_rx = Some(self.player.play(payload));
    }

    fn on_playback_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started => {
                if self.status == PlayStatus::Loading {
                    self.set_status(PlayStatus::Playing);
                } else {
                    debug!(status = ?self.status, "Ignoring stale playback start");
                }
            }
            PlaybackEvent::Ended => {
                self.playback_rx = None;
                if self.status == PlayStatus::Playing {
                    info!("Playback finished");
                    self.buffer.clear();
                    self.notify(UiEvent::ClearInput);
                    self.set_status(PlayStatus::Idle);
                }
            }
            PlaybackEvent::DecodeFailed(reason) => {
                self.playback_rx = None;
                self.notify(UiEvent::PlaybackFailed(reason));
                self.set_status(PlayStatus::Idle);
            }
            PlaybackEvent::OutputUnavailable(reason) => {
                self.playback_rx = None;
                self.notify(UiEvent::PlaybackFailed(reason));
                self.set_status(PlayStatus::Idle);
            }
        }
    }

    /// Abandons the current attempt and returns to idle. The connection is
    /// left up for the next request.
    fn abort_stream(&mut self) {
        self.player.stop();
        self.playback_rx = None;
        self.buffer.clear();
        self.set_status(PlayStatus::Idle);
    }

    /// Abandons the current attempt and discards the dead connection so
    /// the next request re-opens.
    async fn abort_connection(&mut self) {
        self.abort_stream();
        self.connection.teardown().await;
    }

    async fn shutdown(&mut self) {
        info!(session_id = %self.session_id, "Session shutting down");
        self.player.stop();
        self.playback_rx = None;
        self.buffer.clear();
        self.connection.teardown().await;
        self.set_status(PlayStatus::Idle);
    }

    fn set_status(&mut self, status: PlayStatus) {
        if self.status != status {
            debug!(from = ?self.status, to = ?status, "Status change");
            self.status = status;
            self.notify(UiEvent::Status(status));
        }
    }

    fn notify(&self, event: UiEvent) {
        // The UI receiver may be gone in headless embeddings.
        let _ = self.ui_tx.send(event);
    }
}

async fn playback_recv(
    rx: Option<&mut mpsc::UnboundedReceiver<PlaybackEvent>>,
) -> Option<PlaybackEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> (Session, mpsc::UnboundedReceiver<UiEvent>) {
        Session::new(SessionConfig::new("ws://127.0.0.1:1"))
    }

    fn drain(ui_rx: &mut mpsc::UnboundedReceiver<UiEvent>) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = ui_rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_state_change() {
        let (mut session, mut ui_rx) = test_session();

        let result = session.play("", None).await;
        assert!(matches!(result, Err(Error::EmptyText)));
        assert_eq!(session.status(), PlayStatus::Idle);

        let events = drain(&mut ui_rx);
        assert_eq!(
            events,
            vec![UiEvent::ValidationError("Please add text!".to_string())]
        );
        assert!(!session.connection.is_open());
    }

    #[tokio::test]
    async fn play_intent_is_ignored_while_busy() {
        let (mut session, mut ui_rx) = test_session();
        session.status = PlayStatus::Loading;

        session.play("hello", None).await.unwrap();

        assert_eq!(session.status(), PlayStatus::Loading);
        assert!(drain(&mut ui_rx).is_empty());
        assert!(!session.connection.is_open());
    }

    #[tokio::test]
    async fn fragments_buffer_only_while_loading() {
        let (mut session, _ui_rx) = test_session();

        session.on_conn_event(ConnEvent::Fragment(vec![1, 2])).await;
        assert!(session.buffer.is_empty());

        session.status = PlayStatus::Loading;
        session.on_conn_event(ConnEvent::Fragment(vec![1, 2])).await;
        session.on_conn_event(ConnEvent::Fragment(vec![3])).await;
        assert_eq!(session.buffer.assemble(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn peer_error_resets_to_idle_and_clears_buffer() {
        let (mut session, mut ui_rx) = test_session();
        session.status = PlayStatus::Loading;
        session.buffer.append(vec![1, 2, 3]);

        session.on_control(ControlMessage::Error);

        assert_eq!(session.status(), PlayStatus::Idle);
        assert!(session.buffer.is_empty());
        assert_eq!(drain(&mut ui_rx), vec![UiEvent::Status(PlayStatus::Idle)]);
    }

    #[tokio::test]
    async fn peer_close_discards_buffered_fragments_without_playing() {
        let (mut session, _ui_rx) = test_session();
        session.status = PlayStatus::Loading;
        session.buffer.append(vec![9; 128]);

        session.on_control(ControlMessage::Close);

        assert_eq!(session.status(), PlayStatus::Idle);
        assert!(session.buffer.is_empty());
        assert!(session.playback_rx.is_none());
    }

    #[tokio::test]
    async fn flushed_with_empty_buffer_reports_decode_failure() {
        let (mut session, mut ui_rx) = test_session();
        session.status = PlayStatus::Loading;

        session.on_control(ControlMessage::Flushed);

        let event = session
            .playback_rx
            .as_mut()
            .expect("playback should have been dispatched")
            .recv()
            .await
            .unwrap();
        assert!(matches!(event, PlaybackEvent::DecodeFailed(_)));

        session.on_playback_event(event);
        assert_eq!(session.status(), PlayStatus::Idle);

        let events = drain(&mut ui_rx);
        assert!(matches!(events[0], UiEvent::PlaybackFailed(_)));
        assert_eq!(events[1], UiEvent::Status(PlayStatus::Idle));
    }

    #[tokio::test]
    async fn flushed_outside_loading_is_ignored() {
        let (mut session, mut ui_rx) = test_session();

        session.on_control(ControlMessage::Flushed);

        assert_eq!(session.status(), PlayStatus::Idle);
        assert!(session.playback_rx.is_none());
        assert!(drain(&mut ui_rx).is_empty());
    }

    #[tokio::test]
    async fn playback_end_returns_to_idle_and_clears_input() {
        let (mut session, mut ui_rx) = test_session();
        session.status = PlayStatus::Playing;

        session.on_playback_event(PlaybackEvent::Ended);

        assert_eq!(session.status(), PlayStatus::Idle);
        assert!(session.buffer.is_empty());
        assert_eq!(
            drain(&mut ui_rx),
            vec![UiEvent::ClearInput, UiEvent::Status(PlayStatus::Idle)]
        );
    }

    #[tokio::test]
    async fn stop_twice_while_idle_is_a_no_op() {
        let (mut session, mut ui_rx) = test_session();

        session.stop();
        session.stop();

        assert_eq!(session.status(), PlayStatus::Idle);
        assert!(drain(&mut ui_rx).is_empty());
    }

    #[tokio::test]
    async fn stop_while_playing_halts_and_idles() {
        let (mut session, mut ui_rx) = test_session();
        session.status = PlayStatus::Playing;

        session.stop();

        assert_eq!(session.status(), PlayStatus::Idle);
        assert_eq!(drain(&mut ui_rx), vec![UiEvent::Status(PlayStatus::Idle)]);
    }
}
