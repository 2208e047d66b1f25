//! Client-side controller for streaming speech-synthesis playback.
//!
//! The session sends user text to a synthesis server over one persistent
//! WebSocket, buffers the binary audio fragments streamed back, assembles
//! them into a playable clip when the server signals the stream is flushed,
//! and plays the clip through the platform audio output. A tri-state play
//! status tracks progress for the UI; only one playback is active at a
//! time and the connection is reused across requests.
//!
//! # Example
//!
//! ```no_run
//! use speech_session::{Session, SessionConfig, UiEvent};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (mut session, mut ui_rx) = Session::new(SessionConfig::default());
//!     let handle = session.handle();
//!
//!     tokio::spawn(async move { session.run().await });
//!
//!     handle.play("Hello, world!", None).ok();
//!
//!     while let Some(event) = ui_rx.recv().await {
//!         match event {
//!             UiEvent::Status(status) => println!("status: {status:?}"),
//!             UiEvent::ValidationError(msg) => eprintln!("{msg}"),
//!             _ => {}
//!         }
//!     }
//! }
//! ```

mod buffer;
mod connection;
mod error;
mod messages;
mod playback;
mod session;
mod ws;

pub use buffer::FragmentBuffer;
pub use connection::{ConnEvent, SessionConnection};
pub use error::Error;
pub use messages::{ControlMessage, GenericMessage, SpeakRequest};
pub use playback::{AudioPlayer, PlaybackEvent};
pub use session::{Command, PlayStatus, Session, SessionConfig, SessionHandle, UiEvent};

/// Default WebSocket endpoint of the synthesis server.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:3000";

/// Model identifier used when a play intent does not carry one.
pub const DEFAULT_MODEL: &str = "aura-asteria-en";
