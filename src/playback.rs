//! Audio decode and playback of an assembled synthesis payload.

use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rodio::{Decoder, OutputStream, Sink};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Events emitted by an in-flight playback.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    /// Decoding succeeded and audio is now audible.
    Started,
    /// Playback ran to its end.
    Ended,
    /// The payload could not be decoded as audio; nothing was played.
    DecodeFailed(String),
    /// No audio output device could be claimed.
    OutputUnavailable(String),
}

/// Plays assembled audio payloads through the platform output.
///
/// One payload plays at a time; starting a new one supersedes the previous.
/// Decode and playback run on a blocking worker, so `play` returns without
/// waiting and progress is observed on the returned event channel. The
/// output device is claimed for the duration of playback and released on
/// end, failure, or [`stop`](Self::stop).
pub struct AudioPlayer {
    sink: Arc<Mutex<Option<Arc<Sink>>>>,
    generation: Arc<AtomicU64>,
}

impl AudioPlayer {
    /// Creates a player with nothing playing.
    pub fn new() -> Self {
        Self {
            sink: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Decodes `payload` and plays it, reporting progress on the returned
    /// channel.
    ///
    /// Decoding happens before the output device is claimed, so a
    /// malformed or empty payload is reported as
    /// [`PlaybackEvent::DecodeFailed`] even on hosts without audio output.
    pub fn play(&self, payload: Vec<u8>) -> mpsc::UnboundedReceiver<PlaybackEvent> {
        let (tx, rx) = mpsc::unbounded_channel();

        // Supersede whatever was playing before.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.halt();

        let slot = Arc::clone(&self.sink);
        let generations = Arc::clone(&self.generation);
        tokio::task::spawn_blocking(move || {
            let payload_len = payload.len();
            let source = match Decoder::new(Cursor::new(payload)) {
                Ok(source) => source,
                Err(e) => {
                    error!(error = %e, bytes = payload_len, "Audio decode failed");
                    let _ = tx.send(PlaybackEvent::DecodeFailed(e.to_string()));
                    return;
                }
            };

            let (_stream, handle) = match OutputStream::try_default() {
                Ok(out) => out,
                Err(e) => {
                    error!(error = %e, "No audio output device");
                    let _ = tx.send(PlaybackEvent::OutputUnavailable(e.to_string()));
                    return;
                }
            };
            let sink = match Sink::try_new(&handle) {
                Ok(sink) => Arc::new(sink),
                Err(e) => {
                    error!(error = %e, "Failed to open audio sink");
                    let _ = tx.send(PlaybackEvent::OutputUnavailable(e.to_string()));
                    return;
                }
            };

            {
                let mut slot = slot.lock().unwrap();
                // A stop or a newer play superseded this payload while it
                // was decoding; abandon it before anything becomes audible.
                if generations.load(Ordering::SeqCst) != generation {
                    debug!("Playback superseded before start");
                    return;
                }
                *slot = Some(Arc::clone(&sink));
            }

            sink.append(source);
            sink.play();
            debug!(bytes = payload_len, "Playback started");
            let _ = tx.send(PlaybackEvent::Started);

            // Returns early if stop() drains the sink.
            sink.sleep_until_end();

            {
                let mut slot = slot.lock().unwrap();
                if let Some(current) = slot.as_ref() {
                    if Arc::ptr_eq(current, &sink) {
                        slot.take();
                    }
                }
            }
            debug!("Playback finished");
            let _ = tx.send(PlaybackEvent::Ended);
        });

        rx
    }

    /// Halts playback, resets the position and releases the output device.
    ///
    /// No-op when nothing is playing.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.halt();
    }

    fn halt(&self) {
        let taken = self.sink.lock().unwrap().take();
        if let Some(sink) = taken {
            info!("Playback stopped");
            sink.stop();
        }
    }
}

impl Default for AudioPlayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_payload_reports_decode_failure() {
        let player = AudioPlayer::new();
        let mut rx = player.play(Vec::new());

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, PlaybackEvent::DecodeFailed(_)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn garbage_payload_reports_decode_failure() {
        let player = AudioPlayer::new();
        let mut rx = player.play(vec![0xDE, 0xAD, 0xBE, 0xEF]);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, PlaybackEvent::DecodeFailed(_)));
    }

    #[tokio::test]
    async fn stop_with_nothing_playing_is_a_no_op() {
        let player = AudioPlayer::new();
        player.stop();
        player.stop();
    }
}
