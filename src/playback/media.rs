//! Contract between the session manager and the element that actually plays audio.

use crate::error::{ErrorKind, PlayerError};
use crate::models::StreamKind;
use tokio::sync::mpsc;

/// Source handed to a media element
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSource {
    pub url: String,
    pub mime_type: Option<String>,
    pub kind: StreamKind,
}

/// Something reported by the media element, tagged with the load it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct MediaEvent {
    pub load_id: u64,
    pub kind: MediaEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaEventKind {
    /// Source opened; seeking is now possible
    MetadataLoaded { duration: Option<f64> },
    /// Segment-relative playback position
    TimeUpdate(f64),
    /// End of the current segment
    Ended,
    Error(MediaFailure),
}

/// Why a media element gave up on a source
#[derive(Debug, Clone, PartialEq)]
pub enum MediaFailure {
    Network(String),
    NotFound(String),
    Decode(String),
    Manifest(String),
    Output(String),
}

impl MediaFailure {
    pub fn into_error(self) -> PlayerError {
        match self {
            MediaFailure::Network(m) => PlayerError::new(ErrorKind::NetworkUnavailable, m),
            MediaFailure::NotFound(m) => PlayerError::new(ErrorKind::ContentNotFound, m),
            MediaFailure::Decode(m) => PlayerError::new(ErrorKind::FormatUnsupported, m),
            MediaFailure::Manifest(m) => PlayerError::new(ErrorKind::StreamManifestError, m),
            MediaFailure::Output(m) => PlayerError::new(ErrorKind::PlaybackError, m),
        }
    }
}

pub type MediaEventSender = mpsc::UnboundedSender<MediaEvent>;
pub type MediaEventReceiver = mpsc::UnboundedReceiver<MediaEvent>;

/// The single playback element owned by the session manager.
///
/// Calls never block on I/O: `load` starts fetching and the outcome arrives
/// later as a `MetadataLoaded` or `Error` event carrying the same `load_id`.
pub trait MediaElement: Send {
    fn load(&mut self, source: MediaSource, load_id: u64);
    fn seek(&mut self, seconds: f64);
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    /// Segment-relative position of the loaded source
    fn current_time(&self) -> f64;
    fn set_volume(&mut self, volume: f32);
}
