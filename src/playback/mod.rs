mod audio_element;
pub mod chapters;
mod cpal_output;
pub mod media;
pub mod progress;
pub mod service;
pub mod session;
pub mod state;
mod symphonia_decoder;
pub mod sync;
pub mod track_index;

pub use audio_element::AudioElement;
pub use chapters::{ChapterIndex, Direction, EnhancedChapter};
pub use media::{MediaElement, MediaEvent, MediaEventKind, MediaFailure, MediaSource};
pub use progress::{PlaybackProgress, PlaybackProgressHandle};
pub use service::{PlaybackCommand, PlaybackHandle, PlaybackService};
pub use state::{LoadPhase, PlayerState, TrackSwitch};
pub use sync::SyncReason;
pub use track_index::{TrackIndex, TrackPosition};
