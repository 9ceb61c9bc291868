pub mod handle;

use crate::error::PlayerError;
use crate::models::Chapter;
use crate::playback::chapters::EnhancedChapter;
use crate::playback::state::PlayerState;
use crate::playback::sync::SyncReason;
pub use handle::PlaybackProgressHandle;

/// Updates emitted by the playback service
#[derive(Debug, Clone)]
pub enum PlaybackProgress {
    StateChanged {
        state: PlayerState,
    },
    /// A play session started and its segments are known
    SessionStarted {
        session_id: String,
        item_id: String,
        episode_id: Option<String>,
        display_title: Option<String>,
        duration: f64,
        track_count: usize,
        chapters: Vec<Chapter>,
    },
    PositionUpdate {
        /// Seconds on the item's global timeline
        current_time: f64,
        track_index: usize,
        chapter_id: Option<i64>,
        /// Every chapter with its completion at `current_time`; empty without chapters
        chapters: Vec<EnhancedChapter>,
        /// Whole-item progress counted in chapters, in `[0, 1]`
        chapter_progress: f64,
    },
    TrackChanged {
        track_index: usize,
    },
    Synced {
        session_id: String,
        current_time: f64,
        time_listened: f64,
        reason: SyncReason,
        succeeded: bool,
    },
    Error {
        error: PlayerError,
        item_id: Option<String>,
        episode_id: Option<String>,
    },
    /// A command was not valid in the current state and had no effect
    CommandRejected {
        command: &'static str,
        state: &'static str,
    },
}
