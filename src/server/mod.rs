//! Boundary to the media server: session start, progress sync and push events.

mod http;
mod push;

pub use http::HttpMediaServer;
pub use push::PushEvent;

use crate::error::PlayerError;
use crate::models::{PlaybackDescriptor, ProgressEntry, SyncRequest};
use serde::Deserialize;

/// Operations the playback core needs from the server (allows mocking for tests)
#[async_trait::async_trait]
pub trait MediaServer: Send + Sync {
    /// Open a play session and describe the streams for an item or episode
    async fn start_session(
        &self,
        item_id: &str,
        episode_id: Option<&str>,
    ) -> Result<PlaybackDescriptor, PlayerError>;

    /// Report listened time for an open session
    async fn sync_progress(&self, session_id: &str, request: &SyncRequest)
        -> Result<(), PlayerError>;

    /// Close a play session once it is no longer used
    async fn close_session(&self, session_id: &str) -> Result<(), PlayerError>;

    /// Progress for every item the user has touched
    async fn fetch_all_progress(&self) -> Result<Vec<ProgressEntry>, PlayerError>;

    /// Turn a track's content locator into something the media element can open
    fn resolve_locator(&self, locator: &str) -> String {
        locator.to_string()
    }
}

/// Progress record as the server serializes it (bulk fetch and push events)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MediaProgressPayload {
    #[serde(default)]
    pub id: String,
    pub library_item_id: String,
    #[serde(default)]
    pub episode_id: Option<String>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub is_finished: bool,
    #[serde(default)]
    pub current_time: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub last_update: i64,
}

impl MediaProgressPayload {
    pub(crate) fn into_entry(self) -> ProgressEntry {
        let id = if self.id.is_empty() {
            crate::models::progress_key(&self.library_item_id, self.episode_id.as_deref())
        } else {
            self.id
        };
        ProgressEntry {
            id,
            item_id: self.library_item_id,
            episode_id: self.episode_id.filter(|e| !e.is_empty()),
            progress: self.progress.clamp(0.0, 1.0),
            is_finished: self.is_finished,
            current_time: self.current_time,
            duration: self.duration,
            updated_at: self.last_update,
        }
    }
}
