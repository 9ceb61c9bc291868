use serde::{Deserialize, Serialize};

const HLS_MIME_TYPE: &str = "application/vnd.apple.mpegurl";

/// One audio segment on an item's global timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub index: usize,
    pub title: String,
    pub duration: f64,
    pub start_offset: f64,
    /// Server-relative or absolute location of the segment's content
    pub content_locator: String,
    pub mime_type: Option<String>,
}

/// Shape of the content behind a track's locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Discrete audio file
    File,
    /// Adaptive-bitrate manifest (HLS)
    Manifest,
}

impl Track {
    pub fn end_offset(&self) -> f64 {
        self.start_offset + self.duration
    }

    pub fn stream_kind(&self) -> StreamKind {
        let is_manifest_mime = self
            .mime_type
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(HLS_MIME_TYPE));
        let path = self
            .content_locator
            .split('?')
            .next()
            .unwrap_or_default();
        if is_manifest_mime || path.ends_with(".m3u8") {
            StreamKind::Manifest
        } else {
            StreamKind::File
        }
    }
}

/// Chapter boundaries on the global timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub start: f64,
    pub end: f64,
    pub title: String,
}

impl Chapter {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

/// Result of starting a play session on the server
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackDescriptor {
    pub session_id: String,
    pub item_id: String,
    pub episode_id: Option<String>,
    pub display_title: Option<String>,
    pub initial_time: f64,
    pub duration: f64,
    pub chapters: Vec<Chapter>,
    pub tracks: Vec<Track>,
}

impl PlaybackDescriptor {
    /// Order tracks by start offset and re-index them 0..n.
    ///
    /// A continuous stream reported without a track list becomes a single
    /// track spanning the whole duration.
    pub fn normalized(mut self, fallback_locator: Option<String>) -> Self {
        if self.tracks.is_empty() {
            if let Some(locator) = fallback_locator {
                self.tracks.push(Track {
                    index: 0,
                    title: self.display_title.clone().unwrap_or_default(),
                    duration: self.duration,
                    start_offset: 0.0,
                    content_locator: locator,
                    mime_type: None,
                });
            }
        }

        self.tracks
            .sort_by(|a, b| a.start_offset.total_cmp(&b.start_offset));
        for (i, track) in self.tracks.iter_mut().enumerate() {
            track.index = i;
        }

        if self.duration <= 0.0 {
            self.duration = self.tracks.last().map(Track::end_offset).unwrap_or(0.0);
        }

        self.chapters.sort_by(|a, b| a.start.total_cmp(&b.start));
        self
    }

    pub fn progress_key(&self) -> String {
        progress_key(&self.item_id, self.episode_id.as_deref())
    }
}

/// Body of a progress sync call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub current_time: f64,
    pub time_listened: f64,
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
}

/// Listening progress for one book or one episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    pub id: String,
    pub item_id: String,
    #[serde(default)]
    pub episode_id: Option<String>,
    pub progress: f64,
    pub is_finished: bool,
    pub current_time: f64,
    pub duration: f64,
    /// Epoch milliseconds of the last update
    pub updated_at: i64,
}

impl ProgressEntry {
    pub fn key(&self) -> String {
        progress_key(&self.item_id, self.episode_id.as_deref())
    }
}

/// Cache key for a book (item id) or an episode (episode id)
pub fn progress_key(item_id: &str, episode_id: Option<&str>) -> String {
    match episode_id {
        Some(episode_id) if !episode_id.is_empty() => episode_id.to_string(),
        _ => item_id.to_string(),
    }
}
