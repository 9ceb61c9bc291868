use super::MediaProgressPayload;
use crate::error::PlayerError;
use crate::models::{progress_key, ProgressEntry};
use crate::playback::chapters::COMPLETION_THRESHOLD;
use serde::Deserialize;
use serde_json::Value;

const PROGRESS_UPDATED: &str = "user_item_progress_updated";
const SESSION_UPDATE: &str = "user_session_update";
const LIVE_SESSION_UPDATE: &str = "live_session_update";

/// Event delivered on the server's push channel
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Progress saved by the server, carrying its own timestamp
    ProgressUpdated(ProgressEntry),
    /// Progress derived from a live play session, stamped with the time it arrived
    LiveSession(ProgressEntry),
    /// Anything the progress cache does not care about
    Ignored(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ProgressUpdatedPayload {
    data: MediaProgressPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveSessionPayload {
    library_item_id: String,
    #[serde(default)]
    episode_id: Option<String>,
    #[serde(default)]
    current_time: f64,
    #[serde(default)]
    duration: f64,
}

impl PushEvent {
    /// Parse a `{ "event": ..., "data": ... }` envelope
    pub fn parse(json: &str) -> Result<Self, PlayerError> {
        let envelope: Envelope = serde_json::from_str(json)?;
        Self::from_envelope(&envelope.event, envelope.data)
    }

    pub fn from_envelope(event: &str, data: Value) -> Result<Self, PlayerError> {
        match event {
            PROGRESS_UPDATED => {
                let payload: ProgressUpdatedPayload = serde_json::from_value(data)?;
                Ok(PushEvent::ProgressUpdated(payload.data.into_entry()))
            }
            SESSION_UPDATE | LIVE_SESSION_UPDATE => {
                let payload: LiveSessionPayload = serde_json::from_value(data)?;
                Ok(PushEvent::LiveSession(payload.into_entry(
                    chrono::Utc::now().timestamp_millis(),
                )))
            }
            other => Ok(PushEvent::Ignored(other.to_string())),
        }
    }

    pub fn entry(&self) -> Option<&ProgressEntry> {
        match self {
            PushEvent::ProgressUpdated(entry) | PushEvent::LiveSession(entry) => Some(entry),
            PushEvent::Ignored(_) => None,
        }
    }
}

impl LiveSessionPayload {
    fn into_entry(self, now_ms: i64) -> ProgressEntry {
        let episode_id = self.episode_id.filter(|e| !e.is_empty());
        let progress = if self.duration > 0.0 {
            (self.current_time / self.duration).clamp(0.0, 1.0)
        } else {
            0.0
        };
        ProgressEntry {
            id: progress_key(&self.library_item_id, episode_id.as_deref()),
            item_id: self.library_item_id,
            episode_id,
            progress,
            is_finished: progress >= COMPLETION_THRESHOLD,
            current_time: self.current_time,
            duration: self.duration,
            updated_at: now_ms,
        }
    }
}
