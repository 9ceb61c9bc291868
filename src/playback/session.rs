//! Play-session records and the two slots the session manager keeps them in.

use crate::models::{progress_key, PlaybackDescriptor, SyncRequest};
use crate::playback::track_index::TrackIndex;
use tokio::time::Instant;
use tracing::warn;

/// Server play session as seen by the client
#[derive(Debug, Clone)]
pub struct PlaybackSession {
    pub session_id: String,
    pub item_id: String,
    pub episode_id: Option<String>,
    pub duration: f64,
    pub tracks: TrackIndex,
    pub current_track: usize,
    /// Last global time observed for this session
    pub last_known_time: f64,
    /// When listened time was last reported (or attempted)
    pub last_sync_at: Instant,
    /// Listening accumulated since the last report while the clock was stopped
    listened: f64,
    playing_since: Option<Instant>,
}

impl PlaybackSession {
    pub fn new(descriptor: &PlaybackDescriptor, tracks: TrackIndex, now: Instant) -> Self {
        let duration = if descriptor.duration > 0.0 {
            descriptor.duration
        } else {
            tracks.total_duration()
        };
        let initial_time = descriptor.initial_time.clamp(0.0, duration.max(0.0));
        let current_track = tracks.locate(initial_time).track_index;

        Self {
            session_id: descriptor.session_id.clone(),
            item_id: descriptor.item_id.clone(),
            episode_id: descriptor.episode_id.clone(),
            duration,
            tracks,
            current_track,
            last_known_time: initial_time,
            last_sync_at: now,
            listened: 0.0,
            playing_since: None,
        }
    }

    pub fn progress_key(&self) -> String {
        progress_key(&self.item_id, self.episode_id.as_deref())
    }

    /// Start the listening clock; no-op if it is already running
    pub fn resume_listening(&mut self, now: Instant) {
        if self.playing_since.is_none() {
            self.playing_since = Some(now);
        }
    }

    pub fn pause_listening(&mut self, now: Instant) {
        if let Some(since) = self.playing_since.take() {
            self.listened += now.saturating_duration_since(since).as_secs_f64();
        }
    }

    /// Wall time spent playing since the last sync, never negative
    pub fn listened_since_sync(&self, now: Instant) -> f64 {
        let running = self
            .playing_since
            .map(|since| now.saturating_duration_since(since).as_secs_f64())
            .unwrap_or(0.0);
        self.listened + running
    }

    /// Build the report for `current_time` and move the sync baseline to `now`
    pub fn begin_sync(&mut self, current_time: f64, now: Instant) -> SyncRequest {
        let request = SyncRequest {
            current_time,
            time_listened: self.listened_since_sync(now),
            duration: self.duration,
            episode_id: self.episode_id.clone(),
        };
        self.listened = 0.0;
        if self.playing_since.is_some() {
            self.playing_since = Some(now);
        }
        self.last_sync_at = now;
        request
    }
}

/// The live session plus the one superseded by an item switch that still owes a final sync
#[derive(Debug, Default)]
pub struct SessionSlots {
    active: Option<PlaybackSession>,
    pending_final_sync: Option<PlaybackSession>,
}

impl SessionSlots {
    pub fn active(&self) -> Option<&PlaybackSession> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut PlaybackSession> {
        self.active.as_mut()
    }

    pub fn activate(&mut self, session: PlaybackSession) {
        self.active = Some(session);
    }

    /// Move the live session into the final-sync slot, leaving no live session
    pub fn supersede(&mut self) -> Option<&mut PlaybackSession> {
        let previous = self.active.take()?;
        if let Some(dropped) = self.pending_final_sync.replace(previous) {
            warn!(
                "Session {} was superseded before its final sync ran",
                dropped.session_id
            );
        }
        self.pending_final_sync.as_mut()
    }

    pub fn take_pending_final_sync(&mut self) -> Option<PlaybackSession> {
        self.pending_final_sync.take()
    }

    pub fn clear(&mut self) -> Option<PlaybackSession> {
        self.pending_final_sync = None;
        self.active.take()
    }
}
