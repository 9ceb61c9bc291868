//! Debounced and periodic progress sync against the server.
//!
//! Every report carries the time spent playing since the session's previous
//! report, so redundant flushes never double-count listened time.

use crate::config::SyncConfig;
use crate::error::PlayerError;
use crate::models::{ProgressEntry, SyncRequest};
use crate::playback::chapters::COMPLETION_THRESHOLD;
use crate::playback::session::PlaybackSession;
use crate::progress_service::ProgressService;
use crate::server::MediaServer;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// What triggered a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReason {
    /// Quiet period after the last position change elapsed
    Debounce,
    /// Periodic floor while playing
    Interval,
    Pause,
    /// A segment finished playing
    TrackEnd,
    /// Final report for a session superseded by another item
    ItemSwitch,
    Stop,
    Error,
    Shutdown,
}

/// Outcome of one sync attempt
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub session_id: String,
    pub request: SyncRequest,
    pub attempted_at: Instant,
    pub result: Result<(), PlayerError>,
}

pub struct SyncEngine {
    server: Arc<dyn MediaServer>,
    config: SyncConfig,
    debounce_deadline: Option<Instant>,
    progress_cache: Option<ProgressService>,
}

impl SyncEngine {
    pub fn new(
        server: Arc<dyn MediaServer>,
        config: SyncConfig,
        progress_cache: Option<ProgressService>,
    ) -> Self {
        Self {
            server,
            config,
            debounce_deadline: None,
            progress_cache,
        }
    }

    /// Restart the quiet period. Only the latest deadline is kept.
    pub fn note_activity(&mut self) {
        self.debounce_deadline = Some(Instant::now() + self.config.debounce);
    }

    pub fn cancel_debounce(&mut self) {
        self.debounce_deadline = None;
    }

    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.debounce_deadline
    }

    /// Report `current_time` for `session`.
    ///
    /// The session's sync baseline moves to the attempt time whether or not
    /// the call succeeds. Failures are logged and dropped; the next report
    /// carries fresh values.
    pub async fn sync_session(
        &self,
        session: &mut PlaybackSession,
        current_time: f64,
        reason: SyncReason,
    ) -> SyncOutcome {
        let attempted_at = Instant::now();
        let request = session.begin_sync(current_time, attempted_at);

        let result = self
            .server
            .sync_progress(&session.session_id, &request)
            .await;

        match &result {
            Ok(()) => {
                debug!(
                    "Synced session {} at {:.1}s (+{:.1}s listened, {:?})",
                    session.session_id, request.current_time, request.time_listened, reason
                );
                self.record_locally(session, &request);
            }
            Err(e) => {
                warn!(
                    "Progress sync for session {} failed ({:?}): {}",
                    session.session_id, reason, e
                );
            }
        }

        SyncOutcome {
            session_id: session.session_id.clone(),
            request,
            attempted_at,
            result,
        }
    }

    fn record_locally(&self, session: &PlaybackSession, request: &SyncRequest) {
        let Some(cache) = &self.progress_cache else {
            return;
        };

        let progress = if request.duration > 0.0 {
            (request.current_time / request.duration).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let entry = ProgressEntry {
            id: session.progress_key(),
            item_id: session.item_id.clone(),
            episode_id: session.episode_id.clone(),
            progress,
            is_finished: progress >= COMPLETION_THRESHOLD,
            current_time: request.current_time,
            duration: request.duration,
            updated_at: chrono::Utc::now().timestamp_millis(),
        };
        cache.merge_one(&session.progress_key(), entry);
    }
}
