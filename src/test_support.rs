// Test support utilities for both unit and integration tests

use crate::error::{ErrorKind, PlayerError};
use crate::models::{Chapter, PlaybackDescriptor, ProgressEntry, SyncRequest, Track};
use crate::playback::media::{
    MediaElement, MediaEvent, MediaEventKind, MediaEventReceiver, MediaEventSender,
    MediaFailure, MediaSource,
};
use crate::server::MediaServer;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

/// Descriptor for a book made of consecutive tracks with the given durations
pub fn book_descriptor(
    session_id: &str,
    item_id: &str,
    track_durations: &[f64],
    chapters: Vec<Chapter>,
    initial_time: f64,
) -> PlaybackDescriptor {
    let mut start_offset = 0.0;
    let tracks = track_durations
        .iter()
        .enumerate()
        .map(|(index, &duration)| {
            let track = Track {
                index,
                title: format!("Part {}", index + 1),
                duration,
                start_offset,
                content_locator: format!("/s/item/{}/part{}.mp3", item_id, index + 1),
                mime_type: Some("audio/mpeg".to_string()),
            };
            start_offset += duration;
            track
        })
        .collect();

    PlaybackDescriptor {
        session_id: session_id.to_string(),
        item_id: item_id.to_string(),
        episode_id: None,
        display_title: Some(format!("Book {}", item_id)),
        initial_time,
        duration: start_offset,
        chapters,
        tracks,
    }
}

pub fn chapter(id: i64, start: f64, end: f64) -> Chapter {
    Chapter {
        id,
        start,
        end,
        title: format!("Chapter {}", id + 1),
    }
}

/// Ordered record of calls across mocks, for asserting cross-component ordering
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Index of the first entry starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .position(|e| e.starts_with(prefix))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncCall {
    pub session_id: String,
    pub request: SyncRequest,
}

/// In-memory media server.
///
/// Items are registered up front; session starts can be held back with a
/// gate or made to fail, and every sync and close is recorded.
#[derive(Default)]
pub struct MockMediaServer {
    descriptors: Mutex<HashMap<String, PlaybackDescriptor>>,
    start_failures: Mutex<HashMap<String, PlayerError>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    start_calls: Mutex<Vec<String>>,
    sync_calls: Mutex<Vec<SyncCall>>,
    sync_failure: Mutex<Option<PlayerError>>,
    closed: Mutex<Vec<String>>,
    progress: Mutex<Vec<ProgressEntry>>,
    log: CallLog,
}

impl MockMediaServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn add_item(&self, descriptor: PlaybackDescriptor) {
        self.descriptors
            .lock()
            .unwrap()
            .insert(descriptor.progress_key(), descriptor);
    }

    pub fn fail_start(&self, key: &str, error: PlayerError) {
        self.start_failures
            .lock()
            .unwrap()
            .insert(key.to_string(), error);
    }

    /// Hold session starts for `key` until the returned gate is notified
    pub fn gate_start(&self, key: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(key.to_string(), gate.clone());
        gate
    }

    pub fn set_sync_failure(&self, error: Option<PlayerError>) {
        *self.sync_failure.lock().unwrap() = error;
    }

    pub fn set_progress(&self, entries: Vec<ProgressEntry>) {
        *self.progress.lock().unwrap() = entries;
    }

    pub fn start_calls(&self) -> Vec<String> {
        self.start_calls.lock().unwrap().clone()
    }

    pub fn sync_calls(&self) -> Vec<SyncCall> {
        self.sync_calls.lock().unwrap().clone()
    }

    pub fn syncs_for(&self, session_id: &str) -> Vec<SyncRequest> {
        self.sync_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.session_id == session_id)
            .map(|c| c.request.clone())
            .collect()
    }

    pub fn closed_sessions(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl MediaServer for MockMediaServer {
    async fn start_session(
        &self,
        item_id: &str,
        episode_id: Option<&str>,
    ) -> Result<PlaybackDescriptor, PlayerError> {
        let key = crate::models::progress_key(item_id, episode_id);
        self.start_calls.lock().unwrap().push(key.clone());
        self.log.record(format!("start:{}", key));

        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(error) = self.start_failures.lock().unwrap().get(&key) {
            return Err(error.clone());
        }

        self.descriptors
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| PlayerError::new(ErrorKind::ContentNotFound, format!("No item {}", key)))
    }

    async fn sync_progress(
        &self,
        session_id: &str,
        request: &SyncRequest,
    ) -> Result<(), PlayerError> {
        self.sync_calls.lock().unwrap().push(SyncCall {
            session_id: session_id.to_string(),
            request: request.clone(),
        });
        self.log
            .record(format!("sync:{}:{}", session_id, request.current_time));

        match self.sync_failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn close_session(&self, session_id: &str) -> Result<(), PlayerError> {
        self.closed.lock().unwrap().push(session_id.to_string());
        self.log.record(format!("close:{}", session_id));
        Ok(())
    }

    async fn fetch_all_progress(&self) -> Result<Vec<ProgressEntry>, PlayerError> {
        Ok(self.progress.lock().unwrap().clone())
    }
}

/// What the mock element was last told to do
#[derive(Debug, Default)]
pub struct MockElementState {
    pub source: Option<MediaSource>,
    pub load_id: u64,
    pub position: f64,
    pub playing: bool,
    pub volume: f32,
    pub loads: Vec<MediaSource>,
}

/// Media element that plays nothing and reports whatever the test tells it to
pub struct MockMediaElement {
    state: Arc<Mutex<MockElementState>>,
    events: MediaEventSender,
    log: CallLog,
    auto_ready: bool,
}

/// Test-side driver for a `MockMediaElement`
#[derive(Clone)]
pub struct MockElementController {
    state: Arc<Mutex<MockElementState>>,
    events: MediaEventSender,
}

impl MockMediaElement {
    /// Element that reports metadata as soon as a source is loaded
    pub fn new(log: CallLog) -> (Self, MockElementController, MediaEventReceiver) {
        Self::build(log, true)
    }

    /// Element that waits for `MockElementController::ready`
    pub fn manual(log: CallLog) -> (Self, MockElementController, MediaEventReceiver) {
        Self::build(log, false)
    }

    fn build(log: CallLog, auto_ready: bool) -> (Self, MockElementController, MediaEventReceiver) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(MockElementState {
            volume: 1.0,
            ..MockElementState::default()
        }));
        let controller = MockElementController {
            state: state.clone(),
            events: events.clone(),
        };
        (
            Self {
                state,
                events,
                log,
                auto_ready,
            },
            controller,
            events_rx,
        )
    }
}

impl MediaElement for MockMediaElement {
    fn load(&mut self, source: MediaSource, load_id: u64) {
        self.log.record(format!("load:{}", source.url));
        {
            let mut state = self.state.lock().unwrap();
            state.loads.push(source.clone());
            state.source = Some(source);
            state.load_id = load_id;
            state.position = 0.0;
            state.playing = false;
        }
        if self.auto_ready {
            let _ = self.events.send(MediaEvent {
                load_id,
                kind: MediaEventKind::MetadataLoaded { duration: None },
            });
        }
    }

    fn seek(&mut self, seconds: f64) {
        self.log.record(format!("seek:{}", seconds));
        self.state.lock().unwrap().position = seconds;
    }

    fn play(&mut self) {
        self.log.record("play");
        self.state.lock().unwrap().playing = true;
    }

    fn pause(&mut self) {
        self.log.record("pause");
        self.state.lock().unwrap().playing = false;
    }

    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.playing = false;
        state.source = None;
    }

    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().position
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.lock().unwrap().volume = volume;
    }
}

impl MockElementController {
    fn send(&self, kind: MediaEventKind) {
        let load_id = self.state.lock().unwrap().load_id;
        let _ = self.events.send(MediaEvent { load_id, kind });
    }

    /// Report metadata for the current source
    pub fn ready(&self) {
        self.send(MediaEventKind::MetadataLoaded { duration: None });
    }

    /// Move the playhead and report it
    pub fn advance_to(&self, track_time: f64) {
        self.state.lock().unwrap().position = track_time;
        self.send(MediaEventKind::TimeUpdate(track_time));
    }

    pub fn finish(&self) {
        self.send(MediaEventKind::Ended);
    }

    pub fn fail(&self, failure: MediaFailure) {
        self.send(MediaEventKind::Error(failure));
    }

    /// Send an event tagged with an explicit load id
    pub fn send_for_load(&self, load_id: u64, kind: MediaEventKind) {
        let _ = self.events.send(MediaEvent { load_id, kind });
    }

    pub fn load_id(&self) -> u64 {
        self.state.lock().unwrap().load_id
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    pub fn position(&self) -> f64 {
        self.state.lock().unwrap().position
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().unwrap().volume
    }

    pub fn current_url(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .source
            .as_ref()
            .map(|s| s.url.clone())
    }

    pub fn load_count(&self) -> usize {
        self.state.lock().unwrap().loads.len()
    }
}
