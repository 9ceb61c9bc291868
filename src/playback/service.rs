use crate::config::SyncConfig;
use crate::error::{ErrorKind, PlayerError};
use crate::models::PlaybackDescriptor;
use crate::playback::chapters::{overall_progress, ChapterIndex, Direction};
use crate::playback::media::{
    MediaElement, MediaEvent, MediaEventKind, MediaEventReceiver, MediaSource,
};
use crate::playback::progress::{PlaybackProgress, PlaybackProgressHandle};
use crate::playback::session::{PlaybackSession, SessionSlots};
use crate::playback::state::{LoadPhase, PlayerState, RejectedCommand, TrackSwitch};
use crate::playback::sync::{SyncEngine, SyncOutcome, SyncReason};
use crate::playback::track_index::TrackIndex;
use crate::progress_service::ProgressService;
use crate::server::MediaServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Shortest floor period the timer accepts; a zero period would never yield
const MIN_FLOOR_INTERVAL: Duration = Duration::from_secs(1);

/// Playback commands sent to the service
#[derive(Debug)]
pub enum PlaybackCommand {
    Load {
        item_id: String,
        episode_id: Option<String>,
        autoplay: bool,
    },
    Play,
    Pause,
    TogglePlayPause,
    /// Absolute position on the item's global timeline, in seconds
    Seek(f64),
    SeekRelative(f64),
    JumpToChapter(i64),
    NextChapter,
    PreviousChapter,
    SetVolume(f32),
    Stop,
    /// Final sync, close the session, then exit the service loop
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the playback service for sending commands
#[derive(Clone)]
pub struct PlaybackHandle {
    command_tx: tokio_mpsc::UnboundedSender<PlaybackCommand>,
    progress_handle: PlaybackProgressHandle,
}

impl PlaybackHandle {
    fn send(&self, command: PlaybackCommand) {
        if self.command_tx.send(command).is_err() {
            warn!("Playback service is gone, dropping command");
        }
    }

    pub fn load(&self, item_id: impl Into<String>, episode_id: Option<String>) {
        self.send(PlaybackCommand::Load {
            item_id: item_id.into(),
            episode_id,
            autoplay: false,
        });
    }

    pub fn load_and_play(&self, item_id: impl Into<String>, episode_id: Option<String>) {
        self.send(PlaybackCommand::Load {
            item_id: item_id.into(),
            episode_id,
            autoplay: true,
        });
    }

    pub fn play(&self) {
        self.send(PlaybackCommand::Play);
    }

    pub fn pause(&self) {
        self.send(PlaybackCommand::Pause);
    }

    pub fn toggle_play_pause(&self) {
        self.send(PlaybackCommand::TogglePlayPause);
    }

    pub fn seek(&self, seconds: f64) {
        self.send(PlaybackCommand::Seek(seconds));
    }

    pub fn seek_relative(&self, delta_seconds: f64) {
        self.send(PlaybackCommand::SeekRelative(delta_seconds));
    }

    pub fn jump_to_chapter(&self, chapter_id: i64) {
        self.send(PlaybackCommand::JumpToChapter(chapter_id));
    }

    pub fn next_chapter(&self) {
        self.send(PlaybackCommand::NextChapter);
    }

    pub fn previous_chapter(&self) {
        self.send(PlaybackCommand::PreviousChapter);
    }

    pub fn set_volume(&self, volume: f32) {
        self.send(PlaybackCommand::SetVolume(volume));
    }

    pub fn stop(&self) {
        self.send(PlaybackCommand::Stop);
    }

    /// Flush progress, close the session and wait for the service to exit
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.command_tx.send(PlaybackCommand::Shutdown(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    pub fn subscribe_progress(&self) -> tokio_mpsc::UnboundedReceiver<PlaybackProgress> {
        self.progress_handle.subscribe()
    }
}

/// Start-session response tagged with the load that asked for it
struct LoadCompletion {
    generation: u64,
    item_id: String,
    episode_id: Option<String>,
    result: Result<PlaybackDescriptor, PlayerError>,
}

enum LoopEvent {
    Command(Option<PlaybackCommand>),
    LoadCompleted(LoadCompletion),
    Media(MediaEvent),
    DebounceElapsed,
    FloorTick,
}

/// Owns the play session, the media element and the sync timers.
///
/// All state lives on one task; commands, media events, load completions and
/// timers are serialized through a single select loop.
pub struct PlaybackService {
    server: Arc<dyn MediaServer>,
    element: Box<dyn MediaElement>,
    command_rx: tokio_mpsc::UnboundedReceiver<PlaybackCommand>,
    media_rx: MediaEventReceiver,
    load_tx: tokio_mpsc::UnboundedSender<LoadCompletion>,
    load_rx: tokio_mpsc::UnboundedReceiver<LoadCompletion>,
    progress_tx: tokio_mpsc::UnboundedSender<PlaybackProgress>,
    sync: SyncEngine,
    floor: Interval,
    state: PlayerState,
    /// Bumped by every load and stop; completions from older loads are dropped
    generation: u64,
    in_flight_load: Option<JoinHandle<()>>,
    /// Bumped by every source handed to the element; events from older sources are dropped
    media_load_id: u64,
    sessions: SessionSlots,
    chapters: ChapterIndex,
}

impl PlaybackService {
    pub fn start(
        sync_config: SyncConfig,
        server: Arc<dyn MediaServer>,
        element: Box<dyn MediaElement>,
        media_rx: MediaEventReceiver,
        progress_cache: Option<ProgressService>,
        runtime_handle: tokio::runtime::Handle,
    ) -> PlaybackHandle {
        let _guard = runtime_handle.enter();
        let (service, handle) = Self::new(
            sync_config,
            server,
            element,
            media_rx,
            progress_cache,
            runtime_handle.clone(),
        );
        runtime_handle.spawn(service.run());
        handle
    }

    fn new(
        sync_config: SyncConfig,
        server: Arc<dyn MediaServer>,
        element: Box<dyn MediaElement>,
        media_rx: MediaEventReceiver,
        progress_cache: Option<ProgressService>,
        runtime_handle: tokio::runtime::Handle,
    ) -> (Self, PlaybackHandle) {
        let (command_tx, command_rx) = tokio_mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = tokio_mpsc::unbounded_channel();
        let (load_tx, load_rx) = tokio_mpsc::unbounded_channel();

        let progress_handle = PlaybackProgressHandle::new(progress_rx, runtime_handle);
        let handle = PlaybackHandle {
            command_tx,
            progress_handle,
        };

        let floor_period = sync_config.floor_interval.max(MIN_FLOOR_INTERVAL);
        let mut floor = tokio::time::interval_at(Instant::now() + floor_period, floor_period);
        floor.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let service = PlaybackService {
            sync: SyncEngine::new(server.clone(), sync_config, progress_cache),
            server,
            element,
            command_rx,
            media_rx,
            load_tx,
            load_rx,
            progress_tx,
            floor,
            state: PlayerState::Idle,
            generation: 0,
            in_flight_load: None,
            media_load_id: 0,
            sessions: SessionSlots::default(),
            chapters: ChapterIndex::default(),
        };

        (service, handle)
    }

    async fn run(mut self) {
        info!("PlaybackService started");

        loop {
            let debounce = self.sync.debounce_deadline();
            let event = tokio::select! {
                command = self.command_rx.recv() => LoopEvent::Command(command),
                Some(done) = self.load_rx.recv() => LoopEvent::LoadCompleted(done),
                Some(event) = self.media_rx.recv() => LoopEvent::Media(event),
                _ = tokio::time::sleep_until(debounce.unwrap_or_else(Instant::now)), if debounce.is_some() => {
                    LoopEvent::DebounceElapsed
                }
                _ = self.floor.tick() => LoopEvent::FloorTick,
            };

            match event {
                LoopEvent::Command(Some(PlaybackCommand::Shutdown(ack))) => {
                    self.release_session(SyncReason::Shutdown, true).await;
                    let _ = ack.send(());
                    break;
                }
                LoopEvent::Command(Some(command)) => self.handle_command(command).await,
                LoopEvent::Command(None) => {
                    info!("All playback handles dropped");
                    self.release_session(SyncReason::Shutdown, true).await;
                    break;
                }
                LoopEvent::LoadCompleted(done) => self.on_load_completed(done),
                LoopEvent::Media(event) => self.on_media_event(event).await,
                LoopEvent::DebounceElapsed => self.flush(SyncReason::Debounce).await,
                LoopEvent::FloorTick => {
                    if self.state == PlayerState::Playing {
                        self.flush(SyncReason::Interval).await;
                    }
                }
            }
        }

        info!("PlaybackService stopped");
    }

    async fn handle_command(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Load {
                item_id,
                episode_id,
                autoplay,
            } => self.load(item_id, episode_id, autoplay).await,
            PlaybackCommand::Play => self.play(),
            PlaybackCommand::Pause => self.pause().await,
            PlaybackCommand::TogglePlayPause => {
                let resuming = match &self.state {
                    PlayerState::Playing => true,
                    PlayerState::TrackSwitching(switch) => switch.resume,
                    PlayerState::Loading { autoplay, .. } => *autoplay,
                    _ => false,
                };
                if resuming {
                    self.pause().await;
                } else {
                    self.play();
                }
            }
            PlaybackCommand::Seek(seconds) => self.seek(seconds),
            PlaybackCommand::SeekRelative(delta) => {
                if !delta.is_finite() {
                    warn!("Ignoring relative seek by non-finite {}", delta);
                    return;
                }
                if let Err(rejected) = self.state.check_seek() {
                    self.reject(rejected);
                    return;
                }
                let target = self.current_global_time() + delta;
                self.seek(target);
            }
            PlaybackCommand::JumpToChapter(chapter_id) => self.jump_to_chapter(chapter_id),
            PlaybackCommand::NextChapter => self.step_chapter(Direction::Next),
            PlaybackCommand::PreviousChapter => self.step_chapter(Direction::Previous),
            PlaybackCommand::SetVolume(volume) if volume.is_finite() => {
                self.element.set_volume(volume.clamp(0.0, 1.0))
            }
            PlaybackCommand::SetVolume(volume) => warn!("Ignoring volume {}", volume),
            PlaybackCommand::Stop => self.release_session(SyncReason::Stop, false).await,
            // Intercepted by the run loop
            PlaybackCommand::Shutdown(_) => {}
        }
    }

    async fn load(&mut self, item_id: String, episode_id: Option<String>, autoplay: bool) {
        self.generation += 1;
        let generation = self.generation;
        info!(
            "Loading item {} (episode {:?}), generation {}",
            item_id, episode_id, generation
        );

        if let Some(task) = self.in_flight_load.take() {
            debug!("Cancelling in-flight load");
            task.abort();
        }

        // Previous session reports its final position before the next one starts
        self.finish_previous_session().await;

        self.element.stop();
        self.media_load_id += 1;
        self.chapters = ChapterIndex::default();
        self.set_state(PlayerState::Loading {
            generation,
            phase: LoadPhase::AwaitingSession,
            autoplay,
        });

        let server = self.server.clone();
        let load_tx = self.load_tx.clone();
        self.in_flight_load = Some(tokio::spawn(async move {
            let result = server.start_session(&item_id, episode_id.as_deref()).await;
            let _ = load_tx.send(LoadCompletion {
                generation,
                item_id,
                episode_id,
                result,
            });
        }));
    }

    async fn finish_previous_session(&mut self) {
        if self.sessions.active().is_none() {
            return;
        }

        let final_time = self.current_global_time();
        self.element.pause();
        self.sync.cancel_debounce();

        let Some(previous) = self.sessions.supersede() else {
            return;
        };
        previous.pause_listening(Instant::now());
        previous.last_known_time = final_time;
        info!(
            "Final sync for session {} at {:.1}s",
            previous.session_id, final_time
        );
        let outcome = self
            .sync
            .sync_session(previous, final_time, SyncReason::ItemSwitch)
            .await;
        self.emit_synced(&outcome, SyncReason::ItemSwitch);

        if let Some(previous) = self.sessions.take_pending_final_sync() {
            self.close_in_background(previous.session_id);
        }
    }

    fn on_load_completed(&mut self, done: LoadCompletion) {
        if done.generation != self.generation {
            debug!(
                "Discarding session start for {} from stale load {} (current {})",
                done.item_id, done.generation, self.generation
            );
            if let Ok(descriptor) = done.result {
                self.close_in_background(descriptor.session_id);
            }
            return;
        }
        self.in_flight_load = None;

        let (generation, autoplay) = match &self.state {
            PlayerState::Loading {
                generation,
                phase: LoadPhase::AwaitingSession,
                autoplay,
            } => (*generation, *autoplay),
            other => {
                debug!("Session start arrived while {}, ignoring", other.name());
                return;
            }
        };

        let descriptor = match done.result {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!("Failed to start session for {}: {}", done.item_id, e);
                self.fail(e, Some(done.item_id), done.episode_id);
                return;
            }
        };

        let tracks = TrackIndex::new(descriptor.tracks.clone());
        if tracks.is_empty() {
            self.close_in_background(descriptor.session_id.clone());
            self.fail(
                PlayerError::new(ErrorKind::ContentNotFound, "Item has no playable tracks"),
                Some(done.item_id),
                done.episode_id,
            );
            return;
        }

        let session = PlaybackSession::new(&descriptor, tracks, Instant::now());
        let position = session.tracks.locate(session.last_known_time);
        info!(
            "Session {} started: {} tracks, {:.1}s total, resuming at {:.1}s (track {})",
            session.session_id,
            session.tracks.len(),
            session.duration,
            session.last_known_time,
            position.track_index
        );

        self.chapters = ChapterIndex::new(descriptor.chapters.clone());
        self.emit(PlaybackProgress::SessionStarted {
            session_id: session.session_id.clone(),
            item_id: session.item_id.clone(),
            episode_id: session.episode_id.clone(),
            display_title: descriptor.display_title.clone(),
            duration: session.duration,
            track_count: session.tracks.len(),
            chapters: descriptor.chapters,
        });
        self.sessions.activate(session);

        self.set_state(PlayerState::Loading {
            generation,
            phase: LoadPhase::AwaitingMedia {
                track_index: position.track_index,
                track_time: position.track_time,
            },
            autoplay,
        });
        self.load_track(position.track_index);
    }

    /// Hand segment `track_index` of the live session to the media element
    fn load_track(&mut self, track_index: usize) -> bool {
        let Some(track) = self
            .sessions
            .active()
            .and_then(|s| s.tracks.get(track_index))
            .cloned()
        else {
            warn!("No track {} in the current session", track_index);
            return false;
        };

        self.media_load_id += 1;
        let source = MediaSource {
            url: self.server.resolve_locator(&track.content_locator),
            mime_type: track.mime_type.clone(),
            kind: track.stream_kind(),
        };
        debug!(
            "Loading track {} ({}) as media load {}",
            track_index, track.title, self.media_load_id
        );
        self.element.load(source, self.media_load_id);
        true
    }

    async fn on_media_event(&mut self, event: MediaEvent) {
        if event.load_id != self.media_load_id {
            trace!(
                "Dropping event from stale media load {} (current {})",
                event.load_id,
                self.media_load_id
            );
            return;
        }

        match event.kind {
            MediaEventKind::MetadataLoaded { duration } => {
                trace!("Media ready, reported duration {:?}", duration);
                self.on_media_ready();
            }
            MediaEventKind::TimeUpdate(track_time) => self.on_time_update(track_time),
            MediaEventKind::Ended => self.on_track_ended().await,
            MediaEventKind::Error(failure) => self.on_media_error(failure.into_error()).await,
        }
    }

    fn on_media_ready(&mut self) {
        match self.state.clone() {
            PlayerState::Loading {
                phase:
                    LoadPhase::AwaitingMedia {
                        track_index,
                        track_time,
                    },
                autoplay,
                ..
            } => {
                self.settle_on_track(track_index, track_time);
                if autoplay {
                    self.start_playing();
                } else {
                    self.set_state(PlayerState::Ready);
                }
            }
            PlayerState::TrackSwitching(switch) => {
                self.settle_on_track(switch.target_track, switch.target_time);
                self.emit(PlaybackProgress::TrackChanged {
                    track_index: switch.target_track,
                });
                if switch.resume {
                    self.start_playing();
                } else {
                    self.set_state(PlayerState::Ready);
                }
            }
            other => debug!("Media ready while {}, ignoring", other.name()),
        }
    }

    fn settle_on_track(&mut self, track_index: usize, track_time: f64) {
        self.element.seek(track_time);
        if let Some(session) = self.sessions.active_mut() {
            session.current_track = track_index;
            session.last_known_time = session.tracks.to_global(track_index, track_time);
        }
        self.emit_position();
    }

    fn on_time_update(&mut self, track_time: f64) {
        if !self.state.is_settled() {
            return;
        }
        let Some(session) = self.sessions.active_mut() else {
            return;
        };
        session.last_known_time = session.tracks.to_global(session.current_track, track_time);
        self.emit_position();
        self.sync.note_activity();
    }

    async fn on_track_ended(&mut self) {
        if !self.state.is_settled() {
            debug!("Track ended while {}, ignoring", self.state.name());
            return;
        }
        let Some(session) = self.sessions.active_mut() else {
            return;
        };

        let finished = session.current_track;
        let end_time = session.tracks.end_of(finished).unwrap_or(session.duration);
        let has_next = finished + 1 < session.tracks.len();
        session.last_known_time = end_time;

        if has_next {
            info!("Track {} finished, advancing to {}", finished, finished + 1);
            self.flush_at(SyncReason::TrackEnd, end_time).await;
            let resume = self.state == PlayerState::Playing;
            self.set_listening(false);
            self.set_state(PlayerState::TrackSwitching(TrackSwitch {
                target_track: finished + 1,
                target_time: 0.0,
                resume,
                stored_time: end_time,
            }));
            self.load_track(finished + 1);
        } else {
            info!("Reached the end of the item");
            self.element.pause();
            self.set_listening(false);
            self.set_state(PlayerState::Paused);
            self.flush_at(SyncReason::TrackEnd, end_time).await;
        }
    }

    async fn on_media_error(&mut self, error: PlayerError) {
        error!("Media element failed: {}", error);
        let last_known = self.sessions.active().map(|s| s.last_known_time);

        self.element.stop();
        self.set_listening(false);
        let (item_id, episode_id) = self.active_ids();
        self.fail(error, item_id, episode_id);

        if let Some(time) = last_known {
            self.flush_at(SyncReason::Error, time).await;
        }
    }

    fn play(&mut self) {
        if let Err(rejected) = self.state.check_play() {
            self.reject(rejected);
            return;
        }

        match self.state.clone() {
            PlayerState::Ready | PlayerState::Paused => self.start_playing(),
            PlayerState::TrackSwitching(mut switch) if !switch.resume => {
                switch.resume = true;
                self.set_state(PlayerState::TrackSwitching(switch));
            }
            PlayerState::Loading {
                generation, phase, ..
            } => self.set_state(PlayerState::Loading {
                generation,
                phase,
                autoplay: true,
            }),
            _ => {}
        }
    }

    fn start_playing(&mut self) {
        self.element.play();
        self.set_listening(true);
        self.set_state(PlayerState::Playing);
    }

    async fn pause(&mut self) {
        if let Err(rejected) = self.state.check_pause() {
            self.reject(rejected);
            return;
        }

        match self.state.clone() {
            PlayerState::Playing => {
                let time = self.current_global_time();
                self.element.pause();
                self.set_listening(false);
                self.set_state(PlayerState::Paused);
                self.flush_at(SyncReason::Pause, time).await;
            }
            PlayerState::TrackSwitching(mut switch) if switch.resume => {
                switch.resume = false;
                let time = switch.stored_time;
                self.set_listening(false);
                self.set_state(PlayerState::TrackSwitching(switch));
                self.flush_at(SyncReason::Pause, time).await;
            }
            PlayerState::Loading {
                generation, phase, ..
            } => self.set_state(PlayerState::Loading {
                generation,
                phase,
                autoplay: false,
            }),
            _ => {}
        }
    }

    fn seek(&mut self, requested: f64) {
        if !requested.is_finite() {
            warn!("Ignoring seek to non-finite position {}", requested);
            return;
        }
        if let Err(rejected) = self.state.check_seek() {
            self.reject(rejected);
            return;
        }
        let Some(session) = self.sessions.active() else {
            return;
        };

        let target = requested.clamp(0.0, session.duration.max(0.0));
        let position = session.tracks.locate(target);
        let current_track = session.current_track;
        debug!(
            "Seek to {:.1}s -> track {} at {:.1}s",
            target, position.track_index, position.track_time
        );

        match self.state.clone() {
            PlayerState::TrackSwitching(mut switch) => {
                if position.track_index != switch.target_track {
                    self.load_track(position.track_index);
                }
                switch.target_track = position.track_index;
                switch.target_time = position.track_time;
                self.set_state(PlayerState::TrackSwitching(switch));
            }
            _ if position.track_index == current_track => {
                self.element.seek(position.track_time);
                if let Some(session) = self.sessions.active_mut() {
                    session.last_known_time = target;
                }
                self.emit_position();
            }
            state => {
                let stored_time = self.current_global_time();
                self.element.pause();
                self.set_listening(false);
                self.set_state(PlayerState::TrackSwitching(TrackSwitch {
                    target_track: position.track_index,
                    target_time: position.track_time,
                    resume: state == PlayerState::Playing,
                    stored_time,
                }));
                self.load_track(position.track_index);
            }
        }

        self.sync.note_activity();
    }

    fn jump_to_chapter(&mut self, chapter_id: i64) {
        let Some(chapter) = self.chapters.get(chapter_id) else {
            warn!("No chapter {} in the current item", chapter_id);
            return;
        };
        let target = ChapterIndex::jump_target(chapter, chapter.start);
        self.seek(target);
    }

    fn step_chapter(&mut self, direction: Direction) {
        let now = self.current_global_time();
        let target = self
            .chapters
            .adjacent(now, direction)
            .map(|chapter| ChapterIndex::jump_target(chapter, chapter.start));
        match target {
            Some(target) => self.seek(target),
            None => debug!("No {:?} chapter from {:.1}s", direction, now),
        }
    }

    /// Final sync and close for the live session, leaving the service idle
    async fn release_session(&mut self, reason: SyncReason, wait_for_close: bool) {
        self.generation += 1;
        if let Some(task) = self.in_flight_load.take() {
            task.abort();
        }

        if self.sessions.active().is_some() {
            let time = self.current_global_time();
            self.element.pause();
            self.set_listening(false);
            self.flush_at(reason, time).await;
        }

        self.element.stop();
        self.media_load_id += 1;
        self.chapters = ChapterIndex::default();

        if let Some(session) = self.sessions.clear() {
            if wait_for_close {
                if let Err(e) = self.server.close_session(&session.session_id).await {
                    warn!("Failed to close session {}: {}", session.session_id, e);
                }
            } else {
                self.close_in_background(session.session_id);
            }
        }

        self.set_state(PlayerState::Idle);
    }

    async fn flush(&mut self, reason: SyncReason) {
        let time = self.current_global_time();
        self.flush_at(reason, time).await;
    }

    async fn flush_at(&mut self, reason: SyncReason, current_time: f64) {
        self.sync.cancel_debounce();
        let Some(session) = self.sessions.active_mut() else {
            return;
        };
        session.last_known_time = current_time;
        let outcome = self.sync.sync_session(session, current_time, reason).await;
        self.emit_synced(&outcome, reason);
    }

    fn close_in_background(&self, session_id: String) {
        let server = self.server.clone();
        tokio::spawn(async move {
            match server.close_session(&session_id).await {
                Ok(()) => debug!("Closed session {}", session_id),
                Err(e) => warn!("Failed to close session {}: {}", session_id, e),
            }
        });
    }

    /// Global position to report right now
    fn current_global_time(&self) -> f64 {
        let Some(session) = self.sessions.active() else {
            return 0.0;
        };
        match &self.state {
            PlayerState::TrackSwitching(switch) => switch.stored_time,
            state if state.is_settled() => session
                .tracks
                .to_global(session.current_track, self.element.current_time()),
            _ => session.last_known_time,
        }
    }

    fn set_listening(&mut self, listening: bool) {
        let now = Instant::now();
        if let Some(session) = self.sessions.active_mut() {
            if listening {
                session.resume_listening(now);
            } else {
                session.pause_listening(now);
            }
        }
    }

    fn active_ids(&self) -> (Option<String>, Option<String>) {
        match self.sessions.active() {
            Some(session) => (Some(session.item_id.clone()), session.episode_id.clone()),
            None => (None, None),
        }
    }

    fn fail(&mut self, error: PlayerError, item_id: Option<String>, episode_id: Option<String>) {
        self.sync.cancel_debounce();
        self.set_state(PlayerState::Error(error.clone()));
        self.emit(PlaybackProgress::Error {
            error,
            item_id,
            episode_id,
        });
    }

    fn reject(&self, rejected: RejectedCommand) {
        warn!("Ignoring command: {}", rejected);
        self.emit(PlaybackProgress::CommandRejected {
            command: rejected.command,
            state: rejected.state,
        });
    }

    fn set_state(&mut self, state: PlayerState) {
        if self.state == state {
            return;
        }
        debug!("Playback state: {} -> {}", self.state.name(), state.name());
        if state == PlayerState::Playing && self.state != PlayerState::Playing {
            // Floor interval counts from the moment playback starts
            self.floor.reset();
        }
        self.state = state.clone();
        self.emit(PlaybackProgress::StateChanged { state });
    }

    fn emit_position(&self) {
        let Some(session) = self.sessions.active() else {
            return;
        };
        let current_time = session.last_known_time;
        let chapters = self.chapters.enhance(current_time, Some(&session.tracks));
        self.emit(PlaybackProgress::PositionUpdate {
            current_time,
            track_index: session.current_track,
            chapter_id: self.chapters.chapter_at(current_time).map(|c| c.id),
            chapter_progress: overall_progress(&chapters),
            chapters,
        });
    }

    fn emit_synced(&self, outcome: &SyncOutcome, reason: SyncReason) {
        self.emit(PlaybackProgress::Synced {
            session_id: outcome.session_id.clone(),
            current_time: outcome.request.current_time,
            time_listened: outcome.request.time_listened,
            reason,
            succeeded: outcome.result.is_ok(),
        });
    }

    fn emit(&self, progress: PlaybackProgress) {
        let _ = self.progress_tx.send(progress);
    }
}
