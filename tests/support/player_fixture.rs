use shelfplay::config::SyncConfig;
use shelfplay::models::PlaybackDescriptor;
use shelfplay::playback::{PlaybackHandle, PlaybackProgress, PlaybackService, PlayerState, SyncReason};
use shelfplay::progress_service::ProgressService;
use shelfplay::test_support::{CallLog, MockElementController, MockMediaElement, MockMediaServer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

/// Long enough that no test should ever hit it, including under a paused clock
const WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Timers pushed far enough out that only explicit flushes reach the server
pub fn quiet_sync() -> SyncConfig {
    SyncConfig {
        debounce: Duration::from_secs(3600),
        floor_interval: Duration::from_secs(36_000),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    pub session_id: String,
    pub current_time: f64,
    pub time_listened: f64,
    pub reason: SyncReason,
    pub succeeded: bool,
}

/// Playback service wired to mocks, with a progress subscription
pub struct PlayerFixture {
    pub handle: PlaybackHandle,
    pub progress_rx: UnboundedReceiver<PlaybackProgress>,
    pub server: Arc<MockMediaServer>,
    pub element: MockElementController,
    pub cache: ProgressService,
    pub log: CallLog,
}

impl PlayerFixture {
    /// Fixture whose element reports metadata as soon as a source is loaded
    pub fn new(sync: SyncConfig) -> Self {
        Self::build(sync, CallLog::default(), false)
    }

    /// Fixture whose element waits for `element.ready()`
    pub fn manual(sync: SyncConfig, log: CallLog) -> Self {
        Self::build(sync, log, true)
    }

    fn build(sync: SyncConfig, log: CallLog, manual: bool) -> Self {
        super::tracing_init();

        let server = Arc::new(MockMediaServer::with_log(log.clone()));
        let (element, controller, media_rx) = if manual {
            MockMediaElement::manual(log.clone())
        } else {
            MockMediaElement::new(log.clone())
        };
        let cache = ProgressService::new();

        let handle = PlaybackService::start(
            sync,
            server.clone(),
            Box::new(element),
            media_rx,
            Some(cache.clone()),
            tokio::runtime::Handle::current(),
        );
        let progress_rx = handle.subscribe_progress();

        Self {
            handle,
            progress_rx,
            server,
            element: controller,
            cache,
            log,
        }
    }

    /// Wait until `pick` returns a value for some progress update
    pub async fn wait_for<T, F>(&mut self, mut pick: F) -> T
    where
        F: FnMut(PlaybackProgress) -> Option<T>,
    {
        let progress_rx = &mut self.progress_rx;
        timeout(WAIT_TIMEOUT, async move {
            loop {
                match progress_rx.recv().await {
                    Some(progress) => {
                        if let Some(value) = pick(progress) {
                            return value;
                        }
                    }
                    None => panic!("Progress channel closed"),
                }
            }
        })
        .await
        .expect("Timed out waiting for playback progress")
    }

    pub async fn wait_for_state<F>(&mut self, predicate: F) -> PlayerState
    where
        F: Fn(&PlayerState) -> bool,
    {
        self.wait_for(|progress| match progress {
            PlaybackProgress::StateChanged { state } if predicate(&state) => Some(state),
            _ => None,
        })
        .await
    }

    pub async fn wait_until(&mut self, expected: PlayerState) {
        self.wait_for_state(|s| *s == expected).await;
    }

    pub async fn wait_for_sync(&mut self, reason: SyncReason) -> SyncEvent {
        self.wait_for(|progress| match progress {
            PlaybackProgress::Synced {
                session_id,
                current_time,
                time_listened,
                reason: r,
                succeeded,
            } if r == reason => Some(SyncEvent {
                session_id,
                current_time,
                time_listened,
                reason: r,
                succeeded,
            }),
            _ => None,
        })
        .await
    }

    pub async fn wait_for_position(&mut self, global_time: f64) -> Option<i64> {
        self.wait_for(|progress| match progress {
            PlaybackProgress::PositionUpdate {
                current_time,
                chapter_id,
                ..
            } if (current_time - global_time).abs() < 1e-6 => Some(chapter_id),
            _ => None,
        })
        .await
    }
}

impl PlayerFixture {
    /// Register `descriptor`, load it paused and wait until it is ready
    pub async fn load_ready(&mut self, descriptor: PlaybackDescriptor) {
        let (item_id, episode_id) = (descriptor.item_id.clone(), descriptor.episode_id.clone());
        self.server.add_item(descriptor);
        self.handle.load(item_id, episode_id);
        self.wait_until(PlayerState::Ready).await;
    }

    /// Register `descriptor`, load it with autoplay and wait until it plays
    pub async fn load_playing(&mut self, descriptor: PlaybackDescriptor) {
        let (item_id, episode_id) = (descriptor.item_id.clone(), descriptor.episode_id.clone());
        self.server.add_item(descriptor);
        self.handle.load_and_play(item_id, episode_id);
        self.wait_until(PlayerState::Playing).await;
    }

    /// Move the mock playhead and wait for the service to see it
    pub async fn advance_to(&mut self, track_time: f64, global_time: f64) {
        self.element.advance_to(track_time);
        self.wait_for_position(global_time).await;
    }
}

/// Poll `condition` until it holds
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    timeout(WAIT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Condition never became true");
}
