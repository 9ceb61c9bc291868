use crate::playback::{PlaybackHandle, PlaybackProgress, PlayerState};
use souvlaki::{
    MediaControlEvent, MediaControls, MediaMetadata, MediaPlayback, MediaPosition,
    PlatformConfig, SeekDirection,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, trace};

/// Step used by the OS "skip forward/back" buttons when no amount is given
const DEFAULT_SKIP: Duration = Duration::from_secs(30);

/// Title and length of the item currently loaded
#[derive(Default)]
struct NowPlaying {
    title: Option<String>,
    duration: Option<Duration>,
}

/// Register with the OS media controls (media keys, lock screen, MPRIS).
///
/// Returns the MediaControls handle, which must be kept alive for as long as
/// the controls should stay registered.
pub fn setup_media_controls(
    playback_handle: PlaybackHandle,
    runtime_handle: tokio::runtime::Handle,
) -> Result<Arc<Mutex<MediaControls>>, souvlaki::Error> {
    let config = PlatformConfig {
        dbus_name: "shelfplay", // Used on Linux
        display_name: "shelfplay",
        hwnd: None, // Used on Windows
    };

    let mut controls = MediaControls::new(config)?;

    let playback = playback_handle.clone();
    controls.attach(move |event: MediaControlEvent| {
        trace!("Media control event: {:?}", event);
        match event {
            MediaControlEvent::Toggle => playback.toggle_play_pause(),
            MediaControlEvent::Play => playback.play(),
            MediaControlEvent::Pause => playback.pause(),
            // Chapters are the natural skip unit for audiobooks
            MediaControlEvent::Next => playback.next_chapter(),
            MediaControlEvent::Previous => playback.previous_chapter(),
            MediaControlEvent::Seek(direction) => {
                playback.seek_relative(signed_seconds(direction, DEFAULT_SKIP))
            }
            MediaControlEvent::SeekBy(direction, amount) => {
                playback.seek_relative(signed_seconds(direction, amount))
            }
            MediaControlEvent::SetPosition(MediaPosition(position)) => {
                playback.seek(position.as_secs_f64())
            }
            MediaControlEvent::Stop => playback.stop(),
            other => info!("Unhandled media control event: {:?}", other),
        }
    })?;

    let controls_shared = Arc::new(Mutex::new(controls));

    {
        let controls_shared = controls_shared.clone();
        let mut progress_rx = playback_handle.subscribe_progress();
        runtime_handle.spawn(async move {
            let mut state = PlayerState::Idle;
            let mut now_playing = NowPlaying::default();
            let mut position = Duration::ZERO;

            while let Some(progress) = progress_rx.recv().await {
                match progress {
                    PlaybackProgress::SessionStarted {
                        display_title,
                        duration,
                        ..
                    } => {
                        now_playing = NowPlaying {
                            title: display_title,
                            duration: Some(Duration::from_secs_f64(duration.max(0.0))),
                        };
                        set_metadata(&controls_shared, &now_playing);
                    }
                    PlaybackProgress::StateChanged { state: new_state } => {
                        if new_state == PlayerState::Idle {
                            now_playing = NowPlaying::default();
                            set_metadata(&controls_shared, &now_playing);
                        }
                        state = new_state;
                        set_playback(&controls_shared, &state, position);
                    }
                    PlaybackProgress::PositionUpdate { current_time, .. } => {
                        position = Duration::from_secs_f64(current_time.max(0.0));
                        set_playback(&controls_shared, &state, position);
                    }
                    _ => {}
                }
            }
            info!("Media controls: progress channel closed");
        });
    }

    info!("Media controls initialized");
    Ok(controls_shared)
}

fn signed_seconds(direction: SeekDirection, amount: Duration) -> f64 {
    match direction {
        SeekDirection::Forward => amount.as_secs_f64(),
        SeekDirection::Backward => -amount.as_secs_f64(),
    }
}

fn playback_for(state: &PlayerState, position: Duration) -> MediaPlayback {
    let progress = Some(MediaPosition(position));
    match state {
        PlayerState::Playing => MediaPlayback::Playing { progress },
        PlayerState::TrackSwitching(switch) if switch.resume => {
            MediaPlayback::Playing { progress }
        }
        PlayerState::Ready | PlayerState::Paused | PlayerState::TrackSwitching(_) => {
            MediaPlayback::Paused { progress }
        }
        PlayerState::Idle | PlayerState::Loading { .. } | PlayerState::Error(_) => {
            MediaPlayback::Stopped
        }
    }
}

fn set_playback(controls: &Arc<Mutex<MediaControls>>, state: &PlayerState, position: Duration) {
    let mut controls = controls.lock().unwrap();
    if let Err(e) = controls.set_playback(playback_for(state, position)) {
        error!("Failed to set playback state: {:?}", e);
    }
}

fn set_metadata(controls: &Arc<Mutex<MediaControls>>, now_playing: &NowPlaying) {
    let metadata = MediaMetadata {
        title: now_playing.title.as_deref(),
        duration: now_playing.duration,
        ..Default::default()
    };
    let mut controls = controls.lock().unwrap();
    if let Err(e) = controls.set_metadata(metadata) {
        error!("Failed to set media metadata: {:?}", e);
    }
}
