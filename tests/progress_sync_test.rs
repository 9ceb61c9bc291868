mod support;

use shelfplay::config::SyncConfig;
use shelfplay::error::{ErrorKind, PlayerError};
use shelfplay::playback::{PlaybackProgress, PlayerState, SyncReason};
use shelfplay::test_support::{book_descriptor, CallLog};
use std::time::Duration;
use support::{eventually, quiet_sync, PlayerFixture};
use tokio::time::{sleep, Instant};

fn single_track_book() -> shelfplay::models::PlaybackDescriptor {
    book_descriptor("sess-1", "book-1", &[1000.0], vec![], 0.0)
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 0.05,
        "expected {} to be close to {}",
        actual,
        expected
    );
}

#[tokio::test(start_paused = true)]
async fn test_debounce_fires_after_quiet_period() {
    let mut player = PlayerFixture::new(SyncConfig::default());
    player.load_ready(single_track_book()).await;

    let started = Instant::now();
    player.advance_to(5.0, 5.0).await;
    let sync = player.wait_for_sync(SyncReason::Debounce).await;

    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(2), "fired after {:?}", waited);
    assert!(waited < Duration::from_secs(3), "fired after {:?}", waited);
    assert_eq!(sync.current_time, 5.0);
    assert_eq!(player.server.sync_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_debounce_coalesces_bursts() {
    let mut player = PlayerFixture::new(SyncConfig::default());
    player.load_ready(single_track_book()).await;

    for t in 1..=3 {
        player.advance_to(t as f64, t as f64).await;
        sleep(Duration::from_secs(1)).await;
    }
    let sync = player.wait_for_sync(SyncReason::Debounce).await;

    assert_eq!(sync.current_time, 3.0);
    assert_eq!(player.server.sync_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_floor_interval_syncs_during_steady_playback() {
    let mut player = PlayerFixture::new(SyncConfig::default());
    player.load_playing(single_track_book()).await;

    // Position updates every second keep pushing the debounce back
    let element = player.element.clone();
    let feeder = tokio::spawn(async move {
        for t in 1..=40 {
            sleep(Duration::from_secs(1)).await;
            element.advance_to(t as f64);
        }
    });

    let started = Instant::now();
    let mut reasons = Vec::new();
    let mut intervals = Vec::new();
    while intervals.len() < 2 {
        let synced = player
            .wait_for(|p| match p {
                PlaybackProgress::Synced {
                    reason,
                    current_time,
                    time_listened,
                    ..
                } => Some((reason, current_time, time_listened)),
                _ => None,
            })
            .await;
        reasons.push(synced.0);
        if synced.0 == SyncReason::Interval {
            intervals.push((started.elapsed(), synced.1, synced.2));
        }
    }
    feeder.abort();

    assert!(
        reasons.iter().all(|r| *r == SyncReason::Interval),
        "reasons: {:?}",
        reasons
    );
    let (first_at, first_time, first_listened) = intervals[0];
    let (second_at, _, second_listened) = intervals[1];
    assert!(first_at >= Duration::from_secs(10) && first_at < Duration::from_secs(11));
    assert!(second_at >= Duration::from_secs(20) && second_at < Duration::from_secs(21));
    assert!((9.0..=10.0).contains(&first_time), "reported {}", first_time);
    assert_close(first_listened, 10.0);
    assert_close(second_listened, 10.0);
}

#[tokio::test(start_paused = true)]
async fn test_floor_is_idle_when_not_playing() {
    let mut player = PlayerFixture::new(SyncConfig::default());
    player.load_ready(single_track_book()).await;

    sleep(Duration::from_secs(35)).await;

    assert!(player.server.sync_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_paused_time_is_not_counted_as_listened() {
    let mut player = PlayerFixture::new(SyncConfig::default());
    player.load_playing(single_track_book()).await;

    sleep(Duration::from_secs(4)).await;
    player.handle.pause();
    let first = player.wait_for_sync(SyncReason::Pause).await;
    assert_close(first.time_listened, 4.0);

    sleep(Duration::from_secs(30)).await;
    player.handle.play();
    player.wait_until(PlayerState::Playing).await;
    sleep(Duration::from_secs(3)).await;
    player.handle.pause();
    let second = player.wait_for_sync(SyncReason::Pause).await;

    assert_close(second.time_listened, 3.0);
    assert_eq!(player.server.sync_calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_sync_does_not_block_playback() {
    let mut player = PlayerFixture::new(SyncConfig::default());
    player.server.set_sync_failure(Some(PlayerError::new(
        ErrorKind::NetworkUnavailable,
        "connection reset",
    )));
    player.load_playing(single_track_book()).await;

    sleep(Duration::from_secs(2)).await;
    player.handle.pause();
    let failed = player.wait_for_sync(SyncReason::Pause).await;
    assert!(!failed.succeeded);
    assert!(player.cache.get("book-1").is_none());

    player.handle.play();
    player.wait_until(PlayerState::Playing).await;
    assert!(player.element.is_playing());

    player.server.set_sync_failure(None);
    sleep(Duration::from_secs(1)).await;
    player.advance_to(7.0, 7.0).await;
    let recovered = player.wait_for_sync(SyncReason::Debounce).await;

    assert!(recovered.succeeded);
    // The failed attempt still moved the baseline, so only time since resuming counts
    assert_close(recovered.time_listened, 3.0);
    let cached = player.cache.get("book-1").expect("progress cached after sync");
    assert_eq!(cached.current_time, 7.0);
    assert_eq!(cached.duration, 1000.0);
    assert!(!cached.is_finished);
}

fn two_track_book() -> shelfplay::models::PlaybackDescriptor {
    book_descriptor("sess-1", "book-1", &[300.0, 300.0], vec![], 0.0)
}

/// Manual element playing the first track of `two_track_book`
async fn playing_manual_player() -> PlayerFixture {
    let mut player = PlayerFixture::manual(quiet_sync(), CallLog::default());
    player.server.add_item(two_track_book());
    player.handle.load_and_play("book-1", None);
    eventually(|| player.element.load_count() == 1).await;
    player.element.ready();
    player.wait_until(PlayerState::Playing).await;
    player
}

#[tokio::test(start_paused = true)]
async fn test_track_switch_after_end_is_not_counted_as_listened() {
    let mut player = playing_manual_player().await;

    sleep(Duration::from_secs(4)).await;
    player.element.finish();
    let track_end = player.wait_for_sync(SyncReason::TrackEnd).await;
    assert_close(track_end.time_listened, 4.0);

    // Next segment takes a long time to buffer
    eventually(|| player.element.load_count() == 2).await;
    sleep(Duration::from_secs(30)).await;
    player.element.ready();
    player.wait_until(PlayerState::Playing).await;

    sleep(Duration::from_secs(2)).await;
    player.handle.pause();
    let paused = player.wait_for_sync(SyncReason::Pause).await;
    assert_close(paused.time_listened, 2.0);
}

#[tokio::test(start_paused = true)]
async fn test_cross_track_seek_switch_is_not_counted_as_listened() {
    let mut player = playing_manual_player().await;

    sleep(Duration::from_secs(4)).await;
    player.handle.seek(320.0);
    player
        .wait_for_state(|s| matches!(s, PlayerState::TrackSwitching(_)))
        .await;
    player.handle.pause();
    let switching_pause = player.wait_for_sync(SyncReason::Pause).await;
    assert_close(switching_pause.time_listened, 4.0);

    // Asking to resume mid-switch starts nothing until the new segment is ready
    player.handle.play();
    eventually(|| player.element.load_count() == 2).await;
    sleep(Duration::from_secs(30)).await;
    player.element.ready();
    player.wait_until(PlayerState::Playing).await;

    sleep(Duration::from_secs(2)).await;
    player.handle.pause();
    let paused = player.wait_for_sync(SyncReason::Pause).await;
    assert_eq!(paused.current_time, 320.0);
    assert_close(paused.time_listened, 2.0);
}
