//! Maps between the item's global timeline and segment-relative positions.

use crate::models::Track;
use std::sync::Arc;
use tracing::warn;

/// Segment containing a global time, and the time within that segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPosition {
    pub track_index: usize,
    pub track_time: f64,
}

/// Read-only snapshot of an item's tracks, rebuilt on every load
#[derive(Debug, Clone, Default)]
pub struct TrackIndex {
    tracks: Arc<[Track]>,
}

impl TrackIndex {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks: tracks.into(),
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Single-track items map global time to media time one-to-one
    pub fn is_single(&self) -> bool {
        self.tracks.len() <= 1
    }

    pub fn total_duration(&self) -> f64 {
        self.tracks.last().map(Track::end_offset).unwrap_or(0.0)
    }

    /// Find the segment whose `[start, start + duration)` contains `global_time`.
    ///
    /// Times at or below zero resolve to the start of the first track; times past
    /// the end clamp to the end of the last track.
    pub fn locate(&self, global_time: f64) -> TrackPosition {
        if global_time <= 0.0 || self.tracks.is_empty() {
            return TrackPosition {
                track_index: 0,
                track_time: global_time.max(0.0),
            };
        }

        let last_index = self.tracks.len() - 1;
        let last = &self.tracks[last_index];
        if global_time >= last.end_offset() {
            return TrackPosition {
                track_index: last_index,
                track_time: last.duration,
            };
        }

        if self.is_single() {
            return TrackPosition {
                track_index: 0,
                track_time: (global_time - last.start_offset).max(0.0),
            };
        }

        // Offsets are monotonic, so the containing track is the last one starting at or before the time
        let index = self
            .tracks
            .partition_point(|t| t.start_offset <= global_time)
            .saturating_sub(1);
        let track = &self.tracks[index];

        TrackPosition {
            track_index: index,
            track_time: (global_time - track.start_offset).max(0.0),
        }
    }

    /// Convert a segment-relative time back to the global timeline.
    ///
    /// An out-of-range index is logged and the relative time is returned unchanged.
    pub fn to_global(&self, track_index: usize, track_time: f64) -> f64 {
        match self.tracks.get(track_index) {
            Some(track) => track.start_offset + track_time,
            None => {
                if !self.tracks.is_empty() {
                    warn!(
                        "Track index {} out of range ({} tracks), treating {:.3}s as global",
                        track_index,
                        self.tracks.len(),
                        track_time
                    );
                }
                track_time
            }
        }
    }

    /// Global time at which the given track ends
    pub fn end_of(&self, track_index: usize) -> Option<f64> {
        self.tracks.get(track_index).map(Track::end_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(index: usize, start: f64, duration: f64) -> Track {
        Track {
            index,
            title: format!("Part {}", index + 1),
            duration,
            start_offset: start,
            content_locator: format!("/api/items/book/file/{}", index),
            mime_type: Some("audio/mpeg".to_string()),
        }
    }

    fn two_tracks() -> TrackIndex {
        TrackIndex::new(vec![track(0, 0.0, 300.0), track(1, 300.0, 280.0)])
    }

    #[test]
    fn test_locate_inside_second_track() {
        let index = two_tracks();
        let pos = index.locate(310.0);
        assert_eq!(pos.track_index, 1);
        assert!((pos.track_time - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_locate_on_boundary_belongs_to_next_track() {
        let pos = two_tracks().locate(300.0);
        assert_eq!(pos.track_index, 1);
        assert_eq!(pos.track_time, 0.0);
    }

    #[test]
    fn test_single_offset_track_never_yields_negative_time() {
        let index = TrackIndex::new(vec![track(0, 30.0, 100.0)]);
        assert_eq!(
            index.locate(10.0),
            TrackPosition {
                track_index: 0,
                track_time: 0.0,
            }
        );
        assert_eq!(index.locate(50.0).track_time, 20.0);
    }

    #[test]
    fn test_locate_clamps_below_zero() {
        let index = two_tracks();
        assert_eq!(index.locate(-5.0), index.locate(0.0));
        assert_eq!(
            index.locate(0.0),
            TrackPosition {
                track_index: 0,
                track_time: 0.0
            }
        );
    }

    #[test]
    fn test_locate_clamps_past_end() {
        let index = two_tracks();
        let pos = index.locate(index.total_duration() + 100.0);
        assert_eq!(pos.track_index, 1);
        assert_eq!(pos.track_time, 280.0);
    }

    #[test]
    fn test_locate_and_to_global_are_inverse() {
        let index = TrackIndex::new(vec![
            track(0, 0.0, 120.5),
            track(1, 120.5, 33.25),
            track(2, 153.75, 600.0),
        ]);
        let total = index.total_duration();
        let mut t = 0.0;
        while t < total {
            let pos = index.locate(t);
            let back = index.to_global(pos.track_index, pos.track_time);
            assert!((back - t).abs() < 1e-6, "{} -> {:?} -> {}", t, pos, back);
            t += 7.3;
        }
    }

    #[test]
    fn test_single_track_passthrough() {
        let index = TrackIndex::new(vec![track(0, 0.0, 1000.0)]);
        assert!(index.is_single());
        for t in [0.0, 0.5, 10.0, 999.99, 1000.0] {
            let pos = index.locate(t);
            assert_eq!(pos.track_index, 0);
            assert_eq!(pos.track_time, t);
            assert_eq!(index.to_global(0, t), t);
        }
    }

    #[test]
    fn test_to_global_out_of_range_returns_relative_time() {
        let index = two_tracks();
        assert_eq!(index.to_global(7, 42.0), 42.0);
        assert_eq!(index.to_global(1, 42.0), 342.0);
    }

    #[test]
    fn test_end_of_track() {
        let index = two_tracks();
        assert_eq!(index.end_of(0), Some(300.0));
        assert_eq!(index.end_of(1), Some(580.0));
        assert_eq!(index.end_of(2), None);
    }
}
