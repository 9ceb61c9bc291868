//! Chapter lookup, per-chapter completion and chapter navigation.

use crate::models::Chapter;
use crate::playback::track_index::TrackIndex;
use std::sync::Arc;

/// Completion at which a chapter counts as finished.
/// Players often stop just shy of the exact end because of decoder rounding.
pub const COMPLETION_THRESHOLD: f64 = 0.95;

/// Distance kept from a chapter's end when jumping into it
pub const CHAPTER_SEEK_BUFFER: f64 = 0.1;

/// Chapter with progress derived from the current time. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedChapter {
    pub chapter: Chapter,
    pub duration: f64,
    pub completion: f64,
    pub is_completed: bool,
    /// Track holding the chapter's start, for multi-track items
    pub track_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Fraction of `chapter` played at `time`, in `[0, 1]`
pub fn completion_fraction(chapter: &Chapter, time: f64) -> f64 {
    if time < chapter.start {
        0.0
    } else if time >= chapter.end {
        1.0
    } else {
        let span = chapter.end - chapter.start;
        if span <= 0.0 {
            return 1.0;
        }
        ((time - chapter.start) / span).clamp(0.0, 1.0)
    }
}

/// Coarse whole-item progress: completed chapters plus the fraction of the
/// one in progress, divided by the chapter count. Not duration weighted.
pub fn overall_progress(enhanced: &[EnhancedChapter]) -> f64 {
    if enhanced.is_empty() {
        return 0.0;
    }

    let completed = enhanced.iter().filter(|c| c.is_completed).count() as f64;
    let active = enhanced
        .iter()
        .find(|c| !c.is_completed && c.completion > 0.0)
        .map(|c| c.completion)
        .unwrap_or(0.0);

    (completed + active) / enhanced.len() as f64
}

/// Read-only snapshot of an item's chapters, rebuilt on every load
#[derive(Debug, Clone, Default)]
pub struct ChapterIndex {
    chapters: Arc<[Chapter]>,
}

impl ChapterIndex {
    pub fn new(chapters: Vec<Chapter>) -> Self {
        Self {
            chapters: chapters.into(),
        }
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == id)
    }

    fn position_at(&self, time: f64) -> Option<usize> {
        self.chapters.iter().position(|c| c.contains(time))
    }

    /// Chapter containing `time`, if any
    pub fn chapter_at(&self, time: f64) -> Option<&Chapter> {
        self.position_at(time).map(|i| &self.chapters[i])
    }

    /// Neighbouring chapter in `direction`.
    ///
    /// When `time` is inside no chapter, `Next` yields the first chapter and
    /// `Previous` yields the last one.
    pub fn adjacent(&self, time: f64, direction: Direction) -> Option<&Chapter> {
        match (self.position_at(time), direction) {
            (Some(i), Direction::Next) => self.chapters.get(i + 1),
            (Some(i), Direction::Previous) => i.checked_sub(1).and_then(|p| self.chapters.get(p)),
            (None, Direction::Next) => self.chapters.first(),
            (None, Direction::Previous) => self.chapters.last(),
        }
    }

    pub fn enhance(&self, time: f64, tracks: Option<&TrackIndex>) -> Vec<EnhancedChapter> {
        self.chapters
            .iter()
            .map(|chapter| {
                let completion = completion_fraction(chapter, time);
                let track_index = tracks
                    .filter(|t| !t.is_single())
                    .map(|t| t.locate(chapter.start).track_index);
                EnhancedChapter {
                    chapter: chapter.clone(),
                    duration: chapter.duration(),
                    completion,
                    is_completed: completion >= COMPLETION_THRESHOLD,
                    track_index,
                }
            })
            .collect()
    }

    /// Seek target inside `chapter` that never lands on or past its end
    pub fn jump_target(chapter: &Chapter, requested: f64) -> f64 {
        chapter
            .start
            .max((chapter.end - CHAPTER_SEEK_BUFFER).min(requested))
    }
}
