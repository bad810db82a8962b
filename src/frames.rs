//! Wire-facing frame and score types: replay frames, bundle headers and the
//! shared score cell the streaming pipeline snapshots at every flush.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::state::{HitResult, Mod, PlayState, INLINE_MODS};

/// Button state carried by a replay frame, as a bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ReplayButtons(u8);

impl ReplayButtons {
    /// No buttons pressed.
    pub const NONE: Self = Self(0);
    /// The left action button.
    pub const LEFT: Self = Self(1);
    /// The right action button.
    pub const RIGHT: Self = Self(1 << 1);

    /// Creates a button set from its raw bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The raw bits of this button set.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every button in `other` is held in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ReplayButtons {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ReplayButtons {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A single input frame in the wire replay representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    /// Session-relative timestamp in milliseconds.
    pub time: f64,
    /// Cursor x position.
    pub x: f32,
    /// Cursor y position.
    pub y: f32,
    /// Buttons held during this frame.
    pub buttons: ReplayButtons,
    /// Score snapshot stamped onto the final frame of a received bundle.
    /// Always `None` on outbound frames; the bundle header travels separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<FrameHeader>,
}

impl ReplayFrame {
    /// Creates a frame without a header.
    #[must_use]
    pub fn new(time: f64, x: f32, y: f32, buttons: ReplayButtons) -> Self {
        Self {
            time,
            x,
            y,
            buttons,
            header: None,
        }
    }
}

/// Converts gameplay-side input into the wire replay representation.
///
/// The streaming pipeline accepts anything implementing this trait and converts
/// on entry, so gameplay code never builds wire types directly.
pub trait GameplayFrame {
    /// The wire replay form of this frame.
    fn to_replay_frame(&self) -> ReplayFrame;
}

impl GameplayFrame for ReplayFrame {
    fn to_replay_frame(&self) -> ReplayFrame {
        self.clone()
    }
}

/// A point-in-time score snapshot attached to every frame bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// Total score at snapshot time.
    pub total_score: i64,
    /// Accuracy in `0.0..=1.0` at snapshot time.
    pub accuracy: f64,
    /// Current combo at snapshot time.
    pub combo: u32,
    /// Highest combo reached so far.
    pub max_combo: u32,
    /// Judgement counts accumulated so far.
    pub statistics: BTreeMap<HitResult, u32>,
}

impl FrameHeader {
    /// Snapshots the given score.
    #[must_use]
    pub fn new(score: &Score) -> Self {
        Self {
            total_score: score.total_score,
            accuracy: score.accuracy,
            combo: score.combo,
            max_combo: score.max_combo,
            statistics: score.statistics.clone(),
        }
    }
}

/// A batch of input frames plus the score snapshot current at flush time,
/// sent (and retried) as one network unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDataBundle {
    /// Score snapshot taken when the bundle was flushed.
    pub header: FrameHeader,
    /// The batched frames, oldest first.
    pub frames: Vec<ReplayFrame>,
}

impl FrameDataBundle {
    /// Bundles the given frames under a fresh snapshot of `score`.
    #[must_use]
    pub fn new(score: &Score, frames: Vec<ReplayFrame>) -> Self {
        Self {
            header: FrameHeader::new(score),
            frames,
        }
    }
}

/// A live scoring accumulator, updated by the gameplay engine during a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Total score so far.
    pub total_score: i64,
    /// Accuracy in `0.0..=1.0`. Starts at `1.0` before any judgement lands.
    pub accuracy: f64,
    /// Current combo.
    pub combo: u32,
    /// Highest combo reached so far.
    pub max_combo: u32,
    /// Judgement counts so far.
    pub statistics: BTreeMap<HitResult, u32>,
}

impl Default for Score {
    fn default() -> Self {
        Self {
            total_score: 0,
            accuracy: 1.0,
            combo: 0,
            max_combo: 0,
            statistics: BTreeMap::new(),
        }
    }
}

/// A shared handle to the live [`Score`] of one play session.
///
/// The gameplay engine updates the score through one clone of the cell while
/// the streaming pipeline snapshots it at flush time through another; the
/// mutex inside keeps the two sides coherent. Cell identity (pointer equality
/// of the shared allocation) is what ties an end-of-play request back to the
/// session it started, see [`ptr_eq()`](Self::ptr_eq).
pub struct ScoreCell(Arc<Mutex<Score>>);

impl ScoreCell {
    /// Creates a cell holding the given initial score.
    #[must_use]
    pub fn new(score: Score) -> Self {
        Self(Arc::new(Mutex::new(score)))
    }

    /// Mutates the score in place.
    pub fn update(&self, f: impl FnOnce(&mut Score)) {
        let mut score = self.0.lock();
        f(&mut score);
    }

    /// Clones the current score out of the cell.
    #[must_use]
    pub fn snapshot(&self) -> Score {
        self.0.lock().clone()
    }

    /// Whether two cells are handles to the same underlying score.
    ///
    /// Two cells holding equal scores are still distinct sessions; only a
    /// clone of the original handle compares equal here.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for ScoreCell {
    fn default() -> Self {
        Self::new(Score::default())
    }
}

/// Clones the handle, not the score. Both handles observe the same session.
impl Clone for ScoreCell {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl fmt::Debug for ScoreCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.lock();
        f.debug_struct("ScoreCell")
            .field("total_score", &inner.total_score)
            .field("combo", &inner.combo)
            .finish_non_exhaustive()
    }
}

/// Server-issued token tying a play session to score submission.
///
/// Opaque to this crate; it is forwarded verbatim when the session begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScoreToken(i64);

impl ScoreToken {
    /// Creates a token from its raw value.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw token value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for ScoreToken {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ScoreToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a new play session carries when it starts.
///
/// Passed to [`begin_playing`](crate::SpectatorClient::begin_playing), which
/// snapshots the descriptive fields and keeps the score handle for the
/// lifetime of the session.
#[derive(Debug, Clone)]
pub struct GameplaySession {
    /// The beatmap being played.
    pub beatmap_id: i32,
    /// The ruleset the session is played under.
    pub ruleset_id: i32,
    /// Modifiers applied to the session.
    pub mods: SmallVec<[Mod; INLINE_MODS]>,
    /// Best-case statistics achievable in this session.
    pub maximum_statistics: BTreeMap<HitResult, u32>,
    /// Handle to the live score the gameplay engine updates.
    pub score: ScoreCell,
}

/// Terminal classification flags for an ended session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayOutcome {
    /// The session met its pass criteria.
    pub passed: bool,
    /// The session met its fail criteria.
    pub failed: bool,
}

impl PlayOutcome {
    /// The terminal [`PlayState`] these flags classify to. A pass wins over a
    /// fail; a session that neither passed nor failed was quit.
    #[must_use]
    pub fn play_state(self) -> PlayState {
        if self.passed {
            PlayState::Passed
        } else if self.failed {
            PlayState::Failed
        } else {
            PlayState::Quit
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn cloned_cells_share_the_score() {
        let cell = ScoreCell::default();
        let handle = cell.clone();

        handle.update(|score| {
            score.total_score = 12_345;
            score.combo = 20;
        });

        let snapshot = cell.snapshot();
        assert_eq!(snapshot.total_score, 12_345);
        assert_eq!(snapshot.combo, 20);
    }

    #[test]
    fn ptr_eq_distinguishes_sessions() {
        let cell = ScoreCell::default();
        let clone = cell.clone();
        let other = ScoreCell::default();

        assert!(cell.ptr_eq(&clone));
        // Equal contents, different session.
        assert_eq!(cell.snapshot(), other.snapshot());
        assert!(!cell.ptr_eq(&other));
    }

    #[test]
    fn header_snapshots_the_score() {
        let mut statistics = BTreeMap::new();
        statistics.insert(HitResult::Great, 7);
        let score = Score {
            total_score: 700_000,
            accuracy: 0.97,
            combo: 14,
            max_combo: 31,
            statistics: statistics.clone(),
        };

        let header = FrameHeader::new(&score);
        assert_eq!(header.total_score, 700_000);
        assert_eq!(header.max_combo, 31);
        assert_eq!(header.statistics, statistics);
    }

    #[test]
    fn default_score_starts_at_full_accuracy() {
        let score = Score::default();
        assert_eq!(score.total_score, 0);
        assert!((score.accuracy - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn absent_frame_header_not_serialized() {
        let frame = ReplayFrame::new(100.0, 32.0, 64.0, ReplayButtons::LEFT);
        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("header").is_none());

        let restored: ReplayFrame = serde_json::from_value(json).unwrap();
        assert!(restored.header.is_none());
        assert_eq!(restored.buttons, ReplayButtons::LEFT);
    }

    #[test]
    fn stamped_frame_header_round_trips() {
        let mut frame = ReplayFrame::new(100.0, 32.0, 64.0, ReplayButtons::NONE);
        frame.header = Some(FrameHeader::new(&Score::default()));

        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("header").is_some());

        let restored: ReplayFrame = serde_json::from_value(json).unwrap();
        assert_eq!(restored.header, frame.header);
    }

    #[test]
    fn buttons_combine_as_bits() {
        let both = ReplayButtons::LEFT | ReplayButtons::RIGHT;
        assert!(both.contains(ReplayButtons::LEFT));
        assert!(both.contains(ReplayButtons::RIGHT));
        assert!(!ReplayButtons::LEFT.contains(ReplayButtons::RIGHT));
        assert_eq!(ReplayButtons::NONE.bits(), 0);
    }

    #[test]
    fn outcome_classification_prefers_pass() {
        let passed = PlayOutcome {
            passed: true,
            failed: false,
        };
        let both = PlayOutcome {
            passed: true,
            failed: true,
        };
        let failed = PlayOutcome {
            passed: false,
            failed: true,
        };

        assert_eq!(passed.play_state(), PlayState::Passed);
        assert_eq!(both.play_state(), PlayState::Passed);
        assert_eq!(failed.play_state(), PlayState::Failed);
        assert_eq!(PlayOutcome::default().play_state(), PlayState::Quit);
    }
}
