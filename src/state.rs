//! Data model shared between the client, the state store and the wire contracts:
//! play states, beatmap availability, spectators and watch groups.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Display;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::ParticipantId;

/// The state of a single play session, as visible to spectators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayState {
    /// The session is in progress.
    Playing,
    /// The session ended with a pass.
    Passed,
    /// The session ended with a fail.
    Failed,
    /// The session was abandoned before completion.
    Quit,
}

impl Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayState::Playing => write!(f, "playing"),
            PlayState::Passed => write!(f, "passed"),
            PlayState::Failed => write!(f, "failed"),
            PlayState::Quit => write!(f, "quit"),
        }
    }
}

/// A gameplay modifier applied to a play session, identified by its acronym.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mod {
    /// Short acronym identifying the modifier, e.g. `DT`.
    pub acronym: String,
}

impl Mod {
    /// Creates a modifier from its acronym.
    #[must_use]
    pub fn new(acronym: impl Into<String>) -> Self {
        Self {
            acronym: acronym.into(),
        }
    }
}

/// Judgement categories used as keys of per-session statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HitResult {
    /// The object was missed entirely.
    Miss,
    /// The lowest-value hit.
    Meh,
    /// A mediocre hit.
    Ok,
    /// A good hit.
    Good,
    /// A great hit.
    Great,
    /// A flawless hit.
    Perfect,
}

/// Inline capacity for mod lists. Sessions rarely carry more than a handful of mods.
pub(crate) const INLINE_MODS: usize = 4;

/// The authoritative description of a participant's play session.
///
/// Created when the session begins, mutated once on the terminal transition and
/// discarded when the session ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectatorState {
    /// The beatmap being played.
    pub beatmap_id: i32,
    /// The ruleset the session is played under.
    pub ruleset_id: i32,
    /// Modifiers applied to the session.
    pub mods: SmallVec<[Mod; INLINE_MODS]>,
    /// Where in its lifecycle the session currently is.
    pub play_state: PlayState,
    /// The best-case statistics achievable in this session, keyed by judgement.
    pub maximum_statistics: BTreeMap<HitResult, u32>,
}

/// A spectator's local readiness for the content required to render a play session.
///
/// Comparison is structural. The derived ordering follows declared variant order,
/// which is the order UI lists sort by.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum BeatmapAvailability {
    /// Nothing is known about the spectator's copy of the content.
    Unknown,
    /// The spectator does not have the content.
    NotDownloaded,
    /// The spectator is downloading the content.
    Downloading {
        /// Download progress in `0.0..=1.0`.
        progress: f32,
    },
    /// The content is downloaded and being imported.
    Importing,
    /// The content is ready to use.
    LocallyAvailable,
}

impl BeatmapAvailability {
    /// Creates a [`BeatmapAvailability::Downloading`] value, clamping progress into `0.0..=1.0`.
    #[must_use]
    pub fn downloading(progress: f32) -> Self {
        Self::Downloading {
            progress: progress.clamp(0.0, 1.0),
        }
    }
}

impl Display for BeatmapAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BeatmapAvailability::Unknown => write!(f, "unknown"),
            BeatmapAvailability::NotDownloaded => write!(f, "not downloaded"),
            BeatmapAvailability::Downloading { progress } => {
                write!(f, "downloading ({:.0}%)", progress * 100.0)
            }
            BeatmapAvailability::Importing => write!(f, "importing"),
            BeatmapAvailability::LocallyAvailable => write!(f, "locally available"),
        }
    }
}

/// Display identity of a participant, resolved through an identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileInfo {
    /// The participant this profile belongs to.
    pub id: ParticipantId,
    /// Human-readable participant name.
    pub username: String,
}

/// A participant observing someone's play session, as a member of a [`WatchGroup`].
///
/// Identity is the participant id alone; readiness flags do not affect equality.
/// Values are plain owned data, replaced wholesale when an authoritative snapshot
/// arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spectator {
    /// The observing participant.
    pub id: ParticipantId,
    /// Whether the spectator has finished loading the session.
    pub has_loaded: bool,
    /// The spectator's readiness for the session content.
    pub beatmap_availability: BeatmapAvailability,
    /// Resolved display identity. Never sent over the wire.
    #[serde(skip)]
    pub profile: Option<ProfileInfo>,
}

impl Spectator {
    /// Creates a spectator with default readiness flags.
    #[must_use]
    pub fn new(id: ParticipantId) -> Self {
        Self {
            id,
            has_loaded: false,
            beatmap_availability: BeatmapAvailability::Unknown,
            profile: None,
        }
    }

    /// The name to render for this spectator, falling back to a placeholder when
    /// identity resolution did not produce a profile.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.profile {
            Some(profile) => profile.username.clone(),
            None => format!("participant {}", self.id),
        }
    }
}

impl PartialEq for Spectator {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Spectator {}

impl Hash for Spectator {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// The set of spectators observing one participant's play sessions.
///
/// Equality follows member identity: two groups are equal when they observe
/// the same target and list the same spectator ids in the same order,
/// regardless of per-member readiness flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchGroup {
    /// The participant whose sessions this group observes.
    pub target: ParticipantId,
    /// Spectators in announcement order.
    pub spectators: Vec<Spectator>,
}

impl WatchGroup {
    /// Creates an empty group for the given target.
    #[must_use]
    pub fn new(target: ParticipantId) -> Self {
        Self {
            target,
            spectators: Vec::new(),
        }
    }

    /// Whether the given participant is a member of this group.
    #[must_use]
    pub fn contains(&self, id: ParticipantId) -> bool {
        self.spectators.iter().any(|s| s.id == id)
    }

    /// Looks up a member by participant id.
    #[must_use]
    pub fn spectator(&self, id: ParticipantId) -> Option<&Spectator> {
        self.spectators.iter().find(|s| s.id == id)
    }

    pub(crate) fn spectator_mut(&mut self, id: ParticipantId) -> Option<&mut Spectator> {
        self.spectators.iter_mut().find(|s| s.id == id)
    }

    /// Number of spectators in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spectators.len()
    }

    /// Whether the group has no spectators.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spectators.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
