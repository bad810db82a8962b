//! Client-side caches of server-owned state.
//!
//! [`GroupSynchronizer`] mirrors watch group membership, applying incremental
//! spectator changes on top of the authoritative snapshots the server
//! delivers. [`SpectatorStore`] tracks who is playing, the cached session
//! states of watched participants and the local play session.
//!
//! The local participant's own group is owned directly rather than living in
//! the remote map; it always exists and survives watch releases, since the
//! people watching the local participant do not depend on what the local
//! participant chooses to watch.

use std::collections::{BTreeMap, HashMap};

use crate::events::{EventRegistry, SpectatorEvent};
use crate::frames::{ScoreCell, ScoreToken};
use crate::state::{BeatmapAvailability, Spectator, SpectatorState, WatchGroup};
use crate::ParticipantId;

/// Mirrors watch group membership for the local participant and every
/// refcounted remote target.
///
/// All mutating methods are silent no-ops when the change does not apply: the
/// target is untracked, the member is already present or absent, or the
/// change concerns the local participant itself. Methods that change a group
/// raise the matching member event followed by a
/// [`WatchGroupChanged`](SpectatorEvent::WatchGroupChanged) snapshot.
#[derive(Debug)]
pub(crate) struct GroupSynchronizer {
    local_id: ParticipantId,
    local: WatchGroup,
    remote: BTreeMap<ParticipantId, WatchGroup>,
}

impl GroupSynchronizer {
    pub(crate) fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            local: WatchGroup::new(local_id),
            remote: BTreeMap::new(),
        }
    }

    /// The tracked group for `target`, if any. The local participant's group
    /// always exists.
    pub(crate) fn group(&self, target: ParticipantId) -> Option<&WatchGroup> {
        if target == self.local_id {
            Some(&self.local)
        } else {
            self.remote.get(&target)
        }
    }

    fn group_mut(&mut self, target: ParticipantId) -> Option<&mut WatchGroup> {
        if target == self.local_id {
            Some(&mut self.local)
        } else {
            self.remote.get_mut(&target)
        }
    }

    /// Starts tracking `target` with an empty group, replacing any previous
    /// one. The local group is never replaced.
    pub(crate) fn create_empty(&mut self, target: ParticipantId) {
        if target == self.local_id {
            return;
        }
        self.remote.insert(target, WatchGroup::new(target));
    }

    /// Stops tracking `target` and returns the emptied group for the closing
    /// notification, or `None` when `target` was not tracked.
    ///
    /// Releasing the local participant reports a fresh empty group while the
    /// actual local group keeps its members.
    pub(crate) fn clear_for_release(&mut self, target: ParticipantId) -> Option<WatchGroup> {
        if target == self.local_id {
            return Some(WatchGroup::new(self.local_id));
        }
        let mut group = self.remote.remove(&target)?;
        group.spectators.clear();
        Some(group)
    }

    /// Empties every tracked group after a connection loss. Remote groups are
    /// dropped, each with a closing notification; the local group is emptied
    /// silently and stays.
    pub(crate) fn apply_disconnect(&mut self, events: &mut EventRegistry) {
        self.local.spectators.clear();
        for (_, mut group) in std::mem::take(&mut self.remote) {
            group.spectators.clear();
            events.raise(SpectatorEvent::WatchGroupChanged { group });
        }
    }

    /// Applies a spectator joining `target`'s group.
    pub(crate) fn add_spectator(
        &mut self,
        spectator: Spectator,
        target: ParticipantId,
        events: &mut EventRegistry,
    ) {
        if spectator.id == self.local_id {
            return;
        }
        let Some(group) = self.group_mut(target) else {
            return;
        };
        if group.contains(spectator.id) {
            return;
        }
        group.spectators.push(spectator.clone());
        let snapshot = group.clone();
        events.raise(SpectatorEvent::UserBeganWatching { target, spectator });
        events.raise(SpectatorEvent::WatchGroupChanged { group: snapshot });
    }

    /// Applies a spectator leaving `target`'s group.
    pub(crate) fn remove_spectator(
        &mut self,
        id: ParticipantId,
        target: ParticipantId,
        events: &mut EventRegistry,
    ) {
        if id == self.local_id {
            return;
        }
        let Some(group) = self.group_mut(target) else {
            return;
        };
        let Some(position) = group.spectators.iter().position(|s| s.id == id) else {
            return;
        };
        let spectator = group.spectators.remove(position);
        let snapshot = group.clone();
        events.raise(SpectatorEvent::UserStoppedWatching { target, spectator });
        events.raise(SpectatorEvent::WatchGroupChanged { group: snapshot });
    }

    /// Applies an in-place readiness change to a member of `target`'s group.
    pub(crate) fn edit_spectator(
        &mut self,
        id: ParticipantId,
        target: ParticipantId,
        edit: impl FnOnce(&mut Spectator),
        events: &mut EventRegistry,
    ) {
        if id == self.local_id {
            return;
        }
        let Some(group) = self.group_mut(target) else {
            return;
        };
        let Some(member) = group.spectator_mut(id) else {
            return;
        };
        edit(member);
        let spectator = member.clone();
        let snapshot = group.clone();
        events.raise(SpectatorEvent::UserStateChanged { target, spectator });
        events.raise(SpectatorEvent::WatchGroupChanged { group: snapshot });
    }

    /// Installs an authoritative group snapshot delivered by the server.
    ///
    /// A snapshot for the reserved sentinel target is dropped without
    /// notification. A snapshot for a target that is no longer refcounted is
    /// reported but not retained.
    pub(crate) fn install(
        &mut self,
        group: WatchGroup,
        refcounted: bool,
        events: &mut EventRegistry,
    ) {
        if !group.target.is_valid_target() {
            return;
        }
        if group.target == self.local_id {
            self.local = group.clone();
        } else if refcounted {
            self.remote.insert(group.target, group.clone());
        }
        events.raise(SpectatorEvent::WatchGroupChanged { group });
    }

    /// Resets every member of `target`'s group to default readiness, without
    /// notifications. Used when the watched session ends and per-session
    /// flags lose their meaning.
    pub(crate) fn reset_flags(&mut self, target: ParticipantId) {
        let Some(group) = self.group_mut(target) else {
            return;
        };
        for spectator in &mut group.spectators {
            spectator.has_loaded = false;
            spectator.beatmap_availability = BeatmapAvailability::Unknown;
        }
    }
}

/// The local play session as held for its whole lifetime.
#[derive(Debug, Clone)]
pub(crate) struct LocalPlay {
    /// The announced session state. `play_state` stays `Playing` until the
    /// session ends.
    pub(crate) state: SpectatorState,
    /// Handle to the live score, snapshotted at every flush.
    pub(crate) score: ScoreCell,
    /// Score submission token, forwarded on (re)announcement.
    pub(crate) token: Option<ScoreToken>,
}

/// Who is playing, what they are playing, and the local play session.
#[derive(Debug, Default)]
pub(crate) struct SpectatorStore {
    playing: Vec<ParticipantId>,
    watched_states: HashMap<ParticipantId, SpectatorState>,
    local_play: Option<LocalPlay>,
}

impl SpectatorStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records that a participant is playing. Announcement order is kept;
    /// repeats are ignored.
    pub(crate) fn mark_playing(&mut self, id: ParticipantId) {
        if !self.playing.contains(&id) {
            self.playing.push(id);
        }
    }

    /// Records that a participant stopped playing.
    pub(crate) fn mark_finished(&mut self, id: ParticipantId) {
        self.playing.retain(|p| *p != id);
    }

    /// Caches the session state of a watched participant.
    pub(crate) fn set_watched_state(&mut self, id: ParticipantId, state: SpectatorState) {
        self.watched_states.insert(id, state);
    }

    /// Drops the cached session state of a participant.
    pub(crate) fn remove_watched_state(&mut self, id: ParticipantId) {
        self.watched_states.remove(&id);
    }

    /// The cached session state of a watched participant.
    pub(crate) fn watched_state(&self, id: ParticipantId) -> Option<&SpectatorState> {
        self.watched_states.get(&id)
    }

    /// Everyone currently known to be playing, in announcement order.
    pub(crate) fn playing_participants(&self) -> &[ParticipantId] {
        &self.playing
    }

    /// Whether a local play session is in progress.
    pub(crate) fn is_playing(&self) -> bool {
        self.local_play.is_some()
    }

    pub(crate) fn begin_local(&mut self, play: LocalPlay) {
        self.local_play = Some(play);
    }

    pub(crate) fn local_play(&self) -> Option<&LocalPlay> {
        self.local_play.as_ref()
    }

    pub(crate) fn take_local(&mut self) -> Option<LocalPlay> {
        self.local_play.take()
    }

    /// Forgets everything learned from the server. The local play session is
    /// kept; it is re-announced on reconnect.
    pub(crate) fn clear_on_disconnect(&mut self) {
        self.playing.clear();
        self.watched_states.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
