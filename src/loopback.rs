//! An in-memory [`RemoteSession`] that plays the server's part.
//!
//! [`LoopbackServer`] answers every outbound call locally and exposes a driver
//! surface for injecting the activity of other participants, so client
//! behavior can be exercised end to end without a network. Local outbound
//! calls are reflected back as the corresponding [`ServerMessage`], the way a
//! real server echoes a client's own activity to it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;

use crate::frames::{FrameDataBundle, ReplayButtons, ReplayFrame, Score, ScoreToken};
use crate::remote::{RemoteCallError, RemoteSession, ServerMessage};
use crate::state::{BeatmapAvailability, Mod, PlayState, Spectator, SpectatorState, WatchGroup};
use crate::ParticipantId;

/// PCG32 multiplier (Melissa O'Neill's constants).
const PCG_MULTIPLIER: u64 = 6_364_136_223_846_793_005;
/// PCG32 default stream increment.
const PCG_DEFAULT_INCREMENT: u64 = 1_442_695_040_888_963_407;

/// Minimal PCG32 (XSH-RR output) used for synthetic frame data.
///
/// Keeping the generator local makes frame synthesis deterministic for a
/// given seed, independent of anything else in the process.
#[derive(Debug, Clone)]
struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    fn new(seed: u64) -> Self {
        let mut rng = Self {
            state: 0,
            inc: (PCG_DEFAULT_INCREMENT << 1) | 1,
        };
        rng.step();
        rng.state = rng.state.wrapping_add(seed);
        rng.step();
        rng
    }

    fn step(&mut self) {
        self.state = self
            .state
            .wrapping_mul(PCG_MULTIPLIER)
            .wrapping_add(self.inc);
    }

    fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.step();
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        let rot = (old >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    fn next_below(&mut self, bound: u32) -> u32 {
        self.next_u32() % bound
    }

    fn next_f64_in(&mut self, low: f64, high: f64) -> f64 {
        let unit = f64::from(self.next_u32()) / f64::from(u32::MAX);
        low + unit * (high - low)
    }
}

/// An in-memory server double implementing [`RemoteSession`].
///
/// Two surfaces coexist on this type. The trait side is what a
/// [`SpectatorClient`](crate::SpectatorClient) drives; every call is answered
/// immediately, failing with [`RemoteCallError`] while
/// [disconnected](Self::set_connected). The inherent driver methods simulate
/// the rest of the world: other participants starting and ending plays,
/// streaming frames and joining watch groups.
///
/// Spectator changes targeting an unwatched participant accumulate in a
/// per-target waiting list and are delivered as the
/// [`WatchGroupDelivered`](ServerMessage::WatchGroupDelivered) snapshot when
/// that participant is eventually watched. Changes targeting a watched
/// participant (or the local participant) are pushed immediately.
#[derive(Debug)]
pub struct LoopbackServer {
    local_id: ParticipantId,
    connected: bool,
    queue: VecDeque<ServerMessage>,

    // Per-participant play bookkeeping, local participant included.
    playing_beatmaps: BTreeMap<ParticipantId, i32>,
    playing_mods: BTreeMap<ParticipantId, Vec<Mod>>,
    next_frame_index: BTreeMap<ParticipantId, i32>,

    watching: BTreeSet<ParticipantId>,
    waiting_lists: BTreeMap<ParticipantId, Vec<Spectator>>,

    fail_sends: bool,
    frame_send_attempts: u32,
    begin_play_calls: u32,
    end_play_calls: u32,
    watch_calls: Vec<ParticipantId>,
    end_watch_calls: Vec<ParticipantId>,
    loading_state_sends: Vec<(ParticipantId, bool)>,
    availability_sends: Vec<(ParticipantId, BeatmapAvailability)>,

    rng: Pcg32,
}

impl LoopbackServer {
    /// Frames per synthetic bundle produced by [`send_frames`](Self::send_frames).
    pub const FRAME_BUNDLE_SIZE: usize = 10;

    /// Creates a connected server for a client identifying as `local_id`.
    #[must_use]
    pub fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            connected: true,
            queue: VecDeque::new(),
            playing_beatmaps: BTreeMap::new(),
            playing_mods: BTreeMap::new(),
            next_frame_index: BTreeMap::new(),
            watching: BTreeSet::new(),
            waiting_lists: BTreeMap::new(),
            fail_sends: false,
            frame_send_attempts: 0,
            begin_play_calls: 0,
            end_play_calls: 0,
            watch_calls: Vec::new(),
            end_watch_calls: Vec::new(),
            loading_state_sends: Vec::new(),
            availability_sends: Vec::new(),
            rng: Pcg32::new(0x853C_49E6_748F_EA9B),
        }
    }

    // ------------------------------------------------------------------------
    // Driver surface: simulated activity of other participants
    // ------------------------------------------------------------------------

    /// Simulated connectivity. Lowering this makes every outbound call fail
    /// until it is raised again; queued messages survive the outage.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// When set, [`send_frame_data`](RemoteSession::send_frame_data) fails
    /// after counting the attempt.
    pub fn set_fail_sends(&mut self, fail: bool) {
        self.fail_sends = fail;
    }

    /// A participant begins playing `beatmap_id`. Announced immediately.
    pub fn start_play(&mut self, id: ParticipantId, beatmap_id: i32) {
        self.playing_beatmaps.insert(id, beatmap_id);
        self.playing_mods.insert(id, Vec::new());
        self.next_frame_index.insert(id, 0);
        self.push_playing_state(id);
    }

    /// A participant's play ends in `outcome`. Ignored unless a play for `id`
    /// is in progress. The next-frame index is kept so a later
    /// [`start_play`](Self::start_play) restarts frame numbering explicitly.
    pub fn end_play(&mut self, id: ParticipantId, outcome: PlayState) {
        let Some(beatmap_id) = self.playing_beatmaps.remove(&id) else {
            return;
        };
        let mods = self.playing_mods.remove(&id).unwrap_or_default();
        self.queue.push_back(ServerMessage::UserFinishedPlaying {
            id,
            state: SpectatorState {
                beatmap_id,
                ruleset_id: 0,
                mods: SmallVec::from_vec(mods),
                play_state: outcome,
                maximum_statistics: BTreeMap::new(),
            },
        });
    }

    /// A participant streams `count` synthetic frames starting at
    /// `start_time`, bundled in groups of [`FRAME_BUNDLE_SIZE`](Self::FRAME_BUNDLE_SIZE).
    ///
    /// Frame times advance 100ms per frame and resume from where the
    /// participant's previous call left off. Every frame holds the left
    /// button except the final one, which releases it. Each bundle header
    /// snapshots a plausible score for the frames produced so far.
    pub fn send_frames(&mut self, id: ParticipantId, count: i32, start_time: f64) {
        let first = self.next_frame_index.get(&id).copied().unwrap_or(0);
        let last = first + count - 1;
        let mut frames: Vec<ReplayFrame> = Vec::new();

        let mut index = first;
        while index <= last {
            if frames.len() == Self::FRAME_BUNDLE_SIZE {
                self.flush_synthetic(id, &mut frames, index);
            }

            let buttons = if index == last {
                ReplayButtons::NONE
            } else {
                ReplayButtons::LEFT
            };
            let x = self.rng.next_below(512) as f32;
            let y = self.rng.next_below(512) as f32;
            frames.push(ReplayFrame::new(
                f64::from(index) * 100.0 + start_time,
                x,
                y,
                buttons,
            ));
            index += 1;
        }

        self.flush_synthetic(id, &mut frames, index);
        self.next_frame_index.insert(id, index);
    }

    /// A participant joins `target`'s watch group.
    ///
    /// Queued to the waiting list while `target` is unwatched; announced
    /// immediately when `target` is watched or is the local participant.
    pub fn add_spectator(&mut self, watcher: ParticipantId, target: ParticipantId) {
        if self.watching.contains(&target) || target == self.local_id {
            self.queue.push_back(ServerMessage::UserBeganWatching {
                target,
                spectator: Spectator::new(watcher),
            });
            if target == self.local_id {
                return;
            }
        }
        let list = self.waiting_lists.entry(target).or_default();
        if !list.iter().any(|s| s.id == watcher) {
            list.push(Spectator::new(watcher));
        }
    }

    /// A participant leaves `target`'s watch group. Removing a participant
    /// that never joined does nothing.
    pub fn remove_spectator(&mut self, watcher: ParticipantId, target: ParticipantId) {
        if self.watching.contains(&target) || target == self.local_id {
            self.queue.push_back(ServerMessage::UserStoppedWatching {
                target,
                spectator: Spectator::new(watcher),
            });
            if target == self.local_id {
                return;
            }
        }
        if let Some(list) = self.waiting_lists.get_mut(&target) {
            list.retain(|s| s.id != watcher);
        }
    }

    /// A spectator of `target` reports their loading state.
    pub fn set_loading_state(
        &mut self,
        watcher: ParticipantId,
        target: ParticipantId,
        loaded: bool,
    ) {
        if self.watching.contains(&target) || target == self.local_id {
            self.queue.push_back(ServerMessage::UserLoadingStateChanged {
                target,
                spectator: watcher,
                loaded,
            });
            if target == self.local_id {
                return;
            }
        }
        if let Some(member) = self.waiting_member_mut(target, watcher) {
            member.has_loaded = loaded;
        }
    }

    /// A spectator of `target` reports their beatmap availability.
    pub fn set_availability(
        &mut self,
        watcher: ParticipantId,
        target: ParticipantId,
        availability: BeatmapAvailability,
    ) {
        if self.watching.contains(&target) || target == self.local_id {
            self.queue
                .push_back(ServerMessage::UserBeatmapAvailabilityChanged {
                    target,
                    spectator: watcher,
                    availability,
                });
            if target == self.local_id {
                return;
            }
        }
        if let Some(member) = self.waiting_member_mut(target, watcher) {
            member.beatmap_availability = availability;
        }
    }

    /// The server finished processing a participant's score.
    pub fn process_score(&mut self, id: ParticipantId, score_id: i64) {
        self.queue
            .push_back(ServerMessage::UserScoreProcessed { id, score_id });
    }

    /// The server asks the client to disconnect.
    pub fn request_disconnect(&mut self) {
        self.queue.push_back(ServerMessage::DisconnectRequested);
    }

    // ------------------------------------------------------------------------
    // Recorders for assertions
    // ------------------------------------------------------------------------

    /// Number of frame bundle sends attempted, failed attempts included.
    #[must_use]
    pub fn frame_send_attempts(&self) -> u32 {
        self.frame_send_attempts
    }

    /// Number of play session start announcements attempted.
    #[must_use]
    pub fn begin_play_calls(&self) -> u32 {
        self.begin_play_calls
    }

    /// Number of play session end announcements attempted.
    #[must_use]
    pub fn end_play_calls(&self) -> u32 {
        self.end_play_calls
    }

    /// Every id passed to [`start_watching`](RemoteSession::start_watching),
    /// in call order.
    #[must_use]
    pub fn watch_calls(&self) -> &[ParticipantId] {
        &self.watch_calls
    }

    /// Every id passed to [`end_watching`](RemoteSession::end_watching), in
    /// call order.
    #[must_use]
    pub fn end_watch_calls(&self) -> &[ParticipantId] {
        &self.end_watch_calls
    }

    /// Loading states forwarded by the client, in call order.
    #[must_use]
    pub fn loading_state_sends(&self) -> &[(ParticipantId, bool)] {
        &self.loading_state_sends
    }

    /// Availabilities forwarded by the client, in call order.
    #[must_use]
    pub fn availability_sends(&self) -> &[(ParticipantId, BeatmapAvailability)] {
        &self.availability_sends
    }

    // ------------------------------------------------------------------------

    fn ensure_connected(&self) -> Result<(), RemoteCallError> {
        if self.connected {
            Ok(())
        } else {
            Err(RemoteCallError::new("not connected"))
        }
    }

    fn push_playing_state(&mut self, id: ParticipantId) {
        let Some(beatmap_id) = self.playing_beatmaps.get(&id).copied() else {
            return;
        };
        let mods = self.playing_mods.get(&id).cloned().unwrap_or_default();
        self.queue.push_back(ServerMessage::UserBeganPlaying {
            id,
            state: SpectatorState {
                beatmap_id,
                ruleset_id: 0,
                mods: SmallVec::from_vec(mods),
                play_state: PlayState::Playing,
                maximum_statistics: BTreeMap::new(),
            },
        });
    }

    fn waiting_member_mut(
        &mut self,
        target: ParticipantId,
        watcher: ParticipantId,
    ) -> Option<&mut Spectator> {
        self.waiting_lists
            .get_mut(&target)
            .and_then(|list| list.iter_mut().find(|s| s.id == watcher))
    }

    fn flush_synthetic(&mut self, id: ParticipantId, frames: &mut Vec<ReplayFrame>, index: i32) {
        if frames.is_empty() {
            return;
        }
        let combo = index.max(0) as u32;
        let score = Score {
            total_score: (f64::from(index) * 123_478.0 * self.rng.next_f64_in(0.99, 1.01)) as i64,
            accuracy: self.rng.next_f64_in(0.98, 1.0),
            combo,
            max_combo: combo,
            statistics: BTreeMap::new(),
        };
        let bundle = FrameDataBundle::new(&score, std::mem::take(frames));
        self.queue
            .push_back(ServerMessage::UserSentFrames { id, bundle });
    }
}

impl RemoteSession for LoopbackServer {
    fn is_connected(&self) -> bool {
        self.connected
    }

    fn begin_play_session(
        &mut self,
        _token: Option<ScoreToken>,
        state: &SpectatorState,
    ) -> Result<(), RemoteCallError> {
        self.begin_play_calls += 1;
        self.ensure_connected()?;
        self.playing_beatmaps.insert(self.local_id, state.beatmap_id);
        self.playing_mods
            .insert(self.local_id, state.mods.to_vec());
        self.queue.push_back(ServerMessage::UserBeganPlaying {
            id: self.local_id,
            state: state.clone(),
        });
        Ok(())
    }

    fn send_frame_data(&mut self, bundle: &FrameDataBundle) -> Result<(), RemoteCallError> {
        self.frame_send_attempts += 1;
        self.ensure_connected()?;
        if self.fail_sends {
            return Err(RemoteCallError::new("frame send rejected"));
        }
        self.queue.push_back(ServerMessage::UserSentFrames {
            id: self.local_id,
            bundle: bundle.clone(),
        });
        Ok(())
    }

    fn end_play_session(&mut self, state: &SpectatorState) -> Result<(), RemoteCallError> {
        self.end_play_calls += 1;
        self.ensure_connected()?;
        self.queue.push_back(ServerMessage::UserFinishedPlaying {
            id: self.local_id,
            state: state.clone(),
        });
        Ok(())
    }

    fn start_watching(&mut self, id: ParticipantId) -> Result<(), RemoteCallError> {
        self.watch_calls.push(id);
        self.ensure_connected()?;
        // A newly watched participant's in-progress play is reported before
        // the group snapshot.
        self.push_playing_state(id);
        self.watching.insert(id);
        let spectators = self.waiting_lists.get(&id).cloned().unwrap_or_default();
        self.queue.push_back(ServerMessage::WatchGroupDelivered {
            target: id,
            group: Some(WatchGroup {
                target: id,
                spectators,
            }),
        });
        Ok(())
    }

    fn end_watching(&mut self, id: ParticipantId) -> Result<(), RemoteCallError> {
        self.end_watch_calls.push(id);
        self.ensure_connected()?;
        self.watching.remove(&id);
        Ok(())
    }

    fn send_loading_state(
        &mut self,
        target: ParticipantId,
        loaded: bool,
    ) -> Result<(), RemoteCallError> {
        self.ensure_connected()?;
        self.loading_state_sends.push((target, loaded));
        Ok(())
    }

    fn send_beatmap_availability(
        &mut self,
        target: ParticipantId,
        availability: &BeatmapAvailability,
    ) -> Result<(), RemoteCallError> {
        self.ensure_connected()?;
        self.availability_sends.push((target, *availability));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn drain_messages(&mut self) -> Vec<ServerMessage> {
        self.queue.drain(..).collect()
    }
}

/// A cloneable handle sharing one [`LoopbackServer`].
///
/// A client under test consumes the remote session it is built with, so a
/// test needs a second handle to keep driving the server. Cloning shares the
/// underlying server; [`lock()`](Self::lock) reaches it for driving and
/// inspection between polls.
#[derive(Debug, Clone)]
pub struct SharedLoopback(Arc<Mutex<LoopbackServer>>);

impl SharedLoopback {
    /// Wraps a server in a shareable handle.
    #[must_use]
    pub fn new(server: LoopbackServer) -> Self {
        Self(Arc::new(Mutex::new(server)))
    }

    /// Locks the shared server.
    pub fn lock(&self) -> MutexGuard<'_, LoopbackServer> {
        self.0.lock()
    }
}

impl RemoteSession for SharedLoopback {
    fn is_connected(&self) -> bool {
        self.0.lock().is_connected()
    }

    fn begin_play_session(
        &mut self,
        token: Option<ScoreToken>,
        state: &SpectatorState,
    ) -> Result<(), RemoteCallError> {
        self.0.lock().begin_play_session(token, state)
    }

    fn send_frame_data(&mut self, bundle: &FrameDataBundle) -> Result<(), RemoteCallError> {
        self.0.lock().send_frame_data(bundle)
    }

    fn end_play_session(&mut self, state: &SpectatorState) -> Result<(), RemoteCallError> {
        self.0.lock().end_play_session(state)
    }

    fn start_watching(&mut self, id: ParticipantId) -> Result<(), RemoteCallError> {
        self.0.lock().start_watching(id)
    }

    fn end_watching(&mut self, id: ParticipantId) -> Result<(), RemoteCallError> {
        self.0.lock().end_watching(id)
    }

    fn send_loading_state(
        &mut self,
        target: ParticipantId,
        loaded: bool,
    ) -> Result<(), RemoteCallError> {
        self.0.lock().send_loading_state(target, loaded)
    }

    fn send_beatmap_availability(
        &mut self,
        target: ParticipantId,
        availability: &BeatmapAvailability,
    ) -> Result<(), RemoteCallError> {
        self.0.lock().send_beatmap_availability(target, availability)
    }

    fn disconnect(&mut self) {
        self.0.lock().disconnect();
    }

    fn drain_messages(&mut self) -> Vec<ServerMessage> {
        self.0.lock().drain_messages()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    const LOCAL: ParticipantId = ParticipantId::new(1);
    const STREAMER: ParticipantId = ParticipantId::new(10);
    const WATCHER: ParticipantId = ParticipantId::new(42);

    fn playing_state(beatmap_id: i32) -> SpectatorState {
        SpectatorState {
            beatmap_id,
            ruleset_id: 0,
            mods: SmallVec::new(),
            play_state: PlayState::Playing,
            maximum_statistics: BTreeMap::new(),
        }
    }

    #[test]
    fn synthetic_frames_bundle_in_tens() {
        let mut server = LoopbackServer::new(LOCAL);
        server.send_frames(STREAMER, 25, 0.0);

        let messages = server.drain_messages();
        let bundles: Vec<FrameDataBundle> = messages
            .into_iter()
            .map(|message| match message {
                ServerMessage::UserSentFrames { id, bundle } => {
                    assert_eq!(id, STREAMER);
                    bundle
                }
                other => panic!("unexpected message {other:?}"),
            })
            .collect();

        assert_eq!(bundles.len(), 3);
        assert_eq!(bundles[0].frames.len(), 10);
        assert_eq!(bundles[1].frames.len(), 10);
        assert_eq!(bundles[2].frames.len(), 5);

        // Times advance 100ms per frame from the requested start.
        assert!((bundles[0].frames[0].time - 0.0).abs() < f64::EPSILON);
        assert!((bundles[2].frames[4].time - 2400.0).abs() < f64::EPSILON);

        // Left button held until the final frame releases it.
        assert_eq!(bundles[0].frames[0].buttons, ReplayButtons::LEFT);
        assert_eq!(bundles[2].frames[4].buttons, ReplayButtons::NONE);
        assert_eq!(bundles[2].frames[3].buttons, ReplayButtons::LEFT);

        // Headers snapshot the running frame count as combo.
        assert_eq!(bundles[0].header.combo, 10);
        assert_eq!(bundles[1].header.combo, 20);
        assert_eq!(bundles[2].header.combo, 25);
    }

    #[test]
    fn frame_times_resume_across_calls() {
        let mut server = LoopbackServer::new(LOCAL);
        server.send_frames(STREAMER, 5, 0.0);
        server.send_frames(STREAMER, 5, 0.0);

        let messages = server.drain_messages();
        let ServerMessage::UserSentFrames { bundle, .. } = &messages[1] else {
            panic!("expected frames, got {:?}", messages[1]);
        };
        assert!((bundle.frames[0].time - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn watch_delivers_the_waiting_list() {
        let mut server = LoopbackServer::new(LOCAL);
        server.add_spectator(WATCHER, STREAMER);
        assert!(server.drain_messages().is_empty());

        server.start_watching(STREAMER).unwrap();
        let messages = server.drain_messages();
        assert_eq!(messages.len(), 1);
        let ServerMessage::WatchGroupDelivered { target, group } = &messages[0] else {
            panic!("expected group delivery, got {:?}", messages[0]);
        };
        assert_eq!(*target, STREAMER);
        let group = group.as_ref().unwrap();
        assert_eq!(group.len(), 1);
        assert!(group.contains(WATCHER));
        assert_eq!(server.watch_calls(), &[STREAMER]);
    }

    #[test]
    fn watching_a_playing_target_reports_the_play_first() {
        let mut server = LoopbackServer::new(LOCAL);
        server.start_play(STREAMER, 555);
        server.drain_messages();

        server.start_watching(STREAMER).unwrap();
        let messages = server.drain_messages();
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[0],
            ServerMessage::UserBeganPlaying { id, state }
                if *id == STREAMER && state.beatmap_id == 555
        ));
        assert!(matches!(
            &messages[1],
            ServerMessage::WatchGroupDelivered { target, .. } if *target == STREAMER
        ));
    }

    #[test]
    fn failed_sends_still_count_attempts() {
        let mut server = LoopbackServer::new(LOCAL);
        let bundle = FrameDataBundle::new(&Score::default(), Vec::new());

        server.set_fail_sends(true);
        assert!(server.send_frame_data(&bundle).is_err());
        assert!(server.send_frame_data(&bundle).is_err());
        assert_eq!(server.frame_send_attempts(), 2);

        server.set_fail_sends(false);
        server.send_frame_data(&bundle).unwrap();
        assert_eq!(server.frame_send_attempts(), 3);

        let sent: Vec<_> = server
            .drain_messages()
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::UserSentFrames { id, .. } if *id == LOCAL))
            .collect();
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn local_target_changes_push_without_queueing() {
        let mut server = LoopbackServer::new(LOCAL);
        server.add_spectator(WATCHER, LOCAL);

        let messages = server.drain_messages();
        assert!(matches!(
            &messages[..],
            [ServerMessage::UserBeganWatching { target, spectator }]
                if *target == LOCAL && spectator.id == WATCHER
        ));

        // The change above bypassed the waiting list, so a later watch of the
        // local participant delivers an empty group.
        server.start_watching(LOCAL).unwrap();
        let messages = server.drain_messages();
        let ServerMessage::WatchGroupDelivered { group, .. } = &messages[0] else {
            panic!("expected group delivery, got {:?}", messages[0]);
        };
        assert!(group.as_ref().unwrap().is_empty());
    }

    #[test]
    fn waiting_list_edits_for_unknown_watchers_are_ignored() {
        let mut server = LoopbackServer::new(LOCAL);
        server.remove_spectator(WATCHER, STREAMER);
        server.set_loading_state(WATCHER, STREAMER, true);
        assert!(server.drain_messages().is_empty());

        server.start_watching(STREAMER).unwrap();
        let messages = server.drain_messages();
        let ServerMessage::WatchGroupDelivered { group, .. } = &messages[0] else {
            panic!("expected group delivery, got {:?}", messages[0]);
        };
        assert!(group.as_ref().unwrap().is_empty());
    }

    #[test]
    fn waiting_list_tracks_readiness_until_delivery() {
        let mut server = LoopbackServer::new(LOCAL);
        server.add_spectator(WATCHER, STREAMER);
        server.set_loading_state(WATCHER, STREAMER, true);
        server.set_availability(WATCHER, STREAMER, BeatmapAvailability::LocallyAvailable);
        assert!(server.drain_messages().is_empty());

        server.start_watching(STREAMER).unwrap();
        let messages = server.drain_messages();
        let ServerMessage::WatchGroupDelivered { group, .. } = &messages[0] else {
            panic!("expected group delivery, got {:?}", messages[0]);
        };
        let member = group.as_ref().unwrap().spectator(WATCHER).unwrap();
        assert!(member.has_loaded);
        assert_eq!(
            member.beatmap_availability,
            BeatmapAvailability::LocallyAvailable
        );
    }

    #[test]
    fn end_play_requires_a_known_session() {
        let mut server = LoopbackServer::new(LOCAL);
        server.end_play(STREAMER, PlayState::Passed);
        assert!(server.drain_messages().is_empty());

        server.start_play(STREAMER, 777);
        server.drain_messages();
        server.end_play(STREAMER, PlayState::Passed);

        let messages = server.drain_messages();
        assert!(matches!(
            &messages[..],
            [ServerMessage::UserFinishedPlaying { id, state }]
                if *id == STREAMER
                    && state.beatmap_id == 777
                    && state.play_state == PlayState::Passed
        ));

        // The session is gone; a second end is ignored.
        server.end_play(STREAMER, PlayState::Quit);
        assert!(server.drain_messages().is_empty());
    }

    #[test]
    fn local_session_announcements_loop_back() {
        let mut server = LoopbackServer::new(LOCAL);
        let state = playing_state(321);

        server
            .begin_play_session(Some(ScoreToken::new(99)), &state)
            .unwrap();
        let messages = server.drain_messages();
        assert!(matches!(
            &messages[..],
            [ServerMessage::UserBeganPlaying { id, state: echoed }]
                if *id == LOCAL && echoed.beatmap_id == 321
        ));

        let mut ended = playing_state(321);
        ended.play_state = PlayState::Quit;
        server.end_play_session(&ended).unwrap();
        let messages = server.drain_messages();
        assert!(matches!(
            &messages[..],
            [ServerMessage::UserFinishedPlaying { id, .. }] if *id == LOCAL
        ));
        assert_eq!(server.begin_play_calls(), 1);
        assert_eq!(server.end_play_calls(), 1);
    }

    #[test]
    fn outbound_calls_fail_while_disconnected() {
        let mut server = LoopbackServer::new(LOCAL);
        server.set_connected(false);

        assert!(!server.is_connected());
        assert!(server.start_watching(STREAMER).is_err());
        assert!(server
            .begin_play_session(None, &playing_state(1))
            .is_err());
        assert!(server
            .send_frame_data(&FrameDataBundle::new(&Score::default(), Vec::new()))
            .is_err());

        // Attempts are still recorded.
        assert_eq!(server.watch_calls(), &[STREAMER]);
        assert_eq!(server.begin_play_calls(), 1);
        assert_eq!(server.frame_send_attempts(), 1);

        server.set_connected(true);
        server.start_watching(STREAMER).unwrap();
        assert_eq!(server.drain_messages().len(), 1);
    }

    #[test]
    fn disconnect_lowers_connectivity() {
        let mut server = LoopbackServer::new(LOCAL);
        assert!(server.is_connected());
        RemoteSession::disconnect(&mut server);
        assert!(!server.is_connected());
    }

    #[test]
    fn shared_handles_observe_one_server() {
        let shared = SharedLoopback::new(LoopbackServer::new(LOCAL));
        let mut handle = shared.clone();

        shared.lock().start_play(STREAMER, 555);
        assert_eq!(handle.drain_messages().len(), 1);
        // Drained through one handle means drained for all of them.
        assert!(shared.lock().drain_messages().is_empty());
    }
}
