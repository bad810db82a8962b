//! The spectator client.
//!
//! [`SpectatorClient`] is the single entry point of this crate. It owns a
//! [`RemoteSession`] for the network side and keeps every derived view (watch
//! groups, playing participants, cached session states, the outbound frame
//! pipeline) consistent with what the server reports.
//!
//! The client is poll based: nothing happens between calls. [`poll()`]
//! detects connectivity edges, applies buffered server messages, runs timed
//! frame flushes and pumps the send queue. Notifications raised while state
//! is mutated are queued and dispatched at the end of the entry point that
//! raised them, so callbacks always observe fully applied state.
//!
//! [`poll()`]: SpectatorClient::poll

use std::fmt;

use tracing::{debug, warn};
use web_time::{Duration, Instant};

use crate::error::GrandstandError;
use crate::events::{EventRegistry, SpectatorEvent};
use crate::frame_pipeline::FramePipeline;
use crate::frames::{FrameDataBundle, GameplayFrame, GameplaySession, PlayOutcome, ScoreToken};
use crate::remote::{IdentityProvider, RemoteSession, ServerMessage};
use crate::state::{BeatmapAvailability, PlayState, Spectator, SpectatorState, WatchGroup};
use crate::store::{GroupSynchronizer, LocalPlay, SpectatorStore};
use crate::subscriptions::{ReleaseOutcome, WatchLedger};
use crate::ParticipantId;

/// A client-side session mirroring spectator activity for one participant.
///
/// Built through [`ClientBuilder`](crate::ClientBuilder). All methods take
/// `&mut self`; a single owner drives the client, typically from a game loop
/// that calls [`poll()`](Self::poll) once per tick.
///
/// Watching is reference counted: several surfaces may
/// [`watch_user()`](Self::watch_user) the same participant and the remote
/// subscription is opened on the first interest and closed on the last
/// release. Outbound frame bundles are sent strictly in order; a failed send
/// keeps its bundle at the head of the queue and is retried verbatim on later
/// polls.
pub struct SpectatorClient {
    local_id: ParticipantId,
    remote: Box<dyn RemoteSession>,
    identities: Box<dyn IdentityProvider>,
    ledger: WatchLedger,
    groups: GroupSynchronizer,
    store: SpectatorStore,
    pipeline: FramePipeline,
    events: EventRegistry,
    last_connected: bool,
}

impl SpectatorClient {
    pub(crate) fn assemble(
        local_id: ParticipantId,
        remote: Box<dyn RemoteSession>,
        identities: Box<dyn IdentityProvider>,
        pending_frame_capacity: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            local_id,
            remote,
            identities,
            ledger: WatchLedger::new(),
            groups: GroupSynchronizer::new(local_id),
            store: SpectatorStore::new(),
            pipeline: FramePipeline::new(pending_frame_capacity, flush_interval),
            events: EventRegistry::new(),
            // Pessimistic start: the first poll against a live remote takes
            // the connected edge and runs the same resume path as any
            // reconnect.
            last_connected: false,
        }
    }

    /// Advances the client: detects connectivity edges, applies buffered
    /// server messages, flushes due frame bundles and pumps the send queue.
    ///
    /// On a reconnect edge, every held subscription is reopened and an active
    /// play session is re-announced. These resume calls are not ordered
    /// relative to other traffic still in flight from before the outage.
    ///
    /// Call this regularly, e.g. once per game loop tick. All notifications
    /// raised by the poll are dispatched before it returns.
    pub fn poll(&mut self) {
        let now = Instant::now();

        let connected = self.remote.is_connected();
        if connected != self.last_connected {
            self.last_connected = connected;
            if connected {
                self.handle_connected();
            } else {
                self.handle_disconnected(now);
            }
        }

        if connected {
            for message in self.remote.drain_messages() {
                self.apply_message(message);
            }

            if self.pipeline.should_flush(now) {
                self.flush_pending(now);
            }
            self.pump_sends();
        }

        self.events.dispatch_pending();
    }

    /// Registers interest in a participant's play sessions.
    ///
    /// The first interest opens the remote subscription; the server answers
    /// with the authoritative watch group, observed as
    /// [`WatchGroupChanged`](SpectatorEvent::WatchGroupChanged) on a later
    /// poll. Further calls only increase the reference count.
    ///
    /// # Errors
    /// [`GrandstandError::InvalidParticipant`] when `id` is at or below the
    /// reserved floor.
    pub fn watch_user(&mut self, id: ParticipantId) -> Result<(), GrandstandError> {
        let result = self.watch_user_inner(id);
        self.events.dispatch_pending();
        result
    }

    fn watch_user_inner(&mut self, id: ParticipantId) -> Result<(), GrandstandError> {
        if !id.is_valid_target() {
            return Err(GrandstandError::InvalidParticipant { id });
        }
        if self.ledger.increment(id) {
            self.groups.create_empty(id);
            if let Err(error) = self.remote.start_watching(id) {
                warn!(target_id = id.as_i32(), %error, "watch request failed");
            }
        }
        Ok(())
    }

    /// Releases one interest in a participant's play sessions.
    ///
    /// Releasing the last interest closes the remote subscription, drops the
    /// cached session state and raises a closing
    /// [`WatchGroupChanged`](SpectatorEvent::WatchGroupChanged) with the
    /// emptied group. Releasing a participant that is not being watched does
    /// nothing.
    pub fn stop_watching_user(&mut self, id: ParticipantId) {
        match self.ledger.decrement(id) {
            ReleaseOutcome::NotWatched | ReleaseOutcome::Retained => {}
            ReleaseOutcome::Released => {
                self.store.remove_watched_state(id);
                if let Some(group) = self.groups.clear_for_release(id) {
                    self.events.raise(SpectatorEvent::WatchGroupChanged { group });
                }
                if let Err(error) = self.remote.end_watching(id) {
                    warn!(target_id = id.as_i32(), %error, "unwatch request failed");
                }
            }
        }
        self.events.dispatch_pending();
    }

    /// Begins the local play session and announces it.
    ///
    /// The session's descriptive fields are snapshotted; the score cell is
    /// retained and snapshotted at every frame flush. The local
    /// [`UserBeganPlaying`](SpectatorEvent::UserBeganPlaying) notification
    /// arrives as the server's echo, not from this call.
    ///
    /// # Errors
    /// [`GrandstandError::AlreadyPlaying`] when a session is in progress.
    pub fn begin_playing(
        &mut self,
        token: Option<ScoreToken>,
        session: &GameplaySession,
    ) -> Result<(), GrandstandError> {
        let result = self.begin_playing_inner(token, session);
        self.events.dispatch_pending();
        result
    }

    fn begin_playing_inner(
        &mut self,
        token: Option<ScoreToken>,
        session: &GameplaySession,
    ) -> Result<(), GrandstandError> {
        if self.store.is_playing() {
            return Err(GrandstandError::AlreadyPlaying);
        }

        let state = SpectatorState {
            beatmap_id: session.beatmap_id,
            ruleset_id: session.ruleset_id,
            mods: session.mods.clone(),
            play_state: PlayState::Playing,
            maximum_statistics: session.maximum_statistics.clone(),
        };
        self.store.begin_local(LocalPlay {
            state: state.clone(),
            score: session.score.clone(),
            token,
        });

        if let Err(error) = self.remote.begin_play_session(token, &state) {
            warn!(%error, "failed to announce play session");
        }
        Ok(())
    }

    /// Feeds one gameplay frame into the outbound pipeline.
    ///
    /// Frames are dropped outside a play session. When the pending buffer is
    /// at capacity it is flushed into a bundle and handed to the transport
    /// before the new frame is accepted, so the buffer never exceeds its
    /// configured capacity.
    pub fn handle_frame(&mut self, frame: &impl GameplayFrame) {
        if !self.store.is_playing() {
            debug!("frame received outside a play session, dropping");
            return;
        }

        if self.pipeline.is_full() {
            self.flush_pending(Instant::now());
            self.pump_sends();
        }
        self.pipeline.push(frame.to_replay_frame());
        self.events.dispatch_pending();
    }

    /// Ends the local play session and announces its outcome.
    ///
    /// `session` must be the session passed to
    /// [`begin_playing()`](Self::begin_playing); a request carrying a
    /// different score handle is ignored, as it belongs to a session that is
    /// no longer current. Pending frames are flushed and sent before the end
    /// announcement so the server never sees frames for an ended session.
    pub fn end_playing(&mut self, session: &GameplaySession, outcome: PlayOutcome) {
        self.end_playing_inner(session, outcome);
        self.events.dispatch_pending();
    }

    fn end_playing_inner(&mut self, session: &GameplaySession, outcome: PlayOutcome) {
        let Some(play) = self.store.local_play() else {
            debug!("end of play requested without a session, ignoring");
            return;
        };
        if !play.score.ptr_eq(&session.score) {
            debug!("end of play requested for a stale session, ignoring");
            return;
        }

        let now = Instant::now();
        self.flush_pending(now);
        self.pump_sends();

        let Some(mut play) = self.store.take_local() else {
            return;
        };
        play.state.play_state = outcome.play_state();
        self.groups.reset_flags(self.local_id);

        if let Err(error) = self.remote.end_play_session(&play.state) {
            warn!(%error, "failed to announce end of play");
        }
    }

    /// Forwards this client's loading state to the watched participant's
    /// group. Dropped unless `target` is actually being watched.
    pub fn update_loading_state(&mut self, target: ParticipantId, loaded: bool) {
        if !self.ledger.contains(target) {
            return;
        }
        if let Err(error) = self.remote.send_loading_state(target, loaded) {
            warn!(target_id = target.as_i32(), %error, "failed to send loading state");
        }
    }

    /// Forwards this client's beatmap availability to the watched
    /// participant's group. Dropped unless `target` is actually being watched.
    pub fn update_beatmap_availability(
        &mut self,
        target: ParticipantId,
        availability: BeatmapAvailability,
    ) {
        if !self.ledger.contains(target) {
            return;
        }
        if let Err(error) = self.remote.send_beatmap_availability(target, &availability) {
            warn!(target_id = target.as_i32(), %error, "failed to send availability");
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// The participant this client identifies as.
    #[must_use]
    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    /// Connectivity as of the last [`poll()`](Self::poll).
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.last_connected
    }

    /// Whether a local play session is in progress.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.store.is_playing()
    }

    /// The watch group of a participant.
    ///
    /// The local participant's group is always available. A remote
    /// participant's group is available while they are watched and the
    /// session is connected; reserved ids never have one.
    #[must_use]
    pub fn spectators(&self, id: ParticipantId) -> Option<&WatchGroup> {
        if !id.is_valid_target() {
            return None;
        }
        self.groups.group(id)
    }

    /// Every participant currently watched, in id order.
    #[must_use]
    pub fn watched_ids(&self) -> Vec<ParticipantId> {
        self.ledger.held_ids()
    }

    /// The cached session state of a watched participant, present while they
    /// have an announced session.
    #[must_use]
    pub fn playing_state(&self, id: ParticipantId) -> Option<&SpectatorState> {
        self.store.watched_state(id)
    }

    /// Everyone currently known to be playing, in announcement order.
    #[must_use]
    pub fn playing_participants(&self) -> &[ParticipantId] {
        self.store.playing_participants()
    }

    /// Number of flushed frame bundles waiting to be sent.
    #[must_use]
    pub fn queued_bundles(&self) -> usize {
        self.pipeline.queued_bundles()
    }

    /// The notification registry, for registering and removing callbacks.
    pub fn events(&mut self) -> &mut EventRegistry {
        &mut self.events
    }

    // ------------------------------------------------------------------------

    fn handle_connected(&mut self) {
        debug!("remote session connected");
        self.events.raise(SpectatorEvent::SessionConnected);

        // Every held subscription is reopened against a fresh empty group;
        // authoritative snapshots follow as watch group deliveries.
        for id in self.ledger.held_ids() {
            self.groups.create_empty(id);
            if let Err(error) = self.remote.start_watching(id) {
                warn!(target_id = id.as_i32(), %error, "failed to resume watch");
            }
        }

        // An in-progress local play survives the outage and is re-announced.
        if let Some(play) = self.store.local_play() {
            if let Err(error) = self.remote.begin_play_session(play.token, &play.state) {
                warn!(%error, "failed to re-announce play session");
            }
        }
    }

    fn handle_disconnected(&mut self, now: Instant) {
        debug!("remote session disconnected");
        self.events.raise(SpectatorEvent::SessionDisconnected);
        self.store.clear_on_disconnect();
        self.groups.apply_disconnect(&mut self.events);
        self.pipeline.note_disconnected(now);
    }

    fn apply_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::UserBeganPlaying { id, state } => {
                self.apply_began_playing(id, state);
            }
            ServerMessage::UserFinishedPlaying { id, state } => {
                self.apply_finished_playing(id, state);
            }
            ServerMessage::UserSentFrames { id, bundle } => {
                self.apply_frames(id, bundle);
            }
            ServerMessage::UserScoreProcessed { id, score_id } => {
                self.events
                    .raise(SpectatorEvent::ScoreProcessed { id, score_id });
            }
            ServerMessage::UserBeganWatching {
                target,
                mut spectator,
            } => {
                self.populate_profiles(std::slice::from_mut(&mut spectator));
                self.groups.add_spectator(spectator, target, &mut self.events);
            }
            ServerMessage::UserStoppedWatching { target, spectator } => {
                self.groups
                    .remove_spectator(spectator.id, target, &mut self.events);
            }
            ServerMessage::UserBeatmapAvailabilityChanged {
                target,
                spectator,
                availability,
            } => {
                self.groups.edit_spectator(
                    spectator,
                    target,
                    |s| s.beatmap_availability = availability,
                    &mut self.events,
                );
            }
            ServerMessage::UserLoadingStateChanged {
                target,
                spectator,
                loaded,
            } => {
                self.groups.edit_spectator(
                    spectator,
                    target,
                    |s| s.has_loaded = loaded,
                    &mut self.events,
                );
            }
            ServerMessage::DisconnectRequested => {
                self.events.raise(SpectatorEvent::DisconnectRequested);
                self.remote.disconnect();
            }
            ServerMessage::WatchGroupDelivered { target, group } => {
                self.apply_group_delivery(target, group);
            }
        }
    }

    fn apply_began_playing(&mut self, id: ParticipantId, state: SpectatorState) {
        self.store.mark_playing(id);
        if self.ledger.contains(id) {
            self.store.set_watched_state(id, state.clone());
        }
        self.events
            .raise(SpectatorEvent::UserBeganPlaying { id, state });
    }

    fn apply_finished_playing(&mut self, id: ParticipantId, state: SpectatorState) {
        self.store.mark_finished(id);
        if self.ledger.contains(id) {
            self.store.set_watched_state(id, state.clone());
            // Per-session readiness flags are meaningless once the session
            // ended.
            self.groups.reset_flags(id);
        }
        self.events
            .raise(SpectatorEvent::UserFinishedPlaying { id, state });
    }

    fn apply_frames(&mut self, id: ParticipantId, mut bundle: FrameDataBundle) {
        if let Some(last) = bundle.frames.last_mut() {
            last.header = Some(bundle.header.clone());
        }
        self.events
            .raise(SpectatorEvent::FramesReceived { id, bundle });
    }

    fn apply_group_delivery(&mut self, target: ParticipantId, group: Option<WatchGroup>) {
        let Some(mut group) = group else {
            debug!(target_id = target.as_i32(), "server reported no watch group");
            return;
        };
        self.populate_profiles(&mut group.spectators);
        let refcounted = self.ledger.contains(target);
        self.groups.install(group, refcounted, &mut self.events);
    }

    fn populate_profiles(&mut self, spectators: &mut [Spectator]) {
        if spectators.is_empty() {
            return;
        }
        let ids: Vec<ParticipantId> = spectators.iter().map(|s| s.id).collect();
        let profiles = self.identities.resolve(&ids);
        for (spectator, profile) in spectators.iter_mut().zip(profiles) {
            if profile.is_some() {
                spectator.profile = profile;
            }
        }
    }

    fn flush_pending(&mut self, now: Instant) {
        if !self.pipeline.has_pending() {
            return;
        }
        let Some(play) = self.store.local_play() else {
            return;
        };
        let score = play.score.snapshot();
        self.pipeline.flush(&score, now);
    }

    /// Sends queued bundles in order, stopping at the first failure. The
    /// failed bundle stays at the head and is retried verbatim later.
    fn pump_sends(&mut self) {
        while let Some(bundle) = self.pipeline.front() {
            match self.remote.send_frame_data(bundle) {
                Ok(()) => {
                    self.pipeline.pop_front();
                }
                Err(error) => {
                    warn!(%error, "frame bundle send failed, keeping for retry");
                    break;
                }
            }
        }
    }
}

impl fmt::Debug for SpectatorClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectatorClient")
            .field("local_id", &self.local_id)
            .field("connected", &self.last_connected)
            .field("watched", &self.ledger.held_ids())
            .field("playing", &self.store.is_playing())
            .field("queued_bundles", &self.pipeline.queued_bundles())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
