//! Contracts between the spectator client and the network layer.
//!
//! The client never touches sockets. It drives a [`RemoteSession`] for
//! outbound calls and drains [`ServerMessage`]s from it on every poll; how
//! those calls travel (and how connectivity is established) is entirely the
//! implementor's business. [`crate::LoopbackServer`] is the in-memory
//! reference implementation.

use std::error::Error;
use std::fmt;

use crate::frames::{FrameDataBundle, ScoreToken};
use crate::state::{BeatmapAvailability, ProfileInfo, Spectator, SpectatorState, WatchGroup};
use crate::ParticipantId;

/// Failure of a single remote call.
///
/// Consumed by the client's retry logic and logged; it never surfaces through
/// the public client API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCallError {
    reason: String,
}

impl RemoteCallError {
    /// Creates an error carrying a human-readable reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The reason this call failed.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for RemoteCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote call failed: {}", self.reason)
    }
}

impl Error for RemoteCallError {}

/// A push received from the server, delivered through
/// [`RemoteSession::drain_messages`].
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ServerMessage {
    /// A participant began a play session.
    UserBeganPlaying {
        /// The playing participant.
        id: ParticipantId,
        /// The state of the new session.
        state: SpectatorState,
    },
    /// A participant's play session reached a terminal state.
    UserFinishedPlaying {
        /// The participant whose session ended.
        id: ParticipantId,
        /// The state of the ended session.
        state: SpectatorState,
    },
    /// A bundle of input frames from a participant's live session.
    UserSentFrames {
        /// The participant the frames belong to.
        id: ParticipantId,
        /// The bundle as sent, header not yet stamped onto the final frame.
        bundle: FrameDataBundle,
    },
    /// The server finished processing a participant's submitted score.
    UserScoreProcessed {
        /// The participant whose score was processed.
        id: ParticipantId,
        /// Server-side id of the processed score.
        score_id: i64,
    },
    /// A spectator began watching `target`.
    UserBeganWatching {
        /// The watched participant.
        target: ParticipantId,
        /// The spectator that joined.
        spectator: Spectator,
    },
    /// A spectator stopped watching `target`.
    UserStoppedWatching {
        /// The watched participant.
        target: ParticipantId,
        /// The spectator that left.
        spectator: Spectator,
    },
    /// A spectator of `target` changed their beatmap availability.
    UserBeatmapAvailabilityChanged {
        /// The watched participant.
        target: ParticipantId,
        /// The spectator whose availability changed.
        spectator: ParticipantId,
        /// The new availability.
        availability: BeatmapAvailability,
    },
    /// A spectator of `target` changed their loading state.
    UserLoadingStateChanged {
        /// The watched participant.
        target: ParticipantId,
        /// The spectator whose loading state changed.
        spectator: ParticipantId,
        /// Whether the spectator has finished loading.
        loaded: bool,
    },
    /// The server asked this client to disconnect.
    DisconnectRequested,
    /// The asynchronous reply to [`RemoteSession::start_watching`].
    WatchGroupDelivered {
        /// The participant the group belongs to.
        target: ParticipantId,
        /// The group, or `None` when the server does not report one.
        group: Option<WatchGroup>,
    },
}

/// The two-way contract the client consumes from the network layer.
///
/// Outbound calls are synchronous from the client's point of view and report
/// per-call success; transient failures are retried by the client, so
/// implementations should fail fast rather than block. Inbound pushes are
/// buffered by the implementation and handed over through
/// [`drain_messages()`](Self::drain_messages) on every client poll.
#[cfg(not(feature = "sync-send"))]
pub trait RemoteSession {
    /// Current connectivity. The client detects connect/disconnect edges by
    /// polling this.
    fn is_connected(&self) -> bool;

    /// Announces the start of a local play session.
    fn begin_play_session(
        &mut self,
        token: Option<ScoreToken>,
        state: &SpectatorState,
    ) -> Result<(), RemoteCallError>;

    /// Sends one frame bundle. The client keeps at most one send in flight
    /// and retries the same bundle verbatim on failure.
    fn send_frame_data(&mut self, bundle: &FrameDataBundle) -> Result<(), RemoteCallError>;

    /// Announces the end of the local play session.
    fn end_play_session(&mut self, state: &SpectatorState) -> Result<(), RemoteCallError>;

    /// Subscribes to a participant's sessions. The watch group arrives later
    /// as [`ServerMessage::WatchGroupDelivered`].
    fn start_watching(&mut self, id: ParticipantId) -> Result<(), RemoteCallError>;

    /// Drops the subscription to a participant's sessions.
    fn end_watching(&mut self, id: ParticipantId) -> Result<(), RemoteCallError>;

    /// Announces this client's loading state to the watched participant's group.
    fn send_loading_state(
        &mut self,
        target: ParticipantId,
        loaded: bool,
    ) -> Result<(), RemoteCallError>;

    /// Announces this client's beatmap availability to the watched
    /// participant's group.
    fn send_beatmap_availability(
        &mut self,
        target: ParticipantId,
        availability: &BeatmapAvailability,
    ) -> Result<(), RemoteCallError>;

    /// Drops the connection. Infallible; the client observes the result as a
    /// connectivity edge on its next poll.
    fn disconnect(&mut self);

    /// Returns all messages received since the last time this method was
    /// called.
    fn drain_messages(&mut self) -> Vec<ServerMessage>;
}

/// The two-way contract the client consumes from the network layer.
///
/// Outbound calls are synchronous from the client's point of view and report
/// per-call success; transient failures are retried by the client, so
/// implementations should fail fast rather than block. Inbound pushes are
/// buffered by the implementation and handed over through
/// [`drain_messages()`](Self::drain_messages) on every client poll.
#[cfg(feature = "sync-send")]
pub trait RemoteSession: Send + Sync {
    /// Current connectivity. The client detects connect/disconnect edges by
    /// polling this.
    fn is_connected(&self) -> bool;

    /// Announces the start of a local play session.
    fn begin_play_session(
        &mut self,
        token: Option<ScoreToken>,
        state: &SpectatorState,
    ) -> Result<(), RemoteCallError>;

    /// Sends one frame bundle. The client keeps at most one send in flight
    /// and retries the same bundle verbatim on failure.
    fn send_frame_data(&mut self, bundle: &FrameDataBundle) -> Result<(), RemoteCallError>;

    /// Announces the end of the local play session.
    fn end_play_session(&mut self, state: &SpectatorState) -> Result<(), RemoteCallError>;

    /// Subscribes to a participant's sessions. The watch group arrives later
    /// as [`ServerMessage::WatchGroupDelivered`].
    fn start_watching(&mut self, id: ParticipantId) -> Result<(), RemoteCallError>;

    /// Drops the subscription to a participant's sessions.
    fn end_watching(&mut self, id: ParticipantId) -> Result<(), RemoteCallError>;

    /// Announces this client's loading state to the watched participant's group.
    fn send_loading_state(
        &mut self,
        target: ParticipantId,
        loaded: bool,
    ) -> Result<(), RemoteCallError>;

    /// Announces this client's beatmap availability to the watched
    /// participant's group.
    fn send_beatmap_availability(
        &mut self,
        target: ParticipantId,
        availability: &BeatmapAvailability,
    ) -> Result<(), RemoteCallError>;

    /// Drops the connection. Infallible; the client observes the result as a
    /// connectivity edge on its next poll.
    fn disconnect(&mut self);

    /// Returns all messages received since the last time this method was
    /// called.
    fn drain_messages(&mut self) -> Vec<ServerMessage>;
}

/// Batched display-identity lookup for watch group members.
///
/// Implementations are expected to be cache-shaped: cheap, synchronous and
/// allowed to miss. A miss degrades the member to a placeholder display name,
/// never to an error.
#[cfg(not(feature = "sync-send"))]
pub trait IdentityProvider {
    /// Resolves profiles for the given ids, positionally. `None` marks an
    /// unresolved id.
    fn resolve(&mut self, ids: &[ParticipantId]) -> Vec<Option<ProfileInfo>>;
}

/// Batched display-identity lookup for watch group members.
///
/// Implementations are expected to be cache-shaped: cheap, synchronous and
/// allowed to miss. A miss degrades the member to a placeholder display name,
/// never to an error.
#[cfg(feature = "sync-send")]
pub trait IdentityProvider: Send + Sync {
    /// Resolves profiles for the given ids, positionally. `None` marks an
    /// unresolved id.
    fn resolve(&mut self, ids: &[ParticipantId]) -> Vec<Option<ProfileInfo>>;
}

/// An [`IdentityProvider`] that resolves nothing.
///
/// Every watch group member falls back to the placeholder display name. This
/// is the builder default.
#[derive(Debug, Default, Copy, Clone)]
pub struct NullIdentityProvider;

impl IdentityProvider for NullIdentityProvider {
    fn resolve(&mut self, ids: &[ParticipantId]) -> Vec<Option<ProfileInfo>> {
        vec![None; ids.len()]
    }
}

// ============================================================================
// Tests
// ============================================================================
