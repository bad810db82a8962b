//! Publish/subscribe registry for client notifications.
//!
//! Listeners register callbacks per [`SpectatorEventKind`]; the client raises
//! events while mutating state and dispatches them in raise order at the end
//! of the entry point that raised them, so a callback never observes a
//! half-applied update.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use crate::frames::FrameDataBundle;
use crate::state::{Spectator, SpectatorState, WatchGroup};
use crate::ParticipantId;

/// Identifies one registered event callback, for later removal via
/// [`EventRegistry::off`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of a [`SpectatorEvent`], used as the registration key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum SpectatorEventKind {
    /// The remote session became connected.
    SessionConnected,
    /// The remote session lost its connection.
    SessionDisconnected,
    /// The server asked this client to disconnect.
    DisconnectRequested,
    /// A participant began a play session.
    UserBeganPlaying,
    /// A participant's play session ended.
    UserFinishedPlaying,
    /// A frame bundle arrived from a watched participant.
    FramesReceived,
    /// The server finished processing a participant's score.
    ScoreProcessed,
    /// A spectator joined a watch group.
    UserBeganWatching,
    /// A spectator left a watch group.
    UserStoppedWatching,
    /// A spectator's readiness flags changed.
    UserStateChanged,
    /// A watch group's membership or content changed structurally.
    WatchGroupChanged,
}

/// Notifications raised by the client. Handling them is up to the user.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SpectatorEvent {
    /// The remote session became connected (including reconnects).
    SessionConnected,
    /// The remote session lost its connection. All watch groups and cached
    /// states have been reset by the time this is observed.
    SessionDisconnected,
    /// The server asked this client to disconnect. The transport is dropped
    /// right after this is raised.
    DisconnectRequested,
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
        /// The state of the ended session, including its terminal play state.
        state: SpectatorState,
    },
    /// A frame bundle arrived from a watched participant. The bundle header
    /// has been stamped onto its final frame.
    FramesReceived {
        /// The participant the frames belong to.
        id: ParticipantId,
        /// The received bundle.
        bundle: FrameDataBundle,
    },
    /// The server finished processing a participant's submitted score.
    ScoreProcessed {
        /// The participant whose score was processed.
        id: ParticipantId,
        /// Server-side id of the processed score.
        score_id: i64,
    },
    /// A spectator joined the watch group of `target`.
    UserBeganWatching {
        /// The watched participant.
        target: ParticipantId,
        /// The spectator that joined.
        spectator: Spectator,
    },
    /// A spectator left the watch group of `target`.
    UserStoppedWatching {
        /// The watched participant.
        target: ParticipantId,
        /// The spectator that left, as last seen in the group.
        spectator: Spectator,
    },
    /// A spectator's readiness flags changed inside the watch group of `target`.
    UserStateChanged {
        /// The watched participant.
        target: ParticipantId,
        /// The spectator after the change.
        spectator: Spectator,
    },
    /// A watch group changed structurally. Carries a snapshot of the group
    /// after the change (empty when the group was just cleared).
    WatchGroupChanged {
        /// The group after the change.
        group: WatchGroup,
    },
}

impl SpectatorEvent {
    /// The [`SpectatorEventKind`] this event dispatches under.
    #[must_use]
    pub fn kind(&self) -> SpectatorEventKind {
        match self {
            SpectatorEvent::SessionConnected => SpectatorEventKind::SessionConnected,
            SpectatorEvent::SessionDisconnected => SpectatorEventKind::SessionDisconnected,
            SpectatorEvent::DisconnectRequested => SpectatorEventKind::DisconnectRequested,
            SpectatorEvent::UserBeganPlaying { .. } => SpectatorEventKind::UserBeganPlaying,
            SpectatorEvent::UserFinishedPlaying { .. } => SpectatorEventKind::UserFinishedPlaying,
            SpectatorEvent::FramesReceived { .. } => SpectatorEventKind::FramesReceived,
            SpectatorEvent::ScoreProcessed { .. } => SpectatorEventKind::ScoreProcessed,
            SpectatorEvent::UserBeganWatching { .. } => SpectatorEventKind::UserBeganWatching,
            SpectatorEvent::UserStoppedWatching { .. } => SpectatorEventKind::UserStoppedWatching,
            SpectatorEvent::UserStateChanged { .. } => SpectatorEventKind::UserStateChanged,
            SpectatorEvent::WatchGroupChanged { .. } => SpectatorEventKind::WatchGroupChanged,
        }
    }
}

#[cfg(not(feature = "sync-send"))]
type Handler = Box<dyn FnMut(&SpectatorEvent)>;

#[cfg(feature = "sync-send")]
type Handler = Box<dyn FnMut(&SpectatorEvent) + Send>;

/// Registry of event callbacks, keyed by [`SpectatorEventKind`].
///
/// Events raised during a client entry point are queued and dispatched
/// synchronously before that entry point returns. Callbacks for one kind run
/// in registration order; events run in raise order.
#[derive(Default)]
pub struct EventRegistry {
    handlers: BTreeMap<SpectatorEventKind, Vec<(HandlerId, Handler)>>,
    queue: VecDeque<SpectatorEvent>,
    next_handler: u64,
}

impl EventRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for every event of the given kind.
    ///
    /// Returns a [`HandlerId`] that removes the registration when passed to
    /// [`off()`](Self::off).
    #[cfg(not(feature = "sync-send"))]
    pub fn on<F>(&mut self, kind: SpectatorEventKind, handler: F) -> HandlerId
    where
        F: FnMut(&SpectatorEvent) + 'static,
    {
        self.insert(kind, Box::new(handler))
    }

    /// Registers a callback for every event of the given kind.
    ///
    /// Returns a [`HandlerId`] that removes the registration when passed to
    /// [`off()`](Self::off).
    #[cfg(feature = "sync-send")]
    pub fn on<F>(&mut self, kind: SpectatorEventKind, handler: F) -> HandlerId
    where
        F: FnMut(&SpectatorEvent) + Send + 'static,
    {
        self.insert(kind, Box::new(handler))
    }

    fn insert(&mut self, kind: SpectatorEventKind, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_handler);
        self.next_handler += 1;
        self.handlers.entry(kind).or_default().push((id, handler));
        id
    }

    /// Removes a previously registered callback.
    ///
    /// Returns whether a registration was actually removed. Passing an id
    /// under a different kind than it was registered for removes nothing.
    pub fn off(&mut self, kind: SpectatorEventKind, id: HandlerId) -> bool {
        match self.handlers.get_mut(&kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|(handler_id, _)| *handler_id != id);
                list.len() != before
            }
            None => false,
        }
    }

    /// Queues an event for dispatch at the end of the current entry point.
    pub(crate) fn raise(&mut self, event: SpectatorEvent) {
        self.queue.push_back(event);
    }

    /// Dispatches every queued event, in raise order.
    pub(crate) fn dispatch_pending(&mut self) {
        while let Some(event) = self.queue.pop_front() {
            let kind = event.kind();
            if let Some(list) = self.handlers.get_mut(&kind) {
                for (_, handler) in list.iter_mut() {
                    handler(&event);
                }
            }
        }
    }

    fn handler_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("handlers", &self.handler_count())
            .field("queued", &self.queue.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
