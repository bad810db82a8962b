//! # Grandstand
//!
//! Grandstand is a client-side spectator synchronization library for real-time
//! gameplay streaming. It keeps a local mirror of who is playing, who is
//! watching whom and how ready every spectator is, while streaming the local
//! player's own input frames to the server in ordered bundles.
//!
//! The crate is transport agnostic: a [`SpectatorClient`] drives a
//! [`RemoteSession`] implementation for every outbound call and drains the
//! messages the server pushed back. [`LoopbackServer`] is a complete
//! in-memory implementation used for tests and protocol validation; real
//! deployments supply their own over whatever transport they use.
//!
//! The client is poll based. Call [`SpectatorClient::poll`] once per tick;
//! state changes surface as [`SpectatorEvent`]s through callbacks registered
//! on the client's [`EventRegistry`], dispatched only after the change is
//! fully applied.
//!
//! ```
//! use grandstand::{ClientBuilder, LoopbackServer, ParticipantId, SharedLoopback};
//!
//! let local = ParticipantId::new(1);
//! let server = SharedLoopback::new(LoopbackServer::new(local));
//! let mut client = ClientBuilder::new(local, Box::new(server.clone())).build()?;
//!
//! // The first poll observes the live transport.
//! client.poll();
//! assert!(client.is_connected());
//!
//! // Watch another participant; the server's group snapshot arrives on a
//! // later poll.
//! let streamer = ParticipantId::new(10);
//! client.watch_user(streamer)?;
//! client.poll();
//! assert!(client.spectators(streamer).is_some());
//! # Ok::<(), grandstand::GrandstandError>(())
//! ```

#![forbid(unsafe_code)] // let us try
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use builder::{ClientBuilder, DEFAULT_FLUSH_INTERVAL, DEFAULT_PENDING_FRAME_CAPACITY};
pub use client::SpectatorClient;
pub use error::GrandstandError;
pub use events::{EventRegistry, HandlerId, SpectatorEvent, SpectatorEventKind};
pub use frames::{
    FrameDataBundle, FrameHeader, GameplayFrame, GameplaySession, PlayOutcome, ReplayButtons,
    ReplayFrame, Score, ScoreCell, ScoreToken,
};
pub use loopback::{LoopbackServer, SharedLoopback};
pub use remote::{
    IdentityProvider, NullIdentityProvider, RemoteCallError, RemoteSession, ServerMessage,
};
pub use state::{
    BeatmapAvailability, HitResult, Mod, PlayState, ProfileInfo, Spectator, SpectatorState,
    WatchGroup,
};

#[doc(hidden)]
pub mod builder;
#[doc(hidden)]
pub mod client;
#[doc(hidden)]
pub mod error;
#[doc(hidden)]
pub mod events;
#[doc(hidden)]
pub mod frames;
#[doc(hidden)]
pub mod loopback;
#[doc(hidden)]
pub mod remote;
#[doc(hidden)]
pub mod state;

mod frame_pipeline;
mod store;
mod subscriptions;

// #############
// # CONSTANTS #
// #############

/// Participant ids at or below this value are reserved for server-side system
/// activity. They can never be a watch target and never appear as spectators.
pub const RESERVED_ID_FLOOR: i32 = 0;

/// Identifies one participant in the spectator system.
///
/// Participant ids come from the account system and are positive; everything
/// at or below [`RESERVED_ID_FLOOR`] is reserved for server-side system
/// activity and rejected as a watch target.
///
/// # Type Safety
///
/// `ParticipantId` is a newtype wrapper around `i32` that prevents
/// accidentally mixing participant ids with other integers such as beatmap
/// ids or score ids.
///
/// # Examples
///
/// ```
/// use grandstand::{ParticipantId, RESERVED_ID_FLOOR};
///
/// let id = ParticipantId::new(42);
/// assert!(id.is_valid_target());
/// assert_eq!(id.as_i32(), 42);
///
/// // Reserved ids can never be watched.
/// assert!(!ParticipantId::new(RESERVED_ID_FLOOR).is_valid_target());
/// assert!(!ParticipantId::new(-1).is_valid_target());
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ParticipantId(i32);

impl ParticipantId {
    /// Creates a new `ParticipantId` from an `i32` value.
    ///
    /// Note: This does not validate the id. Use
    /// [`is_valid_target()`](Self::is_valid_target) to check whether the id
    /// can be watched.
    #[inline]
    #[must_use]
    pub const fn new(id: i32) -> Self {
        ParticipantId(id)
    }

    /// Returns the underlying `i32` value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns `true` if this id is above the reserved floor and can be a
    /// watch target.
    #[inline]
    #[must_use]
    pub const fn is_valid_target(self) -> bool {
        self.0 > RESERVED_ID_FLOOR
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ParticipantId {
    #[inline]
    fn from(value: i32) -> Self {
        ParticipantId(value)
    }
}

impl From<ParticipantId> for i32 {
    #[inline]
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

// ###################
// # UNIT TESTS      #
// ###################

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_id_round_trips_through_i32() {
        let id = ParticipantId::new(42);
        assert_eq!(id.as_i32(), 42);
        assert_eq!(ParticipantId::from(42), id);
        assert_eq!(i32::from(id), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn reserved_floor_bounds_valid_targets() {
        assert!(ParticipantId::new(1).is_valid_target());
        assert!(ParticipantId::new(i32::MAX).is_valid_target());
        assert!(!ParticipantId::new(RESERVED_ID_FLOOR).is_valid_target());
        assert!(!ParticipantId::new(-1).is_valid_target());
        assert!(!ParticipantId::new(i32::MIN).is_valid_target());
    }

    #[test]
    fn default_id_is_the_reserved_sentinel() {
        assert_eq!(ParticipantId::default().as_i32(), RESERVED_ID_FLOOR);
        assert!(!ParticipantId::default().is_valid_target());
    }

    #[test]
    fn ids_order_numerically() {
        let mut ids = vec![
            ParticipantId::new(30),
            ParticipantId::new(-2),
            ParticipantId::new(7),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                ParticipantId::new(-2),
                ParticipantId::new(7),
                ParticipantId::new(30),
            ]
        );
    }
}
