//! Shared test utilities for integration tests.
//!
//! This module provides common constants, harness constructors, and an event
//! recorder that are used across multiple test files to avoid duplication.
//!
//! # Harness
//!
//! Integration tests drive a real [`SpectatorClient`] against the in-process
//! [`LoopbackServer`]. The client consumes the remote session it is built
//! with, so the harness hands the server over as a [`SharedLoopback`] and
//! keeps a clone for the test to script remote activity and inspect calls:
//!
//! ```ignore
//! use common::test_utils::{harness, STREAMER_ID};
//!
//! let (mut client, server) = harness();
//! server.lock().start_play(STREAMER_ID, 1234);
//! client.poll();
//! ```
//!
//! Bundles sent by the client loop back as `UserSentFrames` pushes for the
//! local id, so send order is observable from the client's own
//! `FramesReceived` events without stealing messages from the drain.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use grandstand::{
    ClientBuilder, FrameDataBundle, GameplaySession, LoopbackServer, ParticipantId, ReplayButtons,
    ReplayFrame, ScoreCell, SharedLoopback, SpectatorClient, SpectatorEvent, SpectatorEventKind,
    WatchGroup,
};

// ============================================================================
// Common Test Constants
// ============================================================================

/// The id the client under test identifies as.
pub const LOCAL_ID: ParticipantId = ParticipantId::new(1);

/// A remote participant most scenarios watch or observe playing.
pub const STREAMER_ID: ParticipantId = ParticipantId::new(10);

/// Beatmap id used by play sessions unless a scenario needs several.
pub const TEST_BEATMAP_ID: i32 = 1234;

/// Pending-frame capacity the harness builds clients with.
pub const TEST_PENDING_CAPACITY: usize = 30;

/// Flush interval the harness builds clients with. Long enough that the timed
/// flush never fires inside a test; flush coverage goes through the capacity
/// and end-of-play paths instead, which do not depend on wall-clock time.
pub const TEST_FLUSH_INTERVAL: Duration = Duration::from_secs(3600);

// ============================================================================
// Logging
// ============================================================================

static TRACING_INIT: Once = Once::new();

/// Installs a tracing subscriber writing to the test writer, once per test
/// binary. Call at the top of a test when its log output is wanted; every
/// later call is a no-op.
#[allow(dead_code)] // Some integration crates only use subsets of the harness API.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            // Forward records from the log facade to the tracing subscriber.
            let _ = tracing_log::LogTracer::init();
        }
    });
}

// ============================================================================
// Harness Constructors
// ============================================================================

/// Builds a client wired to a connected loopback server and polls once so the
/// connected edge has already been taken.
///
/// Tests that need to observe `SessionConnected` itself should use
/// [`offline_harness`] and attach a recorder before raising the connection.
#[allow(dead_code)]
#[must_use]
pub fn harness() -> (SpectatorClient, SharedLoopback) {
    harness_with_capacity(TEST_PENDING_CAPACITY)
}

/// [`harness`] with an explicit pending-frame capacity.
#[allow(dead_code)]
#[must_use]
pub fn harness_with_capacity(capacity: usize) -> (SpectatorClient, SharedLoopback) {
    let server = SharedLoopback::new(LoopbackServer::new(LOCAL_ID));
    let mut client = ClientBuilder::new(LOCAL_ID, Box::new(server.clone()))
        .with_flush_interval(TEST_FLUSH_INTERVAL)
        .with_pending_frame_capacity(capacity)
        .build()
        .expect("harness client should build");
    client.poll();
    (client, server)
}

/// Builds a client whose loopback server starts disconnected. No poll has
/// happened yet, so no edge has been observed.
#[allow(dead_code)]
#[must_use]
pub fn offline_harness() -> (SpectatorClient, SharedLoopback) {
    let server = SharedLoopback::new(LoopbackServer::new(LOCAL_ID));
    server.lock().set_connected(false);
    let client = ClientBuilder::new(LOCAL_ID, Box::new(server.clone()))
        .with_flush_interval(TEST_FLUSH_INTERVAL)
        .with_pending_frame_capacity(TEST_PENDING_CAPACITY)
        .build()
        .expect("harness client should build");
    (client, server)
}

// ============================================================================
// Session And Frame Builders
// ============================================================================

/// A minimal play session on the given beatmap with a fresh score cell.
#[allow(dead_code)]
#[must_use]
pub fn play_session(beatmap_id: i32) -> GameplaySession {
    GameplaySession {
        beatmap_id,
        ruleset_id: 0,
        mods: Default::default(),
        maximum_statistics: BTreeMap::new(),
        score: ScoreCell::default(),
    }
}

/// A left-button input frame at the given time.
#[allow(dead_code)]
#[must_use]
pub fn frame(time: f64) -> ReplayFrame {
    ReplayFrame::new(time, 320.0, 240.0, ReplayButtons::LEFT)
}

// ============================================================================
// Event Recording
// ============================================================================

/// Every event kind a recorder can attach to.
#[allow(dead_code)]
pub const ALL_EVENT_KINDS: [SpectatorEventKind; 11] = [
    SpectatorEventKind::SessionConnected,
    SpectatorEventKind::SessionDisconnected,
    SpectatorEventKind::DisconnectRequested,
    SpectatorEventKind::UserBeganPlaying,
    SpectatorEventKind::UserFinishedPlaying,
    SpectatorEventKind::FramesReceived,
    SpectatorEventKind::ScoreProcessed,
    SpectatorEventKind::UserBeganWatching,
    SpectatorEventKind::UserStoppedWatching,
    SpectatorEventKind::UserStateChanged,
    SpectatorEventKind::WatchGroupChanged,
];

/// Records dispatched [`SpectatorEvent`]s for later assertions.
///
/// Attaching registers one handler per requested kind; the recorder then
/// accumulates every matching event in dispatch order across polls.
pub struct EventRecorder {
    events: Arc<Mutex<Vec<SpectatorEvent>>>,
}

impl EventRecorder {
    /// Attaches a recorder for the given event kinds.
    #[allow(dead_code)]
    #[must_use]
    pub fn attach(client: &mut SpectatorClient, kinds: &[SpectatorEventKind]) -> Self {
        let events: Arc<Mutex<Vec<SpectatorEvent>>> = Arc::new(Mutex::new(Vec::new()));
        for kind in kinds {
            let sink = Arc::clone(&events);
            client
                .events()
                .on(*kind, move |event| sink.lock().unwrap().push(event.clone()));
        }
        Self { events }
    }

    /// Attaches a recorder for every event kind.
    #[allow(dead_code)]
    #[must_use]
    pub fn attach_all(client: &mut SpectatorClient) -> Self {
        Self::attach(client, &ALL_EVENT_KINDS)
    }

    /// Clones the recorded events, oldest first.
    #[allow(dead_code)]
    #[must_use]
    pub fn snapshot(&self) -> Vec<SpectatorEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Drains the recorded events, oldest first.
    #[allow(dead_code)]
    pub fn take(&self) -> Vec<SpectatorEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    /// Number of recorded events of the given kind.
    #[allow(dead_code)]
    #[must_use]
    pub fn count(&self, kind: SpectatorEventKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }

    /// Total number of recorded events.
    #[allow(dead_code)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Whether nothing has been recorded yet.
    #[allow(dead_code)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }

    /// Frame bundles received for `id`, in dispatch order.
    #[allow(dead_code)]
    #[must_use]
    pub fn frames_received(&self, id: ParticipantId) -> Vec<FrameDataBundle> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                SpectatorEvent::FramesReceived { id: sender, bundle } if *sender == id => {
                    Some(bundle.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Group snapshots carried by `WatchGroupChanged` events, in dispatch
    /// order.
    #[allow(dead_code)]
    #[must_use]
    pub fn group_changes(&self) -> Vec<WatchGroup> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                SpectatorEvent::WatchGroupChanged { group } => Some(group.clone()),
                _ => None,
            })
            .collect()
    }
}
