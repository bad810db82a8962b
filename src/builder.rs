//! Builder for [`SpectatorClient`].

use std::fmt;

use web_time::Duration;

use crate::error::GrandstandError;
use crate::remote::{IdentityProvider, NullIdentityProvider, RemoteSession};
use crate::{ParticipantId, SpectatorClient};

/// Default interval between timed frame flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(200);
/// Default pending-frame capacity; a full buffer flushes early.
pub const DEFAULT_PENDING_FRAME_CAPACITY: usize = 30;

/// Builds a [`SpectatorClient`] around a remote session.
///
/// After setting all appropriate values, use [`build()`](Self::build) to
/// consume the builder and create the client.
#[must_use = "ClientBuilder must be consumed by calling build()"]
pub struct ClientBuilder {
    local_id: ParticipantId,
    remote: Box<dyn RemoteSession>,
    identities: Box<dyn IdentityProvider>,
    flush_interval: Duration,
    pending_frame_capacity: usize,
}

impl ClientBuilder {
    /// Constructs a builder for a client identifying as `local_id`, driving
    /// the given remote session. All other values start at their defaults.
    pub fn new(local_id: ParticipantId, remote: Box<dyn RemoteSession>) -> Self {
        Self {
            local_id,
            remote,
            identities: Box::new(NullIdentityProvider),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            pending_frame_capacity: DEFAULT_PENDING_FRAME_CAPACITY,
        }
    }

    /// Change the identity provider used to resolve display names of watch
    /// group members. Default resolves nothing; members fall back to a
    /// placeholder name.
    pub fn with_identity_provider(mut self, provider: Box<dyn IdentityProvider>) -> Self {
        self.identities = provider;
        self
    }

    /// Change the interval between timed frame flushes. Default is 200ms.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Change how many frames may be pending before an early flush. Default
    /// is 30.
    pub fn with_pending_frame_capacity(mut self, capacity: usize) -> Self {
        self.pending_frame_capacity = capacity;
        self
    }

    /// Consumes the builder and creates the client.
    ///
    /// # Errors
    /// Returns [`GrandstandError::InvalidRequest`] when the local id is at or
    /// below the reserved floor, the pending frame capacity is zero, or the
    /// flush interval is zero.
    pub fn build(self) -> Result<SpectatorClient, GrandstandError> {
        if !self.local_id.is_valid_target() {
            return Err(GrandstandError::InvalidRequest {
                info: format!(
                    "local participant id {} is at or below the reserved floor",
                    self.local_id
                ),
            });
        }
        if self.pending_frame_capacity == 0 {
            return Err(GrandstandError::InvalidRequest {
                info: "pending frame capacity must be at least 1".to_owned(),
            });
        }
        if self.flush_interval.is_zero() {
            return Err(GrandstandError::InvalidRequest {
                info: "flush interval must be non-zero".to_owned(),
            });
        }

        Ok(SpectatorClient::assemble(
            self.local_id,
            self.remote,
            self.identities,
            self.pending_frame_capacity,
            self.flush_interval,
        ))
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("local_id", &self.local_id)
            .field("flush_interval", &self.flush_interval)
            .field("pending_frame_capacity", &self.pending_frame_capacity)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
