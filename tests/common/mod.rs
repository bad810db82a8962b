//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - `test_utils`: the loopback harness, event recording, and shared constants
//!
//! # Usage
//!
//! From any integration test file:
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::test_utils::{harness, EventRecorder, STREAMER_ID};
//! // Or use the re-exported items:
//! use common::{harness, EventRecorder};
//! ```

pub mod test_utils;

// Re-export commonly used items for convenience.
// These are public utilities for integration tests - allow unused until tests adopt them.
#[allow(unused_imports)]
pub use test_utils::{
    frame, harness, harness_with_capacity, init_tracing, offline_harness, play_session,
    EventRecorder, LOCAL_ID, STREAMER_ID, TEST_BEATMAP_ID,
};
