//! Utility functions for working with A2A types.
//!
//! This module provides helper functions for creating and manipulating A2A protocol types,
//! making it easier to work with messages, artifacts, parts, and tasks.

pub mod artifact;
pub mod constants;
pub mod extensions;
pub mod message;
pub mod parts;
pub mod task;

pub use artifact::*;
pub use constants::*;
pub use extensions::*;
pub use message::*;
pub use parts::*;
pub use task::*;

/// Current Unix epoch in seconds, used by the event buffer and share-link
/// store for timestamping. Centralized so a future switch to an injectable
/// clock only needs to change this one function.
pub fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
