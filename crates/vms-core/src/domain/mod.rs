//! Domain entities for the VMS viewer.
//!
//! This module contains pure value types with no infrastructure dependencies.
//! Code in outer layers (the session engine, the CLI) depends on the domain,
//! but the domain never depends on them.

/// Server target, channel endpoints, and camera identifiers.
pub mod target;

/// Playback transport commands and speeds.
pub mod playback;

/// Object detections reported alongside live video, and overlay geometry.
pub mod detection;
