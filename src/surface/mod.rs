//! Per-surface paint cycles against the shared device.

/// Software diagnostic renderer.
pub mod fallback;
/// Surface state machine and drawing hooks.
pub mod paint;
