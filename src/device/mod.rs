//! The shared rendering device and its owner registry.

/// Rendering API collaborator contracts.
pub mod backend;
/// Software device used without a GPU or window system.
pub mod headless;
/// Reference-counted ownership of the shared device.
pub mod registry;
