//! devshare lets many independent drawing surfaces paint through one shared rendering device.
//!
//! - A [`DeviceRegistry`] owns the single device, counts its owners, grows its backbuffer to fit
//!   the largest one and disposes it when the last owner leaves.
//! - Each [`Surface`] drives its own paint cycle: status check, reset when needed, viewport
//!   isolation, draw, best-effort present.
//! - When the device cannot be used, the cycle renders a diagnostic frame in software instead
//!   of failing.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

/// The shared device, its registry and collaborator contracts.
pub mod device;
/// Surfaces and their paint cycle.
pub mod surface;

pub use crate::foundation::core::{
    FrameRGBA, GraphicsProfile, OwnerId, PresentTarget, Rect, Rgba8, Size, Viewport,
};
pub use crate::foundation::error::{DevshareError, DevshareResult};

pub use crate::device::backend::{DeviceFactory, RawDeviceStatus, RenderDevice};
pub use crate::device::headless::{
    HeadlessDevice, HeadlessDeviceFactory, HeadlessDeviceOpts, HeadlessProbe,
};
pub use crate::device::registry::{DeviceEvent, DeviceLease, DeviceRegistry};
pub use crate::surface::fallback::{FallbackRenderer, FallbackStyle};
pub use crate::surface::paint::{
    DeviceStatus, DrawContext, FallbackFrame, PaintOutcome, PresentOutcome, Surface,
    SurfaceHooks, SurfaceOpts,
};
