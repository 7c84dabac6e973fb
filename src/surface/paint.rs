use crate::device::backend::{RawDeviceStatus, RenderDevice};
use crate::device::registry::{DeviceLease, DeviceRegistry};
use crate::foundation::core::{
    FrameRGBA, GraphicsProfile, OwnerId, PresentTarget, Size, Viewport,
};
use crate::foundation::error::{DevshareError, DevshareResult};
use crate::surface::fallback::FallbackRenderer;

/// Drawing capability supplied by each concrete surface type.
///
/// Hooks run with the device lent out of the registry, so they may keep a [`DeviceRegistry`]
/// clone and query it, attach or drop other surfaces. Painting another surface from inside a hook
/// yields that surface's fallback frame, as the device is busy.
pub trait SurfaceHooks {
    /// Called once, right after the surface first attaches to a device and before any draw.
    fn initialize(&mut self, ctx: &mut DrawContext<'_>);

    /// Called once per successful paint cycle. The viewport is already isolated.
    fn draw(&mut self, ctx: &mut DrawContext<'_>);
}

/// Device access handed to [`SurfaceHooks`].
pub struct DrawContext<'a> {
    device: &'a mut dyn RenderDevice,
    viewport: Viewport,
    surface_size: Size,
}

impl<'a> DrawContext<'a> {
    /// The shared device.
    pub fn device(&mut self) -> &mut dyn RenderDevice {
        &mut *self.device
    }

    /// The shared device as its concrete type.
    pub fn downcast_device<T: 'static>(&mut self) -> Option<&mut T> {
        self.device.as_any_mut().downcast_mut::<T>()
    }

    /// Viewport active for this call.
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// The surface's own client size.
    pub fn surface_size(&self) -> Size {
        self.surface_size
    }
}

/// Device status as seen by one surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Drawable as is.
    Ok,
    /// Unusable; no reset is attempted.
    Lost,
    /// Flagged not-reset, or too small for this surface.
    NeedsReset,
}

impl DeviceStatus {
    /// Classify a raw status for a surface requesting `requested` on a `backbuffer` device.
    pub fn classify(raw: RawDeviceStatus, backbuffer: Size, requested: Size) -> Self {
        match raw {
            RawDeviceStatus::Lost => Self::Lost,
            RawDeviceStatus::NotReset => Self::NeedsReset,
            RawDeviceStatus::Ok if !requested.fits_within(backbuffer) => Self::NeedsReset,
            RawDeviceStatus::Ok => Self::Ok,
        }
    }
}

/// Result of the presentation step.
///
/// A deferred present is not an error of the cycle: the next cycle's status check handles
/// whatever made it fail. It is also not a guarantee that pixels reached the screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The device accepted the region.
    Submitted,
    /// The device rejected the region; the failure was suppressed.
    Deferred,
}

/// Diagnostic frame rendered instead of real content.
#[derive(Debug)]
pub struct FallbackFrame {
    /// Why drawing could not proceed.
    pub reason: DevshareError,
    /// Text drawn on the frame.
    pub message: String,
    /// Software-rendered pixels covering the surface.
    pub frame: FrameRGBA,
}

/// What one paint cycle produced.
#[derive(Debug)]
pub enum PaintOutcome {
    /// Real content was drawn through the shared device.
    Drawn {
        /// Viewport the draw hook ran with.
        viewport: Viewport,
        /// Presentation classification.
        present: PresentOutcome,
    },
    /// The device was unusable; a diagnostic frame was rendered instead.
    Fallback(FallbackFrame),
}

impl PaintOutcome {
    /// Return `true` for [`PaintOutcome::Drawn`].
    pub fn is_drawn(&self) -> bool {
        matches!(self, Self::Drawn { .. })
    }

    /// The fallback frame, if any.
    pub fn fallback(&self) -> Option<&FallbackFrame> {
        match self {
            Self::Fallback(f) => Some(f),
            Self::Drawn { .. } => None,
        }
    }
}

/// Description of one surface.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SurfaceOpts {
    /// Human-readable name, shown in design-time diagnostics.
    pub label: String,
    /// Client size.
    pub size: Size,
    /// Capability profile requested when this surface creates the device.
    pub profile: GraphicsProfile,
    /// Host display target for presentation.
    pub target: PresentTarget,
}

impl Default for SurfaceOpts {
    fn default() -> Self {
        Self {
            label: "surface".to_string(),
            size: Size::new(1, 1),
            profile: GraphicsProfile::Reach,
            target: PresentTarget::default(),
        }
    }
}

/// One drawable region painting through the shared device.
///
/// A surface starts detached. [`Surface::attach`] registers it with a [`DeviceRegistry`]; the
/// registration is released by [`Surface::detach`] or, failing that, when the surface is dropped.
pub struct Surface<H: SurfaceHooks> {
    opts: SurfaceOpts,
    hooks: H,
    lease: Option<DeviceLease>,
    initialized: bool,
    fallback: FallbackRenderer,
}

impl<H: SurfaceHooks> std::fmt::Debug for Surface<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("opts", &self.opts)
            .field("owner", &self.owner())
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl<H: SurfaceHooks> Surface<H> {
    /// Create a detached surface.
    pub fn new(opts: SurfaceOpts, hooks: H) -> Self {
        Self {
            opts,
            hooks,
            lease: None,
            initialized: false,
            fallback: FallbackRenderer::default(),
        }
    }

    /// Replace the diagnostic renderer.
    pub fn with_fallback(mut self, fallback: FallbackRenderer) -> Self {
        self.fallback = fallback;
        self
    }

    /// Register with `registry`, creating or growing the shared device as needed.
    ///
    /// Runs [`SurfaceHooks::initialize`] the first time this succeeds. Device construction
    /// failure is returned as is and leaves the surface detached.
    pub fn attach(&mut self, registry: &DeviceRegistry) -> DevshareResult<()> {
        if self.lease.is_some() {
            return Err(DevshareError::validation(format!(
                "surface '{}' is already attached",
                self.opts.label
            )));
        }

        let owner = registry.allocate_owner();
        let lease = registry.add_ref(owner, self.opts.size, self.opts.profile)?;
        tracing::debug!(label = %self.opts.label, %owner, size = %self.opts.size, "surface attached");
        self.lease = Some(lease);

        if !self.initialized {
            let surface_size = self.opts.size;
            let hooks = &mut self.hooks;
            registry.with_device(|device| {
                let viewport = device.viewport();
                let mut ctx = DrawContext {
                    device,
                    viewport,
                    surface_size,
                };
                hooks.initialize(&mut ctx);
            });
            self.initialized = true;
        }
        Ok(())
    }

    /// Release the device registration gracefully. No-op when detached.
    pub fn detach(&mut self) {
        if let Some(lease) = self.lease.take() {
            tracing::debug!(label = %self.opts.label, owner = %lease.owner(), "surface detached");
            lease.release();
        }
    }

    /// Change the client size. Growth of the device happens on the next paint cycle.
    pub fn resize(&mut self, size: Size) -> DevshareResult<()> {
        self.opts.size = size;
        if let Some(lease) = &self.lease {
            lease.registry().update_request(lease.owner(), size)?;
        }
        Ok(())
    }

    /// Run one paint cycle.
    ///
    /// Never fails: when the device is unusable the outcome carries a software-rendered
    /// diagnostic frame, and the next cycle retries from scratch.
    pub fn paint(&mut self) -> PaintOutcome {
        match self.begin_draw() {
            Ok((registry, viewport)) => {
                self.draw(&registry, viewport);
                let present = self.end_draw(&registry);
                PaintOutcome::Drawn { viewport, present }
            }
            Err(reason) => {
                let message = fallback_message(&reason);
                let frame = self.fallback.render(self.opts.size, &message);
                PaintOutcome::Fallback(FallbackFrame {
                    reason,
                    message,
                    frame,
                })
            }
        }
    }

    /// Status check, reset if needed, then viewport isolation.
    fn begin_draw(&self) -> DevshareResult<(DeviceRegistry, Viewport)> {
        let Some(lease) = &self.lease else {
            return Err(DevshareError::unavailable(format!(
                "{}\n\n{}",
                self.opts.label,
                std::any::type_name::<H>()
            )));
        };
        let registry = lease.registry().clone();

        self.handle_device_reset(&registry)?;

        // The backbuffer fits the largest owner; draw only into our own top-left corner.
        let viewport = Viewport::top_left(self.opts.size);
        registry
            .with_device(|device| device.set_viewport(viewport))
            .ok_or_else(|| DevshareError::unavailable("device busy or released during paint"))?;
        Ok((registry, viewport))
    }

    fn handle_device_reset(&self, registry: &DeviceRegistry) -> DevshareResult<()> {
        let requested = self.opts.size;
        let status = registry
            .with_device(|device| {
                DeviceStatus::classify(device.status(), device.backbuffer_size(), requested)
            })
            .ok_or_else(|| DevshareError::unavailable("device busy or released during paint"))?;

        match status {
            DeviceStatus::Ok => Ok(()),
            DeviceStatus::Lost => Err(DevshareError::DeviceLost),
            DeviceStatus::NeedsReset => registry.reset_device(requested),
        }
    }

    fn draw(&mut self, registry: &DeviceRegistry, viewport: Viewport) {
        let surface_size = self.opts.size;
        let hooks = &mut self.hooks;
        registry.with_device(|device| {
            let mut ctx = DrawContext {
                device,
                viewport,
                surface_size,
            };
            hooks.draw(&mut ctx);
        });
    }

    fn end_draw(&self, registry: &DeviceRegistry) -> PresentOutcome {
        let source = self.opts.size.to_rect();
        let target = self.opts.target;
        let result = registry
            .with_device(|device| device.present(source, target))
            .unwrap_or_else(|| Err(anyhow::anyhow!("device released during present")))
            .map_err(DevshareError::PresentFailed);

        match result {
            Ok(()) => PresentOutcome::Submitted,
            Err(e) => {
                // The next begin_draw sees whatever broke the device.
                tracing::debug!(label = %self.opts.label, error = %e, "present failure suppressed");
                PresentOutcome::Deferred
            }
        }
    }

    /// Status of the shared device from this surface's point of view.
    pub fn device_status(&self) -> Option<DeviceStatus> {
        let lease = self.lease.as_ref()?;
        let requested = self.opts.size;
        lease.registry().with_device(|device| {
            DeviceStatus::classify(device.status(), device.backbuffer_size(), requested)
        })
    }

    /// Run `f` against the shared device outside the paint cycle.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut dyn RenderDevice) -> R) -> Option<R> {
        self.lease.as_ref()?.registry().with_device(f)
    }

    /// Registry this surface is attached to.
    pub fn registry(&self) -> Option<&DeviceRegistry> {
        self.lease.as_ref().map(DeviceLease::registry)
    }

    /// Registry owner identity while attached.
    pub fn owner(&self) -> Option<OwnerId> {
        self.lease.as_ref().map(DeviceLease::owner)
    }

    /// Return `true` while attached.
    pub fn is_attached(&self) -> bool {
        self.lease.is_some()
    }

    /// Return `true` once [`SurfaceHooks::initialize`] has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Current client size.
    pub fn size(&self) -> Size {
        self.opts.size
    }

    /// Surface description.
    pub fn opts(&self) -> &SurfaceOpts {
        &self.opts
    }

    /// The drawing hooks.
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// The drawing hooks, mutably.
    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }
}

fn fallback_message(reason: &DevshareError) -> String {
    match reason {
        DevshareError::DeviceUnavailable(msg) => msg.clone(),
        DevshareError::DeviceLost => "Graphics device lost".to_string(),
        DevshareError::DeviceResetFailed(cause) => {
            format!("Graphics device reset failed\n\n{cause:#}")
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/surface/paint.rs"]
mod tests;
