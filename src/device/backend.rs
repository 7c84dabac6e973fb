use crate::foundation::core::{GraphicsProfile, PresentTarget, Rect, Size, Viewport};

/// Status reported by the rendering API for a live device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawDeviceStatus {
    /// Usable.
    Ok,
    /// Unusable until the rendering API recovers it.
    Lost,
    /// Not lost, but must be reset before the next frame.
    NotReset,
}

/// One physical rendering device as seen by the registry and by surfaces.
///
/// Implementations wrap the concrete rendering API. Only [`crate::DeviceRegistry`] calls
/// [`RenderDevice::reset`] and [`RenderDevice::dispose`]; surfaces only read status, scope the
/// viewport to their own draw and present.
pub trait RenderDevice {
    /// Current status.
    fn status(&self) -> RawDeviceStatus;

    /// Current backbuffer extent.
    fn backbuffer_size(&self) -> Size;

    /// Capability profile the device was created with.
    fn profile(&self) -> GraphicsProfile;

    /// Recreate the backbuffer with the given extent.
    fn reset(&mut self, size: Size) -> anyhow::Result<()>;

    /// Active drawing region.
    fn viewport(&self) -> Viewport;

    /// Restrict subsequent drawing to `viewport`.
    fn set_viewport(&mut self, viewport: Viewport);

    /// Submit the `source` region of the backbuffer to a host display target.
    fn present(&mut self, source: Rect, target: PresentTarget) -> anyhow::Result<()>;

    /// Best-effort release of API resources. Called once on graceful teardown.
    fn dispose(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Downcasting hook for draw code that knows the concrete device type.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Creates physical devices on behalf of the registry.
pub trait DeviceFactory {
    /// Create a device whose backbuffer is at least `size`.
    fn create(
        &mut self,
        size: Size,
        profile: GraphicsProfile,
    ) -> anyhow::Result<Box<dyn RenderDevice>>;
}

impl<F> DeviceFactory for F
where
    F: FnMut(Size, GraphicsProfile) -> anyhow::Result<Box<dyn RenderDevice>>,
{
    fn create(
        &mut self,
        size: Size,
        profile: GraphicsProfile,
    ) -> anyhow::Result<Box<dyn RenderDevice>> {
        self(size, profile)
    }
}
