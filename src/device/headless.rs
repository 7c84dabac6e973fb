//! Software device backed by a `vello_cpu` pixmap.
//!
//! The headless device stands in for a real rendering API when there is no GPU or window system:
//! in the `devshare` binary, in CI and in tests. A shared [`HeadlessProbe`] scripts its status and
//! failure modes and records what the registry and surfaces did to it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::device::backend::{DeviceFactory, RawDeviceStatus, RenderDevice};
use crate::foundation::core::{
    FrameRGBA, GraphicsProfile, PresentTarget, Rect, Rgba8, Size, Viewport,
};

/// Options for [`HeadlessDevice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct HeadlessDeviceOpts {
    /// Color a freshly (re)created backbuffer is filled with.
    pub clear: Rgba8,
}

impl Default for HeadlessDeviceOpts {
    fn default() -> Self {
        Self {
            clear: Rgba8 {
                r: 0,
                g: 0,
                b: 0,
                a: 0,
            },
        }
    }
}

#[derive(Debug)]
struct ProbeState {
    status: RawDeviceStatus,
    fail_next_create: Option<String>,
    fail_resets: Option<String>,
    fail_presents: Option<String>,
    created: u32,
    disposed: u32,
    dropped: u32,
    resets: Vec<Size>,
    viewports: Vec<Viewport>,
    presents: Vec<(PresentTarget, Rect)>,
    frames: HashMap<PresentTarget, FrameRGBA>,
}

impl Default for ProbeState {
    fn default() -> Self {
        Self {
            status: RawDeviceStatus::Ok,
            fail_next_create: None,
            fail_resets: None,
            fail_presents: None,
            created: 0,
            disposed: 0,
            dropped: 0,
            resets: Vec::new(),
            viewports: Vec::new(),
            presents: Vec::new(),
            frames: HashMap::new(),
        }
    }
}

/// Shared control and observation handle for headless devices.
///
/// Cloning the probe shares state; one probe usually serves every device a factory creates.
#[derive(Clone, Debug, Default)]
pub struct HeadlessProbe {
    inner: Rc<RefCell<ProbeState>>,
}

impl HeadlessProbe {
    /// Create a probe reporting [`RawDeviceStatus::Ok`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Status every device reports from now on.
    pub fn set_status(&self, status: RawDeviceStatus) {
        self.inner.borrow_mut().status = status;
    }

    /// Make the next device creation fail with `msg`.
    pub fn fail_next_create(&self, msg: impl Into<String>) {
        self.inner.borrow_mut().fail_next_create = Some(msg.into());
    }

    /// Make resets fail with `msg` until cleared with `None`.
    pub fn fail_resets(&self, msg: Option<String>) {
        self.inner.borrow_mut().fail_resets = msg;
    }

    /// Make presents fail with `msg` until cleared with `None`.
    pub fn fail_presents(&self, msg: Option<String>) {
        self.inner.borrow_mut().fail_presents = msg;
    }

    /// Devices created so far.
    pub fn created_count(&self) -> u32 {
        self.inner.borrow().created
    }

    /// Graceful disposals so far.
    pub fn disposed_count(&self) -> u32 {
        self.inner.borrow().disposed
    }

    /// Devices dropped so far, graceful or not.
    pub fn dropped_count(&self) -> u32 {
        self.inner.borrow().dropped
    }

    /// Sizes passed to every reset call, in order.
    pub fn reset_sizes(&self) -> Vec<Size> {
        self.inner.borrow().resets.clone()
    }

    /// Every viewport set on any device, in order.
    pub fn viewport_history(&self) -> Vec<Viewport> {
        self.inner.borrow().viewports.clone()
    }

    /// Successful present calls, in order.
    pub fn presents(&self) -> Vec<(PresentTarget, Rect)> {
        self.inner.borrow().presents.clone()
    }

    /// Last region presented to `target`.
    pub fn last_frame(&self, target: PresentTarget) -> Option<FrameRGBA> {
        self.inner.borrow().frames.get(&target).cloned()
    }
}

/// Creates [`HeadlessDevice`]s sharing one probe.
#[derive(Clone, Debug, Default)]
pub struct HeadlessDeviceFactory {
    opts: HeadlessDeviceOpts,
    probe: HeadlessProbe,
}

impl HeadlessDeviceFactory {
    /// Factory reporting into `probe`.
    pub fn new(opts: HeadlessDeviceOpts, probe: HeadlessProbe) -> Self {
        Self { opts, probe }
    }

    /// Probe shared by every device this factory creates.
    pub fn probe(&self) -> &HeadlessProbe {
        &self.probe
    }
}

impl DeviceFactory for HeadlessDeviceFactory {
    fn create(
        &mut self,
        size: Size,
        profile: GraphicsProfile,
    ) -> anyhow::Result<Box<dyn RenderDevice>> {
        if let Some(msg) = self.probe.inner.borrow_mut().fail_next_create.take() {
            anyhow::bail!(msg);
        }
        let device = HeadlessDevice::new(size, profile, self.opts, self.probe.clone())?;
        self.probe.inner.borrow_mut().created += 1;
        Ok(Box::new(device))
    }
}

/// Software [`RenderDevice`] with a CPU backbuffer.
pub struct HeadlessDevice {
    opts: HeadlessDeviceOpts,
    probe: HeadlessProbe,
    profile: GraphicsProfile,
    size: Size,
    pixmap: vello_cpu::Pixmap,
    viewport: Viewport,
}

impl HeadlessDevice {
    fn new(
        size: Size,
        profile: GraphicsProfile,
        opts: HeadlessDeviceOpts,
        probe: HeadlessProbe,
    ) -> anyhow::Result<Self> {
        let pixmap = new_pixmap(size, opts.clear)?;
        Ok(Self {
            opts,
            probe,
            profile,
            size,
            pixmap,
            viewport: Viewport::top_left(size),
        })
    }

    /// Fill the active viewport with `color`.
    pub fn clear(&mut self, color: Rgba8) {
        let vp = self.viewport.size();
        self.fill_rect(vp.to_rect(), color);
    }

    /// Fill `rect`, given in viewport-local coordinates, clipped to the viewport.
    pub fn fill_rect(&mut self, rect: Rect, color: Rgba8) {
        let clip = self.viewport.rect().intersect(Rect::new(
            0.0,
            0.0,
            f64::from(self.size.width),
            f64::from(self.size.height),
        ));
        let r = rect
            .with_origin((
                rect.x0 + f64::from(self.viewport.x),
                rect.y0 + f64::from(self.viewport.y),
            ))
            .intersect(clip);
        if r.is_zero_area() {
            return;
        }

        let px = color.to_premul();
        let width = self.pixmap.width() as usize;
        let data = self.pixmap.data_as_u8_slice_mut();
        let (x0, y0, x1, y1) = (
            r.x0.round() as usize,
            r.y0.round() as usize,
            r.x1.round() as usize,
            r.y1.round() as usize,
        );
        for y in y0..y1 {
            let row = &mut data[(y * width + x0) * 4..(y * width + x1) * 4];
            for dst in row.chunks_exact_mut(4) {
                dst.copy_from_slice(&px);
            }
        }
    }

    /// Backbuffer pixel at absolute `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let i = ((y as usize) * (self.pixmap.width() as usize) + (x as usize)) * 4;
        let data = self.pixmap.data_as_u8_slice();
        data.get(i..i + 4).map(|p| [p[0], p[1], p[2], p[3]])
    }

    fn read_region(&self, source: Rect) -> FrameRGBA {
        let r = source.intersect(self.size.to_rect());
        let (x0, y0) = (r.x0.max(0.0) as usize, r.y0.max(0.0) as usize);
        let (w, h) = (r.width().max(0.0) as usize, r.height().max(0.0) as usize);
        let stride = self.pixmap.width() as usize * 4;
        let src = self.pixmap.data_as_u8_slice();

        let mut data = Vec::with_capacity(w * h * 4);
        for y in y0..y0 + h {
            let start = y * stride + x0 * 4;
            data.extend_from_slice(&src[start..start + w * 4]);
        }
        FrameRGBA {
            width: w as u32,
            height: h as u32,
            data,
            premultiplied: true,
        }
    }
}

impl RenderDevice for HeadlessDevice {
    fn status(&self) -> RawDeviceStatus {
        self.probe.inner.borrow().status
    }

    fn backbuffer_size(&self) -> Size {
        self.size
    }

    fn profile(&self) -> GraphicsProfile {
        self.profile
    }

    fn reset(&mut self, size: Size) -> anyhow::Result<()> {
        {
            let mut st = self.probe.inner.borrow_mut();
            st.resets.push(size);
            if let Some(msg) = &st.fail_resets {
                anyhow::bail!("{msg}");
            }
        }
        self.pixmap = new_pixmap(size, self.opts.clear)?;
        self.size = size;
        self.viewport = Viewport::top_left(size);
        let mut st = self.probe.inner.borrow_mut();
        if st.status == RawDeviceStatus::NotReset {
            st.status = RawDeviceStatus::Ok;
        }
        Ok(())
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.probe.inner.borrow_mut().viewports.push(viewport);
        self.viewport = viewport;
    }

    fn present(&mut self, source: Rect, target: PresentTarget) -> anyhow::Result<()> {
        {
            let st = self.probe.inner.borrow();
            if let Some(msg) = &st.fail_presents {
                anyhow::bail!("{msg}");
            }
            if st.status == RawDeviceStatus::Lost {
                anyhow::bail!("device lost during present");
            }
        }
        let frame = self.read_region(source);
        let mut st = self.probe.inner.borrow_mut();
        st.presents.push((target, source));
        st.frames.insert(target, frame);
        Ok(())
    }

    fn dispose(&mut self) -> anyhow::Result<()> {
        self.probe.inner.borrow_mut().disposed += 1;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl Drop for HeadlessDevice {
    fn drop(&mut self) {
        if let Ok(mut st) = self.probe.inner.try_borrow_mut() {
            st.dropped += 1;
        }
    }
}

fn new_pixmap(size: Size, clear: Rgba8) -> anyhow::Result<vello_cpu::Pixmap> {
    let w: u16 = size
        .width
        .try_into()
        .map_err(|_| anyhow::anyhow!("backbuffer width exceeds u16: {}", size.width))?;
    let h: u16 = size
        .height
        .try_into()
        .map_err(|_| anyhow::anyhow!("backbuffer height exceeds u16: {}", size.height))?;
    let mut pixmap = vello_cpu::Pixmap::new(w, h);
    let px = clear.to_premul();
    for dst in pixmap.data_as_u8_slice_mut().chunks_exact_mut(4) {
        dst.copy_from_slice(&px);
    }
    Ok(pixmap)
}

#[cfg(test)]
#[path = "../../tests/unit/device/headless.rs"]
mod tests;
