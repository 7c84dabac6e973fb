use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use crate::device::backend::{DeviceFactory, RawDeviceStatus, RenderDevice};
use crate::foundation::core::{GraphicsProfile, OwnerId, Size};
use crate::foundation::error::{DevshareError, DevshareResult};

/// Smallest backbuffer a device is ever created with.
const MIN_DEVICE_SIZE: Size = Size::new(1, 1);

/// Lifecycle notification broadcast by a [`DeviceRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A fresh device instance was created.
    Created {
        /// Backbuffer extent of the new device.
        size: Size,
        /// Capability profile of the new device.
        profile: GraphicsProfile,
    },
    /// The backbuffer is about to be recreated.
    Resetting {
        /// Extent before the reset.
        from: Size,
        /// Requested extent.
        to: Size,
    },
    /// The backbuffer was recreated.
    Reset {
        /// Extent after the reset.
        size: Size,
    },
    /// The device is about to be disposed after its last owner left.
    Disposing,
}

type Listener = Box<dyn FnMut(&DeviceEvent)>;

/// Device handed out by [`DeviceRegistry::with_device`] for the duration of one call.
#[derive(Clone, Copy, Debug)]
struct Lent {
    size: Size,
    // Set when the last owner left during the loan.
    dispose_graceful: Option<bool>,
}

struct RegistryState {
    factory: Box<dyn DeviceFactory>,
    device: Option<Box<dyn RenderDevice>>,
    lent: Option<Lent>,
    // ownerCount is `requested.len()`.
    requested: BTreeMap<OwnerId, Size>,
    next_owner: u64,
    generation: u64,
    listeners: Vec<Listener>,
}

struct Shared {
    state: RefCell<RegistryState>,
    // Releases that arrived while `state` was borrowed.
    deferred: RefCell<VecDeque<(OwnerId, bool)>>,
}

fn emit(listeners: &mut [Listener], event: DeviceEvent) {
    for l in listeners.iter_mut() {
        l(&event);
    }
}

impl RegistryState {
    /// Componentwise max over every active owner's last request.
    fn min_backbuffer(&self) -> Size {
        self.requested
            .values()
            .fold(Size::default(), |acc, s| acc.max(*s))
    }

    fn reset_to(&mut self, target: Size) -> DevshareResult<()> {
        let Some(device) = self.device.as_mut() else {
            return Err(DevshareError::unavailable(if self.lent.is_some() {
                "device is in use by another caller"
            } else {
                "no device to reset"
            }));
        };
        let from = device.backbuffer_size();
        emit(&mut self.listeners, DeviceEvent::Resetting { from, to: target });

        if let Err(e) = device.reset(target) {
            tracing::error!(%from, %target, error = %e, "device reset failed");
            return Err(DevshareError::DeviceResetFailed(e));
        }

        let size = device.backbuffer_size();
        tracing::info!(%from, %size, "device backbuffer reset");
        emit(&mut self.listeners, DeviceEvent::Reset { size });
        Ok(())
    }

    fn dispose(&mut self, mut device: Box<dyn RenderDevice>, graceful: bool) {
        if graceful {
            emit(&mut self.listeners, DeviceEvent::Disposing);
            if let Err(e) = device.dispose() {
                tracing::warn!(error = %e, "device dispose failed");
            }
        }
        drop(device);
        tracing::info!(generation = self.generation, graceful, "device disposed");
    }

    fn release(&mut self, owner: OwnerId, graceful: bool) {
        if self.requested.remove(&owner).is_none() {
            tracing::warn!(%owner, "release for unknown owner ignored");
            return;
        }
        tracing::debug!(owners = self.requested.len(), "owner detached");

        if !self.requested.is_empty() {
            return;
        }
        if let Some(lent) = self.lent.as_mut() {
            lent.dispose_graceful = Some(graceful);
            tracing::debug!("last owner left while the device is lent; disposal on return");
            return;
        }
        if let Some(device) = self.device.take() {
            self.dispose(device, graceful);
        }
    }
}

/// Owner of the one physical rendering device shared by every surface.
///
/// The registry is a cheap handle; clones refer to the same device and owner table. It is `!Send`
/// and lives on the host's UI thread. Owner bookkeeping and device growth go through one
/// `RefCell`, which is never held while caller code runs with the device: see
/// [`DeviceRegistry::with_device`].
///
/// Invariants:
/// - a device exists iff at least one owner is registered;
/// - the backbuffer is never smaller than any active owner's last requested size, except for
///   growth deferred while the device is lent;
/// - the backbuffer never shrinks while the device lives.
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Rc<Shared>,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("DeviceRegistry");
        if let Ok(st) = self.inner.state.try_borrow() {
            d.field("owners", &st.requested.len())
                .field("has_device", &(st.device.is_some() || st.lent.is_some()))
                .field("generation", &st.generation);
        }
        d.finish_non_exhaustive()
    }
}

impl DeviceRegistry {
    /// Create an empty registry. No device exists until the first [`DeviceRegistry::add_ref`].
    pub fn new(factory: impl DeviceFactory + 'static) -> Self {
        Self {
            inner: Rc::new(Shared {
                state: RefCell::new(RegistryState {
                    factory: Box::new(factory),
                    device: None,
                    lent: None,
                    requested: BTreeMap::new(),
                    next_owner: 0,
                    generation: 0,
                    listeners: Vec::new(),
                }),
                deferred: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// Hand out a fresh owner identity.
    pub fn allocate_owner(&self) -> OwnerId {
        let mut st = self.inner.state.borrow_mut();
        st.next_owner += 1;
        OwnerId(st.next_owner)
    }

    /// Register `owner` with a requested backbuffer size.
    ///
    /// Creates the device if none exists, otherwise grows it when `size` does not fit. While the
    /// device is lent, growth is left to the owner's next status check. On any failure nothing is
    /// recorded: the owner count is unchanged and no lease is returned.
    #[tracing::instrument(skip(self))]
    pub fn add_ref(
        &self,
        owner: OwnerId,
        size: Size,
        profile: GraphicsProfile,
    ) -> DevshareResult<DeviceLease> {
        let result = self.add_ref_locked(owner, size, profile);
        self.drain_deferred();
        result.map(|()| DeviceLease {
            registry: self.clone(),
            owner,
            released: false,
        })
    }

    fn add_ref_locked(
        &self,
        owner: OwnerId,
        size: Size,
        profile: GraphicsProfile,
    ) -> DevshareResult<()> {
        let mut guard = self.inner.state.borrow_mut();
        let st = &mut *guard;

        if st.requested.contains_key(&owner) {
            return Err(DevshareError::validation(format!(
                "{owner} is already registered"
            )));
        }

        if let Some(lent) = st.lent {
            if !size.fits_within(lent.size) {
                tracing::debug!(%size, lent = %lent.size, "device lent; growth deferred");
            }
        } else if let Some(device) = st.device.as_ref() {
            let live_profile = device.profile();
            if profile > live_profile {
                tracing::warn!(
                    requested = ?profile,
                    live = ?live_profile,
                    "profile is fixed for the device lifetime; serving with the live device"
                );
            }
            let current = device.backbuffer_size();
            if !size.fits_within(current) {
                let target = st.min_backbuffer().max(size).max(current);
                st.reset_to(target)?;
            }
        } else {
            let create_size = size.max(MIN_DEVICE_SIZE);
            let device = st
                .factory
                .create(create_size, profile)
                .map_err(DevshareError::DeviceCreateFailed)?;
            let created = device.backbuffer_size();
            st.device = Some(device);
            st.generation += 1;
            tracing::info!(
                size = %created,
                ?profile,
                generation = st.generation,
                "device created"
            );
            emit(
                &mut st.listeners,
                DeviceEvent::Created {
                    size: created,
                    profile,
                },
            );
        }

        st.requested.insert(owner, size);
        tracing::debug!(owners = st.requested.len(), "owner attached");
        Ok(())
    }

    /// Unregister `owner`, disposing the device when it was the last one.
    ///
    /// A non-graceful release drops the device without calling [`RenderDevice::dispose`] or
    /// notifying listeners. Releasing an owner that is not registered is a no-op. A release that
    /// arrives while the registry is busy (from a listener, say) is queued and applied as soon as
    /// the registry is free again.
    #[tracing::instrument(skip(self))]
    pub fn release(&self, owner: OwnerId, graceful: bool) {
        let Ok(mut st) = self.inner.state.try_borrow_mut() else {
            tracing::debug!(%owner, "registry busy; release queued");
            self.inner.deferred.borrow_mut().push_back((owner, graceful));
            return;
        };
        st.release(owner, graceful);
        drop(st);
        self.drain_deferred();
    }

    fn drain_deferred(&self) {
        loop {
            if self.inner.state.try_borrow_mut().is_err() {
                return;
            }
            let next = self.inner.deferred.borrow_mut().pop_front();
            let Some((owner, graceful)) = next else {
                return;
            };
            self.release(owner, graceful);
        }
    }

    /// Grow or recreate the backbuffer to fit `size` and every active owner.
    ///
    /// The target is the componentwise max of `size`, every owner's last request and the current
    /// backbuffer, so the buffer never shrinks.
    #[tracing::instrument(skip(self))]
    pub fn reset_device(&self, size: Size) -> DevshareResult<()> {
        let result = {
            let mut guard = self.inner.state.borrow_mut();
            let st = &mut *guard;
            match st.device.as_ref().map(|d| d.backbuffer_size()) {
                Some(current) => {
                    let target = st.min_backbuffer().max(size).max(current);
                    st.reset_to(target)
                }
                None => st.reset_to(size),
            }
        };
        self.drain_deferred();
        result
    }

    /// Record a new requested size for an already registered owner.
    ///
    /// Growth is deferred to the owner's next status check.
    pub fn update_request(&self, owner: OwnerId, size: Size) -> DevshareResult<()> {
        let mut st = self.inner.state.borrow_mut();
        match st.requested.get_mut(&owner) {
            Some(slot) => {
                *slot = size;
                Ok(())
            }
            None => Err(DevshareError::validation(format!(
                "{owner} is not registered"
            ))),
        }
    }

    /// Subscribe to device lifecycle events.
    ///
    /// Listeners run while the registry is borrowed and must not query it. Dropping a
    /// [`DeviceLease`] from a listener is fine; the release is queued.
    pub fn subscribe(&self, listener: impl FnMut(&DeviceEvent) + 'static) {
        self.inner.state.borrow_mut().listeners.push(Box::new(listener));
    }

    /// Run `f` against the live device.
    ///
    /// The device is lent to `f`: the registry stays usable from inside `f`, so owners may be
    /// queried, attached or released meanwhile. Returns `None` when there is no device or it is
    /// already lent to an outer call.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut dyn RenderDevice) -> R) -> Option<R> {
        let mut loan = DeviceLoan::take(self)?;
        let out = f(loan.device.as_mut()?.as_mut());
        drop(loan);
        self.drain_deferred();
        Some(out)
    }

    fn restore(&self, device: Box<dyn RenderDevice>) {
        let Ok(mut guard) = self.inner.state.try_borrow_mut() else {
            tracing::error!("registry busy while the device was returned; device dropped");
            return;
        };
        let st = &mut *guard;
        let lent = st.lent.take();
        if st.requested.is_empty() {
            let graceful = lent.and_then(|l| l.dispose_graceful).unwrap_or(true)
                && !std::thread::panicking();
            st.dispose(device, graceful);
        } else {
            st.device = Some(device);
        }
    }

    /// Number of registered owners.
    pub fn owner_count(&self) -> usize {
        self.inner.state.borrow().requested.len()
    }

    /// Return `true` while a device instance is alive, lent or not.
    pub fn has_device(&self) -> bool {
        let st = self.inner.state.borrow();
        st.device.is_some() || st.lent.is_some()
    }

    /// Number of device instances created over the registry's lifetime.
    pub fn generation(&self) -> u64 {
        self.inner.state.borrow().generation
    }

    /// Backbuffer extent of the live device.
    pub fn backbuffer_size(&self) -> Option<Size> {
        let st = self.inner.state.borrow();
        match &st.device {
            Some(d) => Some(d.backbuffer_size()),
            None => st.lent.map(|l| l.size),
        }
    }

    /// Raw status of the live device, or `None` when there is none or it is lent.
    pub fn device_status(&self) -> Option<RawDeviceStatus> {
        self.inner.state.borrow().device.as_ref().map(|d| d.status())
    }

    /// Last size requested by `owner`.
    pub fn requested_size(&self, owner: OwnerId) -> Option<Size> {
        self.inner.state.borrow().requested.get(&owner).copied()
    }

    /// Componentwise max over every active owner's last request.
    pub fn min_backbuffer_size(&self) -> Size {
        self.inner.state.borrow().min_backbuffer()
    }
}

/// Device taken out of the registry state; returned on drop, unwinding included.
struct DeviceLoan<'a> {
    registry: &'a DeviceRegistry,
    device: Option<Box<dyn RenderDevice>>,
}

impl<'a> DeviceLoan<'a> {
    fn take(registry: &'a DeviceRegistry) -> Option<Self> {
        let mut st = registry.inner.state.try_borrow_mut().ok()?;
        let device = st.device.take()?;
        st.lent = Some(Lent {
            size: device.backbuffer_size(),
            dispose_graceful: None,
        });
        Some(Self {
            registry,
            device: Some(device),
        })
    }
}

impl Drop for DeviceLoan<'_> {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            self.registry.restore(device);
        }
    }
}

/// Scoped registration of one owner with a [`DeviceRegistry`].
///
/// Dropping the lease releases the owner. A drop during unwinding releases non-gracefully.
#[derive(Debug)]
pub struct DeviceLease {
    registry: DeviceRegistry,
    owner: OwnerId,
    released: bool,
}

impl DeviceLease {
    /// Owner identity this lease holds.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Registry the lease belongs to.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Release gracefully.
    pub fn release(mut self) {
        self.released = true;
        self.registry.release(self.owner, true);
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.registry
                .release(self.owner, !std::thread::panicking());
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/device/registry.rs"]
mod tests;
