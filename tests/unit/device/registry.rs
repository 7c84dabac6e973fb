use super::*;
use crate::device::headless::{HeadlessDeviceFactory, HeadlessDeviceOpts, HeadlessProbe};

fn registry() -> (DeviceRegistry, HeadlessProbe) {
    let probe = HeadlessProbe::new();
    let reg = DeviceRegistry::new(HeadlessDeviceFactory::new(
        HeadlessDeviceOpts::default(),
        probe.clone(),
    ));
    (reg, probe)
}

#[test]
fn first_add_ref_creates_device_sized_for_owner() {
    let (reg, probe) = registry();
    assert!(!reg.has_device());

    let owner = reg.allocate_owner();
    let lease = reg
        .add_ref(owner, Size::new(64, 48), GraphicsProfile::Reach)
        .unwrap();

    assert_eq!(lease.owner(), owner);
    assert_eq!(reg.owner_count(), 1);
    assert_eq!(reg.backbuffer_size(), Some(Size::new(64, 48)));
    assert_eq!(reg.requested_size(owner), Some(Size::new(64, 48)));
    assert_eq!(probe.created_count(), 1);
}

#[test]
fn larger_owner_grows_backbuffer_to_componentwise_max() {
    let (reg, probe) = registry();
    let _a = reg
        .add_ref(reg.allocate_owner(), Size::new(300, 50), GraphicsProfile::Reach)
        .unwrap();
    let _b = reg
        .add_ref(reg.allocate_owner(), Size::new(100, 200), GraphicsProfile::Reach)
        .unwrap();

    assert_eq!(reg.backbuffer_size(), Some(Size::new(300, 200)));
    assert_eq!(probe.reset_sizes(), vec![Size::new(300, 200)]);
}

#[test]
fn smaller_owner_does_not_reset() {
    let (reg, probe) = registry();
    let _a = reg
        .add_ref(reg.allocate_owner(), Size::new(300, 300), GraphicsProfile::Reach)
        .unwrap();
    let _b = reg
        .add_ref(reg.allocate_owner(), Size::new(10, 10), GraphicsProfile::Reach)
        .unwrap();
    assert!(probe.reset_sizes().is_empty());
    assert_eq!(probe.created_count(), 1);
}

#[test]
fn duplicate_owner_is_rejected_without_side_effects() {
    let (reg, _) = registry();
    let owner = reg.allocate_owner();
    let _lease = reg
        .add_ref(owner, Size::new(8, 8), GraphicsProfile::Reach)
        .unwrap();
    let err = reg
        .add_ref(owner, Size::new(800, 800), GraphicsProfile::Reach)
        .unwrap_err();
    assert!(matches!(err, DevshareError::Validation(_)));
    assert_eq!(reg.owner_count(), 1);
    assert_eq!(reg.backbuffer_size(), Some(Size::new(8, 8)));
}

#[test]
fn creation_failure_leaves_no_partial_state() {
    let (reg, probe) = registry();
    probe.fail_next_create("no adapter");
    let owner = reg.allocate_owner();
    let err = reg
        .add_ref(owner, Size::new(8, 8), GraphicsProfile::Reach)
        .unwrap_err();

    assert!(matches!(err, DevshareError::DeviceCreateFailed(_)));
    assert_eq!(reg.owner_count(), 0);
    assert!(!reg.has_device());
    assert_eq!(reg.requested_size(owner), None);
}

#[test]
fn zero_sized_owner_still_gets_a_minimal_device() {
    let (reg, _) = registry();
    let _lease = reg
        .add_ref(reg.allocate_owner(), Size::new(0, 0), GraphicsProfile::Reach)
        .unwrap();
    assert_eq!(reg.backbuffer_size(), Some(Size::new(1, 1)));
}

#[test]
fn device_is_disposed_exactly_on_last_release() {
    let (reg, probe) = registry();
    let a = reg
        .add_ref(reg.allocate_owner(), Size::new(10, 10), GraphicsProfile::Reach)
        .unwrap();
    let b = reg
        .add_ref(reg.allocate_owner(), Size::new(20, 20), GraphicsProfile::Reach)
        .unwrap();

    a.release();
    assert_eq!(reg.owner_count(), 1);
    assert!(reg.has_device());
    assert_eq!(probe.disposed_count(), 0);

    b.release();
    assert_eq!(reg.owner_count(), 0);
    assert!(!reg.has_device());
    assert_eq!(probe.disposed_count(), 1);
    assert_eq!(probe.dropped_count(), 1);
}

#[test]
fn double_release_never_double_decrements() {
    let (reg, _) = registry();
    let a_owner = reg.allocate_owner();
    let _a = reg
        .add_ref(a_owner, Size::new(10, 10), GraphicsProfile::Reach)
        .unwrap();
    let _b = reg
        .add_ref(reg.allocate_owner(), Size::new(10, 10), GraphicsProfile::Reach)
        .unwrap();

    reg.release(a_owner, true);
    reg.release(a_owner, true);
    assert_eq!(reg.owner_count(), 1);
    assert!(reg.has_device());
}

#[test]
fn non_graceful_release_skips_dispose() {
    let (reg, probe) = registry();
    let owner = reg.allocate_owner();
    let lease = reg
        .add_ref(owner, Size::new(10, 10), GraphicsProfile::Reach)
        .unwrap();
    std::mem::forget(lease);

    reg.release(owner, false);
    assert!(!reg.has_device());
    assert_eq!(probe.disposed_count(), 0);
    assert_eq!(probe.dropped_count(), 1);
}

#[test]
fn reset_device_folds_in_other_owners_and_never_shrinks() {
    let (reg, probe) = registry();
    let _a = reg
        .add_ref(reg.allocate_owner(), Size::new(50, 400), GraphicsProfile::Reach)
        .unwrap();

    reg.reset_device(Size::new(120, 10)).unwrap();
    assert_eq!(probe.reset_sizes(), vec![Size::new(120, 400)]);
    assert_eq!(reg.backbuffer_size(), Some(Size::new(120, 400)));
}

#[test]
fn reset_failure_is_reported_with_cause() {
    let (reg, probe) = registry();
    let _a = reg
        .add_ref(reg.allocate_owner(), Size::new(10, 10), GraphicsProfile::Reach)
        .unwrap();
    probe.fail_resets(Some("exhausted".to_string()));

    let err = reg.reset_device(Size::new(20, 20)).unwrap_err();
    assert!(matches!(err, DevshareError::DeviceResetFailed(_)));
    assert!(err.to_string().contains("exhausted"));
    assert_eq!(reg.backbuffer_size(), Some(Size::new(10, 10)));
}

#[test]
fn reset_without_device_is_unavailable() {
    let (reg, _) = registry();
    let err = reg.reset_device(Size::new(4, 4)).unwrap_err();
    assert!(matches!(err, DevshareError::DeviceUnavailable(_)));
}

#[test]
fn growth_failure_during_add_ref_does_not_register_owner() {
    let (reg, probe) = registry();
    let _a = reg
        .add_ref(reg.allocate_owner(), Size::new(10, 10), GraphicsProfile::Reach)
        .unwrap();
    probe.fail_resets(Some("exhausted".to_string()));

    let owner = reg.allocate_owner();
    assert!(
        reg.add_ref(owner, Size::new(90, 90), GraphicsProfile::Reach)
            .is_err()
    );
    assert_eq!(reg.owner_count(), 1);
    assert_eq!(reg.requested_size(owner), None);
}

#[test]
fn events_follow_device_lifecycle() {
    let (reg, _) = registry();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    reg.subscribe(move |e| sink.borrow_mut().push(*e));

    let a = reg
        .add_ref(reg.allocate_owner(), Size::new(10, 10), GraphicsProfile::HiDef)
        .unwrap();
    reg.reset_device(Size::new(20, 10)).unwrap();
    a.release();

    assert_eq!(
        *seen.borrow(),
        vec![
            DeviceEvent::Created {
                size: Size::new(10, 10),
                profile: GraphicsProfile::HiDef,
            },
            DeviceEvent::Resetting {
                from: Size::new(10, 10),
                to: Size::new(20, 10),
            },
            DeviceEvent::Reset {
                size: Size::new(20, 10),
            },
            DeviceEvent::Disposing,
        ]
    );
}

#[test]
fn update_request_requires_registration() {
    let (reg, _) = registry();
    let owner = reg.allocate_owner();
    assert!(reg.update_request(owner, Size::new(1, 1)).is_err());

    let _lease = reg
        .add_ref(owner, Size::new(5, 5), GraphicsProfile::Reach)
        .unwrap();
    reg.update_request(owner, Size::new(40, 2)).unwrap();
    assert_eq!(reg.min_backbuffer_size(), Size::new(40, 2));
    assert_eq!(reg.backbuffer_size(), Some(Size::new(5, 5)));
}

#[test]
fn registry_stays_usable_while_device_is_lent() {
    let (reg, probe) = registry();
    let lease = reg
        .add_ref(reg.allocate_owner(), Size::new(10, 10), GraphicsProfile::Reach)
        .unwrap();

    let out = reg.with_device(|device| {
        assert!(reg.has_device());
        assert_eq!(reg.owner_count(), 1);
        assert_eq!(reg.backbuffer_size(), Some(Size::new(10, 10)));
        assert!(reg.with_device(|_| ()).is_none());
        assert!(matches!(
            reg.reset_device(Size::new(20, 20)).unwrap_err(),
            DevshareError::DeviceUnavailable(_)
        ));
        lease.release();
        assert_eq!(reg.owner_count(), 0);
        device.backbuffer_size()
    });

    assert_eq!(out, Some(Size::new(10, 10)));
    assert!(!reg.has_device());
    assert_eq!(probe.disposed_count(), 1);
    assert_eq!(probe.dropped_count(), 1);
}

#[test]
fn owner_attached_during_loan_grows_on_next_reset() {
    let (reg, probe) = registry();
    let _a = reg
        .add_ref(reg.allocate_owner(), Size::new(10, 10), GraphicsProfile::Reach)
        .unwrap();

    let _b = reg
        .with_device(|_| {
            reg.add_ref(reg.allocate_owner(), Size::new(50, 40), GraphicsProfile::Reach)
        })
        .unwrap()
        .unwrap();
    assert_eq!(reg.owner_count(), 2);
    assert_eq!(reg.backbuffer_size(), Some(Size::new(10, 10)));
    assert!(probe.reset_sizes().is_empty());

    reg.reset_device(Size::new(1, 1)).unwrap();
    assert_eq!(reg.backbuffer_size(), Some(Size::new(50, 40)));
}

#[test]
fn lease_dropped_from_listener_is_released_once_registry_is_free() {
    let (reg, probe) = registry();
    let slot: Rc<RefCell<Option<DeviceLease>>> = Rc::new(RefCell::new(None));
    *slot.borrow_mut() = Some(
        reg.add_ref(reg.allocate_owner(), Size::new(10, 10), GraphicsProfile::Reach)
            .unwrap(),
    );
    let held = slot.clone();
    reg.subscribe(move |e| {
        if matches!(e, DeviceEvent::Resetting { .. }) {
            drop(held.borrow_mut().take());
        }
    });

    let b = reg
        .add_ref(reg.allocate_owner(), Size::new(40, 40), GraphicsProfile::Reach)
        .unwrap();
    assert!(slot.borrow().is_none());
    assert_eq!(reg.owner_count(), 1);

    b.release();
    assert_eq!(reg.owner_count(), 0);
    assert!(!reg.has_device());
    assert_eq!(probe.disposed_count(), 1);
}
