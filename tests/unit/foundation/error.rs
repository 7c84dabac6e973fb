use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        DevshareError::unavailable("x")
            .to_string()
            .contains("device unavailable:")
    );
    assert!(DevshareError::DeviceLost.to_string().contains("lost"));
    assert!(
        DevshareError::validation("x")
            .to_string()
            .contains("validation error:")
    );
    assert!(
        DevshareError::DeviceResetFailed(anyhow::anyhow!("oom"))
            .to_string()
            .contains("graphics device reset failed: oom")
    );
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = DevshareError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}

#[test]
fn creation_failure_is_not_transient() {
    assert!(!DevshareError::DeviceCreateFailed(anyhow::anyhow!("no adapter")).is_transient());
    assert!(DevshareError::DeviceLost.is_transient());
    assert!(DevshareError::PresentFailed(anyhow::anyhow!("x")).is_transient());
}
