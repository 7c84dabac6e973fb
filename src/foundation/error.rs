/// Convenience result type used across devshare.
pub type DevshareResult<T> = Result<T, DevshareError>;

/// Top-level error taxonomy used by registry and surface APIs.
///
/// Only [`DevshareError::DeviceCreateFailed`] is meant to reach a host as a hard failure. The
/// paint cycle turns every other device condition into a fallback frame.
#[derive(thiserror::Error, Debug)]
pub enum DevshareError {
    /// No device has been attached yet (the surface runs outside a live rendering context).
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device reported itself lost and cannot be used until it recovers.
    #[error("graphics device lost")]
    DeviceLost,

    /// The device could not be constructed at all.
    #[error("device creation failed: {0}")]
    DeviceCreateFailed(anyhow::Error),

    /// Growing or recreating the backbuffer failed.
    #[error("graphics device reset failed: {0}")]
    DeviceResetFailed(anyhow::Error),

    /// Presenting a rendered region failed. Suppressed by the paint cycle.
    #[error("present failed: {0}")]
    PresentFailed(anyhow::Error),

    /// Invalid caller-provided data.
    #[error("validation error: {0}")]
    Validation(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DevshareError {
    /// Build a [`DevshareError::DeviceUnavailable`] value.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::DeviceUnavailable(msg.into())
    }

    /// Build a [`DevshareError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Return `true` for conditions the next paint cycle may resolve on its own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable(_)
                | Self::DeviceLost
                | Self::DeviceResetFailed(_)
                | Self::PresentFailed(_)
        )
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
