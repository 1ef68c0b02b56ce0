use anyhow::Result;

use super::CameraBackend;

pub mod stub;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use stub::{StubCamera, StubScript};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Camera;

/// Pick a camera backend for `device`.
///
/// `stub://...` selects the synthetic camera; anything else is a V4L2 device
/// path and needs the `ingest-v4l2` feature.
pub fn open_backend(device: &str) -> Result<Box<dyn CameraBackend>> {
    if device.starts_with("stub://") {
        return Ok(Box::new(StubCamera::new(device)));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Camera::new(device)))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(anyhow::anyhow!(
            "camera device {} requires the ingest-v4l2 feature",
            device
        ))
    }
}
