//! Camera capture session control.
//!
//! The [`CaptureController`] is the only mutator of [`CaptureSessionState`].
//! Every external trigger (open, close, switch, still capture, zoom) and
//! every device callback is a [`Message`] processed in order on one
//! executor thread, so the state machine needs no locking.
//!
//! Camera hardware sits behind [`CameraBackend`]. `stub://` devices select a
//! synthetic camera; `/dev/videoN` devices need the `ingest-v4l2` feature.

mod backend;
pub mod backends;
mod controller;
mod normalize;
mod photo;
mod request;
mod select;
mod zoom;

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};

pub use backend::{
    CameraBackend, CameraCharacteristics, DeviceEvent, DeviceEvents, FrameSink, ManualSensor,
};
pub use backends::{open_backend, StubCamera, StubScript};
#[cfg(feature = "ingest-v4l2")]
pub use backends::V4l2Camera;
pub use controller::{
    CaptureController, CaptureHandle, ControllerConfig, Message, Request, SessionListener,
    ZoomHold, ZOOM_HOLD_INTERVAL, ZOOM_STEP,
};
pub use photo::{PhotoStore, DEFAULT_PHOTO_PREFIX};
pub use request::{
    preview_request, still_request, AeMode, CaptureRequest, ControlMode, RequestTemplate,
    STILL_EXPOSURE_NS, STILL_MIN_ISO, TARGET_FPS,
};
pub use select::{choose_optimal_size, select_camera, TARGET_SIZE};
pub use zoom::{ZoomState, DEFAULT_MAX_ZOOM};

/// Lifecycle of the capture session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureSessionState {
    Closed,
    Opening,
    PreviewActive,
    StillCapturing,
}

impl fmt::Display for CaptureSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::PreviewActive => "preview-active",
            Self::StillCapturing => "still-capturing",
        };
        f.write_str(name)
    }
}

/// Lens facing of a camera device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Facing {
    #[default]
    Back,
    Front,
}

impl Facing {
    pub fn toggled(self) -> Self {
        match self {
            Self::Back => Self::Front,
            Self::Front => Self::Back,
        }
    }
}

impl FromStr for Facing {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "back" | "rear" => Ok(Self::Back),
            "front" | "user" => Ok(Self::Front),
            other => Err(anyhow!("unknown camera facing '{}'", other)),
        }
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Back => "back",
            Self::Front => "front",
        })
    }
}

/// Output size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned rectangle in sensor pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Rectangle anchored at the origin covering `size`.
    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn right(&self) -> u32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.top + self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}
