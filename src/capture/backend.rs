use std::sync::mpsc::Sender;
use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;

use super::controller::Message;
use super::{CaptureRequest, Facing, Rect, Size};

/// Receives preview frames on the backend's own thread. Must not block.
pub type FrameSink = Arc<dyn Fn(RgbImage) + Send + Sync + 'static>;

/// Manual sensor control ranges, present only on devices that support it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManualSensor {
    /// Inclusive exposure time range in nanoseconds.
    pub exposure_ns: (u64, u64),
    /// Inclusive ISO sensitivity range.
    pub iso: (u32, u32),
}

/// Static description of one camera device.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraCharacteristics {
    pub id: String,
    pub facing: Facing,
    /// Sensor active array; zoom crops are computed against it.
    pub active_array: Rect,
    pub preview_sizes: Vec<Size>,
    pub still_sizes: Vec<Size>,
    pub manual_sensor: Option<ManualSensor>,
}

/// Asynchronous device callbacks delivered to the controller's executor.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceEvent {
    Opened,
    Disconnected,
    Error(String),
    /// Encoded JPEG of a completed still capture.
    CaptureCompleted(Vec<u8>),
    CaptureFailed(String),
}

/// Event channel handed to a backend on `open`.
///
/// Each open gets a fresh generation; events from an older device are
/// dropped by the controller.
#[derive(Clone, Debug)]
pub struct DeviceEvents {
    generation: u64,
    tx: Sender<Message>,
}

impl DeviceEvents {
    pub(crate) fn new(generation: u64, tx: Sender<Message>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Post `event`. Returns `false` once the controller is gone.
    pub fn send(&self, event: DeviceEvent) -> bool {
        self.tx
            .send(Message::Device {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Camera device access.
///
/// All calls come from the controller's executor thread. `open` and
/// `capture` complete asynchronously through [`DeviceEvents`]; the other
/// calls complete before returning.
pub trait CameraBackend: Send {
    fn name(&self) -> &'static str;

    /// Enumerate device ids in a stable order.
    fn camera_ids(&self) -> Result<Vec<String>>;

    fn characteristics(&self, id: &str) -> Result<CameraCharacteristics>;

    /// Start opening `id`. Success is reported as [`DeviceEvent::Opened`].
    fn open(&mut self, id: &str, events: DeviceEvents, frames: FrameSink) -> Result<()>;

    /// Build the capture session with a preview output and a still output.
    fn create_session(&mut self, preview: Size, still: Size) -> Result<()>;

    /// Replace the repeating preview request.
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<()>;

    fn stop_repeating(&mut self) -> Result<()>;

    /// Submit a one-shot still capture. The outcome is reported as
    /// [`DeviceEvent::CaptureCompleted`] or [`DeviceEvent::CaptureFailed`].
    fn capture(&mut self, request: &CaptureRequest) -> Result<()>;

    /// Release the session and device. Safe to call when nothing is open.
    fn close(&mut self);
}
