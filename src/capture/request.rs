//! Capture request templates for the repeating preview and one-shot stills.

use super::{CameraCharacteristics, Rect, ZoomState};

/// Fixed AE target frame rate (min = max) for preview and stills.
pub const TARGET_FPS: u32 = 15;
/// Still exposure when manual sensor control is available: one frame at 15 Hz.
pub const STILL_EXPOSURE_NS: u64 = 1_000_000_000 / TARGET_FPS as u64;
/// Lower bound on still ISO under manual sensor control.
pub const STILL_MIN_ISO: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
    StillCapture,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlMode {
    Auto,
    Off,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AeMode {
    On,
    Off,
}

/// Backend-neutral capture request. `None` leaves a control at the device
/// default.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    pub crop_region: Option<Rect>,
    pub ae_target_fps: (u32, u32),
    pub awb_auto: bool,
    pub high_quality_color: bool,
    pub control_mode: Option<ControlMode>,
    pub ae_mode: Option<AeMode>,
    pub exposure_time_ns: Option<u64>,
    pub sensitivity_iso: Option<u32>,
}

impl CaptureRequest {
    fn base(template: RequestTemplate) -> Self {
        Self {
            template,
            crop_region: None,
            ae_target_fps: (TARGET_FPS, TARGET_FPS),
            awb_auto: true,
            high_quality_color: true,
            control_mode: None,
            ae_mode: None,
            exposure_time_ns: None,
            sensitivity_iso: None,
        }
    }

    fn auto_exposure(mut self) -> Self {
        self.control_mode = Some(ControlMode::Auto);
        self.ae_mode = Some(AeMode::On);
        self
    }
}

/// Repeating preview request: zoom crop always applied, 15 fps AE target,
/// auto white balance. Devices without manual sensor control get auto AE.
pub fn preview_request(camera: &CameraCharacteristics, zoom: &ZoomState) -> CaptureRequest {
    let mut request = CaptureRequest::base(RequestTemplate::Preview);
    request.crop_region = Some(zoom.crop_region(camera.active_array));
    if camera.manual_sensor.is_none() {
        request = request.auto_exposure();
    }
    request
}

/// One-shot still request. Crop only when zoomed in; manual exposure of
/// 1/15 s (clamped to the sensor range) and ISO >= 100 when supported.
pub fn still_request(camera: &CameraCharacteristics, zoom: &ZoomState) -> CaptureRequest {
    let mut request = CaptureRequest::base(RequestTemplate::StillCapture);
    if zoom.is_zoomed() {
        request.crop_region = Some(zoom.crop_region(camera.active_array));
    }
    match &camera.manual_sensor {
        Some(manual) => {
            let (min_ns, max_ns) = manual.exposure_ns;
            request.control_mode = Some(ControlMode::Off);
            request.ae_mode = Some(AeMode::Off);
            request.exposure_time_ns = Some(STILL_EXPOSURE_NS.clamp(min_ns, max_ns.max(min_ns)));
            request.sensitivity_iso = Some(manual.iso.0.max(STILL_MIN_ISO));
            request
        }
        None => request.auto_exposure(),
    }
}
