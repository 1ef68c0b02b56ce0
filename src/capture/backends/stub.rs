//! Synthetic camera for `stub://` devices.
//!
//! Two devices (back "0", front "1") look at a dark noisy scene with a bright
//! square drifting across it. Preview frames honor the zoom crop, still
//! captures are JPEG-encoded, and faults can be scripted through
//! [`StubScript`] for tests.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use rand::Rng;

use crate::capture::backend::{
    CameraBackend, CameraCharacteristics, DeviceEvent, DeviceEvents, FrameSink,
};
use crate::capture::request::{CaptureRequest, TARGET_FPS};
use crate::capture::{Facing, Rect, Size};

/// Synthetic sensor active array.
const ACTIVE_ARRAY: Rect = Rect::new(0, 0, 1280, 720);
/// Side of the bright square as a fraction of sensor height.
const SQUARE_FRACTION: f32 = 0.2;
const BACKGROUND: u8 = 40;
const NOISE: i16 = 8;

#[derive(Default)]
struct ScriptState {
    open_error: Option<String>,
    device_error: Option<String>,
    session_error: Option<String>,
    capture_error: Option<String>,
    events: Option<DeviceEvents>,
    repeating: Option<CaptureRequest>,
    session: Option<(Size, Size)>,
    frames_emitted: u64,
}

/// Shared fault script and observation point for a [`StubCamera`].
#[derive(Clone, Default)]
pub struct StubScript {
    inner: Arc<Mutex<ScriptState>>,
}

impl StubScript {
    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `open` calls fail synchronously.
    pub fn fail_open(&self, message: &str) {
        self.lock().open_error = Some(message.to_string());
    }

    /// Make the next opens report an asynchronous device error.
    pub fn error_on_open(&self, message: &str) {
        self.lock().device_error = Some(message.to_string());
    }

    pub fn fail_session(&self, message: &str) {
        self.lock().session_error = Some(message.to_string());
    }

    pub fn fail_capture(&self, message: &str) {
        self.lock().capture_error = Some(message.to_string());
    }

    /// Remove every scripted fault.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.open_error = None;
        state.device_error = None;
        state.session_error = None;
        state.capture_error = None;
    }

    /// Simulate the device being unplugged.
    pub fn disconnect(&self) -> bool {
        let events = self.lock().events.take();
        match events {
            Some(events) => events.send(DeviceEvent::Disconnected),
            None => false,
        }
    }

    pub fn repeating_active(&self) -> bool {
        self.lock().repeating.is_some()
    }

    pub fn last_repeating(&self) -> Option<CaptureRequest> {
        self.lock().repeating.clone()
    }

    pub fn frames_emitted(&self) -> u64 {
        self.lock().frames_emitted
    }
}

struct Sensor {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Synthetic [`CameraBackend`].
pub struct StubCamera {
    url: String,
    cameras: Vec<CameraCharacteristics>,
    script: StubScript,
    open_id: Option<String>,
    sensor: Option<Sensor>,
}

impl StubCamera {
    pub fn new(url: &str) -> Self {
        let camera = |id: &str, facing| CameraCharacteristics {
            id: id.to_string(),
            facing,
            active_array: ACTIVE_ARRAY,
            preview_sizes: vec![Size::new(640, 480), Size::new(1280, 720), Size::new(320, 240)],
            still_sizes: vec![Size::new(1280, 720), Size::new(640, 360)],
            manual_sensor: None,
        };
        Self {
            url: url.to_string(),
            cameras: vec![camera("0", Facing::Back), camera("1", Facing::Front)],
            script: StubScript::default(),
            open_id: None,
            sensor: None,
        }
    }

    /// Script handle shared with this camera.
    pub fn script(&self) -> StubScript {
        self.script.clone()
    }

    fn stop_sensor(&mut self) {
        if let Some(sensor) = self.sensor.take() {
            sensor.stop.store(true, Ordering::Release);
            if sensor.thread.join().is_err() {
                log::warn!("StubCamera: sensor thread panicked");
            }
        }
    }
}

impl CameraBackend for StubCamera {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn camera_ids(&self) -> Result<Vec<String>> {
        Ok(self.cameras.iter().map(|camera| camera.id.clone()).collect())
    }

    fn characteristics(&self, id: &str) -> Result<CameraCharacteristics> {
        self.cameras
            .iter()
            .find(|camera| camera.id == id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown stub camera '{}'", id))
    }

    fn open(&mut self, id: &str, events: DeviceEvents, frames: FrameSink) -> Result<()> {
        self.characteristics(id)?;
        let device_error = {
            let mut state = self.script.lock();
            if let Some(message) = state.open_error.clone() {
                return Err(anyhow!("{}", message));
            }
            state.events = Some(events.clone());
            state.device_error.clone()
        };
        if let Some(message) = device_error {
            events.send(DeviceEvent::Error(message));
            return Ok(());
        }

        self.stop_sensor();
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = stop.clone();
            let script = self.script.clone();
            std::thread::Builder::new()
                .name("stub-sensor".to_string())
                .spawn(move || run_sensor(script, frames, stop))
                .context("spawn stub sensor")?
        };
        self.sensor = Some(Sensor { stop, thread });
        self.open_id = Some(id.to_string());
        log::info!("StubCamera: opened {} camera {} (synthetic)", self.url, id);
        events.send(DeviceEvent::Opened);
        Ok(())
    }

    fn create_session(&mut self, preview: Size, still: Size) -> Result<()> {
        let mut state = self.script.lock();
        if let Some(message) = state.session_error.clone() {
            return Err(anyhow!("{}", message));
        }
        state.session = Some((preview, still));
        Ok(())
    }

    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<()> {
        let mut state = self.script.lock();
        if state.session.is_none() {
            return Err(anyhow!("no capture session"));
        }
        state.repeating = Some(request.clone());
        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<()> {
        self.script.lock().repeating = None;
        Ok(())
    }

    fn capture(&mut self, request: &CaptureRequest) -> Result<()> {
        let (events, still, capture_error) = {
            let state = self.script.lock();
            let (_, still) = state.session.context("no capture session")?;
            let events = state.events.clone().context("camera not open")?;
            (events, still, state.capture_error.clone())
        };
        if let Some(message) = capture_error {
            events.send(DeviceEvent::CaptureFailed(message));
            return Ok(());
        }

        let crop = request.crop_region.unwrap_or(ACTIVE_ARRAY);
        let frame = render_scene(still, crop, 0);
        let mut jpeg = Cursor::new(Vec::new());
        frame
            .write_to(&mut jpeg, ImageFormat::Jpeg)
            .context("encode still capture")?;
        events.send(DeviceEvent::CaptureCompleted(jpeg.into_inner()));
        Ok(())
    }

    fn close(&mut self) {
        self.stop_sensor();
        let mut state = self.script.lock();
        state.events = None;
        state.repeating = None;
        state.session = None;
        if let Some(id) = self.open_id.take() {
            log::info!("StubCamera: closed camera {}", id);
        }
    }
}

impl Drop for StubCamera {
    fn drop(&mut self) {
        self.stop_sensor();
    }
}

fn run_sensor(script: StubScript, frames: FrameSink, stop: Arc<AtomicBool>) {
    let interval = Duration::from_millis(1000 / TARGET_FPS as u64);
    let mut tick = 0u64;
    while !stop.load(Ordering::Acquire) {
        let next = {
            let state = script.lock();
            match (&state.repeating, state.session) {
                (Some(request), Some((preview, _))) => {
                    Some((preview, request.crop_region.unwrap_or(ACTIVE_ARRAY)))
                }
                _ => None,
            }
        };
        if let Some((preview, crop)) = next {
            frames(render_scene(preview, crop, tick));
            script.lock().frames_emitted += 1;
            tick += 1;
        }
        std::thread::sleep(interval);
    }
}

/// Center of the bright square in sensor coordinates at `tick`.
fn square_center(tick: u64) -> (f32, f32) {
    let phase = (tick % 240) as f32 / 240.0 * std::f32::consts::TAU;
    let w = ACTIVE_ARRAY.width as f32;
    let h = ACTIVE_ARRAY.height as f32;
    (w * (0.5 + 0.3 * phase.cos()), h * (0.5 + 0.25 * phase.sin()))
}

/// Render the sensor region `crop` at `size`.
fn render_scene(size: Size, crop: Rect, tick: u64) -> RgbImage {
    let mut rng = rand::thread_rng();
    let (cx, cy) = square_center(tick);
    let half = ACTIVE_ARRAY.height as f32 * SQUARE_FRACTION / 2.0;
    let sx = crop.width as f32 / size.width.max(1) as f32;
    let sy = crop.height as f32 / size.height.max(1) as f32;

    RgbImage::from_fn(size.width, size.height, |x, y| {
        let px = crop.left as f32 + (x as f32 + 0.5) * sx;
        let py = crop.top as f32 + (y as f32 + 0.5) * sy;
        if (px - cx).abs() <= half && (py - cy).abs() <= half {
            Rgb([250, 250, 240])
        } else {
            let noise = rng.gen_range(-NOISE..=NOISE);
            let v = (BACKGROUND as i16 + noise).clamp(0, 255) as u8;
            Rgb([v, v, v.saturating_add(10)])
        }
    })
}
