//! V4L2 camera backend for local `/dev/videoN` devices.
//!
//! The device is opened and streamed on a dedicated capture thread. Zoom is
//! applied in software by cropping the full-sensor frame; a still capture is
//! the next streamed frame encoded as JPEG.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use image::ImageFormat;
use v4l::buffer::Type;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;

use crate::capture::backend::{
    CameraBackend, CameraCharacteristics, DeviceEvent, DeviceEvents, FrameSink,
};
use crate::capture::normalize::{crop_and_scale, normalize_to_rgb, PixelFormat};
use crate::capture::request::{CaptureRequest, TARGET_FPS};
use crate::capture::{Facing, Rect, Size};

#[derive(Default)]
struct StreamControl {
    repeating: Option<CaptureRequest>,
    still: Option<CaptureRequest>,
}

struct Stream {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct V4l2Camera {
    device: String,
    open: Option<(DeviceEvents, FrameSink)>,
    active_array: Option<Rect>,
    control: Arc<Mutex<StreamControl>>,
    stream: Option<Stream>,
}

impl V4l2Camera {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            open: None,
            active_array: None,
            control: Arc::new(Mutex::new(StreamControl::default())),
            stream: None,
        }
    }

    fn control(&self) -> Result<MutexGuard<'_, StreamControl>> {
        self.control
            .lock()
            .map_err(|_| anyhow!("v4l2 stream control lock poisoned"))
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop.store(true, Ordering::Release);
            if stream.thread.join().is_err() {
                log::warn!("V4l2Camera: capture thread panicked");
            }
        }
    }
}

impl CameraBackend for V4l2Camera {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn camera_ids(&self) -> Result<Vec<String>> {
        Ok(vec![self.device.clone()])
    }

    fn characteristics(&self, id: &str) -> Result<CameraCharacteristics> {
        let device =
            v4l::Device::with_path(id).with_context(|| format!("open v4l2 device {}", id))?;
        let format = device.format().context("read v4l2 format")?;

        let mut sizes: Vec<Size> = device
            .enum_framesizes(v4l::FourCC::new(b"RGB3"))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|frame_size| match frame_size.size {
                FrameSizeEnum::Discrete(discrete) => {
                    Some(Size::new(discrete.width, discrete.height))
                }
                FrameSizeEnum::Stepwise(_) => None,
            })
            .collect();
        if sizes.is_empty() {
            sizes.push(Size::new(format.width, format.height));
        }
        let largest = sizes
            .iter()
            .copied()
            .max_by_key(Size::pixels)
            .unwrap_or(Size::new(format.width, format.height));

        Ok(CameraCharacteristics {
            id: id.to_string(),
            facing: Facing::Back,
            active_array: Rect::from_size(largest),
            preview_sizes: sizes.clone(),
            still_sizes: sizes,
            manual_sensor: None,
        })
    }

    fn open(&mut self, id: &str, events: DeviceEvents, frames: FrameSink) -> Result<()> {
        let active_array = self.characteristics(id)?.active_array;
        self.device = id.to_string();
        self.active_array = Some(active_array);
        self.open = Some((events.clone(), frames));
        log::info!("V4l2Camera: opened {}", id);
        events.send(DeviceEvent::Opened);
        Ok(())
    }

    fn create_session(&mut self, preview: Size, still: Size) -> Result<()> {
        let (events, frames) = self.open.clone().context("v4l2 device not open")?;
        self.stop_stream();

        // Stream at the larger of the two outputs; the preview is scaled down.
        let capture = if still.pixels() > preview.pixels() {
            still
        } else {
            preview
        };
        let active_array = self.active_array.context("v4l2 device not open")?;
        let stop = Arc::new(AtomicBool::new(false));
        let session = CaptureSession {
            device: self.device.clone(),
            active_array,
            capture,
            preview,
            control: self.control.clone(),
            stop: stop.clone(),
            events,
            frames,
        };
        let thread = std::thread::Builder::new()
            .name("v4l2-capture".to_string())
            .spawn(move || session.run())
            .context("spawn v4l2 capture thread")?;
        self.stream = Some(Stream { stop, thread });
        Ok(())
    }

    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<()> {
        if self.stream.is_none() {
            return Err(anyhow!("no capture session"));
        }
        self.control()?.repeating = Some(request.clone());
        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<()> {
        self.control()?.repeating = None;
        Ok(())
    }

    fn capture(&mut self, request: &CaptureRequest) -> Result<()> {
        if self.stream.is_none() {
            return Err(anyhow!("no capture session"));
        }
        self.control()?.still = Some(request.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.stop_stream();
        if let Ok(mut control) = self.control.lock() {
            *control = StreamControl::default();
        }
        self.active_array = None;
        if self.open.take().is_some() {
            log::info!("V4l2Camera: closed {}", self.device);
        }
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

struct CaptureSession {
    device: String,
    /// Coordinate space of request crop regions, as reported by `characteristics`.
    active_array: Rect,
    capture: Size,
    preview: Size,
    control: Arc<Mutex<StreamControl>>,
    stop: Arc<AtomicBool>,
    events: DeviceEvents,
    frames: FrameSink,
}

impl CaptureSession {
    fn run(self) {
        if let Err(err) = self.stream() {
            log::error!("V4l2Camera: {:#}", err);
            self.events.send(DeviceEvent::Error(format!("{:#}", err)));
        }
    }

    fn stream(&self) -> Result<()> {
        let mut device = v4l::Device::with_path(&self.device)
            .with_context(|| format!("open v4l2 device {}", self.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.capture.width;
        format.height = self.capture.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    self.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr)?;

        let params = v4l::video::capture::Parameters::with_fps(TARGET_FPS);
        if let Err(err) = device.set_params(&params) {
            log::warn!("V4l2Camera: failed to set fps on {}: {}", self.device, err);
        }

        // Crops arrive in active-array coordinates whatever size is streamed.
        let active = self.active_array;
        let mut stream = MmapStream::with_buffers(&mut device, Type::VideoCapture, 4)
            .context("create v4l2 buffer stream")?;
        log::info!(
            "V4l2Camera: streaming {} at {}x{} ({:?})",
            self.device,
            format.width,
            format.height,
            pixel_format
        );

        while !self.stop.load(Ordering::Acquire) {
            let (buf, _meta) = stream.next().context("capture v4l2 frame")?;
            let (repeating, still) = {
                let mut control = self
                    .control
                    .lock()
                    .map_err(|_| anyhow!("v4l2 stream control lock poisoned"))?;
                (control.repeating.clone(), control.still.take())
            };
            if repeating.is_none() && still.is_none() {
                continue;
            }

            let frame = normalize_to_rgb(buf, format.width, format.height, pixel_format)?;
            if let Some(request) = still {
                self.deliver_still(&frame, &request, active);
            }
            if let Some(request) = repeating {
                let crop = request.crop_region.unwrap_or(active);
                (self.frames)(crop_and_scale(&frame, crop, active, self.preview));
            }
        }
        Ok(())
    }

    fn deliver_still(&self, frame: &image::RgbImage, request: &CaptureRequest, active: Rect) {
        let crop = request.crop_region.unwrap_or(active);
        let still = crop_and_scale(frame, crop, active, self.capture);
        let mut jpeg = Cursor::new(Vec::new());
        let event = match still.write_to(&mut jpeg, ImageFormat::Jpeg) {
            Ok(()) => DeviceEvent::CaptureCompleted(jpeg.into_inner()),
            Err(err) => DeviceEvent::CaptureFailed(format!("encode still: {}", err)),
        };
        self.events.send(event);
    }
}
