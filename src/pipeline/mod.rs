//! Frame processing pipeline.
//!
//! Letterbox → inference → post-process → rescale → overlay, run on a
//! dedicated worker thread behind a single-flight gate:
//! - at most one frame is in flight at any instant,
//! - frames submitted while the gate is held are dropped, never queued,
//! - the gate is released after delivery on every path, including failures.
//!
//! Inference errors degrade to "no detection this frame"; they never reach
//! the caller and never stop the worker.

mod overlay;
mod settings;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use crate::detect::{post_process, BoundingBox, InferenceService, ModelShape};
use crate::geometry::{letterbox_image, rescale_to_source, LetterboxResult};

pub use overlay::{draw_detection, draw_rect, draw_text, format_label, LABEL_COLOR};
pub use settings::{
    PipelineSettings, SharedSettings, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD,
    DEFAULT_LABEL, DEFAULT_OVERLAY_COLOR, DEFAULT_OVERLAY_THICKNESS,
};

/// Output of one pipeline pass.
#[derive(Clone, Debug)]
pub struct ProcessedFrame {
    /// Source frame, with the overlay drawn when a box was found and overlay is on.
    pub annotated: RgbImage,
    /// Letterboxed model input. `None` only when letterboxing itself failed.
    pub model_input: Option<RgbImage>,
    /// Best detection in source-pixel coordinates.
    pub detection: Option<BoundingBox>,
}

impl ProcessedFrame {
    fn passthrough(source: &RgbImage) -> Self {
        Self {
            annotated: source.clone(),
            model_input: None,
            detection: None,
        }
    }
}

/// Callback receiving a finished frame. Runs on the pipeline worker; the
/// gate is released only after it returns.
pub type Completion = Box<dyn FnOnce(ProcessedFrame) + Send + 'static>;

struct Job {
    source: RgbImage,
    completion: Completion,
}

/// Counters for health logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub accepted: u64,
    pub dropped: u64,
    pub completed: u64,
    pub degraded: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    degraded: AtomicU64,
}

/// Releases the single-flight gate when dropped, including during unwinding.
struct GateGuard<'a>(&'a AtomicBool);

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Single-flight frame processor.
pub struct FrameProcessor {
    busy: Arc<AtomicBool>,
    counters: Arc<Counters>,
    jobs: Option<SyncSender<Job>>,
    worker: Option<JoinHandle<()>>,
    shape: ModelShape,
    settings: SharedSettings,
}

impl FrameProcessor {
    /// Start the pipeline worker.
    ///
    /// Model dimensions are read once from `service` (or the defaults when no
    /// service is attached) and cached for the processor's lifetime.
    pub fn spawn(
        service: Option<Box<dyn InferenceService>>,
        settings: SharedSettings,
    ) -> Result<Self> {
        let shape = service
            .as_ref()
            .map(|service| service.shape())
            .unwrap_or_default();
        let busy = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::sync_channel::<Job>(1);

        let worker = {
            let busy = busy.clone();
            let counters = counters.clone();
            let settings = settings.clone();
            let mut service = service;
            std::thread::Builder::new()
                .name("frame-pipeline".to_string())
                .spawn(move || {
                    if let Some(service) = service.as_mut() {
                        if let Err(err) = service.warm_up() {
                            log::warn!("FrameProcessor: warm-up failed: {}", err);
                        }
                    }
                    for job in rx {
                        let _gate = GateGuard(&busy);
                        let source = job.source;
                        let service = service.as_deref_mut();
                        let (frame, degraded) = panic::catch_unwind(AssertUnwindSafe(|| {
                            run_frame(&source, service, shape, &settings)
                        }))
                        .unwrap_or_else(|_| {
                            log::error!("FrameProcessor: frame processing panicked");
                            (ProcessedFrame::passthrough(&source), true)
                        });
                        if degraded {
                            counters.degraded.fetch_add(1, Ordering::Relaxed);
                        }
                        let completion = job.completion;
                        if panic::catch_unwind(AssertUnwindSafe(|| completion(frame))).is_err() {
                            log::error!("FrameProcessor: completion callback panicked");
                        }
                        counters.completed.fetch_add(1, Ordering::Relaxed);
                    }
                    log::debug!("FrameProcessor: worker stopped");
                })
                .map_err(|err| anyhow!("failed to spawn frame pipeline worker: {}", err))?
        };

        log::info!(
            "FrameProcessor: model input {}x{}, output {:?}",
            shape.input_width,
            shape.input_height,
            shape.output
        );

        Ok(Self {
            busy,
            counters,
            jobs: Some(tx),
            worker: Some(worker),
            shape,
            settings,
        })
    }

    /// Offer a frame to the pipeline. Never blocks.
    ///
    /// Returns `false` (and drops the frame) when a frame is already in
    /// flight. Otherwise `completion` is invoked exactly once on the worker.
    pub fn submit_frame<F>(&self, source: RgbImage, completion: F) -> bool
    where
        F: FnOnce(ProcessedFrame) + Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            log::trace!("FrameProcessor: busy, frame dropped");
            return false;
        }

        let Some(jobs) = self.jobs.as_ref() else {
            self.busy.store(false, Ordering::Release);
            return false;
        };
        let job = Job {
            source,
            completion: Box::new(completion),
        };
        match jobs.try_send(job) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.busy.store(false, Ordering::Release);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.busy.store(false, Ordering::Release);
                log::error!("FrameProcessor: worker is gone, frame dropped");
                false
            }
        }
    }

    /// True while a frame is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Cached model shapes (input size and output tensor shape).
    pub fn model_shape(&self) -> ModelShape {
        self.shape
    }

    /// Model input size as `(width, height)`.
    pub fn model_dimensions(&self) -> (u32, u32) {
        (self.shape.input_width, self.shape.input_height)
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting frames and wait for the in-flight frame to finish.
    pub fn shutdown(mut self) -> Result<()> {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("frame pipeline worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for FrameProcessor {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop; an in-flight frame is
        // allowed to finish on its own.
        self.jobs.take();
    }
}

/// Run one frame through the pipeline synchronously.
///
/// Failures after letterboxing degrade to "no detection"; a letterbox failure
/// returns the unmodified source without a model-input frame.
pub fn process_frame(
    source: &RgbImage,
    service: Option<&mut (dyn InferenceService + 'static)>,
    shape: ModelShape,
    settings: &SharedSettings,
) -> ProcessedFrame {
    run_frame(source, service, shape, settings).0
}

/// [`process_frame`] plus whether the frame degraded (letterbox or
/// detection failure).
fn run_frame(
    source: &RgbImage,
    service: Option<&mut (dyn InferenceService + 'static)>,
    shape: ModelShape,
    settings: &SharedSettings,
) -> (ProcessedFrame, bool) {
    let settings = settings.snapshot().unwrap_or_else(|err| {
        log::warn!("FrameProcessor: {}; using default settings", err);
        PipelineSettings::default()
    });

    let letterboxed = match letterbox_image(source, shape.input_width, shape.input_height) {
        Ok(letterboxed) => letterboxed,
        Err(err) => {
            log::warn!("FrameProcessor: letterbox failed: {}", err);
            return (ProcessedFrame::passthrough(source), true);
        }
    };

    let mut degraded = false;
    let detection = match service {
        Some(service) if settings.detection_enabled => {
            detect(service, &letterboxed, source, shape, &settings).unwrap_or_else(|err| {
                log::warn!("FrameProcessor: detection failed: {}", err);
                degraded = true;
                None
            })
        }
        _ => None,
    };

    let mut annotated = source.clone();
    if let (Some(bbox), true) = (&detection, settings.overlay_enabled) {
        draw_detection(
            &mut annotated,
            bbox,
            &settings.label,
            Rgb(settings.overlay_color),
            settings.overlay_thickness,
        );
    }

    let frame = ProcessedFrame {
        annotated,
        model_input: Some(letterboxed.image),
        detection,
    };
    (frame, degraded)
}

fn detect(
    service: &mut dyn InferenceService,
    letterboxed: &LetterboxResult,
    source: &RgbImage,
    shape: ModelShape,
    settings: &PipelineSettings,
) -> Result<Option<BoundingBox>> {
    let raw = service.infer(&letterboxed.image)?;
    let Some(best) = post_process(&raw, settings.confidence_threshold, settings.iou_threshold)
    else {
        return Ok(None);
    };
    let bbox = rescale_to_source(
        &best,
        source.width(),
        source.height(),
        letterboxed.letterbox.pad(),
        shape.input_width,
        shape.input_height,
    );
    log::debug!(
        "FrameProcessor: detection conf={:.3} box=({:.1}, {:.1}, {:.1}, {:.1})",
        bbox.confidence,
        bbox.x1,
        bbox.y1,
        bbox.x2,
        bbox.y2
    );
    Ok(Some(bbox))
}
