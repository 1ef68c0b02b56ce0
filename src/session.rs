//! Live session wiring: camera frames → pipeline → consumer and recorder.
//!
//! While tracking, every preview frame is offered to the [`FrameProcessor`]
//! (and dropped if it is busy). Processed frames go to the consumer channel,
//! and their letterboxed model input is appended to the recorder when export
//! is on. Outside tracking, preview frames pass through untouched.
//!
//! Results still in flight when the camera session leaves preview (or when
//! tracking stops) are discarded.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::capture::{CaptureHandle, CaptureSessionState, FrameSink};
use crate::export::{output_path, Recorder, Recording};
use crate::pipeline::{FrameProcessor, PipelineStats, ProcessedFrame, SharedSettings};

/// Frames buffered for the consumer before new ones are dropped.
pub const CONSUMER_CAPACITY: usize = 4;

struct Inner {
    processor: FrameProcessor,
    recorder: Mutex<Option<Recorder>>,
    export_dir: PathBuf,
    tracking: AtomicBool,
    generation: AtomicU64,
    export_error: Mutex<Option<anyhow::Error>>,
    frames: SyncSender<ProcessedFrame>,
}

/// Orchestrates one camera session's frame flow.
#[derive(Clone)]
pub struct LiveSession {
    inner: Arc<Inner>,
}

impl LiveSession {
    /// `recorder` is `None` when no export sink is available; export is then
    /// skipped even if enabled in the settings.
    pub fn new(
        processor: FrameProcessor,
        recorder: Option<Recorder>,
        export_dir: impl Into<PathBuf>,
    ) -> (Self, Receiver<ProcessedFrame>) {
        let (tx, rx) = mpsc::sync_channel(CONSUMER_CAPACITY);
        let inner = Inner {
            processor,
            recorder: Mutex::new(recorder),
            export_dir: export_dir.into(),
            tracking: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            export_error: Mutex::new(None),
            frames: tx,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    pub fn settings(&self) -> &SharedSettings {
        self.inner.processor.settings()
    }

    pub fn stats(&self) -> PipelineStats {
        self.inner.processor.stats()
    }

    pub fn is_tracking(&self) -> bool {
        self.inner.tracking.load(Ordering::Acquire)
    }

    /// Sink to hand to the capture controller. Never blocks.
    pub fn frame_sink(&self) -> FrameSink {
        let inner = self.inner.clone();
        Arc::new(move |frame: RgbImage| inner.on_preview_frame(frame))
    }

    /// Begin processing frames; opens a recording when export is enabled.
    pub fn start_tracking(&self) -> Result<Option<PathBuf>> {
        if self.is_tracking() {
            return Ok(None);
        }
        let settings = self.inner.processor.settings().snapshot()?;
        let mut started = None;
        if settings.export_enabled {
            let mut recorder = self.inner.lock_recorder()?;
            match recorder.as_mut() {
                Some(recorder) => {
                    let (width, height) = self.inner.processor.model_dimensions();
                    let path = output_path(&self.inner.export_dir)?;
                    recorder.start(width, height, &path)?;
                    started = Some(path);
                }
                None => log::warn!("LiveSession: export enabled but no sink configured"),
            }
        }
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.tracking.store(true, Ordering::Release);
        log::info!("LiveSession: tracking started");
        Ok(started)
    }

    /// Stop processing; finalizes the recording.
    ///
    /// Results still in flight are discarded. An export failure seen while
    /// appending is returned here if finalizing itself succeeded.
    pub fn stop_tracking(&self) -> Result<Option<Recording>> {
        if !self.inner.tracking.swap(false, Ordering::AcqRel) {
            return Ok(None);
        }
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        log::info!("LiveSession: tracking stopped");

        let recording = match self.inner.lock_recorder()?.as_mut() {
            Some(recorder) => recorder.stop()?,
            None => None,
        };
        let append_error = self
            .inner
            .export_error
            .lock()
            .map_err(|_| anyhow!("export error lock poisoned"))?
            .take();
        match append_error {
            Some(err) => Err(err),
            None => Ok(recording),
        }
    }

    /// Stop tracking, then ask the camera to switch facing.
    ///
    /// The switch is requested even when finalizing the recording fails; that
    /// error is still returned.
    pub fn switch_camera(&self, camera: &CaptureHandle) -> Result<Option<Recording>> {
        let stopped = self.stop_tracking();
        camera.switch_camera()?;
        stopped
    }

    /// Follow the capture session. Leaving preview invalidates every result
    /// still in flight; tracking itself carries on once preview resumes.
    pub fn on_capture_state(&self, state: CaptureSessionState) {
        match state {
            CaptureSessionState::PreviewActive | CaptureSessionState::StillCapturing => {}
            CaptureSessionState::Closed | CaptureSessionState::Opening => {
                self.inner.generation.fetch_add(1, Ordering::AcqRel);
                log::debug!("LiveSession: camera {}, in-flight results dropped", state);
            }
        }
    }
}

impl Inner {
    fn lock_recorder(&self) -> Result<std::sync::MutexGuard<'_, Option<Recorder>>> {
        self.recorder
            .lock()
            .map_err(|_| anyhow!("recorder lock poisoned"))
    }

    fn on_preview_frame(self: &Arc<Self>, frame: RgbImage) {
        if !self.tracking.load(Ordering::Acquire) {
            self.deliver(ProcessedFrame {
                annotated: frame,
                model_input: None,
                detection: None,
            });
            return;
        }

        let generation = self.generation.load(Ordering::Acquire);
        let inner = self.clone();
        self.processor.submit_frame(frame, move |processed| {
            inner.on_processed(generation, processed);
        });
    }

    fn on_processed(&self, generation: u64, processed: ProcessedFrame) {
        if !self.tracking.load(Ordering::Acquire)
            || self.generation.load(Ordering::Acquire) != generation
        {
            log::trace!("LiveSession: discarding result from a stopped session");
            return;
        }
        if let Some(model_input) = processed.model_input.as_ref() {
            self.record(model_input);
        }
        self.deliver(processed);
    }

    fn record(&self, model_input: &RgbImage) {
        let mut recorder = match self.recorder.lock() {
            Ok(recorder) => recorder,
            Err(_) => return,
        };
        let Some(recorder) = recorder.as_mut().filter(|r| r.is_recording()) else {
            return;
        };
        let Ok(mut export_error) = self.export_error.lock() else {
            return;
        };
        if export_error.is_some() {
            return;
        }
        if let Err(err) = recorder.append_frame(model_input) {
            log::warn!("LiveSession: export append failed: {:#}", err);
            *export_error = Some(err);
        }
    }

    fn deliver(&self, frame: ProcessedFrame) {
        match self.frames.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::trace!("LiveSession: consumer busy, frame dropped"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
