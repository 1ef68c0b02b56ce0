//! framegate - live camera detection daemon
//!
//! This daemon:
//! 1. Opens the configured camera (V4L2 device or `stub://` synthetic camera)
//! 2. Feeds preview frames through the single-flight detection pipeline
//! 3. Records letterboxed model-input frames when export is enabled
//! 4. Optionally takes periodic still captures
//! 5. Shuts down cleanly on Ctrl-C or a fatal camera error

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use framegate::capture::{open_backend, CaptureController, CaptureSessionState, SessionListener};
use framegate::config::FramegateConfig;
use framegate::detect::{InferenceService, StubBackend};
use framegate::export::Recorder;
use framegate::pipeline::{FrameProcessor, ProcessedFrame, SharedSettings};
use framegate::session::LiveSession;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run live object detection on a camera feed"
)]
struct Args {
    /// Config file (.toml or .json). Overrides FRAMEGATE_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start tracking as soon as the preview is live.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    track: bool,

    /// Take a still capture every N seconds.
    #[arg(long)]
    still_every_secs: Option<u64>,

    /// Initial zoom step applied after opening (e.g. 1.0 for 2x).
    #[arg(long, default_value_t = 0.0)]
    zoom: f32,

    /// Exit after N seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    duration_secs: Option<u64>,
}

enum DaemonEvent {
    Interrupt,
    Fatal(String),
    State(CaptureSessionState),
}

struct DaemonListener {
    tx: Mutex<Sender<DaemonEvent>>,
    session: LiveSession,
}

impl DaemonListener {
    fn post(&self, event: DaemonEvent) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(event);
        }
    }
}

impl SessionListener for DaemonListener {
    fn on_state_changed(&self, state: CaptureSessionState) {
        self.session.on_capture_state(state);
        self.post(DaemonEvent::State(state));
    }

    fn on_fatal_error(&self, error: &anyhow::Error) {
        self.post(DaemonEvent::Fatal(format!("{:#}", error)));
    }

    fn on_session_error(&self, error: &anyhow::Error) {
        log::warn!("camera session could not be configured: {:#}", error);
    }

    fn on_photo_saved(&self, path: &Path) {
        log::info!("photo saved: {}", path.display());
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = match args.config.as_deref() {
        Some(path) => FramegateConfig::load_from(Some(path))?,
        None => FramegateConfig::load()?,
    };

    let settings = SharedSettings::new(cfg.pipeline_settings());
    let service = build_service(&cfg)?;
    let processor = FrameProcessor::spawn(service, settings.clone())?;
    let recorder = build_recorder(&cfg, &settings)?;
    let (session, frames) = LiveSession::new(processor, recorder, cfg.export.dir.clone());
    let consumer = spawn_consumer(frames)?;

    let (tx, rx) = mpsc::channel();
    let listener = Arc::new(DaemonListener {
        tx: Mutex::new(tx.clone()),
        session: session.clone(),
    });
    let backend = open_backend(&cfg.camera.device)?;
    let (controller, messages) = CaptureController::new(
        backend,
        cfg.controller_config(),
        listener,
        session.frame_sink(),
    );
    let (camera, executor) = controller.spawn(messages)?;
    camera.open()?;
    if args.zoom != 0.0 {
        camera.set_zoom_level(args.zoom)?;
    }

    ctrlc::set_handler(move || {
        let _ = tx.send(DaemonEvent::Interrupt);
    })
    .context("error setting Ctrl-C handler")?;

    log::info!(
        "framegate running: camera={} facing={} detection={} export={}",
        cfg.camera.device,
        cfg.camera.facing,
        cfg.detection.enabled,
        cfg.export.enabled
    );

    let result = run(&args, &session, &camera, &rx);

    match session.stop_tracking() {
        Ok(Some(recording)) => log::info!(
            "recording finalized: {} ({} frames)",
            recording.path.display(),
            recording.frames
        ),
        Ok(None) => {}
        Err(err) => log::error!("export failed: {:#}", err),
    }
    camera.shutdown()?;
    executor
        .join()
        .map_err(|_| anyhow!("camera executor panicked"))?;
    drop(session);
    if consumer.join().is_err() {
        log::warn!("frame consumer panicked");
    }
    log::info!("framegate stopped");
    result
}

fn run(
    args: &Args,
    session: &LiveSession,
    camera: &framegate::capture::CaptureHandle,
    rx: &Receiver<DaemonEvent>,
) -> Result<()> {
    let started = Instant::now();
    let deadline = args
        .duration_secs
        .map(|secs| started + Duration::from_secs(secs));
    let still_every = args.still_every_secs.map(Duration::from_secs);
    let mut last_still = Instant::now();
    let mut last_health_log = Instant::now();

    loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(DaemonEvent::Interrupt) => {
                log::info!("shutdown signal received");
                return Ok(());
            }
            Ok(DaemonEvent::Fatal(message)) => {
                return Err(anyhow!("camera failed: {}", message));
            }
            Ok(DaemonEvent::State(CaptureSessionState::PreviewActive)) => {
                if args.track && !session.is_tracking() {
                    if let Some(path) = session.start_tracking()? {
                        log::info!("recording to {}", path.display());
                    }
                }
            }
            Ok(DaemonEvent::State(state)) => log::debug!("camera state: {}", state),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                log::info!("run duration elapsed");
                return Ok(());
            }
        }
        if let Some(every) = still_every {
            if last_still.elapsed() >= every {
                camera.request_still_capture()?;
                last_still = Instant::now();
            }
        }
        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = session.stats();
            log::info!(
                "health: accepted={} dropped={} completed={} degraded={}",
                stats.accepted,
                stats.dropped,
                stats.completed,
                stats.degraded
            );
            last_health_log = Instant::now();
        }
    }
}

fn build_service(cfg: &FramegateConfig) -> Result<Option<Box<dyn InferenceService>>> {
    if !cfg.detection.enabled {
        return Ok(None);
    }
    match &cfg.detection.model_path {
        Some(path) => load_model(
            path,
            cfg.detection.input_width,
            cfg.detection.input_height,
        )
        .map(Some),
        None if cfg.camera.device.starts_with("stub://") => {
            log::info!("no model configured; using stub detector for synthetic camera");
            Ok(Some(Box::new(StubBackend::new())))
        }
        None => {
            log::warn!("no model configured; frames will not be annotated");
            Ok(None)
        }
    }
}

#[cfg(feature = "backend-tract")]
fn load_model(path: &Path, width: u32, height: u32) -> Result<Box<dyn InferenceService>> {
    let backend = framegate::detect::TractBackend::new(path, width, height)?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(path: &Path, _width: u32, _height: u32) -> Result<Box<dyn InferenceService>> {
    Err(anyhow!(
        "model {} requires the backend-tract feature",
        path.display()
    ))
}

fn build_recorder(cfg: &FramegateConfig, settings: &SharedSettings) -> Result<Option<Recorder>> {
    if !cfg.export.enabled {
        return Ok(None);
    }
    #[cfg(feature = "export-ffmpeg")]
    {
        let _ = settings;
        let sink = framegate::export::FfmpegSink::new()?;
        Ok(Some(Recorder::new(Box::new(sink))))
    }
    #[cfg(not(feature = "export-ffmpeg"))]
    {
        log::warn!("export requested but built without export-ffmpeg; export disabled");
        settings.update(|s| s.export_enabled = false)?;
        Ok(None)
    }
}

fn spawn_consumer(frames: Receiver<ProcessedFrame>) -> Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("frame-consumer".to_string())
        .spawn(move || {
            let mut detections = 0u64;
            for frame in frames {
                if let Some(bbox) = frame.detection {
                    detections += 1;
                    log::debug!(
                        "detection #{} at ({:.0}, {:.0}) conf={:.2}",
                        detections,
                        bbox.center().0,
                        bbox.center().1,
                        bbox.confidence
                    );
                }
            }
            log::info!("frame consumer finished ({} detections)", detections);
        })
        .context("spawn frame consumer")
}
