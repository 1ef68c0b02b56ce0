//! End-to-end runs against the synthetic camera.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use framegate::capture::{
    CaptureController, CaptureSessionState, ControllerConfig, FrameSink, PhotoStore,
    SessionListener, StubCamera,
};
use framegate::detect::StubBackend;
use framegate::export::{MemorySink, Recorder};
use framegate::pipeline::{FrameProcessor, SharedSettings};
use framegate::session::LiveSession;

#[derive(Debug)]
enum Event {
    State(CaptureSessionState),
    Photo(PathBuf),
    Fatal(String),
}

struct Listener {
    tx: Mutex<Sender<Event>>,
}

impl SessionListener for Listener {
    fn on_state_changed(&self, state: CaptureSessionState) {
        let _ = self.tx.lock().unwrap().send(Event::State(state));
    }

    fn on_fatal_error(&self, error: &anyhow::Error) {
        let _ = self.tx.lock().unwrap().send(Event::Fatal(format!("{:#}", error)));
    }

    fn on_photo_saved(&self, path: &Path) {
        let _ = self.tx.lock().unwrap().send(Event::Photo(path.to_path_buf()));
    }
}

fn listener() -> (Arc<Listener>, Receiver<Event>) {
    let (tx, rx) = mpsc::channel();
    (
        Arc::new(Listener {
            tx: Mutex::new(tx),
        }),
        rx,
    )
}

fn wait_for<T>(rx: &Receiver<Event>, mut pick: impl FnMut(Event) -> Option<T>) -> Result<T> {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Ok(event) = rx.recv_timeout(Duration::from_millis(100)) {
            if let Some(value) = pick(event) {
                return Ok(value);
            }
        }
    }
    Err(anyhow!("timed out waiting for camera event"))
}

fn wait_for_state(rx: &Receiver<Event>, wanted: CaptureSessionState) -> Result<()> {
    wait_for(rx, |event| match event {
        Event::State(state) if state == wanted => Some(()),
        Event::Fatal(message) => panic!("unexpected fatal error: {}", message),
        _ => None,
    })
}

#[test]
fn synthetic_camera_tracks_and_records() -> Result<()> {
    let export_dir = tempfile::tempdir()?;
    let settings = SharedSettings::default();
    settings.update(|s| s.export_enabled = true)?;
    let processor = FrameProcessor::spawn(Some(Box::new(StubBackend::new())), settings)?;
    let sink = MemorySink::new();
    let (session, frames) = LiveSession::new(
        processor,
        Some(Recorder::new(Box::new(sink.clone()))),
        export_dir.path(),
    );

    let (listener, events) = listener();
    let (controller, messages) = CaptureController::new(
        Box::new(StubCamera::new("stub://e2e")),
        ControllerConfig::default(),
        listener,
        session.frame_sink(),
    );
    let (camera, executor) = controller.spawn(messages)?;
    camera.open()?;
    wait_for_state(&events, CaptureSessionState::PreviewActive)?;

    let path = session.start_tracking()?.context("recording path")?;
    assert!(path.starts_with(export_dir.path()));

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut detected = 0;
    while detected < 3 && Instant::now() < deadline {
        if let Ok(frame) = frames.recv_timeout(Duration::from_millis(200)) {
            if let Some(bbox) = frame.detection {
                assert!(bbox.width() > 0.0 && bbox.height() > 0.0);
                assert_eq!(frame.annotated.dimensions(), (1280, 720));
                detected += 1;
            }
        }
    }
    assert!(detected >= 3, "only {} detections", detected);

    let recording = session.stop_tracking()?.context("recording")?;
    assert!(recording.frames >= 3);
    assert_eq!((recording.width, recording.height), (416, 416));
    assert_eq!(sink.frame_count() as u64, recording.frames);

    camera.shutdown()?;
    executor.join().map_err(|_| anyhow!("executor panicked"))?;
    Ok(())
}

#[test]
fn still_capture_saves_photo_and_preview_continues() -> Result<()> {
    let photo_dir = tempfile::tempdir()?;
    let (listener, events) = listener();
    let frame_count = Arc::new(Mutex::new(0u64));
    let sink: FrameSink = {
        let frame_count = frame_count.clone();
        Arc::new(move |_frame: image::RgbImage| {
            if let Ok(mut count) = frame_count.lock() {
                *count += 1;
            }
        })
    };
    let (controller, messages) = CaptureController::new(
        Box::new(StubCamera::new("stub://stills")),
        ControllerConfig {
            photos: Some(PhotoStore::new(photo_dir.path())),
            ..ControllerConfig::default()
        },
        listener,
        sink,
    );
    let (camera, executor) = controller.spawn(messages)?;
    camera.open()?;
    wait_for_state(&events, CaptureSessionState::PreviewActive)?;

    camera.set_zoom_level(1.0)?;
    camera.request_still_capture()?;
    let photo = wait_for(&events, |event| match event {
        Event::Photo(path) => Some(path),
        _ => None,
    })?;
    assert!(photo.starts_with(photo_dir.path()));
    let decoded = image::open(&photo)?;
    assert_eq!((decoded.width(), decoded.height()), (1280, 720));

    // Preview keeps producing frames after the still.
    let before = *frame_count.lock().unwrap();
    std::thread::sleep(Duration::from_millis(400));
    assert!(*frame_count.lock().unwrap() > before);

    camera.shutdown()?;
    executor.join().map_err(|_| anyhow!("executor panicked"))?;
    Ok(())
}

#[test]
fn failed_still_capture_keeps_preview_live() -> Result<()> {
    let camera_backend = StubCamera::new("stub://faulty");
    let script = camera_backend.script();
    script.fail_capture("sensor timeout");

    let (listener, events) = listener();
    let (controller, messages) = CaptureController::new(
        Box::new(camera_backend),
        ControllerConfig::default(),
        listener,
        Arc::new(|_: image::RgbImage| {}),
    );
    let (camera, executor) = controller.spawn(messages)?;
    camera.open()?;
    wait_for_state(&events, CaptureSessionState::PreviewActive)?;

    camera.request_still_capture()?;
    wait_for_state(&events, CaptureSessionState::StillCapturing)?;
    wait_for_state(&events, CaptureSessionState::PreviewActive)?;
    assert!(script.repeating_active());

    camera.shutdown()?;
    executor.join().map_err(|_| anyhow!("executor panicked"))?;
    Ok(())
}
