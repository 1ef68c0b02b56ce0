//! Capture session state machine and its executor.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use super::backend::{CameraBackend, CameraCharacteristics, DeviceEvent, DeviceEvents, FrameSink};
use super::request::{preview_request, still_request, CaptureRequest};
use super::select::{choose_optimal_size, select_camera, TARGET_SIZE};
use super::zoom::{ZoomState, DEFAULT_MAX_ZOOM};
use super::{CaptureSessionState, Facing, PhotoStore, Size};

/// Zoom change per tick while a zoom control is held.
pub const ZOOM_STEP: f32 = 0.1;
/// Interval between zoom ticks while held.
pub const ZOOM_HOLD_INTERVAL: Duration = Duration::from_millis(50);

/// Operator requests. Always marshalled onto the executor.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Open,
    Close,
    SwitchCamera,
    StillCapture,
    Zoom(f32),
    Shutdown,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Request(Request),
    Device { generation: u64, event: DeviceEvent },
}

/// Host notifications. Called on the executor thread; implementations must
/// not block.
pub trait SessionListener: Send + Sync {
    fn on_state_changed(&self, _state: CaptureSessionState) {}

    /// Device open failure, disconnect, or device error. The session is
    /// already `Closed` when this fires.
    fn on_fatal_error(&self, _error: &anyhow::Error) {}

    /// Session or repeating-request configuration failure. The session is
    /// `Closed`; reopening is up to the caller.
    fn on_session_error(&self, _error: &anyhow::Error) {}

    /// Fired once per successfully stored still capture.
    fn on_photo_saved(&self, _path: &Path) {}
}

/// Listener that ignores everything.
impl SessionListener for () {}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub facing: Facing,
    pub target_size: Size,
    pub max_zoom: f32,
    /// Where still captures go. `None` discards them.
    pub photos: Option<PhotoStore>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            facing: Facing::Back,
            target_size: TARGET_SIZE,
            max_zoom: DEFAULT_MAX_ZOOM,
            photos: None,
        }
    }
}

/// Owner of [`CaptureSessionState`].
///
/// Drive it synchronously with [`handle`](Self::handle) or move it onto its
/// own executor thread with [`spawn`](Self::spawn).
pub struct CaptureController {
    backend: Box<dyn CameraBackend>,
    config: ControllerConfig,
    listener: Arc<dyn SessionListener>,
    frames: FrameSink,
    tx: Sender<Message>,
    state: CaptureSessionState,
    facing: Facing,
    zoom: ZoomState,
    camera: Option<CameraCharacteristics>,
    repeating: Option<CaptureRequest>,
    generation: u64,
}

impl CaptureController {
    pub fn new(
        backend: Box<dyn CameraBackend>,
        config: ControllerConfig,
        listener: Arc<dyn SessionListener>,
        frames: FrameSink,
    ) -> (Self, Receiver<Message>) {
        let (tx, rx) = mpsc::channel();
        let controller = Self {
            backend,
            facing: config.facing,
            zoom: ZoomState::new(config.max_zoom),
            config,
            listener,
            frames,
            tx,
            state: CaptureSessionState::Closed,
            camera: None,
            repeating: None,
            generation: 0,
        };
        (controller, rx)
    }

    /// Handle for posting requests from any thread.
    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn state(&self) -> CaptureSessionState {
        self.state
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    pub fn zoom_level(&self) -> f32 {
        self.zoom.level()
    }

    pub fn camera(&self) -> Option<&CameraCharacteristics> {
        self.camera.as_ref()
    }

    /// Last repeating request issued to the device while preview is live.
    pub fn repeating_request(&self) -> Option<&CaptureRequest> {
        self.repeating.as_ref()
    }

    /// Process one message. Returns `false` after `Shutdown`.
    pub fn process(&mut self, message: Message) -> bool {
        match message {
            Message::Request(request) => return self.on_request(request),
            Message::Device { generation, event } => {
                if generation != self.generation {
                    log::debug!(
                        "CaptureController: dropping stale event {:?} (generation {} != {})",
                        event,
                        generation,
                        self.generation
                    );
                } else {
                    self.on_device_event(event);
                }
            }
        }
        true
    }

    /// Process every message already queued, without blocking.
    pub fn drain(&mut self, rx: &Receiver<Message>) -> bool {
        while let Ok(message) = rx.try_recv() {
            if !self.process(message) {
                return false;
            }
        }
        true
    }

    /// Run the state machine on a dedicated "camera-executor" thread until
    /// [`Request::Shutdown`].
    pub fn spawn(mut self, rx: Receiver<Message>) -> Result<(CaptureHandle, JoinHandle<()>)> {
        let handle = self.handle();
        let thread = std::thread::Builder::new()
            .name("camera-executor".to_string())
            .spawn(move || {
                for message in rx.iter() {
                    if !self.process(message) {
                        break;
                    }
                }
                self.close_device();
                log::info!("CaptureController: executor stopped");
            })
            .context("spawn camera executor")?;
        Ok((handle, thread))
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    fn on_request(&mut self, request: Request) -> bool {
        match request {
            Request::Open => self.open(),
            Request::Close => self.close(),
            Request::SwitchCamera => {
                self.facing = self.facing.toggled();
                log::info!("CaptureController: switching to {} camera", self.facing);
                self.close();
                self.open();
            }
            Request::StillCapture => self.start_still_capture(),
            Request::Zoom(delta) => self.apply_zoom(delta),
            Request::Shutdown => {
                self.close();
                return false;
            }
        }
        true
    }

    fn open(&mut self) {
        if self.state != CaptureSessionState::Closed {
            log::debug!("CaptureController: open ignored in state {}", self.state);
            return;
        }
        let camera = match self.pick_camera() {
            Ok(camera) => camera,
            Err(err) => {
                self.fail_fatal(err);
                return;
            }
        };

        self.generation += 1;
        let events = DeviceEvents::new(self.generation, self.tx.clone());
        log::info!(
            "CaptureController: opening {} camera '{}' via {}",
            camera.facing,
            camera.id,
            self.backend.name()
        );
        match self.backend.open(&camera.id, events, self.frames.clone()) {
            Ok(()) => {
                self.camera = Some(camera);
                self.set_state(CaptureSessionState::Opening);
            }
            Err(err) => {
                let err = err.context(format!("open camera '{}'", camera.id));
                self.fail_fatal(err);
            }
        }
    }

    fn pick_camera(&self) -> Result<CameraCharacteristics> {
        let ids = self.backend.camera_ids().context("enumerate cameras")?;
        let cameras = ids
            .iter()
            .map(|id| self.backend.characteristics(id))
            .collect::<Result<Vec<_>>>()?;
        select_camera(&cameras, self.facing)
            .cloned()
            .ok_or_else(|| anyhow!("no camera devices available"))
    }

    fn close(&mut self) {
        if self.state == CaptureSessionState::Closed {
            return;
        }
        self.close_device();
        self.set_state(CaptureSessionState::Closed);
    }

    /// Release the device and invalidate its pending events. Zoom is kept.
    fn close_device(&mut self) {
        self.backend.close();
        self.generation += 1;
        self.repeating = None;
        self.camera = None;
    }

    fn start_still_capture(&mut self) {
        if self.state != CaptureSessionState::PreviewActive {
            log::debug!(
                "CaptureController: still capture ignored in state {}",
                self.state
            );
            return;
        }
        let Some(camera) = self.camera.as_ref() else {
            return;
        };
        let request = still_request(camera, &self.zoom);

        if let Err(err) = self.backend.stop_repeating() {
            log::warn!("CaptureController: stop repeating failed: {}", err);
        }
        self.repeating = None;
        self.set_state(CaptureSessionState::StillCapturing);

        if let Err(err) = self.backend.capture(&request) {
            log::warn!("CaptureController: still capture submit failed: {}", err);
            self.resume_preview();
        }
    }

    fn apply_zoom(&mut self, delta: f32) {
        let level = self.zoom.adjust(delta);
        log::debug!("CaptureController: zoom {:.2}x", level);
        if self.state != CaptureSessionState::PreviewActive {
            return;
        }
        if let Err(err) = self.issue_preview() {
            log::warn!("CaptureController: zoom request failed: {}", err);
        }
    }

    // ------------------------------------------------------------------------
    // Device callbacks
    // ------------------------------------------------------------------------

    fn on_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Opened => self.on_opened(),
            DeviceEvent::Disconnected => {
                self.fail_fatal(anyhow!("camera disconnected"));
            }
            DeviceEvent::Error(message) => {
                self.fail_fatal(anyhow!("camera device error: {}", message));
            }
            DeviceEvent::CaptureCompleted(jpeg) => {
                if self.state != CaptureSessionState::StillCapturing {
                    log::debug!("CaptureController: discarding late still capture");
                    return;
                }
                self.store_photo(&jpeg);
                self.resume_preview();
            }
            DeviceEvent::CaptureFailed(message) => {
                if self.state != CaptureSessionState::StillCapturing {
                    return;
                }
                log::warn!("CaptureController: still capture failed: {}", message);
                self.resume_preview();
            }
        }
    }

    fn on_opened(&mut self) {
        if self.state != CaptureSessionState::Opening {
            log::debug!("CaptureController: unexpected open in state {}", self.state);
            return;
        }
        if let Err(err) = self.configure_session() {
            self.fail_session(err);
        }
    }

    fn configure_session(&mut self) -> Result<()> {
        let camera = self.camera.as_ref().context("no camera selected")?;
        let preview = choose_optimal_size(&camera.preview_sizes, self.config.target_size)
            .ok_or_else(|| anyhow!("camera '{}' reports no preview sizes", camera.id))?;
        let still = choose_optimal_size(&camera.still_sizes, self.config.target_size)
            .unwrap_or(preview);
        self.backend
            .create_session(preview, still)
            .context("configure capture session")?;
        self.issue_preview()?;
        log::info!(
            "CaptureController: preview {} / still {} at {:.2}x zoom",
            preview,
            still,
            self.zoom.level()
        );
        self.set_state(CaptureSessionState::PreviewActive);
        Ok(())
    }

    fn issue_preview(&mut self) -> Result<()> {
        let camera = self.camera.as_ref().context("no camera selected")?;
        let request = preview_request(camera, &self.zoom);
        self.backend
            .set_repeating_request(&request)
            .context("submit repeating preview request")?;
        self.repeating = Some(request);
        Ok(())
    }

    /// Back to live preview after a still capture, whatever its outcome.
    fn resume_preview(&mut self) {
        match self.issue_preview() {
            Ok(()) => self.set_state(CaptureSessionState::PreviewActive),
            Err(err) => self.fail_session(err),
        }
    }

    fn store_photo(&self, jpeg: &[u8]) {
        let Some(store) = self.config.photos.as_ref() else {
            log::debug!("CaptureController: no photo store, still discarded");
            return;
        };
        match store.save(jpeg) {
            Ok(path) => self.listener.on_photo_saved(&path),
            Err(err) => log::warn!("CaptureController: saving still failed: {:#}", err),
        }
    }

    fn fail_fatal(&mut self, err: anyhow::Error) {
        log::error!("CaptureController: {:#}", err);
        self.close_device();
        self.set_state(CaptureSessionState::Closed);
        self.listener.on_fatal_error(&err);
    }

    fn fail_session(&mut self, err: anyhow::Error) {
        log::warn!("CaptureController: {:#}", err);
        self.close_device();
        self.set_state(CaptureSessionState::Closed);
        self.listener.on_session_error(&err);
    }

    fn set_state(&mut self, state: CaptureSessionState) {
        if self.state == state {
            return;
        }
        log::info!("CaptureController: {} -> {}", self.state, state);
        self.state = state;
        self.listener.on_state_changed(state);
    }
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Cloneable sender for operator requests.
#[derive(Clone, Debug)]
pub struct CaptureHandle {
    tx: Sender<Message>,
}

impl CaptureHandle {
    pub fn send(&self, request: Request) -> Result<()> {
        self.tx
            .send(Message::Request(request))
            .map_err(|_| anyhow!("camera executor stopped"))
    }

    pub fn open(&self) -> Result<()> {
        self.send(Request::Open)
    }

    pub fn close(&self) -> Result<()> {
        self.send(Request::Close)
    }

    pub fn switch_camera(&self) -> Result<()> {
        self.send(Request::SwitchCamera)
    }

    pub fn request_still_capture(&self) -> Result<()> {
        self.send(Request::StillCapture)
    }

    pub fn set_zoom_level(&self, delta: f32) -> Result<()> {
        self.send(Request::Zoom(delta))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Request::Shutdown)
    }

    /// Send `step` now and every [`ZOOM_HOLD_INTERVAL`] until the returned
    /// guard is dropped.
    pub fn hold_zoom(&self, step: f32) -> Result<ZoomHold> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = stop.clone();
            let handle = self.clone();
            std::thread::Builder::new()
                .name("zoom-hold".to_string())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        if handle.set_zoom_level(step).is_err() {
                            break;
                        }
                        std::thread::sleep(ZOOM_HOLD_INTERVAL);
                    }
                })
                .context("spawn zoom hold")?
        };
        Ok(ZoomHold {
            stop,
            thread: Some(thread),
        })
    }
}

/// Held zoom control. Dropping it releases the control.
pub struct ZoomHold {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ZoomHold {
    pub fn release(self) {}
}

impl Drop for ZoomHold {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::backends::{StubCamera, StubScript};
    use crate::capture::{AeMode, Rect, RequestTemplate};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ListenerLog {
        states: Mutex<Vec<CaptureSessionState>>,
        fatal: Mutex<Vec<String>>,
        session: Mutex<Vec<String>>,
        photos: Mutex<Vec<std::path::PathBuf>>,
    }

    impl SessionListener for ListenerLog {
        fn on_state_changed(&self, state: CaptureSessionState) {
            self.states.lock().unwrap().push(state);
        }
        fn on_fatal_error(&self, error: &anyhow::Error) {
            self.fatal.lock().unwrap().push(format!("{:#}", error));
        }
        fn on_session_error(&self, error: &anyhow::Error) {
            self.session.lock().unwrap().push(format!("{:#}", error));
        }
        fn on_photo_saved(&self, path: &Path) {
            self.photos.lock().unwrap().push(path.to_path_buf());
        }
    }

    impl ListenerLog {
        fn wait_for(&self, state: CaptureSessionState) -> Result<()> {
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while std::time::Instant::now() < deadline {
                if self.states.lock().unwrap().contains(&state) {
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(anyhow!("state {} never reached", state))
        }
    }

    struct Fixture {
        controller: CaptureController,
        rx: Receiver<Message>,
        listener: Arc<ListenerLog>,
        script: StubScript,
    }

    impl Fixture {
        fn new(config: ControllerConfig) -> Self {
            let camera = StubCamera::new("stub://test");
            let script = camera.script();
            let listener = Arc::new(ListenerLog::default());
            let frames: FrameSink = Arc::new(|_: image::RgbImage| {});
            let (controller, rx) =
                CaptureController::new(Box::new(camera), config, listener.clone(), frames);
            Self {
                controller,
                rx,
                listener,
                script,
            }
        }

        fn request(&mut self, request: Request) {
            self.controller.process(Message::Request(request));
            self.controller.drain(&self.rx);
        }

        fn open_preview(&mut self) {
            self.request(Request::Open);
            assert_eq!(self.controller.state(), CaptureSessionState::PreviewActive);
        }
    }

    #[test]
    fn open_reaches_preview_via_opening() {
        let mut fx = Fixture::new(ControllerConfig::default());
        fx.controller.process(Message::Request(Request::Open));
        assert_eq!(fx.controller.state(), CaptureSessionState::Opening);
        fx.controller.drain(&fx.rx);
        assert_eq!(fx.controller.state(), CaptureSessionState::PreviewActive);

        let camera = fx.controller.camera().expect("camera selected");
        assert_eq!(camera.facing, Facing::Back);
        let request = fx.controller.repeating_request().expect("repeating request");
        assert_eq!(request.template, RequestTemplate::Preview);
        assert_eq!(request.crop_region, Some(camera.active_array));
        assert_eq!(
            *fx.listener.states.lock().unwrap(),
            vec![
                CaptureSessionState::Opening,
                CaptureSessionState::PreviewActive
            ]
        );
    }

    #[test]
    fn open_failure_is_fatal_and_closed() {
        let mut fx = Fixture::new(ControllerConfig::default());
        fx.script.fail_open("sensor busy");
        fx.request(Request::Open);
        assert_eq!(fx.controller.state(), CaptureSessionState::Closed);
        assert_eq!(fx.listener.fatal.lock().unwrap().len(), 1);
    }

    #[test]
    fn device_error_while_opening_is_fatal() {
        let mut fx = Fixture::new(ControllerConfig::default());
        fx.script.error_on_open("ERROR_CAMERA_DEVICE");
        fx.request(Request::Open);
        assert_eq!(fx.controller.state(), CaptureSessionState::Closed);
        let fatal = fx.listener.fatal.lock().unwrap();
        assert!(fatal[0].contains("ERROR_CAMERA_DEVICE"));
    }

    #[test]
    fn session_config_failure_stays_closed() {
        let mut fx = Fixture::new(ControllerConfig::default());
        fx.script.fail_session("surface abandoned");
        fx.request(Request::Open);
        assert_eq!(fx.controller.state(), CaptureSessionState::Closed);
        assert_eq!(fx.listener.session.lock().unwrap().len(), 1);
        assert!(fx.listener.fatal.lock().unwrap().is_empty());

        // Retry is caller-initiated and succeeds once the fault clears.
        fx.script.clear();
        fx.open_preview();
    }

    #[test]
    fn disconnect_closes_session() {
        let mut fx = Fixture::new(ControllerConfig::default());
        fx.open_preview();
        fx.script.disconnect();
        fx.controller.drain(&fx.rx);
        assert_eq!(fx.controller.state(), CaptureSessionState::Closed);
        assert!(fx.controller.repeating_request().is_none());
        assert_eq!(fx.listener.fatal.lock().unwrap().len(), 1);
    }

    #[test]
    fn still_capture_saves_photo_and_resumes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut fx = Fixture::new(ControllerConfig {
            photos: Some(PhotoStore::new(dir.path())),
            ..ControllerConfig::default()
        });
        fx.open_preview();

        fx.controller.process(Message::Request(Request::StillCapture));
        assert_eq!(fx.controller.state(), CaptureSessionState::StillCapturing);
        assert!(fx.controller.repeating_request().is_none());
        fx.controller.drain(&fx.rx);

        assert_eq!(fx.controller.state(), CaptureSessionState::PreviewActive);
        assert!(fx.controller.repeating_request().is_some());
        let photos = fx.listener.photos.lock().unwrap();
        assert_eq!(photos.len(), 1);
        assert!(photos[0].exists());
        Ok(())
    }

    #[test]
    fn failed_still_capture_resumes_preview() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut fx = Fixture::new(ControllerConfig {
            photos: Some(PhotoStore::new(dir.path())),
            ..ControllerConfig::default()
        });
        fx.open_preview();
        fx.script.fail_capture("ERROR_REPROCESS");

        fx.request(Request::StillCapture);
        assert_eq!(fx.controller.state(), CaptureSessionState::PreviewActive);
        assert!(fx.controller.repeating_request().is_some());
        assert!(fx.script.repeating_active());
        assert!(fx.listener.photos.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn still_capture_outside_preview_is_ignored() {
        let mut fx = Fixture::new(ControllerConfig::default());
        fx.request(Request::StillCapture);
        assert_eq!(fx.controller.state(), CaptureSessionState::Closed);
        assert!(fx.listener.states.lock().unwrap().is_empty());
    }

    #[test]
    fn late_capture_result_after_close_is_discarded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut fx = Fixture::new(ControllerConfig {
            photos: Some(PhotoStore::new(dir.path())),
            ..ControllerConfig::default()
        });
        fx.open_preview();
        fx.controller.process(Message::Request(Request::StillCapture));
        fx.controller.process(Message::Request(Request::Close));
        fx.controller.drain(&fx.rx);

        assert_eq!(fx.controller.state(), CaptureSessionState::Closed);
        assert!(fx.listener.photos.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn zoom_reissues_preview_and_survives_close() {
        let mut fx = Fixture::new(ControllerConfig::default());
        fx.open_preview();
        fx.request(Request::Zoom(1.0));
        assert_eq!(fx.controller.zoom_level(), 2.0);

        let active = fx.controller.camera().map(|c| c.active_array);
        let crop = fx
            .controller
            .repeating_request()
            .and_then(|r| r.crop_region);
        let expected =
            active.map(|a| Rect::new(a.width / 4, a.height / 4, a.width / 2, a.height / 2));
        assert_eq!(crop, expected);
        assert_eq!(fx.script.last_repeating().and_then(|r| r.crop_region), expected);

        fx.request(Request::Close);
        assert_eq!(fx.controller.zoom_level(), 2.0);
        fx.open_preview();
        assert_eq!(
            fx.controller.repeating_request().and_then(|r| r.crop_region),
            expected
        );
    }

    #[test]
    fn zoom_is_clamped() {
        let mut fx = Fixture::new(ControllerConfig {
            max_zoom: 4.0,
            ..ControllerConfig::default()
        });
        fx.request(Request::Zoom(1e6));
        assert_eq!(fx.controller.zoom_level(), 4.0);
        fx.request(Request::Zoom(-1e6));
        assert_eq!(fx.controller.zoom_level(), 1.0);
    }

    #[test]
    fn switch_camera_reopens_other_facing() {
        let mut fx = Fixture::new(ControllerConfig::default());
        fx.open_preview();
        fx.request(Request::SwitchCamera);
        assert_eq!(fx.controller.state(), CaptureSessionState::PreviewActive);
        assert_eq!(fx.controller.facing(), Facing::Front);
        assert_eq!(
            fx.controller.camera().map(|c| c.facing),
            Some(Facing::Front)
        );
        let states = fx.listener.states.lock().unwrap();
        assert!(states.ends_with(&[
            CaptureSessionState::Closed,
            CaptureSessionState::Opening,
            CaptureSessionState::PreviewActive
        ]));
    }

    #[test]
    fn stale_events_from_previous_device_are_dropped() {
        let mut fx = Fixture::new(ControllerConfig::default());
        fx.open_preview();
        fx.controller.process(Message::Device {
            generation: 0,
            event: DeviceEvent::Disconnected,
        });
        assert_eq!(fx.controller.state(), CaptureSessionState::PreviewActive);
    }

    #[test]
    fn auto_exposure_on_stub_preview() {
        let mut fx = Fixture::new(ControllerConfig::default());
        fx.open_preview();
        let request = fx.controller.repeating_request().cloned();
        assert_eq!(request.and_then(|r| r.ae_mode), Some(AeMode::On));
    }

    #[test]
    fn executor_thread_processes_requests() -> Result<()> {
        let camera = StubCamera::new("stub://executor");
        let script = camera.script();
        let listener = Arc::new(ListenerLog::default());
        let frames: FrameSink = Arc::new(|_: image::RgbImage| {});
        let (controller, rx) = CaptureController::new(
            Box::new(camera),
            ControllerConfig::default(),
            listener.clone(),
            frames,
        );
        let (handle, thread) = controller.spawn(rx)?;
        handle.open()?;
        listener.wait_for(CaptureSessionState::PreviewActive)?;
        handle.set_zoom_level(0.5)?;
        handle.shutdown()?;
        thread.join().map_err(|_| anyhow!("executor panicked"))?;

        let states = listener.states.lock().unwrap().clone();
        assert_eq!(
            states,
            vec![
                CaptureSessionState::Opening,
                CaptureSessionState::PreviewActive,
                CaptureSessionState::Closed
            ]
        );
        assert!(!script.repeating_active());
        assert!(handle.open().is_err());
        Ok(())
    }

    #[test]
    fn held_zoom_sends_steps_until_released() -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let handle = CaptureHandle { tx };
        let hold = handle.hold_zoom(ZOOM_STEP)?;
        std::thread::sleep(Duration::from_millis(180));
        hold.release();
        let sent: Vec<Message> = rx.try_iter().collect();
        assert!(sent.len() >= 2, "expected repeated steps, got {}", sent.len());
        assert!(sent
            .iter()
            .all(|m| *m == Message::Request(Request::Zoom(ZOOM_STEP))));
        std::thread::sleep(Duration::from_millis(120));
        assert!(rx.try_recv().is_err());
        Ok(())
    }
}
