//! framegate: live camera object detection
//!
//! Preview frames from a camera are letterboxed to a detection model's input
//! size, run through inference, reduced to the single best box by
//! confidence filtering and non-max suppression, and drawn back onto the
//! source frame. Processed model-input frames can be recorded to a video file
//! and still photos can be captured from the live session.
//!
//! # Module Structure
//!
//! - `geometry`: letterbox transform, inverse rescale, IoU
//! - `detect`: raw model output, post-processing, inference backends
//! - `pipeline`: single-flight frame processor and overlay rendering
//! - `capture`: camera session state machine, zoom, still capture, camera backends
//! - `export`: video export sinks and the recording lifecycle
//! - `session`: wires camera frames to the pipeline, consumer, and recorder
//! - `config`: daemon configuration

pub mod capture;
pub mod config;
pub mod detect;
pub mod export;
pub mod geometry;
pub mod pipeline;
pub mod session;

pub use capture::{
    CaptureController, CaptureHandle, CaptureSessionState, Facing, Rect, Request, SessionListener,
    Size, ZoomState,
};
pub use config::FramegateConfig;
pub use detect::{
    non_max_suppression, post_process, BoundingBox, Detection, InferenceService, ModelShape,
    RawOutput,
};
pub use export::{ExportSink, Recorder};
pub use geometry::{compute_letterbox, iou, letterbox_image, rescale_to_source, Letterbox};
pub use pipeline::{FrameProcessor, PipelineSettings, ProcessedFrame, SharedSettings};
pub use session::LiveSession;
