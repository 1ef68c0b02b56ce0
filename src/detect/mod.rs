mod backend;
mod backends;
mod postprocess;
mod result;

pub use backend::{
    InferenceService, ModelShape, DEFAULT_INPUT_HEIGHT, DEFAULT_INPUT_WIDTH, DEFAULT_OUTPUT_SHAPE,
};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use postprocess::{non_max_suppression, post_process};
pub use result::{validate_output_shape, BoundingBox, Detection, RawOutput};
