use anyhow::Result;
use image::RgbImage;

use super::result::RawOutput;

/// Model input size used when no inference service is attached.
pub const DEFAULT_INPUT_WIDTH: u32 = 416;
pub const DEFAULT_INPUT_HEIGHT: u32 = 416;
/// Output shape assumed when no inference service is attached.
pub const DEFAULT_OUTPUT_SHAPE: [usize; 3] = [1, 5, 3549];

/// Declared tensor shapes of an inference service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelShape {
    pub input_width: u32,
    pub input_height: u32,
    pub output: [usize; 3],
}

impl Default for ModelShape {
    fn default() -> Self {
        Self {
            input_width: DEFAULT_INPUT_WIDTH,
            input_height: DEFAULT_INPUT_HEIGHT,
            output: DEFAULT_OUTPUT_SHAPE,
        }
    }
}

/// Detector model behind a narrow tensor-in, tensor-out contract.
///
/// The pipeline letterboxes every frame to `shape().input_width` x
/// `shape().input_height` before calling `infer`, and expects a `[1, 5, N]`
/// output where rows 0..4 are center-x, center-y, width, height in
/// input-normalized units and row 4 is confidence.
///
/// Channel order and normalization are the service's own concern.
pub trait InferenceService: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Declared input/output shapes. Must not change after construction.
    fn shape(&self) -> ModelShape;

    /// Run the model on one letterboxed image.
    fn infer(&mut self, input: &RgbImage) -> Result<RawOutput>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
