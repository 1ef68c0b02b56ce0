use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::{InferenceService, ModelShape};
use crate::detect::result::{Detection, RawOutput, CANDIDATE_ATTRIBUTES, CONFIDENCE_INDEX};

/// Luma at or above which a pixel counts as part of the bright target.
const BRIGHT_LUMA: u8 = 200;

enum StubMode {
    /// Report the bounding box of bright pixels as the single candidate.
    Bright,
    /// Return the same candidates for every frame.
    Fixed(Vec<Detection>),
    /// Fail every call.
    Fail(String),
}

/// Stub inference service for tests and the synthetic camera.
///
/// The default mode finds the bright square painted by the `stub://` camera
/// scene, so the full pipeline can run without a model file.
pub struct StubBackend {
    shape: ModelShape,
    mode: StubMode,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            shape: ModelShape::default(),
            mode: StubMode::Bright,
        }
    }

    /// Always return `candidates` (padded to the declared output width).
    pub fn fixed(candidates: Vec<Detection>) -> Self {
        Self {
            shape: ModelShape::default(),
            mode: StubMode::Fixed(candidates),
        }
    }

    /// Fail every inference call with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            shape: ModelShape::default(),
            mode: StubMode::Fail(message.to_string()),
        }
    }

    pub fn with_shape(mut self, shape: ModelShape) -> Self {
        self.shape = shape;
        self
    }

    fn output_for(&self, candidates: &[Detection]) -> Result<RawOutput> {
        let n = self.shape.output[2].max(candidates.len());
        let mut data = vec![0.0f32; CANDIDATE_ATTRIBUTES * n];
        for (i, det) in candidates.iter().enumerate() {
            data[i] = det.center_x;
            data[n + i] = det.center_y;
            data[2 * n + i] = det.width;
            data[3 * n + i] = det.height;
            data[CONFIDENCE_INDEX * n + i] = det.confidence;
        }
        RawOutput::new([1, CANDIDATE_ATTRIBUTES, n], data)
    }

    fn find_bright(&self, input: &RgbImage) -> Option<Detection> {
        let (w, h) = input.dimensions();
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        let mut bright = 0u64;
        for (x, y, pixel) in input.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let luma = (r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000;
            if luma < BRIGHT_LUMA as u32 {
                continue;
            }
            bright += 1;
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }

        let (x0, y0, x1, y1) = bounds?;
        let box_w = (x1 - x0 + 1) as f32;
        let box_h = (y1 - y0 + 1) as f32;
        let density = bright as f32 / (box_w * box_h);
        Some(Detection {
            center_x: (x0 as f32 + box_w / 2.0) / w as f32,
            center_y: (y0 as f32 + box_h / 2.0) / h as f32,
            width: box_w / w as f32,
            height: box_h / h as f32,
            confidence: density.clamp(0.0, 1.0),
        })
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceService for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn shape(&self) -> ModelShape {
        self.shape
    }

    fn infer(&mut self, input: &RgbImage) -> Result<RawOutput> {
        if input.dimensions() != (self.shape.input_width, self.shape.input_height) {
            return Err(anyhow!(
                "input {}x{} does not match model input {}x{}",
                input.width(),
                input.height(),
                self.shape.input_width,
                self.shape.input_height
            ));
        }
        match &self.mode {
            StubMode::Bright => {
                let found = self.find_bright(input);
                self.output_for(found.as_slice())
            }
            StubMode::Fixed(candidates) => self.output_for(candidates),
            StubMode::Fail(message) => Err(anyhow!("{}", message)),
        }
    }
}
