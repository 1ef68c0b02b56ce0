#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::{InferenceService, ModelShape};
use crate::detect::result::{validate_output_shape, RawOutput};

/// Tract-based inference service for ONNX detector models.
///
/// Input is NCHW `f32` normalized to 0..1. The model must declare a concrete
/// `[1, 5, N]` output shape once the input fact is fixed.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    shape: ModelShape,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for `width`x`height` input.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let output_fact = model
            .model()
            .output_fact(0)
            .context("model declares no outputs")?;
        let dims = output_fact
            .shape
            .as_concrete()
            .ok_or_else(|| anyhow!("model output shape is not concrete"))?
            .to_vec();
        validate_output_shape(&dims)?;

        log::info!(
            "TractBackend: loaded {} (input {}x{}, output {:?})",
            model_path.display(),
            width,
            height,
            dims
        );

        Ok(Self {
            model,
            shape: ModelShape {
                input_width: width,
                input_height: height,
                output: [dims[0], dims[1], dims[2]],
            },
        })
    }

    fn build_input(&self, input: &RgbImage) -> Result<Tensor> {
        let (width, height) = input.dimensions();
        if width != self.shape.input_width || height != self.shape.input_height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                width,
                height,
                self.shape.input_width,
                self.shape.input_height
            ));
        }

        let tensor = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, channel, y, x)| input.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );

        Ok(tensor.into_tensor())
    }
}

impl InferenceService for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn shape(&self) -> ModelShape {
        self.shape
    }

    fn infer(&mut self, input: &RgbImage) -> Result<RawOutput> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let data: Vec<f32> = view.iter().copied().collect();
        RawOutput::new(self.shape.output, data)
    }
}
