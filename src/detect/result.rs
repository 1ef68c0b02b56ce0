use anyhow::{anyhow, Result};

/// Number of attributes per candidate in the raw output: cx, cy, w, h, confidence.
pub const CANDIDATE_ATTRIBUTES: usize = 5;

/// Index of the confidence row along the attribute axis.
pub const CONFIDENCE_INDEX: usize = 4;

/// One candidate in model-normalized center form.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl Detection {
    /// Corner form in the same coordinate space, with `x1 <= x2` and
    /// `y1 <= y2` even for negative extents.
    pub fn to_box(&self) -> BoundingBox {
        let half_w = self.width.abs() / 2.0;
        let half_h = self.height.abs() / 2.0;
        BoundingBox {
            x1: self.center_x - half_w,
            y1: self.center_y - half_h,
            x2: self.center_x + half_w,
            y2: self.center_y + half_h,
            confidence: self.confidence,
            class_id: 0,
        }
    }
}

/// Corner-form box. `class_id` is always 0; only one object class is tracked.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// Raw detector output tensor of shape `[1, 5, N]`, stored row-major.
///
/// Row `k` holds attribute `k` for all `N` candidates: rows 0..4 are
/// center-x, center-y, width, height (input-normalized) and row 4 is confidence.
#[derive(Clone, Debug, PartialEq)]
pub struct RawOutput {
    shape: [usize; 3],
    data: Vec<f32>,
}

impl RawOutput {
    pub fn new(shape: [usize; 3], data: Vec<f32>) -> Result<Self> {
        validate_output_shape(&shape)?;
        let expected = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| anyhow!("output shape {:?} overflows", shape))?;
        if data.len() != expected {
            return Err(anyhow!(
                "output tensor length mismatch: shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            ));
        }
        Ok(Self { shape, data })
    }

    /// Build a `[1, 5, N]` tensor from center-form candidates.
    pub fn from_candidates(candidates: &[Detection]) -> Self {
        let n = candidates.len();
        let mut data = vec![0.0f32; CANDIDATE_ATTRIBUTES * n];
        for (i, det) in candidates.iter().enumerate() {
            data[i] = det.center_x;
            data[n + i] = det.center_y;
            data[2 * n + i] = det.width;
            data[3 * n + i] = det.height;
            data[CONFIDENCE_INDEX * n + i] = det.confidence;
        }
        Self {
            shape: [1, CANDIDATE_ATTRIBUTES, n],
            data,
        }
    }

    /// Empty output with `n` zero-confidence candidates.
    pub fn zeros(n: usize) -> Self {
        Self {
            shape: [1, CANDIDATE_ATTRIBUTES, n],
            data: vec![0.0; CANDIDATE_ATTRIBUTES * n],
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn num_candidates(&self) -> usize {
        self.shape[2]
    }

    fn at(&self, attribute: usize, index: usize) -> f32 {
        self.data[attribute * self.shape[2] + index]
    }

    /// Confidence of candidate `index`.
    pub fn confidence(&self, index: usize) -> f32 {
        self.at(CONFIDENCE_INDEX, index)
    }

    /// Candidate `index` in center form.
    pub fn candidate(&self, index: usize) -> Detection {
        Detection {
            center_x: self.at(0, index),
            center_y: self.at(1, index),
            width: self.at(2, index),
            height: self.at(3, index),
            confidence: self.at(CONFIDENCE_INDEX, index),
        }
    }

    pub fn candidates(&self) -> impl Iterator<Item = Detection> + '_ {
        (0..self.num_candidates()).map(|i| self.candidate(i))
    }
}

/// Check the `[1, >=5, N]` output contract.
pub fn validate_output_shape(shape: &[usize]) -> Result<()> {
    if shape.len() != 3 {
        return Err(anyhow!(
            "detector output must have rank 3, got shape {:?}",
            shape
        ));
    }
    if shape[0] != 1 {
        return Err(anyhow!(
            "detector output batch must be 1, got shape {:?}",
            shape
        ));
    }
    if shape[1] < CANDIDATE_ATTRIBUTES {
        return Err(anyhow!(
            "detector output needs at least {} attributes, got shape {:?}",
            CANDIDATE_ATTRIBUTES,
            shape
        ));
    }
    Ok(())
}
