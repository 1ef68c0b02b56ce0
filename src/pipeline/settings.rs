use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
pub const DEFAULT_OVERLAY_COLOR: [u8; 3] = [0, 39, 76];
pub const DEFAULT_OVERLAY_THICKNESS: u32 = 10;
pub const DEFAULT_LABEL: &str = "Detected Cube";

/// Per-frame knobs read by the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub detection_enabled: bool,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub overlay_enabled: bool,
    pub overlay_color: [u8; 3],
    pub overlay_thickness: u32,
    pub label: String,
    pub export_enabled: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            detection_enabled: true,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            overlay_enabled: true,
            overlay_color: DEFAULT_OVERLAY_COLOR,
            overlay_thickness: DEFAULT_OVERLAY_THICKNESS,
            label: DEFAULT_LABEL.to_string(),
            export_enabled: false,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(anyhow!(
                "iou threshold must be within [0, 1], got {}",
                self.iou_threshold
            ));
        }
        if self.overlay_thickness == 0 {
            return Err(anyhow!("overlay thickness must be greater than zero"));
        }
        Ok(())
    }
}

/// Settings shared between the host (writer) and the pipeline (reader).
///
/// The pipeline takes a snapshot at the start of each frame, so a change
/// applies from the next accepted frame on.
#[derive(Clone, Debug, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<PipelineSettings>>,
}

impl SharedSettings {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn snapshot(&self) -> Result<PipelineSettings> {
        self.inner
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| anyhow!("pipeline settings lock poisoned"))
    }

    /// Apply `f` to the settings; rejected edits leave the old values in place.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut PipelineSettings),
    {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| anyhow!("pipeline settings lock poisoned"))?;
        let mut next = guard.clone();
        f(&mut next);
        next.validate()?;
        *guard = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_rejects_out_of_range_thresholds() -> Result<()> {
        let shared = SharedSettings::default();
        assert!(shared.update(|s| s.confidence_threshold = 1.5).is_err());
        assert_eq!(
            shared.snapshot()?.confidence_threshold,
            DEFAULT_CONFIDENCE_THRESHOLD
        );

        shared.update(|s| {
            s.iou_threshold = 0.3;
            s.overlay_enabled = false;
        })?;
        let snap = shared.snapshot()?;
        assert_eq!(snap.iou_threshold, 0.3);
        assert!(!snap.overlay_enabled);
        Ok(())
    }
}
