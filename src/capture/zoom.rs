//! Digital zoom level and the sensor crop it implies.

use super::Rect;

/// Upper zoom bound when the configuration does not override it.
pub const DEFAULT_MAX_ZOOM: f32 = 10.0;

/// Stored zoom level, always within `[1.0, max]`.
///
/// The level outlives device sessions: closing and reopening the camera
/// keeps the operator's zoom.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoomState {
    level: f32,
    max: f32,
}

impl ZoomState {
    /// `max` below 1.0 (or non-finite) is treated as 1.0.
    pub fn new(max: f32) -> Self {
        let max = if max.is_finite() { max.max(1.0) } else { 1.0 };
        Self { level: 1.0, max }
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn is_zoomed(&self) -> bool {
        self.level > 1.0
    }

    /// Apply `delta` and clamp. Non-finite deltas leave the level unchanged.
    pub fn adjust(&mut self, delta: f32) -> f32 {
        if delta.is_finite() {
            self.level = (self.level + delta).clamp(1.0, self.max);
        }
        self.level
    }

    /// Set an absolute level, clamped into range.
    pub fn set(&mut self, level: f32) -> f32 {
        if level.is_finite() {
            self.level = level.clamp(1.0, self.max);
        }
        self.level
    }

    /// Crop of `active` for the current level: `active / level`, centered.
    pub fn crop_region(&self, active: Rect) -> Rect {
        let width = ((active.width as f32 / self.level) as u32).clamp(1, active.width.max(1));
        let height = ((active.height as f32 / self.level) as u32).clamp(1, active.height.max(1));
        Rect::new(
            active.left + (active.width.saturating_sub(width)) / 2,
            active.top + (active.height.saturating_sub(height)) / 2,
            width,
            height,
        )
    }
}

impl Default for ZoomState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ZOOM)
    }
}
