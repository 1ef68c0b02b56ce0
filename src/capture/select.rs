use super::{CameraCharacteristics, Facing, Size};

/// Preferred preview/still resolution.
pub const TARGET_SIZE: Size = Size::new(1280, 720);

/// Pick the camera matching `facing`, falling back to the first device.
pub fn select_camera(
    cameras: &[CameraCharacteristics],
    facing: Facing,
) -> Option<&CameraCharacteristics> {
    cameras
        .iter()
        .find(|camera| camera.facing == facing)
        .or_else(|| cameras.first())
}

/// Exact `target` if supported, otherwise the size with the fewest pixels.
pub fn choose_optimal_size(sizes: &[Size], target: Size) -> Option<Size> {
    if sizes.contains(&target) {
        return Some(target);
    }
    sizes.iter().copied().min_by_key(Size::pixels)
}
