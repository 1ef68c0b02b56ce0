//! Confidence filtering and greedy non-max suppression.

use crate::geometry::iou;

use super::result::{BoundingBox, Detection, RawOutput};

/// Reduce raw detector output to the single best detection.
///
/// Candidates below `confidence_threshold` are dropped, the rest go through
/// greedy NMS at `iou_threshold`, and the highest-confidence survivor is
/// returned. `None` means nothing passed the threshold.
pub fn post_process(
    raw: &RawOutput,
    confidence_threshold: f32,
    iou_threshold: f32,
) -> Option<Detection> {
    let candidates: Vec<Detection> = raw
        .candidates()
        .filter(|det| det.confidence >= confidence_threshold)
        .collect();
    if candidates.is_empty() {
        return None;
    }

    non_max_suppression(candidates, iou_threshold)
        .into_iter()
        .next()
}

/// Greedy NMS. Returns survivors ordered by descending confidence.
///
/// A candidate is suppressed only when its IoU with a kept box is strictly
/// greater than `iou_threshold`.
pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    // Stable sort keeps filter order among equal confidences.
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut remaining: Vec<(Detection, BoundingBox)> = candidates
        .into_iter()
        .map(|det| (det, det.to_box()))
        .collect();
    let mut kept = Vec::new();

    while !remaining.is_empty() {
        let (best, best_box) = remaining.remove(0);
        kept.push(best);
        remaining.retain(|(_, candidate_box)| iou(&best_box, candidate_box) <= iou_threshold);
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(cx: f32, cy: f32, w: f32, h: f32, confidence: f32) -> Detection {
        Detection {
            center_x: cx,
            center_y: cy,
            width: w,
            height: h,
            confidence,
        }
    }

    #[test]
    fn single_candidate_passes_through_unchanged() {
        let only = det(0.5, 0.5, 0.2, 0.2, 0.9);
        let raw = RawOutput::from_candidates(&[only]);
        assert_eq!(post_process(&raw, 0.5, 0.5), Some(only));
    }

    #[test]
    fn nothing_above_threshold_returns_none() {
        let raw = RawOutput::from_candidates(&[
            det(0.5, 0.5, 0.2, 0.2, 0.3),
            det(0.2, 0.2, 0.1, 0.1, 0.49),
        ]);
        assert_eq!(post_process(&raw, 0.5, 0.5), None);
        assert_eq!(post_process(&RawOutput::zeros(3549), 0.5, 0.5), None);
    }

    #[test]
    fn overlapping_lower_confidence_is_suppressed() {
        let strong = det(0.5, 0.5, 0.2, 0.2, 0.9);
        let weak = det(0.502, 0.501, 0.2, 0.2, 0.8);
        assert!(iou(&strong.to_box(), &weak.to_box()) > 0.9);

        let raw = RawOutput::from_candidates(&[weak, strong]);
        assert_eq!(post_process(&raw, 0.5, 0.5), Some(strong));

        let kept = non_max_suppression(vec![weak, strong], 0.5);
        assert_eq!(kept, vec![strong]);
    }

    #[test]
    fn inverted_candidate_still_yields_ordered_box() {
        let raw = RawOutput::from_candidates(&[det(0.5, 0.5, -0.2, 0.2, 0.9)]);
        let best = post_process(&raw, 0.5, 0.5);
        assert!(best.is_some());
        let b = crate::geometry::rescale_to_source(&best.unwrap(), 1000, 1000, (0, 0), 1000, 1000);
        assert!(b.x1 <= b.x2 && b.y1 <= b.y2);
    }

    #[test]
    fn disjoint_candidates_all_survive_nms() {
        let a = det(0.2, 0.2, 0.1, 0.1, 0.7);
        let b = det(0.8, 0.8, 0.1, 0.1, 0.95);
        let kept = non_max_suppression(vec![a, b], 0.5);
        assert_eq!(kept, vec![b, a]);

        let raw = RawOutput::from_candidates(&[a, b]);
        assert_eq!(post_process(&raw, 0.5, 0.5), Some(b));
    }

    #[test]
    fn iou_equal_to_threshold_is_not_suppressed() {
        // Unit squares offset by half a width: IoU = 0.5 / 1.5 = 1/3 exactly.
        let a = det(0.5, 0.5, 0.25, 0.25, 0.9);
        let b = det(0.625, 0.5, 0.25, 0.25, 0.8);
        let overlap = iou(&a.to_box(), &b.to_box());

        let kept = non_max_suppression(vec![a, b], overlap);
        assert_eq!(kept.len(), 2);

        let kept = non_max_suppression(vec![a, b], overlap - 1e-4);
        assert_eq!(kept, vec![a]);
    }

    #[test]
    fn post_process_is_idempotent() {
        let raw = RawOutput::from_candidates(&[
            det(0.3, 0.3, 0.2, 0.2, 0.6),
            det(0.31, 0.3, 0.2, 0.2, 0.85),
            det(0.7, 0.7, 0.1, 0.3, 0.55),
        ]);
        let first = post_process(&raw, 0.5, 0.45);
        let second = post_process(&raw, 0.5, 0.45);
        assert_eq!(first, second);
        assert_eq!(first.map(|d| d.confidence), Some(0.85));
    }

    #[test]
    fn threshold_is_inclusive() {
        let edge = det(0.5, 0.5, 0.2, 0.2, 0.5);
        let raw = RawOutput::from_candidates(&[edge]);
        assert_eq!(post_process(&raw, 0.5, 0.5), Some(edge));
    }
}
