//! Bounding-box conventions and keypoint-derived boxes.

use ndarray::{s, Array2, Axis};

use crate::config::BboxMargin;

/// left, top, right, bottom -> left, top, width, height.
pub fn ltrb_to_ltwh(ltrb: [f64; 4]) -> [f64; 4] {
    let [l, t, r, b] = ltrb;
    [l, t, r - l, b - t]
}

/// The smallest ltwh box enclosing every keypoint with confidence > 0,
/// padded by `margin`. `None` when no keypoint is visible.
pub fn bbox_from_keypoints(keypoints_xyc: &Array2<f64>, margin: BboxMargin) -> Option<[f64; 4]> {
    let visible: Vec<_> = keypoints_xyc
        .axis_iter(Axis(0))
        .filter(|kp| kp.len() >= 3 && kp[2] > 0.0)
        .collect();
    if visible.is_empty() {
        return None;
    }

    let (mut left, mut top) = (f64::INFINITY, f64::INFINITY);
    let (mut right, mut bottom) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for kp in &visible {
        left = left.min(kp[0]);
        top = top.min(kp[1]);
        right = right.max(kp[0]);
        bottom = bottom.max(kp[1]);
    }

    let (w, h) = (right - left, bottom - top);
    left -= margin.horizontal * w;
    right += margin.horizontal * w;
    top -= margin.top * h;
    bottom += margin.bottom * h;

    Some([left, top, right - left, bottom - top])
}

/// Mean of the confidence column of an (N, 3) keypoint array; 0 for N = 0.
pub fn mean_keypoint_confidence(keypoints_xyc: &Array2<f64>) -> f64 {
    if keypoints_xyc.ncols() < 3 {
        return 0.0;
    }
    keypoints_xyc.slice(s![.., 2]).mean().unwrap_or(0.0)
}
