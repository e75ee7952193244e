//! Common test fixtures for cutout tests.

use std::collections::BTreeMap;

use geo_cutout::{Coordinates, CutoutParams};

/// Common bounding boxes as `(x0, x1, y0, y1)` ranges.
pub mod bbox {
    /// A 3x2 cell window at the default 0.25 degree step.
    pub const TINY: (f64, f64, f64, f64) = (0.0, 0.5, 45.0, 45.25);

    /// A range containing no 0.25 degree lattice points.
    pub const BETWEEN_POINTS: (f64, f64, f64, f64) = (0.01, 0.02, 45.01, 45.02);
}

/// Construction parameters for a one-day cutout over `bbox`.
pub fn params_for(bbox: (f64, f64, f64, f64)) -> CutoutParams {
    CutoutParams {
        x: Some((bbox.0, bbox.1)),
        y: Some((bbox.2, bbox.3)),
        time: Some("2019-01-01".to_string()),
        dx: None,
        dy: None,
        dt: Some("h".to_string()),
        extra: BTreeMap::new(),
    }
}

/// Parameters for the 3x2 [`bbox::TINY`] cutout.
pub fn tiny_params() -> CutoutParams {
    params_for(bbox::TINY)
}

/// Spatial-only frame with `nx` by `ny` cells starting at the origin.
pub fn spatial_frame(nx: usize, ny: usize, step: f64) -> Coordinates {
    Coordinates::spatial(
        (0..nx).map(|i| i as f64 * step).collect(),
        (0..ny).map(|j| j as f64 * step).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiny_params_shape() {
        let (coords, _) = tiny_params().build(0.25).unwrap();
        assert_eq!(coords.x, vec![0.0, 0.25, 0.5]);
        assert_eq!(coords.y, vec![45.0, 45.25]);
        assert_eq!(coords.time.map(|t| t.len()), Some(24));
    }

    #[test]
    fn test_between_points_is_empty() {
        assert!(params_for(bbox::BETWEEN_POINTS).build(0.25).is_err());
    }

    #[test]
    fn test_spatial_frame() {
        let frame = spatial_frame(4, 2, 0.5);
        assert_eq!(frame.x, vec![0.0, 0.5, 1.0, 1.5]);
        assert_eq!(frame.dy(), Some(0.5));
    }
}
