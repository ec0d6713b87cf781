use opencv::calib3d::{
    CALIB_CB_ADAPTIVE_THRESH, CALIB_CB_ASYMMETRIC_GRID, CALIB_CB_CLUSTERING, CALIB_CB_FAST_CHECK,
    CALIB_CB_NORMALIZE_IMAGE,
};
use opencv::core::{Point3f, Size, Vector};

/// 标定板类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Checkerboard,
    AsymmetricCircleGrid,
}

impl PatternKind {
    pub fn from_selector(selector: i32) -> Option<Self> {
        match selector {
            0 => Some(Self::Checkerboard),
            1 => Some(Self::AsymmetricCircleGrid),
            _ => None,
        }
    }
}

/// Static description of the calibration target. Pure data, immutable once
/// constructed; the reference points are generated row-major from the grid
/// geometry and never change afterwards.
#[derive(Debug, Clone)]
pub struct PatternSpec {
    pub kind: PatternKind,
    pub board_size: Size,
    pub spacing: f32,
    pub detector_flags: i32,
    pub downsample_factor: i32,
    reference_points: Vector<Point3f>,
}

impl PatternSpec {
    pub fn new(kind: PatternKind, board_size: Size, spacing: f32, downsample_factor: i32) -> Self {
        assert!(board_size.width >= 2 && board_size.height >= 2);
        let detector_flags = match kind {
            PatternKind::Checkerboard => {
                CALIB_CB_ADAPTIVE_THRESH + CALIB_CB_NORMALIZE_IMAGE + CALIB_CB_FAST_CHECK
            }
            PatternKind::AsymmetricCircleGrid => CALIB_CB_ASYMMETRIC_GRID + CALIB_CB_CLUSTERING,
        };

        let mut reference_points = Vector::<Point3f>::new();
        for i in 0..board_size.height {
            for j in 0..board_size.width {
                let p = match kind {
                    PatternKind::Checkerboard => {
                        Point3f::new(j as f32 * spacing, i as f32 * spacing, 0.0)
                    }
                    // 非对称圆网格：奇数行偏移半个间距
                    PatternKind::AsymmetricCircleGrid => {
                        Point3f::new((2 * j + i % 2) as f32 * spacing, i as f32 * spacing, 0.0)
                    }
                };
                reference_points.push(p);
            }
        }

        Self {
            kind,
            board_size,
            spacing,
            detector_flags,
            downsample_factor,
            reference_points,
        }
    }

    /// Default target geometry of the calibration tool: 9x6 checkerboard at
    /// 23 units, or 4x11 asymmetric circle grid at 20 units.
    pub fn with_defaults(kind: PatternKind) -> Self {
        match kind {
            PatternKind::Checkerboard => Self::new(kind, Size::new(9, 6), 23.0, 4),
            PatternKind::AsymmetricCircleGrid => Self::new(kind, Size::new(4, 11), 20.0, 4),
        }
    }

    pub fn reference_points(&self) -> &Vector<Point3f> {
        &self.reference_points
    }

    /// Number of points a complete detection must contain.
    pub fn point_count(&self) -> usize {
        (self.board_size.width * self.board_size.height) as usize
    }

    /// Grid column held fixed by the estimator to resolve scale ambiguity.
    pub fn fixed_point_index(&self) -> i32 {
        self.board_size.width - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_points_match_grid_size() {
        for kind in [PatternKind::Checkerboard, PatternKind::AsymmetricCircleGrid] {
            let spec = PatternSpec::with_defaults(kind);
            assert_eq!(
                spec.reference_points().len(),
                (spec.board_size.width * spec.board_size.height) as usize
            );
            assert_eq!(spec.reference_points().len(), spec.point_count());
        }
    }

    #[test]
    fn checkerboard_points_are_row_major_lattice() {
        let spec = PatternSpec::new(PatternKind::Checkerboard, Size::new(4, 3), 10.0, 4);
        for i in 0..3 {
            for j in 0..4 {
                let p = spec.reference_points().get((i * 4 + j) as usize).unwrap();
                assert_eq!(p.x, j as f32 * 10.0);
                assert_eq!(p.y, i as f32 * 10.0);
                assert_eq!(p.z, 0.0);
            }
        }
    }

    #[test]
    fn asymmetric_grid_offsets_odd_rows() {
        let spec = PatternSpec::new(PatternKind::AsymmetricCircleGrid, Size::new(4, 5), 20.0, 4);
        // row 0 even: x = 2j * spacing
        let p = spec.reference_points().get(1).unwrap();
        assert_eq!(p.x, 40.0);
        // row 1 odd: x = (2j + 1) * spacing
        let p = spec.reference_points().get(4).unwrap();
        assert_eq!(p.x, 20.0);
        assert_eq!(p.y, 20.0);
    }

    #[test]
    fn selector_maps_to_kind() {
        assert_eq!(PatternKind::from_selector(0), Some(PatternKind::Checkerboard));
        assert_eq!(
            PatternKind::from_selector(1),
            Some(PatternKind::AsymmetricCircleGrid)
        );
        assert_eq!(PatternKind::from_selector(2), None);
    }
}
