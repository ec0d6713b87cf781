use anyhow::Result;
use opencv::calib3d::{self, CirclesGridFinderParameters};
use opencv::core::{
    Mat, Point2f, Ptr, Size, TermCriteria, TermCriteria_COUNT, TermCriteria_EPS, Vector,
};
use opencv::features2d::{Feature2D, SimpleBlobDetector, SimpleBlobDetector_Params};
use opencv::imgproc::{self, COLOR_BGR2GRAY, INTER_LINEAR};
use opencv::prelude::*;

use crate::pattern::{PatternKind, PatternSpec};

/// 相机id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraId {
    /// Also "the" camera in single-camera modes.
    Left,
    Right,
}

/// One camera's detected point set for a single frame, aligned
/// index-for-index with the pattern's reference points.
#[derive(Debug, Clone)]
pub struct Observation {
    pub camera: CameraId,
    pub points: Vector<Point2f>,
}

impl Observation {
    /// Partial detections never count: the estimator needs exactly one image
    /// point per reference point, in the same order.
    pub fn is_valid(&self, spec: &PatternSpec) -> bool {
        self.points.len() == spec.point_count()
    }
}

/// Per-frame detection front end. The detector runs on a downsampled copy to
/// bound latency on high-resolution sensors; coordinates are rescaled back to
/// full resolution before refinement.
#[derive(Debug, Clone)]
pub struct ObservationPipeline {
    spec: PatternSpec,
}

impl ObservationPipeline {
    pub fn new(spec: PatternSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &PatternSpec {
        &self.spec
    }

    /// Runs the detector on one color frame. A detector miss yields
    /// `Ok(None)`; only OpenCV failures escape as errors. On success the
    /// frame is annotated with the detected grid for display.
    pub fn detect(&self, frame: &mut Mat, camera: CameraId) -> Result<Option<Observation>> {
        let mut gray = Mat::default();
        imgproc::cvt_color(&*frame, &mut gray, COLOR_BGR2GRAY, 0)?;

        let factor = self.spec.downsample_factor;
        let mut downsampled = Mat::default();
        imgproc::resize(
            &gray,
            &mut downsampled,
            Size::new(gray.cols() / factor, gray.rows() / factor),
            0.0,
            0.0,
            INTER_LINEAR,
        )?;

        let mut points = Vector::<Point2f>::new();
        let found = match self.spec.kind {
            PatternKind::Checkerboard => calib3d::find_chessboard_corners(
                &downsampled,
                self.spec.board_size,
                &mut points,
                self.spec.detector_flags,
            )?,
            PatternKind::AsymmetricCircleGrid => {
                let blob_detector: Ptr<Feature2D> =
                    SimpleBlobDetector::create(SimpleBlobDetector_Params::default()?)?.into();
                calib3d::find_circles_grid(
                    &downsampled,
                    self.spec.board_size,
                    &mut points,
                    self.spec.detector_flags,
                    &blob_detector,
                    CirclesGridFinderParameters::default()?,
                )?
            }
        };
        if !found {
            return Ok(None);
        }

        // 将角点坐标缩放回原始分辨率
        let mut points: Vector<Point2f> = points
            .iter()
            .map(|p| Point2f::new(p.x * factor as f32, p.y * factor as f32))
            .collect();

        // Circle-grid centers are already sub-pixel relative to the
        // downsampled grid; only checkerboard corners get refined.
        if self.spec.kind == PatternKind::Checkerboard {
            let criteria =
                TermCriteria::new(TermCriteria_EPS + TermCriteria_COUNT, 30, 1e-4)?;
            imgproc::corner_sub_pix(
                &gray,
                &mut points,
                Size::new(31, 31),
                Size::new(-1, -1),
                criteria,
            )?;
        }

        calib3d::draw_chessboard_corners(frame, self.spec.board_size, &points, found)?;

        Ok(Some(Observation { camera, points }))
    }
}
