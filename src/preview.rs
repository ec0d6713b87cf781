use anyhow::Result;
use opencv::calib3d::{self, CALIB_ZERO_DISPARITY};
use opencv::core::{self, Mat, Point, Rect, Scalar, Size, BORDER_CONSTANT, CV_32FC1};
use opencv::highgui;
use opencv::imgproc::{self, FONT_HERSHEY_SIMPLEX, INTER_LINEAR, LINE_8, LINE_AA};
use opencv::prelude::*;

use crate::calibrate::{CalibrationResult, StereoIntrinsics};
use crate::capture::FrameSet;
use crate::session::{Phase, Session};

const GUIDE_LINE_SPACING: i32 = 20;

fn red() -> Scalar {
    Scalar::new(0.0, 0.0, 255.0, 0.0)
}

fn green() -> Scalar {
    Scalar::new(0.0, 255.0, 0.0, 0.0)
}

/// Rows of the horizontal epipolar guide lines, one per 20 px of height.
fn guide_rows(height: i32) -> Vec<i32> {
    (0..height / GUIDE_LINE_SPACING)
        .map(|i| i * GUIDE_LINE_SPACING)
        .collect()
}

/// Read-only consumer of session state: decides what to draw each frame and
/// shows it on the single preview window.
#[derive(Debug)]
pub struct PreviewRenderer {
    window: &'static str,
}

impl PreviewRenderer {
    pub fn new() -> Self {
        Self {
            window: "Calibration Image",
        }
    }

    pub fn render(
        &self,
        session: &Session,
        intrinsics: Option<&StereoIntrinsics>,
        frames: &FrameSet,
    ) -> Result<()> {
        match (session.phase(), session.result()) {
            (Phase::Collecting, _) | (Phase::Computed, None) => {
                self.render_collecting(session, frames)
            }
            (
                Phase::Computed,
                Some(CalibrationResult::Mono {
                    camera_matrix,
                    dist_coeffs,
                }),
            ) => self.render_undistort_diff(&frames.left, camera_matrix, dist_coeffs),
            (
                Phase::Computed,
                Some(CalibrationResult::Stereo {
                    rotation,
                    translation,
                    ..
                }),
            ) => match intrinsics {
                Some(intrinsics) => {
                    self.render_rectified(frames, intrinsics, rotation, translation)
                }
                None => self.render_collecting(session, frames),
            },
        }
    }

    /// Latest frame(s) with the detector overlay already drawn, plus the
    /// running count of accepted sets. Stereo shows both halves side by side.
    fn render_collecting(&self, session: &Session, frames: &FrameSet) -> Result<()> {
        let mut canvas = match &frames.right {
            Some(right) => {
                let mut canvas = Mat::default();
                core::hconcat2(&frames.left, right, &mut canvas)?;
                canvas
            }
            None => frames.left.clone(),
        };
        imgproc::put_text(
            &mut canvas,
            &format!("Cal size: {}", session.buffer().size()),
            Point::new(10, 30),
            FONT_HERSHEY_SIMPLEX,
            1.0,
            red(),
            2,
            LINE_AA,
            false,
        )?;
        self.show(&canvas)
    }

    /// Qualitative correction-strength view: the absolute difference between
    /// the raw frame and its undistorted version.
    fn render_undistort_diff(&self, frame: &Mat, camera_matrix: &Mat, dist_coeffs: &Mat) -> Result<()> {
        let mut undistorted = Mat::default();
        calib3d::undistort(frame, &mut undistorted, camera_matrix, dist_coeffs, &core::no_array())?;
        let mut diff = Mat::default();
        core::absdiff(frame, &undistorted, &mut diff)?;
        self.show(&diff)
    }

    /// Rectified stereo pair with horizontal guide lines so the operator can
    /// verify epipolar alignment by eye.
    fn render_rectified(
        &self,
        frames: &FrameSet,
        intrinsics: &StereoIntrinsics,
        rotation: &Mat,
        translation: &Mat,
    ) -> Result<()> {
        let Some(right) = &frames.right else {
            return self.show(&frames.left);
        };
        let image_size = frames.left.size()?;

        let mut r_left = Mat::default();
        let mut r_right = Mat::default();
        let mut p_left = Mat::default();
        let mut p_right = Mat::default();
        let mut q = Mat::default();
        let mut roi_left = Rect::default();
        let mut roi_right = Rect::default();
        calib3d::stereo_rectify(
            &intrinsics.k_left,
            &intrinsics.d_left,
            &intrinsics.k_right,
            &intrinsics.d_right,
            image_size,
            rotation,
            translation,
            &mut r_left,
            &mut r_right,
            &mut p_left,
            &mut p_right,
            &mut q,
            CALIB_ZERO_DISPARITY,
            -1.0,
            Size::default(),
            &mut roi_left,
            &mut roi_right,
        )?;

        // Remap tables are rebuilt every frame; caching them keyed on the
        // calibration result would be a valid optimization, the tables only
        // change on Calibrate/Restart.
        let rectified_left = Self::remap_one(
            &frames.left,
            &intrinsics.k_left,
            &intrinsics.d_left,
            &r_left,
            &p_left,
            image_size,
        )?;
        let rectified_right = Self::remap_one(
            right,
            &intrinsics.k_right,
            &intrinsics.d_right,
            &r_right,
            &p_right,
            image_size,
        )?;

        let mut canvas = Mat::default();
        core::hconcat2(&rectified_left, &rectified_right, &mut canvas)?;
        let cols = canvas.cols();
        for y in guide_rows(canvas.rows()) {
            imgproc::line(
                &mut canvas,
                Point::new(0, y),
                Point::new(cols, y),
                green(),
                1,
                LINE_8,
                0,
            )?;
        }
        self.show(&canvas)
    }

    fn remap_one(
        src: &Mat,
        camera_matrix: &Mat,
        dist_coeffs: &Mat,
        rectification: &Mat,
        projection: &Mat,
        image_size: Size,
    ) -> Result<Mat> {
        let mut map1 = Mat::default();
        let mut map2 = Mat::default();
        calib3d::init_undistort_rectify_map(
            camera_matrix,
            dist_coeffs,
            rectification,
            projection,
            image_size,
            CV_32FC1,
            &mut map1,
            &mut map2,
        )?;
        let mut dst = Mat::default();
        imgproc::remap(
            src,
            &mut dst,
            &map1,
            &map2,
            INTER_LINEAR,
            BORDER_CONSTANT,
            Scalar::default(),
        )?;
        Ok(dst)
    }

    fn show(&self, image: &Mat) -> Result<()> {
        highgui::imshow(self.window, image)?;
        Ok(())
    }
}

impl Default for PreviewRenderer {
    fn default() -> Self {
        Self::new()
    }
}
