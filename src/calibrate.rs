use anyhow::{bail, Context, Result};
use opencv::calib3d::{self, CALIB_FIX_INTRINSIC};
use opencv::core::{
    Mat, Point2f, Point3f, Size, TermCriteria, TermCriteria_COUNT, TermCriteria_EPS, Vector,
    CV_64F,
};
use opencv::prelude::*;

use crate::buffer::CalibrationBuffer;
use crate::pattern::PatternSpec;
use crate::session::Mode;
use crate::store::ParamStore;
use crate::util::MatPrinter;

/// Intrinsics of both cameras, loaded from the persisted mono-left and
/// mono-right files. Prerequisite for any stereo computation.
#[derive(Debug, Clone)]
pub struct StereoIntrinsics {
    pub k_left: Mat,
    pub d_left: Mat,
    pub k_right: Mat,
    pub d_right: Mat,
}

/// Output of one calibration run. Replaced wholesale on recomputation and
/// discarded on restart, never mutated in place.
#[derive(Debug, Clone)]
pub enum CalibrationResult {
    Mono {
        camera_matrix: Mat,
        dist_coeffs: Mat,
    },
    Stereo {
        rotation: Mat,
        translation: Mat,
        essential: Mat,
        fundamental: Mat,
    },
}

/// Sequences the estimator calls for the active mode and persists the
/// results. Read-only with respect to the buffer; writes parameter files on
/// success only.
#[derive(Debug)]
pub struct CalibrationOrchestrator {
    mode: Mode,
    store: ParamStore,
    intrinsics: Option<StereoIntrinsics>,
}

impl CalibrationOrchestrator {
    /// In stereo mode this loads both prerequisite intrinsic files up front;
    /// a missing or unreadable file fails the whole session before any
    /// capture starts.
    pub fn new(mode: Mode, store: ParamStore) -> Result<Self> {
        let intrinsics = if mode == Mode::Stereo {
            let (kl_key, dl_key) = Mode::MonoLeft.mono_keys();
            let left = store
                .load(Mode::MonoLeft.param_file(), &[kl_key, dl_key])
                .context("stereo mode requires left intrinsics; run a mono-left session first")?;
            let (kr_key, dr_key) = Mode::MonoRight.mono_keys();
            let right = store
                .load(Mode::MonoRight.param_file(), &[kr_key, dr_key])
                .context("stereo mode requires right intrinsics; run a mono-right session first")?;
            Some(StereoIntrinsics {
                k_left: left[0].clone(),
                d_left: left[1].clone(),
                k_right: right[0].clone(),
                d_right: right[1].clone(),
            })
        } else {
            None
        };
        Ok(Self {
            mode,
            store,
            intrinsics,
        })
    }

    pub fn intrinsics(&self) -> Option<&StereoIntrinsics> {
        self.intrinsics.as_ref()
    }

    pub fn calibrate(
        &self,
        spec: &PatternSpec,
        buffer: &CalibrationBuffer,
        image_size: Size,
    ) -> Result<CalibrationResult> {
        match self.mode {
            Mode::Stereo => self.calibrate_stereo(spec, buffer, image_size),
            _ => self.calibrate_mono(spec, buffer, image_size),
        }
    }

    /// One reference-point set per accepted view, identical by construction.
    fn object_points(spec: &PatternSpec, views: usize) -> Vector<Vector<Point3f>> {
        let mut object_points = Vector::<Vector<Point3f>>::new();
        for _ in 0..views {
            object_points.push(spec.reference_points().clone());
        }
        object_points
    }

    fn calibrate_mono(
        &self,
        spec: &PatternSpec,
        buffer: &CalibrationBuffer,
        image_size: Size,
    ) -> Result<CalibrationResult> {
        log::info!("computing camera intrinsic parameters...");
        let object_points = Self::object_points(spec, buffer.size());
        let image_points: Vector<Vector<Point2f>> = buffer
            .left_sets()
            .iter()
            .map(|obs| obs.points.clone())
            .collect();

        let mut camera_matrix = Mat::eye(3, 3, CV_64F)?.to_mat()?;
        // 8x1 seed; which terms get estimated is up to the default model.
        let mut dist_coeffs = Mat::zeros(8, 1, CV_64F)?.to_mat()?;
        let mut rvecs = Vector::<Mat>::new();
        let mut tvecs = Vector::<Mat>::new();
        let mut new_object_points = Mat::default();
        let criteria = TermCriteria::new(TermCriteria_COUNT + TermCriteria_EPS, 30, f64::EPSILON)?;
        let rms = calib3d::calibrate_camera_ro(
            &object_points,
            &image_points,
            image_size,
            spec.fixed_point_index(),
            &mut camera_matrix,
            &mut dist_coeffs,
            &mut rvecs,
            &mut tvecs,
            &mut new_object_points,
            0,
            criteria,
        )?;

        log::info!("reprojection error: {:.4}", rms);
        log::info!("camera matrix = {}", MatPrinter(&camera_matrix));
        log::info!("distortion coefficients = {}", MatPrinter(&dist_coeffs));

        let (k_key, d_key) = self.mode.mono_keys();
        self.store.save(
            self.mode.param_file(),
            &[(k_key, &camera_matrix), (d_key, &dist_coeffs)],
        )?;

        Ok(CalibrationResult::Mono {
            camera_matrix,
            dist_coeffs,
        })
    }

    fn calibrate_stereo(
        &self,
        spec: &PatternSpec,
        buffer: &CalibrationBuffer,
        image_size: Size,
    ) -> Result<CalibrationResult> {
        // The append-time guard keeps the sequences paired; a mismatch here
        // is a logic defect, not something to calibrate around.
        if buffer.left_sets().len() != buffer.right_sets().len() {
            bail!(
                "left/right buffer length mismatch: {} vs {}",
                buffer.left_sets().len(),
                buffer.right_sets().len()
            );
        }
        let intrinsics = self
            .intrinsics
            .as_ref()
            .context("stereo intrinsics were not loaded")?;

        log::info!("computing stereo extrinsic parameters...");
        let object_points = Self::object_points(spec, buffer.size());
        let image_points_left: Vector<Vector<Point2f>> = buffer
            .left_sets()
            .iter()
            .map(|obs| obs.points.clone())
            .collect();
        let image_points_right: Vector<Vector<Point2f>> = buffer
            .right_sets()
            .iter()
            .map(|obs| obs.points.clone())
            .collect();

        // Both intrinsics are held fixed; only the relative pose is solved.
        let mut k_left = intrinsics.k_left.clone();
        let mut d_left = intrinsics.d_left.clone();
        let mut k_right = intrinsics.k_right.clone();
        let mut d_right = intrinsics.d_right.clone();
        let mut rotation = Mat::default();
        let mut translation = Mat::default();
        let mut essential = Mat::default();
        let mut fundamental = Mat::default();
        let criteria = TermCriteria::new(TermCriteria_COUNT + TermCriteria_EPS, 100, 1e-5)?;
        let rms = calib3d::stereo_calibrate(
            &object_points,
            &image_points_left,
            &image_points_right,
            &mut k_left,
            &mut d_left,
            &mut k_right,
            &mut d_right,
            image_size,
            &mut rotation,
            &mut translation,
            &mut essential,
            &mut fundamental,
            CALIB_FIX_INTRINSIC,
            criteria,
        )?;

        log::info!("stereo reprojection error: {:.4}", rms);
        log::info!("R = {}", MatPrinter(&rotation));
        log::info!("T = {}", MatPrinter(&translation));

        self.store.save(
            Mode::Stereo.param_file(),
            &[
                ("R", &rotation),
                ("T", &translation),
                ("E", &essential),
                ("F", &fundamental),
            ],
        )?;

        Ok(CalibrationResult::Stereo {
            rotation,
            translation,
            essential,
            fundamental,
        })
    }
}
