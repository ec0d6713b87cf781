use anyhow::Result;
use clap::ValueEnum;
use opencv::core::Size;

use crate::buffer::CalibrationBuffer;
use crate::calibrate::{CalibrationOrchestrator, CalibrationResult};
use crate::detector::{CameraId, Observation};
use crate::pattern::PatternSpec;

/// Calibration mode, fixed for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Single camera, whole frame.
    Mono,
    /// Left half of a side-by-side stereo frame.
    #[value(alias = "left")]
    MonoLeft,
    /// Right half of a side-by-side stereo frame.
    #[value(alias = "right")]
    MonoRight,
    /// Both halves, paired; requires persisted left and right intrinsics.
    Stereo,
}

impl Mode {
    pub fn is_stereo(self) -> bool {
        matches!(self, Mode::Stereo)
    }

    /// All modes except plain mono address halves of a concatenated frame.
    pub fn splits_frame(self) -> bool {
        !matches!(self, Mode::Mono)
    }

    pub fn param_file(self) -> &'static str {
        match self {
            Mode::Mono => "mono.yaml",
            Mode::MonoLeft => "mono_left.yaml",
            Mode::MonoRight => "mono_right.yaml",
            Mode::Stereo => "stereo.yaml",
        }
    }

    /// Which camera "the" camera is in single-camera modes.
    pub fn primary_camera(self) -> CameraId {
        match self {
            Mode::MonoRight => CameraId::Right,
            _ => CameraId::Left,
        }
    }

    /// Persisted key names for the intrinsic matrix and distortion vector.
    pub fn mono_keys(self) -> (&'static str, &'static str) {
        match self {
            Mode::MonoLeft => ("Kl", "Dl"),
            Mode::MonoRight => ("Kr", "Dr"),
            _ => ("K", "D"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Collecting,
    Computed,
}

/// 操作指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    AddObservation,
    RemoveLast,
    ClearAll,
    Calibrate,
    Restart,
    Quit,
}

/// This frame's detection outcome per camera; `None` means the pattern was
/// not found on that side.
#[derive(Debug, Default)]
pub struct FrameObservations {
    pub left: Option<Observation>,
    pub right: Option<Observation>,
}

/// Top-level session state. All command legality is decided in one place,
/// `apply`; nothing outside it mutates the phase, the buffer or the result.
#[derive(Debug)]
pub struct Session {
    mode: Mode,
    spec: PatternSpec,
    phase: Phase,
    buffer: CalibrationBuffer,
    result: Option<CalibrationResult>,
}

impl Session {
    pub fn new(mode: Mode, spec: PatternSpec) -> Self {
        Self {
            mode,
            spec,
            phase: Phase::Collecting,
            buffer: CalibrationBuffer::new(mode.is_stereo()),
            result: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn spec(&self) -> &PatternSpec {
        &self.spec
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn buffer(&self) -> &CalibrationBuffer {
        &self.buffer
    }

    pub fn result(&self) -> Option<&CalibrationResult> {
        self.result.as_ref()
    }

    /// Centralized transition table. Returns `false` when the session should
    /// end. Commands whose preconditions are not met are silent no-ops;
    /// only estimator and persistence failures escape as errors.
    pub fn apply(
        &mut self,
        command: Command,
        observations: &FrameObservations,
        image_size: Size,
        orchestrator: &CalibrationOrchestrator,
    ) -> Result<bool> {
        match (self.phase, command) {
            (_, Command::Quit) => return Ok(false),
            (Phase::Collecting, Command::AddObservation) => {
                let accepted = self.buffer.append(
                    &self.spec,
                    observations.left.as_ref(),
                    observations.right.as_ref(),
                );
                if accepted {
                    log::info!("accepted observation set {}", self.buffer.size());
                }
            }
            (Phase::Collecting, Command::RemoveLast) => self.buffer.pop_last(),
            (Phase::Collecting, Command::ClearAll) => self.buffer.clear(),
            (Phase::Collecting, Command::Calibrate) => {
                // A single view cannot constrain a full camera model.
                if self.buffer.size() > 1 {
                    let result = orchestrator.calibrate(&self.spec, &self.buffer, image_size)?;
                    self.result = Some(result);
                    self.phase = Phase::Computed;
                }
            }
            (Phase::Computed, Command::Restart) => {
                self.buffer.clear();
                self.result = None;
                self.phase = Phase::Collecting;
            }
            // Restart while collecting, and buffer edits or a second
            // calibrate while computed, are tolerated no-ops.
            _ => {}
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::CameraId;
    use crate::pattern::PatternKind;
    use crate::store::ParamStore;
    use opencv::calib3d;
    use opencv::core::{Mat, Point2f, Vector, CV_64F};
    use opencv::prelude::*;

    const IMAGE_SIZE: Size = Size {
        width: 640,
        height: 480,
    };

    fn temp_store(tag: &str) -> ParamStore {
        let dir = std::env::temp_dir().join(format!("calib-session-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        ParamStore::new(dir)
    }

    fn spec() -> PatternSpec {
        PatternSpec::new(PatternKind::Checkerboard, Size::new(9, 6), 23.0, 4)
    }

    fn synthetic_view(spec: &PatternSpec, camera: CameraId, rvec: [f64; 3], tvec: [f64; 3]) -> Observation {
        let k = Mat::from_slice_2d(&[
            [800.0f64, 0.0, 320.0],
            [0.0, 800.0, 240.0],
            [0.0, 0.0, 1.0],
        ])
        .unwrap();
        let dist = Mat::zeros(4, 1, CV_64F).unwrap().to_mat().unwrap();
        let mut points = Vector::<Point2f>::new();
        calib3d::project_points_def(
            spec.reference_points(),
            &Vector::<f64>::from_slice(&rvec),
            &Vector::<f64>::from_slice(&tvec),
            &k,
            &dist,
            &mut points,
        )
        .unwrap();
        Observation { camera, points }
    }

    fn partial(camera: CameraId) -> Observation {
        let mut points = Vector::<Point2f>::new();
        points.push(Point2f::new(0.0, 0.0));
        Observation { camera, points }
    }

    fn fill_and_calibrate(session: &mut Session, orchestrator: &CalibrationOrchestrator) {
        let poses: [([f64; 3], [f64; 3]); 3] = [
            ([0.0, 0.0, 0.0], [-90.0, -60.0, 500.0]),
            ([0.2, -0.1, 0.05], [-60.0, -80.0, 520.0]),
            ([-0.15, 0.2, -0.05], [-120.0, -40.0, 480.0]),
        ];
        for (rvec, tvec) in poses {
            let observations = FrameObservations {
                left: Some(synthetic_view(session.spec(), CameraId::Left, rvec, tvec)),
                right: None,
            };
            session
                .apply(Command::AddObservation, &observations, IMAGE_SIZE, orchestrator)
                .unwrap();
        }
        session
            .apply(Command::Calibrate, &FrameObservations::default(), IMAGE_SIZE, orchestrator)
            .unwrap();
    }

    #[test]
    fn calibrate_is_a_noop_below_two_samples() {
        let store = temp_store("gate");
        let orchestrator = CalibrationOrchestrator::new(Mode::Mono, store.clone()).unwrap();
        let mut session = Session::new(Mode::Mono, spec());

        let observations = FrameObservations {
            left: Some(synthetic_view(session.spec(), CameraId::Left, [0.0; 3], [-90.0, -60.0, 500.0])),
            right: None,
        };
        session
            .apply(Command::AddObservation, &observations, IMAGE_SIZE, &orchestrator)
            .unwrap();
        assert_eq!(session.buffer().size(), 1);

        session
            .apply(Command::Calibrate, &FrameObservations::default(), IMAGE_SIZE, &orchestrator)
            .unwrap();
        assert_eq!(session.phase(), Phase::Collecting);
        assert_eq!(session.buffer().size(), 1);
        assert!(session.result().is_none());
        assert!(!store.path(Mode::Mono.param_file()).exists());
    }

    #[test]
    fn calibrate_then_restart_returns_to_empty_collecting() {
        let store = temp_store("restart");
        let orchestrator = CalibrationOrchestrator::new(Mode::Mono, store).unwrap();
        let mut session = Session::new(Mode::Mono, spec());

        fill_and_calibrate(&mut session, &orchestrator);
        assert_eq!(session.phase(), Phase::Computed);
        assert!(session.result().is_some());

        session
            .apply(Command::Restart, &FrameObservations::default(), IMAGE_SIZE, &orchestrator)
            .unwrap();
        assert_eq!(session.phase(), Phase::Collecting);
        assert_eq!(session.buffer().size(), 0);
        assert!(session.result().is_none());
    }

    #[test]
    fn restart_while_collecting_is_a_noop() {
        let store = temp_store("restart-noop");
        let orchestrator = CalibrationOrchestrator::new(Mode::Mono, store).unwrap();
        let mut session = Session::new(Mode::Mono, spec());

        let observations = FrameObservations {
            left: Some(synthetic_view(session.spec(), CameraId::Left, [0.0; 3], [-90.0, -60.0, 500.0])),
            right: None,
        };
        session
            .apply(Command::AddObservation, &observations, IMAGE_SIZE, &orchestrator)
            .unwrap();
        session
            .apply(Command::Restart, &FrameObservations::default(), IMAGE_SIZE, &orchestrator)
            .unwrap();
        assert_eq!(session.phase(), Phase::Collecting);
        assert_eq!(session.buffer().size(), 1);
    }

    #[test]
    fn buffer_edits_while_computed_are_noops() {
        let store = temp_store("computed-edits");
        let orchestrator = CalibrationOrchestrator::new(Mode::Mono, store).unwrap();
        let mut session = Session::new(Mode::Mono, spec());

        fill_and_calibrate(&mut session, &orchestrator);
        assert_eq!(session.phase(), Phase::Computed);
        let size = session.buffer().size();

        for command in [Command::RemoveLast, Command::ClearAll] {
            session
                .apply(command, &FrameObservations::default(), IMAGE_SIZE, &orchestrator)
                .unwrap();
            assert_eq!(session.buffer().size(), size);
            assert_eq!(session.phase(), Phase::Computed);
            assert!(session.result().is_some());
        }
    }

    #[test]
    fn stereo_add_with_one_missing_side_keeps_buffer_empty() {
        let store = temp_store("stereo-add");
        // Prerequisite intrinsics so the stereo orchestrator constructs.
        let k = Mat::eye(3, 3, CV_64F).unwrap().to_mat().unwrap();
        let d = Mat::zeros(5, 1, CV_64F).unwrap().to_mat().unwrap();
        store
            .save(Mode::MonoLeft.param_file(), &[("Kl", &k), ("Dl", &d)])
            .unwrap();
        store
            .save(Mode::MonoRight.param_file(), &[("Kr", &k), ("Dr", &d)])
            .unwrap();
        let orchestrator = CalibrationOrchestrator::new(Mode::Stereo, store).unwrap();
        let mut session = Session::new(Mode::Stereo, spec());

        let observations = FrameObservations {
            left: Some(synthetic_view(session.spec(), CameraId::Left, [0.0; 3], [-90.0, -60.0, 500.0])),
            right: Some(partial(CameraId::Right)),
        };
        session
            .apply(Command::AddObservation, &observations, IMAGE_SIZE, &orchestrator)
            .unwrap();
        assert_eq!(session.buffer().size(), 0);
        assert_eq!(session.buffer().right_sets().len(), 0);
    }

    #[test]
    fn quit_ends_the_session_in_any_phase() {
        let store = temp_store("quit");
        let orchestrator = CalibrationOrchestrator::new(Mode::Mono, store).unwrap();
        let mut session = Session::new(Mode::Mono, spec());
        let keep_running = session
            .apply(Command::Quit, &FrameObservations::default(), IMAGE_SIZE, &orchestrator)
            .unwrap();
        assert!(!keep_running);
    }
}
