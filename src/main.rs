mod buffer;
mod calibrate;
mod capture;
mod detector;
mod pattern;
mod preview;
mod session;
mod store;
mod util;

use anyhow::{Context, Result};
use clap::Parser;
use opencv::highgui;

use crate::calibrate::CalibrationOrchestrator;
use crate::capture::{command_for_key, Capture};
use crate::detector::{CameraId, ObservationPipeline};
use crate::pattern::{PatternKind, PatternSpec};
use crate::preview::PreviewRenderer;
use crate::session::{FrameObservations, Mode, Session};
use crate::store::ParamStore;

const CONTROLS: &str = "\
Controls:
    ESC         closes the program
    SPACEBAR    adds detected points to the calibration buffer
    BACKSPACE   removes last added set of points from the calibration buffer
    DELETE      clears all points from the calibration buffer
    RETURN      runs the calibration routine on the collected points
    R           restarts the calibration collection process";

#[derive(Parser, Debug)]
#[command(about = "Interactive camera calibration session", after_help = CONTROLS)]
struct Args {
    /// Video device number (/dev/video<N>)
    device: i32,
    /// Pattern type: 0 - checkerboard, 1 - asymmetric circle grid
    pattern: i32,
    /// Calibration mode
    #[arg(value_enum)]
    mode: Mode,
    /// Directory holding the parameter files
    #[arg(short, long, default_value = ".")]
    dir: String,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_nanos()
        .init();
    let args = Args::parse();

    let kind = PatternKind::from_selector(args.pattern)
        .context("select a valid pattern: 0 - checkerboard, 1 - asymmetric circles")?;
    let spec = PatternSpec::with_defaults(kind);

    // Stereo prerequisites load before any device is touched, so a missing
    // intrinsics file fails the session up front.
    let store = ParamStore::new(&args.dir);
    let orchestrator = CalibrationOrchestrator::new(args.mode, store)?;
    let mut capture = Capture::open(args.device, args.mode)?;

    let pipeline = ObservationPipeline::new(spec.clone());
    let renderer = PreviewRenderer::new();
    let mut session = Session::new(args.mode, spec);

    // One iteration per frame: grab, detect, render, poll one command.
    loop {
        let Some(mut frames) = capture.grab()? else {
            log::error!("error reading image from {}", capture.device());
            break;
        };

        let mut observations = FrameObservations {
            left: pipeline.detect(&mut frames.left, args.mode.primary_camera())?,
            right: None,
        };
        if let Some(right) = frames.right.as_mut() {
            observations.right = pipeline.detect(right, CameraId::Right)?;
        }

        renderer.render(&session, orchestrator.intrinsics(), &frames)?;

        let key = highgui::wait_key(10)?;
        if let Some(command) = command_for_key(key) {
            if !session.apply(command, &observations, frames.image_size(), &orchestrator)? {
                break;
            }
        }
    }

    Ok(())
}
