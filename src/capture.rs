use anyhow::{bail, Context, Result};
use opencv::core::{Mat, Rect, Size};
use opencv::prelude::*;
use opencv::videoio::{
    self, VideoCapture, CAP_PROP_BUFFERSIZE, CAP_PROP_FOURCC, CAP_PROP_FPS, CAP_PROP_FRAME_HEIGHT,
    CAP_PROP_FRAME_WIDTH, CAP_V4L,
};

use crate::session::{Command, Mode};

// Single-key controls, polled once per frame.
pub const KEY_QUIT: i32 = 27; // ESC
pub const KEY_ADD: i32 = 32; // SPACEBAR
pub const KEY_REMOVE: i32 = 8; // BACKSPACE
pub const KEY_CLEAR: i32 = 255; // DELETE
pub const KEY_CALIBRATE: i32 = 13; // RETURN
pub const KEY_RESTART: i32 = 114; // R

pub fn command_for_key(key: i32) -> Option<Command> {
    match key {
        KEY_QUIT => Some(Command::Quit),
        KEY_ADD => Some(Command::AddObservation),
        KEY_REMOVE => Some(Command::RemoveLast),
        KEY_CLEAR => Some(Command::ClearAll),
        KEY_CALIBRATE => Some(Command::Calibrate),
        KEY_RESTART => Some(Command::Restart),
        _ => None,
    }
}

/// The frames the active mode works on. In single-camera modes `left` holds
/// "the" camera's image, whichever half of the sensor frame that is; `right`
/// is populated in stereo mode only.
#[derive(Debug)]
pub struct FrameSet {
    pub left: Mat,
    pub right: Option<Mat>,
}

impl FrameSet {
    pub fn image_size(&self) -> Size {
        self.left.size().unwrap_or_default()
    }
}

/// V4L capture of one device; stereo rigs deliver both cameras concatenated
/// side by side in a single frame.
#[derive(Debug)]
pub struct Capture {
    device: String,
    cap: VideoCapture,
    mode: Mode,
}

impl Capture {
    pub fn open(device_index: i32, mode: Mode) -> Result<Self> {
        let device = format!("/dev/video{}", device_index);
        let mut cap = VideoCapture::from_file(&device, CAP_V4L)
            .with_context(|| format!("cannot open video stream: {}", device))?;
        if !cap.is_opened()? {
            bail!("cannot open video stream: {}", device);
        }

        // Requested geometry is advisory; the device may negotiate down.
        cap.set(CAP_PROP_FPS, 60.0)?;
        cap.set(CAP_PROP_FRAME_WIDTH, 2560.0)?;
        cap.set(CAP_PROP_FRAME_HEIGHT, 960.0)?;
        cap.set(
            CAP_PROP_FOURCC,
            videoio::VideoWriter::fourcc('M', 'J', 'P', 'G')? as f64,
        )?;
        cap.set(CAP_PROP_BUFFERSIZE, 1.0)?;

        log::info!("captured device: {}", device);
        log::info!("    framerate: {:5.1}", cap.get(CAP_PROP_FPS)?);
        log::info!("    image width:  {}", cap.get(CAP_PROP_FRAME_WIDTH)? as i32);
        log::info!("    image height: {}", cap.get(CAP_PROP_FRAME_HEIGHT)? as i32);

        Ok(Self { device, cap, mode })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Reads the next frame and carves out the half (or halves) the mode
    /// uses. `Ok(None)` means the device stopped delivering frames.
    pub fn grab(&mut self) -> Result<Option<FrameSet>> {
        let mut frame = Mat::default();
        if !self.cap.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }
        if !self.mode.splits_frame() {
            return Ok(Some(FrameSet {
                left: frame,
                right: None,
            }));
        }

        let half = frame.cols() / 2;
        let rows = frame.rows();
        let left_half = Mat::roi(&frame, Rect::new(0, 0, half, rows))?.try_clone()?;
        let right_half = Mat::roi(&frame, Rect::new(half, 0, half, rows))?.try_clone()?;

        let set = match self.mode {
            Mode::MonoRight => FrameSet {
                left: right_half,
                right: None,
            },
            Mode::MonoLeft => FrameSet {
                left: left_half,
                right: None,
            },
            _ => FrameSet {
                left: left_half,
                right: Some(right_half),
            },
        };
        Ok(Some(set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_control_key_maps_to_its_command() {
        assert_eq!(command_for_key(KEY_QUIT), Some(Command::Quit));
        assert_eq!(command_for_key(KEY_ADD), Some(Command::AddObservation));
        assert_eq!(command_for_key(KEY_REMOVE), Some(Command::RemoveLast));
        assert_eq!(command_for_key(KEY_CLEAR), Some(Command::ClearAll));
        assert_eq!(command_for_key(KEY_CALIBRATE), Some(Command::Calibrate));
        assert_eq!(command_for_key(KEY_RESTART), Some(Command::Restart));
    }

    #[test]
    fn unmapped_keys_are_ignored() {
        assert_eq!(command_for_key(-1), None);
        assert_eq!(command_for_key(113), None);
    }
}
