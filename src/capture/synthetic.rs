use image::{Rgb, RgbImage};

use super::{CaptureError, FrameSource};

/// Moving gradient frames for running the loop without a camera (`stub://`).
pub struct SyntheticSource {
    width: u32,
    height: u32,
    limit: Option<u64>,
    frame_count: u64,
    opened: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, limit: Option<u64>) -> Self {
        Self {
            width,
            height,
            limit,
            frame_count: 0,
            opened: false,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("synthetic source {}x{}", self.width, self.height)
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Device {
                device: "stub://".to_string(),
                message: format!("invalid frame size {}x{}", self.width, self.height),
            });
        }
        self.opened = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RgbImage, CaptureError> {
        if !self.opened {
            return Err(CaptureError::Device {
                device: "stub://".to_string(),
                message: "not opened".to_string(),
            });
        }
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Err(CaptureError::EndOfStream);
        }
        self.frame_count += 1;

        let shift = self.frame_count as u32;
        Ok(RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        }))
    }

    fn release(&mut self) {
        self.opened = false;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn produces_frames_until_limit() {
        let mut source = SyntheticSource::new(16, 8, Some(2));
        source.open().unwrap();

        let first = source.read_frame().unwrap();
        let second = source.read_frame().unwrap();
        assert_eq!(first.dimensions(), (16, 8));
        assert_ne!(first, second);
        assert!(matches!(source.read_frame(), Err(CaptureError::EndOfStream)));
        assert_eq!(source.frames_captured(), 2);
    }

    #[test]
    fn read_after_release_fails() {
        let mut source = SyntheticSource::new(16, 8, None);
        source.open().unwrap();
        source.read_frame().unwrap();
        source.release();
        assert!(matches!(
            source.read_frame(),
            Err(CaptureError::Device { .. })
        ));
    }

    #[test]
    fn zero_sized_source_fails_to_open() {
        let mut source = SyntheticSource::new(0, 8, None);
        assert!(source.open().is_err());
    }
}
