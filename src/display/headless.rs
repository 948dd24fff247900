use image::RgbImage;

use super::{DisplayError, DisplaySink};

/// Swallows frames. For machines without a display; the loop then ends only with the source.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    shown: u64,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_shown(&self) -> u64 {
        self.shown
    }
}

impl DisplaySink for HeadlessDisplay {
    fn show(&mut self, frame: &RgbImage) -> Result<(), DisplayError> {
        self.shown += 1;
        log::trace!("headless: frame {} ({}x{})", self.shown, frame.width(), frame.height());
        Ok(())
    }

    fn poll_quit_requested(&mut self) -> bool {
        false
    }

    fn release(&mut self) {
        log::debug!("headless display released after {} frames", self.shown);
    }
}
