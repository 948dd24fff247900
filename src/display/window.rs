use image::RgbImage;
use minifb::{Key, Window, WindowOptions};

use super::{DisplayError, DisplaySink};

pub const QUIT_KEY: Key = Key::Q;

/// `minifb` window, created on the first frame and recreated if the frame size changes.
pub struct WindowDisplay {
    title: String,
    window: Option<Window>,
    buffer: Vec<u32>,
    size: (usize, usize),
}

impl WindowDisplay {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            window: None,
            buffer: Vec::new(),
            size: (0, 0),
        }
    }
}

impl DisplaySink for WindowDisplay {
    fn show(&mut self, frame: &RgbImage) -> Result<(), DisplayError> {
        let size = (frame.width() as usize, frame.height() as usize);
        if self.window.is_none() || self.size != size {
            self.window = None;
            let window = Window::new(&self.title, size.0, size.1, WindowOptions::default())
                .map_err(|err| DisplayError::Window(err.to_string()))?;
            self.window = Some(window);
            self.size = size;
        }

        to_argb(frame, &mut self.buffer);
        if let Some(window) = self.window.as_mut() {
            window
                .update_with_buffer(&self.buffer, size.0, size.1)
                .map_err(|err| DisplayError::Window(err.to_string()))?;
        }
        Ok(())
    }

    fn poll_quit_requested(&mut self) -> bool {
        match &self.window {
            Some(window) => !window.is_open() || window.is_key_down(QUIT_KEY),
            None => false,
        }
    }

    fn release(&mut self) {
        // 关闭窗口
        if self.window.take().is_some() {
            log::debug!("closed window {}", self.title);
        }
        self.buffer = Vec::new();
    }
}

/// minifb wants one `0RGB` word per pixel.
fn to_argb(frame: &RgbImage, buffer: &mut Vec<u32>) {
    buffer.clear();
    buffer.extend(
        frame
            .pixels()
            .map(|p| ((p.0[0] as u32) << 16) | ((p.0[1] as u32) << 8) | p.0[2] as u32),
    );
}
