use image::RgbImage;
use thiserror::Error;

pub mod headless;
pub mod window;

pub use headless::HeadlessDisplay;
pub use window::WindowDisplay;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("window: {0}")]
    Window(String),
}

pub trait DisplaySink {
    fn show(&mut self, frame: &RgbImage) -> Result<(), DisplayError>;

    /// Cheap, checked once per loop iteration.
    fn poll_quit_requested(&mut self) -> bool;

    fn release(&mut self);
}

impl<T: DisplaySink + ?Sized> DisplaySink for Box<T> {
    fn show(&mut self, frame: &RgbImage) -> Result<(), DisplayError> {
        (**self).show(frame)
    }

    fn poll_quit_requested(&mut self) -> bool {
        (**self).poll_quit_requested()
    }

    fn release(&mut self) {
        (**self).release()
    }
}
