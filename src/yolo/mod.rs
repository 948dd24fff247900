use anyhow::Result;
use image::RgbImage;

pub mod download;
pub mod model;

/// One object found in a frame, in pixel coordinates of that frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    /// Returns `None` unless `x1 < x2` and `y1 < y2`.
    pub fn new(
        (x1, y1, x2, y2): (i32, i32, i32, i32),
        class_id: usize,
        label: impl Into<String>,
        confidence: f32,
    ) -> Option<Self> {
        if x1 >= x2 || y1 >= y2 {
            return None;
        }
        Some(Self {
            x1,
            y1,
            x2,
            y2,
            class_id,
            label: label.into(),
            confidence,
        })
    }

    pub fn width(&self) -> u32 {
        self.x2.abs_diff(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.abs_diff(self.y1)
    }
}

pub trait DetectionModel {
    fn infer(&mut self, frame: &RgbImage) -> Result<Vec<Detection>>;
}

impl<T: DetectionModel + ?Sized> DetectionModel for Box<T> {
    fn infer(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        (**self).infer(frame)
    }
}
