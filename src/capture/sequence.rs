use image::RgbImage;
use std::fs;
use std::path::PathBuf;

use super::{CaptureError, FrameSource};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Plays the images of a directory back as frames, in file-name order.
pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageSequenceSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn describe(&self) -> String {
        format!("image sequence {}", self.dir.display())
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if path.is_file() && is_image {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(CaptureError::Device {
                device: self.dir.display().to_string(),
                message: "no images found".to_string(),
            });
        }
        files.sort();
        log::debug!("{} images in {}", files.len(), self.dir.display());
        self.files = files;
        self.next = 0;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RgbImage, CaptureError> {
        let path = self.files.get(self.next).ok_or(CaptureError::EndOfStream)?;
        self.next += 1;
        Ok(image::open(path)?.to_rgb8())
    }

    fn release(&mut self) {
        self.files.clear();
        self.next = 0;
    }
}
