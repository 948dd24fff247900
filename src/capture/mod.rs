//! Frame sources.
//!
//! Every source hands out owned `RgbImage` frames. A source that has nothing
//! more to give returns `CaptureError::EndOfStream`; any other error is a
//! capture failure. Either way the caller stops reading.

use image::RgbImage;
use std::path::Path;
use thiserror::Error;

pub mod sequence;
pub mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

pub use sequence::ImageSequenceSource;
pub use synthetic::SyntheticSource;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("end of stream")]
    EndOfStream,
    #[error("device {device}: {message}")]
    Device { device: String, message: String },
    #[error("decode frame: {0}")]
    Decode(String),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("unsupported source {0}")]
    Unsupported(String),
}

pub trait FrameSource {
    /// Short description for logs.
    fn describe(&self) -> String;

    /// Acquire the underlying device. Must succeed before `read_frame`.
    fn open(&mut self) -> Result<(), CaptureError>;

    fn read_frame(&mut self) -> Result<RgbImage, CaptureError>;

    /// Give the device back. Called once when the loop stops.
    fn release(&mut self);
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        (**self).open()
    }

    fn read_frame(&mut self) -> Result<RgbImage, CaptureError> {
        (**self).read_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// What `open_source` should build, decided from the `source` string alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Synthetic { limit: Option<u64> },
    Directory(String),
    Camera(String),
}

impl SourceKind {
    pub fn parse(source: &str) -> Result<Self, CaptureError> {
        if let Some(rest) = source.strip_prefix("stub://") {
            let limit = if rest.is_empty() {
                None
            } else {
                Some(
                    rest.parse::<u64>()
                        .map_err(|_| CaptureError::Unsupported(source.to_string()))?,
                )
            };
            return Ok(Self::Synthetic { limit });
        }
        if Path::new(source).is_dir() {
            return Ok(Self::Directory(source.to_string()));
        }
        if let Ok(index) = source.parse::<u32>() {
            return Ok(Self::Camera(format!("/dev/video{}", index)));
        }
        Ok(Self::Camera(source.to_string()))
    }
}

/// Build and open the source named by `source`.
///
/// Failing to open is fatal: no loop is started on a dead device.
pub fn open_source(
    source: &str,
    width: u32,
    height: u32,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    let mut frames: Box<dyn FrameSource> = match SourceKind::parse(source)? {
        SourceKind::Synthetic { limit } => Box::new(SyntheticSource::new(width, height, limit)),
        SourceKind::Directory(dir) => Box::new(ImageSequenceSource::new(dir)),
        SourceKind::Camera(device) => camera(device, width, height)?,
    };
    frames.open()?;
    log::info!("{} opened successfully", frames.describe());
    Ok(frames)
}

#[cfg(feature = "camera-v4l2")]
fn camera(device: String, width: u32, height: u32) -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(Box::new(v4l2::V4l2Source::new(v4l2::V4l2Config {
        device,
        width,
        height,
        ..Default::default()
    })))
}

#[cfg(not(feature = "camera-v4l2"))]
fn camera(device: String, _width: u32, _height: u32) -> Result<Box<dyn FrameSource>, CaptureError> {
    Err(CaptureError::Unsupported(format!(
        "{} (built without camera-v4l2)",
        device
    )))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_source_strings() {
        assert_eq!(
            SourceKind::parse("stub://").unwrap(),
            SourceKind::Synthetic { limit: None }
        );
        assert_eq!(
            SourceKind::parse("stub://12").unwrap(),
            SourceKind::Synthetic { limit: Some(12) }
        );
        assert!(SourceKind::parse("stub://many").is_err());
        assert_eq!(
            SourceKind::parse("0").unwrap(),
            SourceKind::Camera("/dev/video0".to_string())
        );
        assert_eq!(
            SourceKind::parse("/dev/video2").unwrap(),
            SourceKind::Camera("/dev/video2".to_string())
        );
    }

    #[test]
    fn directories_become_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().to_string();
        assert_eq!(
            SourceKind::parse(&path).unwrap(),
            SourceKind::Directory(path)
        );
    }

    #[test]
    fn open_source_opens_synthetic_frames() {
        let mut frames = open_source("stub://1", 32, 24).unwrap();
        let frame = frames.read_frame().unwrap();
        assert_eq!(frame.dimensions(), (32, 24));
        assert!(matches!(frames.read_frame(), Err(CaptureError::EndOfStream)));
    }
}
