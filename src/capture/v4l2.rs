//! V4L2 camera source.
//!
//! Asks the driver for packed RGB and falls back to whatever it insists on,
//! as long as that is YUYV or MJPG.

use image::RgbImage;
use ouroboros::self_referencing;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::FourCC;

use super::{CaptureError, FrameSource};

#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate; 0 leaves the driver default.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PixelFormat {
    Rgb3,
    Yuyv,
    Mjpg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"RGB3" => Some(Self::Rgb3),
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpg),
            _ => None,
        }
    }
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Source {
    config: V4l2Config,
    state: Option<DeviceState>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Rgb3,
            frame_count: 0,
        }
    }

    fn device_error(&self, message: impl ToString) -> CaptureError {
        CaptureError::Device {
            device: self.config.device.clone(),
            message: message.to_string(),
        }
    }
}

impl FrameSource for V4l2Source {
    fn describe(&self) -> String {
        format!(
            "camera {} ({}x{})",
            self.config.device, self.active_width, self.active_height
        )
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        let mut device = v4l::Device::with_path(&self.config.device)
            .map_err(|err| self.device_error(format!("open: {}", err)))?;
        let mut format = device
            .format()
            .map_err(|err| self.device_error(format!("read format: {}", err)))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .map_err(|err| self.device_error(format!("read format: {}", err)))?
            }
        };

        self.format = PixelFormat::from_fourcc(format.fourcc)
            .ok_or_else(|| self.device_error(format!("unsupported pixel format {}", format.fourcc)))?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|err| self.device_error(format!("create buffer stream: {}", err)))?;
        self.state = Some(state);

        log::debug!(
            "V4l2Source: {} streaming {:?} {}x{}",
            self.config.device,
            self.format,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RgbImage, CaptureError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| CaptureError::Device {
                device: self.config.device.clone(),
                message: "not connected".to_string(),
            })?;
        let buf = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| CaptureError::Device {
                device: self.config.device.clone(),
                message: format!("capture: {}", err),
            })?;
        self.frame_count += 1;

        let (width, height) = (self.active_width, self.active_height);
        match self.format {
            PixelFormat::Rgb3 => RgbImage::from_raw(width, height, buf)
                .ok_or_else(|| CaptureError::Decode("short RGB3 buffer".to_string())),
            PixelFormat::Yuyv => yuyv_to_rgb(&buf, width, height),
            PixelFormat::Mjpg => {
                Ok(image::load_from_memory_with_format(&buf, image::ImageFormat::Jpeg)?.to_rgb8())
            }
        }
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Source: released {} after {} frames",
                self.config.device,
                self.frame_count
            );
        }
    }
}

/// Packed 4:2:2, two pixels per `Y0 U Y1 V` quad, BT.601 limited range.
fn yuyv_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, CaptureError> {
    let expected = (width * height * 2) as usize;
    if buf.len() < expected {
        return Err(CaptureError::Decode(format!(
            "short YUYV buffer: {} < {}",
            buf.len(),
            expected
        )));
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for quad in buf[..expected].chunks_exact(4) {
        let (u, v) = (quad[1] as f32 - 128.0, quad[3] as f32 - 128.0);
        for y in [quad[0], quad[2]] {
            let y = 1.164 * (y as f32 - 16.0);
            rgb.push((y + 1.596 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.392 * u - 0.813 * v).clamp(0.0, 255.0) as u8);
            rgb.push((y + 2.017 * u).clamp(0.0, 255.0) as u8);
        }
    }
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| CaptureError::Decode("YUYV size mismatch".to_string()))
}
