// This is free and unencumbered software released into the public domain.

//! In-memory capture device that synthesizes frames.
//!
//! Accepts a fixed set of formats up to an optional maximum geometry, and
//! records every set-format call so negotiation can be inspected.

use crate::shared::{
    CameraBackend, CameraError, CaptureDevice, CropInfo, DriverInfo, FormatDescription,
    PixelFormat, Rect, Resolution, WorkingMode,
};
use std::{any::Any, io, time::Duration};

/// Writes one frame into the buffer and returns the number of valid bytes.
pub type FrameGenerator = Box<dyn FnMut(u64, &WorkingMode, &mut [u8]) -> usize + Send>;

pub struct MemoryDevice {
    path: String,
    accepted: Vec<PixelFormat>,
    max_resolution: Option<Resolution>,
    format_log: Vec<(Resolution, PixelFormat)>,
    mode: Option<WorkingMode>,
    buffer: Vec<u8>,
    bytes_used: usize,
    sequence: u64,
    streaming: bool,
    frame_limit: Option<u64>,
    generator: FrameGenerator,
}

impl core::fmt::Debug for MemoryDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryDevice")
            .field("path", &self.path)
            .field("accepted", &self.accepted)
            .field("mode", &self.mode)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl MemoryDevice {
    pub fn new(accepted: Vec<PixelFormat>) -> Self {
        Self {
            path: "memory:".into(),
            accepted,
            max_resolution: None,
            format_log: Vec::new(),
            mode: None,
            buffer: Vec::new(),
            bytes_used: 0,
            sequence: 0,
            streaming: false,
            frame_limit: None,
            generator: Box::new(gray_frame),
        }
    }

    /// Parses `memory:` or `memory:yuyv,mjpg`.
    pub fn open(url: impl AsRef<str>) -> Result<Self, CameraError> {
        let url = url.as_ref();
        let spec = url.strip_prefix("memory:").unwrap_or(url).trim();
        let accepted = if spec.is_empty() {
            vec![PixelFormat::Mjpeg, PixelFormat::Yuyv]
        } else {
            spec.split(',')
                .map(str::parse::<PixelFormat>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| CameraError::DeviceOpen {
                    path: url.to_string(),
                    source: io::Error::new(io::ErrorKind::InvalidInput, e),
                })?
        };
        let mut device = Self::new(accepted);
        device.path = url.to_string();
        Ok(device)
    }

    /// Rejects set-format calls larger than `max`.
    pub fn with_max_resolution(mut self, max: Resolution) -> Self {
        self.max_resolution = Some(max);
        self
    }

    /// Times out every capture after `frames` successful ones.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn with_generator(
        mut self,
        generator: impl FnMut(u64, &WorkingMode, &mut [u8]) -> usize + Send + 'static,
    ) -> Self {
        self.generator = Box::new(generator);
        self
    }

    /// Every `(resolution, format)` passed to a set-format call, in order.
    pub fn format_log(&self) -> &[(Resolution, PixelFormat)] {
        &self.format_log
    }

    pub fn frames_captured(&self) -> u64 {
        self.sequence
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn fits(&self, resolution: Resolution) -> bool {
        self.max_resolution
            .is_none_or(|max| resolution.width <= max.width && resolution.height <= max.height)
    }
}

/// Neutral gray: all-128 YUYV, or a uniform gray JPEG.
pub fn gray_frame(_sequence: u64, mode: &WorkingMode, buffer: &mut [u8]) -> usize {
    if !mode.pixel_format.is_jpeg() {
        buffer.fill(128);
        return buffer.len();
    }

    let Resolution { width, height } = mode.resolution;
    let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
        return 0;
    };
    let rgb = vec![128u8; mode.resolution.pixels() * 3];
    let mut jpeg = Vec::new();
    let encoder = jpeg_encoder::Encoder::new(&mut jpeg, 80);
    if encoder
        .encode(&rgb, w, h, jpeg_encoder::ColorType::Rgb)
        .is_err()
    {
        return 0;
    }
    let n = jpeg.len().min(buffer.len());
    buffer[..n].copy_from_slice(&jpeg[..n]);
    n
}

impl CaptureDevice for MemoryDevice {
    fn backend(&self) -> CameraBackend {
        CameraBackend::Memory
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn query_capabilities(&mut self) -> Result<DriverInfo, CameraError> {
        Ok(DriverInfo {
            driver: "memory".into(),
            card: "Synthetic test pattern".into(),
            bus_info: self.path.clone(),
            version: env!("CARGO_PKG_VERSION").into(),
            // VIDEO_CAPTURE | STREAMING
            capabilities: 0x0400_0001,
            cropping: Some(CropInfo {
                bounds: Rect {
                    left: 0,
                    top: 0,
                    width: Resolution::HD.width,
                    height: Resolution::HD.height,
                },
                default_rect: Rect {
                    left: 0,
                    top: 0,
                    width: Resolution::VGA.width,
                    height: Resolution::VGA.height,
                },
                pixel_aspect: (1, 1),
            }),
            formats: self
                .accepted
                .iter()
                .map(|&fourcc| FormatDescription {
                    fourcc,
                    description: match fourcc {
                        PixelFormat::Mjpeg => "Motion-JPEG".into(),
                        PixelFormat::Jpeg => "JFIF JPEG".into(),
                        PixelFormat::Yuyv => "YUYV 4:2:2".into(),
                        PixelFormat::Other(_) => fourcc.to_string(),
                    },
                })
                .collect(),
            accepted: Vec::new(),
        })
    }

    fn try_format(
        &mut self,
        resolution: Resolution,
        format: PixelFormat,
    ) -> Result<Option<WorkingMode>, CameraError> {
        self.format_log.push((resolution, format));
        if !self.accepted.contains(&format) || !self.fits(resolution) {
            return Ok(None);
        }
        let mode = WorkingMode {
            resolution,
            pixel_format: format,
            field: 1,
        };
        self.mode = Some(mode);
        Ok(Some(mode))
    }

    fn allocate_buffer(&mut self) -> Result<usize, CameraError> {
        let mode = self
            .mode
            .ok_or_else(|| CameraError::BufferMap(io::Error::other("no format negotiated")))?;
        self.buffer = vec![0u8; mode.resolution.pixels() * 2];
        self.bytes_used = 0;
        Ok(self.buffer.len())
    }

    fn capture_frame(&mut self, timeout: Duration) -> Result<usize, CameraError> {
        let Some(mode) = self.mode.filter(|_| !self.buffer.is_empty()) else {
            return Err(CameraError::NotAllocated);
        };
        self.streaming = true;
        if self.frame_limit.is_some_and(|limit| self.sequence >= limit) {
            return Err(CameraError::CaptureTimeout(timeout));
        }
        let used = (self.generator)(self.sequence, &mode, &mut self.buffer[..]);
        self.bytes_used = used.min(self.buffer.len());
        self.sequence += 1;
        Ok(self.bytes_used)
    }

    fn frame(&self) -> &[u8] {
        &self.buffer[..self.bytes_used]
    }

    fn close(&mut self) -> Result<(), CameraError> {
        self.streaming = false;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_parses_format_list() {
        let device = MemoryDevice::open("memory:yuyv,jpeg").unwrap();
        assert_eq!(device.accepted, vec![PixelFormat::Yuyv, PixelFormat::Jpeg]);
        assert_eq!(device.path(), "memory:yuyv,jpeg");
        assert!(MemoryDevice::open("memory:bayer").is_err());
    }

    #[test]
    fn frames_overwrite_the_single_buffer() {
        let mut device = MemoryDevice::new(vec![PixelFormat::Yuyv])
            .with_generator(|seq, _, buf| {
                buf.fill(seq as u8);
                buf.len()
            });
        device.try_format(Resolution::new(4, 2), PixelFormat::Yuyv).unwrap();
        assert_eq!(device.allocate_buffer().unwrap(), 16);

        device.capture_frame(Duration::from_secs(2)).unwrap();
        assert!(device.frame().iter().all(|&b| b == 0));
        device.capture_frame(Duration::from_secs(2)).unwrap();
        assert!(device.frame().iter().all(|&b| b == 1));
        assert_eq!(device.frames_captured(), 2);
    }

    #[test]
    fn frame_limit_times_out() {
        let mut device = MemoryDevice::new(vec![PixelFormat::Yuyv]).with_frame_limit(1);
        device.try_format(Resolution::QVGA, PixelFormat::Yuyv).unwrap();
        device.allocate_buffer().unwrap();
        device.capture_frame(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            device.capture_frame(Duration::from_secs(2)),
            Err(CameraError::CaptureTimeout(_))
        ));
    }

    #[test]
    fn jpeg_modes_produce_jpeg_frames() {
        let mut device = MemoryDevice::new(vec![PixelFormat::Mjpeg]);
        device.try_format(Resolution::QVGA, PixelFormat::Mjpeg).unwrap();
        device.allocate_buffer().unwrap();
        let n = device.capture_frame(Duration::from_secs(2)).unwrap();
        assert!(n > 4);
        assert_eq!(&device.frame()[..2], &[0xFF, 0xD8]);
    }
}
