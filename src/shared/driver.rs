// This is free and unencumbered software released into the public domain.

use crate::shared::{CameraError, PixelFormat, Resolution, WorkingMode, open_device};
use derive_more::Display;
use serde::Serialize;
use std::{any::Any, time::Duration};

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
pub enum CameraBackend {
    #[display("v4l2")]
    V4l2,
    #[display("memory")]
    Memory,
}

/// Driver limit on how many enumerated formats are kept.
pub const MAX_ENUMERATED_FORMATS: usize = 32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl core::fmt::Display for Rect {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.left, self.top)
    }
}

/// Cropping metadata. Not every driver reports it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CropInfo {
    pub bounds: Rect,
    pub default_rect: Rect,
    pub pixel_aspect: (u32, u32),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FormatDescription {
    pub fourcc: PixelFormat,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DriverInfo {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub version: String,
    pub capabilities: u32,
    pub cropping: Option<CropInfo>,
    pub formats: Vec<FormatDescription>,
    /// Formats the driver accepted when probed. Empty until probed.
    pub accepted: Vec<PixelFormat>,
}

impl DriverInfo {
    pub fn supports(&self, format: PixelFormat) -> bool {
        self.accepted.contains(&format)
    }
}

/// Picks the capture format from the set the driver accepted.
///
/// MJPEG is preferred, then JPEG, then YUYV. A hint wins only when the driver
/// accepted it.
pub fn select_format(
    accepted: &[PixelFormat],
    hint: Option<PixelFormat>,
) -> Result<PixelFormat, CameraError> {
    if let Some(hint) = hint {
        if hint.is_selectable() && accepted.contains(&hint) {
            return Ok(hint);
        }
    }
    PixelFormat::PREFERENCE
        .into_iter()
        .find(|f| accepted.contains(f))
        .ok_or(CameraError::UnsupportedFormat)
}

/// One capture endpoint with a single, reused hardware buffer.
///
/// Adapters implement the primitives; format negotiation is shared.
pub trait CaptureDevice: Send {
    fn backend(&self) -> CameraBackend;

    fn path(&self) -> &str;

    /// Re-queries the driver. Cropping metadata is optional and its absence
    /// is not an error.
    fn query_capabilities(&mut self) -> Result<DriverInfo, CameraError>;

    /// Issues one set-format call. Returns `None` when the driver rejects the
    /// format or silently substitutes a different one.
    fn try_format(
        &mut self,
        resolution: Resolution,
        format: PixelFormat,
    ) -> Result<Option<WorkingMode>, CameraError>;

    /// Requests and maps exactly one buffer; returns its length.
    fn allocate_buffer(&mut self) -> Result<usize, CameraError>;

    /// Fills the single buffer with a fresh frame and returns the number of
    /// valid bytes. The previous frame is overwritten.
    fn capture_frame(&mut self, timeout: Duration) -> Result<usize, CameraError>;

    /// Valid bytes of the most recent capture.
    fn frame(&self) -> &[u8];

    fn close(&mut self) -> Result<(), CameraError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;

    /// Tries every candidate format at the probe geometry and returns the
    /// ones the driver kept.
    fn probe_formats(&mut self) -> Result<Vec<PixelFormat>, CameraError> {
        let mut accepted = Vec::new();
        for candidate in PixelFormat::PROBE_CANDIDATES {
            if self.try_format(Resolution::PROBE, candidate)?.is_some() {
                accepted.push(candidate);
            }
        }
        Ok(accepted)
    }

    /// Probes, selects, then commits the format at the requested geometry.
    fn negotiate_format(
        &mut self,
        resolution: Resolution,
        hint: Option<PixelFormat>,
    ) -> Result<WorkingMode, CameraError> {
        let accepted = self.probe_formats()?;
        let format = select_format(&accepted, hint)?;

        #[cfg(feature = "tracing")]
        asimov_module::tracing::debug!(
            target: "asimov_timelapse_module",
            ?accepted,
            %format,
            %resolution,
            "selected capture format"
        );

        self.try_format(resolution, format)?.ok_or_else(|| {
            CameraError::negotiation(format!("driver rejected {format} at {resolution}"))
        })
    }
}

/// An opened device plus what was learnt about it.
pub struct Camera {
    device: Box<dyn CaptureDevice>,
    info: Option<DriverInfo>,
    mode: Option<WorkingMode>,
    buffer_len: usize,
}

impl core::fmt::Debug for Camera {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Camera")
            .field("backend", &self.device.backend())
            .field("path", &self.device.path())
            .field("mode", &self.mode)
            .field("buffer_len", &self.buffer_len)
            .finish()
    }
}

impl Camera {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self {
            device,
            info: None,
            mode: None,
            buffer_len: 0,
        }
    }

    pub fn open(path: impl AsRef<str>) -> Result<Self, CameraError> {
        open_device(path).map(Self::new)
    }

    pub fn backend(&self) -> CameraBackend {
        self.device.backend()
    }

    pub fn path(&self) -> &str {
        self.device.path()
    }

    /// Queries capabilities again and caches the result.
    pub fn refresh_info(&mut self) -> Result<&DriverInfo, CameraError> {
        let mut info = self.device.query_capabilities()?;
        if let Some(previous) = &self.info {
            info.accepted = previous.accepted.clone();
        }
        Ok(self.info.insert(info))
    }

    /// Capabilities plus the probed format set.
    pub fn describe(&mut self) -> Result<DriverInfo, CameraError> {
        let mut info = self.device.query_capabilities()?;
        info.accepted = self.device.probe_formats()?;
        self.info = Some(info.clone());
        Ok(info)
    }

    pub fn info(&self) -> Option<&DriverInfo> {
        self.info.as_ref()
    }

    /// Negotiates the format and maps the capture buffer.
    pub fn start(
        &mut self,
        resolution: Resolution,
        hint: Option<PixelFormat>,
    ) -> Result<WorkingMode, CameraError> {
        let mode = self.device.negotiate_format(resolution, hint)?;
        self.mode = Some(mode);
        self.buffer_len = self.device.allocate_buffer()?;
        Ok(mode)
    }

    pub fn working_mode(&self) -> Option<WorkingMode> {
        self.mode
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Captures into the single buffer; the returned frame is valid until
    /// the next capture.
    pub fn capture(&mut self, timeout: Duration) -> Result<&[u8], CameraError> {
        if self.mode.is_none() || self.buffer_len == 0 {
            return Err(CameraError::NotAllocated);
        }
        self.device.capture_frame(timeout)?;
        Ok(self.device.frame())
    }

    pub fn frame(&self) -> &[u8] {
        self.device.frame()
    }

    pub fn stop(&mut self) -> Result<(), CameraError> {
        self.device.close()
    }

    pub fn driver_as<T: 'static>(&self) -> Option<&T> {
        self.device.as_any().downcast_ref::<T>()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::drivers::memory::MemoryDevice;

    #[test]
    fn preference_order() {
        use PixelFormat::*;
        assert_eq!(select_format(&[Yuyv, Jpeg, Mjpeg], None).unwrap(), Mjpeg);
        assert_eq!(select_format(&[Yuyv, Jpeg], None).unwrap(), Jpeg);
        assert_eq!(select_format(&[Yuyv], None).unwrap(), Yuyv);
        assert!(matches!(
            select_format(&[Other(0x3231_5659)], None),
            Err(CameraError::UnsupportedFormat)
        ));
    }

    #[test]
    fn hint_overrides_only_when_accepted() {
        use PixelFormat::*;
        assert_eq!(select_format(&[Mjpeg, Yuyv], Some(Yuyv)).unwrap(), Yuyv);
        assert_eq!(select_format(&[Mjpeg], Some(Yuyv)).unwrap(), Mjpeg);
        assert_eq!(select_format(&[Jpeg, Mjpeg], Some(Jpeg)).unwrap(), Jpeg);
    }

    #[test]
    fn every_committed_format_was_probed() {
        use PixelFormat::*;
        for accepted in [vec![Yuyv], vec![Mjpeg, Yuyv], vec![Jpeg], vec![Jpeg, Yuyv]] {
            for resolution in [Resolution::QVGA, Resolution::VGA, Resolution::HD] {
                for hint in [None, Some(Yuyv), Some(Mjpeg), Some(Jpeg)] {
                    let mut device = MemoryDevice::new(accepted.clone());
                    let mode = device.negotiate_format(resolution, hint).unwrap();
                    assert!(accepted.contains(&mode.pixel_format));

                    let log = device.format_log();
                    let (committed_res, committed_fmt) = *log.last().unwrap();
                    assert_eq!(committed_res, resolution);
                    assert_eq!(committed_fmt, mode.pixel_format);
                    assert!(
                        log[..log.len() - 1]
                            .iter()
                            .any(|&(r, f)| r == Resolution::PROBE && f == committed_fmt),
                        "{committed_fmt} committed without a probe"
                    );
                }
            }
        }
    }

    #[test]
    fn final_set_rejection_is_a_negotiation_error() {
        let mut device = MemoryDevice::new(vec![PixelFormat::Mjpeg])
            .with_max_resolution(Resolution::VGA);
        assert!(matches!(
            device.negotiate_format(Resolution::HD, None),
            Err(CameraError::FormatNegotiation(_))
        ));
    }

    #[test]
    fn camera_requires_start_before_capture() {
        let mut camera = Camera::new(Box::new(MemoryDevice::new(vec![PixelFormat::Yuyv])));
        assert!(matches!(
            camera.capture(Duration::from_secs(2)),
            Err(CameraError::NotAllocated)
        ));

        let mode = camera.start(Resolution::QVGA, None).unwrap();
        assert_eq!(mode.pixel_format, PixelFormat::Yuyv);
        assert_eq!(camera.buffer_len(), 320 * 240 * 2);
        let frame = camera.capture(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.len(), 320 * 240 * 2);
        assert_eq!(camera.backend(), CameraBackend::Memory);
        assert!(camera.driver_as::<MemoryDevice>().is_some());
    }

    #[test]
    fn describe_records_probed_formats() {
        let mut camera = Camera::new(Box::new(MemoryDevice::new(vec![
            PixelFormat::Yuyv,
            PixelFormat::Mjpeg,
        ])));
        let info = camera.describe().unwrap();
        assert!(info.supports(PixelFormat::Mjpeg));
        assert!(info.supports(PixelFormat::Yuyv));
        assert!(!info.supports(PixelFormat::Jpeg));

        // A refresh keeps what probing learnt.
        assert!(camera.refresh_info().unwrap().supports(PixelFormat::Yuyv));
    }
}
