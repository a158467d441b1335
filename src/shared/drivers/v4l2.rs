// This is free and unencumbered software released into the public domain.

//! Video4Linux2 capture with a single memory-mapped buffer.

use crate::shared::{
    CameraBackend, CameraError, CaptureDevice, CropInfo, DriverInfo, FormatDescription,
    GrowBuffer, MAX_ENUMERATED_FORMATS, PixelFormat, Rect, Resolution, WorkingMode,
};
use std::{any::Any, io, time::Duration};
use v4l::{
    Device, FourCC,
    buffer::Type,
    format::FieldOrder,
    io::traits::CaptureStream,
    prelude::MmapStream,
    v4l_sys::{v4l2_cropcap, v4l2_rect},
    v4l2,
    video::Capture,
};

pub struct V4l2Device {
    path: String,
    // Dropped before the device: stops streaming and releases the buffer.
    stream: Option<MmapStream<'static>>,
    device: Box<Device>,
    frame: GrowBuffer,
    bytes_used: usize,
}

impl core::fmt::Debug for V4l2Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("V4l2Device")
            .field("path", &self.path)
            .field("streaming", &self.stream.is_some())
            .field("bytes_used", &self.bytes_used)
            .finish()
    }
}

impl V4l2Device {
    pub fn open(path: impl AsRef<str>) -> Result<Self, CameraError> {
        let path = path.as_ref();
        let device = Device::with_path(path).map_err(|source| CameraError::DeviceOpen {
            path: path.to_string(),
            source,
        })?;

        Ok(Self {
            path: path.to_string(),
            stream: None,
            device: Box::new(device),
            frame: GrowBuffer::new(),
            bytes_used: 0,
        })
    }

    fn crop_info(&self) -> Option<CropInfo> {
        // SAFETY: `v4l2_cropcap` is plain old data.
        let mut cropcap: v4l2_cropcap = unsafe { core::mem::zeroed() };
        cropcap.type_ = Type::VideoCapture as u32;
        // SAFETY: VIDIOC_CROPCAP fills a live, exclusively borrowed `v4l2_cropcap`.
        unsafe {
            v4l2::ioctl(
                self.device.handle().fd(),
                v4l2::vidioc::VIDIOC_CROPCAP,
                &mut cropcap as *mut v4l2_cropcap as *mut core::ffi::c_void,
            )
        }
        .ok()?;

        let rect = |r: v4l2_rect| Rect {
            left: r.left,
            top: r.top,
            width: r.width,
            height: r.height,
        };
        Some(CropInfo {
            bounds: rect(cropcap.bounds),
            default_rect: rect(cropcap.defrect),
            pixel_aspect: (cropcap.pixelaspect.numerator, cropcap.pixelaspect.denominator),
        })
    }

    fn enumerate_formats(&self) -> Vec<FormatDescription> {
        let descriptions = match self.device.enum_formats() {
            Ok(descriptions) => descriptions,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                asimov_module::tracing::warn!(
                    target: "asimov_timelapse_module",
                    device = %self.path,
                    error = %_err,
                    "format enumeration failed"
                );
                return Vec::new();
            },
        };
        if descriptions.len() > MAX_ENUMERATED_FORMATS {
            #[cfg(feature = "tracing")]
            asimov_module::tracing::warn!(
                target: "asimov_timelapse_module",
                device = %self.path,
                "format list truncated at {MAX_ENUMERATED_FORMATS} entries"
            );
        }
        descriptions
            .into_iter()
            .take(MAX_ENUMERATED_FORMATS)
            .map(|desc| FormatDescription {
                fourcc: PixelFormat::from_fourcc(u32::from_le_bytes(desc.fourcc.repr)),
                description: desc.description,
            })
            .collect()
    }
}

impl CaptureDevice for V4l2Device {
    fn backend(&self) -> CameraBackend {
        CameraBackend::V4l2
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn query_capabilities(&mut self) -> Result<DriverInfo, CameraError> {
        let caps = self
            .device
            .query_caps()
            .map_err(|e| CameraError::driver("querying capabilities", e))?;
        let (major, minor, patch) = caps.version;

        Ok(DriverInfo {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            version: format!("{major}.{minor}.{patch}"),
            capabilities: caps.capabilities.bits(),
            cropping: self.crop_info(),
            formats: self.enumerate_formats(),
            accepted: Vec::new(),
        })
    }

    fn try_format(
        &mut self,
        resolution: Resolution,
        format: PixelFormat,
    ) -> Result<Option<WorkingMode>, CameraError> {
        // The format cannot change while buffers are allocated.
        self.stream = None;

        let mut fmt = self
            .device
            .format()
            .map_err(|e| CameraError::driver("reading current format", e))?;
        fmt.width = resolution.width;
        fmt.height = resolution.height;
        fmt.fourcc = FourCC::new(&format.fourcc().to_le_bytes());
        fmt.field_order = FieldOrder::Progressive;

        let granted = match self.device.set_format(&fmt) {
            Ok(granted) => granted,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                asimov_module::tracing::debug!(
                    target: "asimov_timelapse_module",
                    %format,
                    %resolution,
                    error = %_err,
                    "set-format rejected"
                );
                return Ok(None);
            },
        };

        if u32::from_le_bytes(granted.fourcc.repr) != format.fourcc() {
            return Ok(None);
        }
        Ok(Some(WorkingMode {
            resolution: Resolution::new(granted.width, granted.height),
            pixel_format: format,
            field: granted.field_order as u32,
        }))
    }

    fn allocate_buffer(&mut self) -> Result<usize, CameraError> {
        self.stream = None;
        self.bytes_used = 0;

        let len = self.device.format().map_err(CameraError::BufferMap)?.size as usize;
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, 1)
            .map_err(CameraError::BufferMap)?;
        self.stream = Some(stream);
        self.frame.ensure(len);
        Ok(len)
    }

    fn capture_frame(&mut self, timeout: Duration) -> Result<usize, CameraError> {
        let stream = self.stream.as_mut().ok_or(CameraError::NotAllocated)?;
        stream.set_timeout(timeout);

        let (buf, meta) = match CaptureStream::next(stream) {
            Ok(next) => next,
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                return Err(CameraError::CaptureTimeout(timeout));
            },
            Err(err) => return Err(CameraError::capture_io("dequeuing buffer", err)),
        };

        let len = (meta.bytesused as usize).min(buf.len());
        self.frame.ensure(len).copy_from_slice(&buf[..len]);
        self.bytes_used = len;
        Ok(len)
    }

    fn frame(&self) -> &[u8] {
        &self.frame.as_slice()[..self.bytes_used]
    }

    fn close(&mut self) -> Result<(), CameraError> {
        self.stream = None;
        self.bytes_used = 0;
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
    fn open_missing_node_is_a_device_open_error() {
        let err = V4l2Device::open("/dev/this-video-node-does-not-exist").unwrap_err();
        assert!(matches!(err, CameraError::DeviceOpen { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn capture_before_allocation_is_rejected() {
        // Any readable node works; the device is never queried.
        let Ok(mut device) = V4l2Device::open("/dev/null") else {
            return;
        };
        assert!(matches!(
            device.capture_frame(Duration::from_millis(10)),
            Err(CameraError::NotAllocated)
        ));
        assert!(device.frame().is_empty());
        device.close().unwrap();
    }
}
