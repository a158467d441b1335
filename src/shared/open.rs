// This is free and unencumbered software released into the public domain.

use super::{CameraError, CaptureDevice};

/// Opens a capture device by URL.
///
/// `memory:[formats]` selects the synthetic device; anything else is a device
/// node path (optionally prefixed with `file:`), or a bare index such as `0`
/// for `/dev/video0`.
pub fn open_device(input_url: impl AsRef<str>) -> Result<Box<dyn CaptureDevice>, CameraError> {
    let url = input_url.as_ref().trim();
    if url.starts_with("memory:") {
        return Ok(Box::new(super::drivers::memory::MemoryDevice::open(url)?));
    }

    let path = device_path(url);
    cfg_if::cfg_if! {
        if #[cfg(all(feature = "v4l2", target_os = "linux"))] {
            Ok(Box::new(super::drivers::v4l2::V4l2Device::open(path)?))
        } else {
            Err(CameraError::NoDriver(path))
        }
    }
}

fn device_path(url: &str) -> String {
    let d = url.strip_prefix("file:").unwrap_or(url);
    if !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()) {
        format!("/dev/video{d}")
    } else if let Some(name) = d.strip_prefix("video") {
        format!("/dev/video{name}")
    } else {
        d.to_string()
    }
}
