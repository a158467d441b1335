// This is free and unencumbered software released into the public domain.

use crate::shared::{PixelFormat, Resolution};
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_DEVICE: &str = "/dev/video0";
pub const DEFAULT_FRAMEBUFFER: &str = "/dev/fb0";
pub const DEFAULT_STORAGE_DIR: &str = "/var/www/ramdisk";
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_JPEG_QUALITY: u8 = 92;

#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub device: String,
    pub resolution: Resolution,
    pub pixel_format: Option<PixelFormat>,
    pub interval: Duration,
    pub capture_timeout: Duration,
    pub jpeg_quality: u8,
    /// Framebuffer to preview frames on, if any.
    pub display: Option<String>,
    pub upload: Option<UploadConfig>,
    pub storage_dir: PathBuf,
    /// Agent mode: no interactive interruption, quiet output.
    pub agent: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.into(),
            resolution: Resolution::VGA,
            pixel_format: None,
            interval: Duration::from_millis(100),
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            display: None,
            upload: None,
            storage_dir: DEFAULT_STORAGE_DIR.into(),
            agent: false,
        }
    }
}

impl CameraConfig {
    pub fn new(resolution: Resolution, interval: Duration) -> Self {
        Self {
            resolution,
            interval,
            ..Default::default()
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    pub fn with_pixel_format(mut self, fmt: PixelFormat) -> Self {
        self.pixel_format = Some(fmt);
        self
    }

    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn with_display(mut self, framebuffer: impl Into<String>) -> Self {
        self.display = Some(framebuffer.into());
        self
    }

    pub fn with_upload(mut self, upload: UploadConfig) -> Self {
        self.upload = Some(upload);
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_agent(mut self, enabled: bool) -> Self {
        self.agent = enabled;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadConfig {
    pub host: String,
    pub port: u16,
    /// Server path the form is posted to.
    pub path: String,
    pub timeout: Duration,
}

impl UploadConfig {
    pub const DEFAULT_PORT: u16 = 80;
    pub const DEFAULT_PATH: &'static str = "/upload.php";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Self::DEFAULT_PORT,
            path: Self::DEFAULT_PATH.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl core::str::FromStr for UploadConfig {
    type Err = String;

    /// Parses `host` or `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("upload host must not be empty".into());
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.ends_with(':') => {
                let port: u16 = port.parse().map_err(|_| format!("invalid port: {port}"))?;
                Ok(Self::new(host).with_port(port))
            },
            _ => Ok(Self::new(s)),
        }
    }
}
