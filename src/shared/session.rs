// This is free and unencumbered software released into the public domain.

//! The capture loop: capture, convert, preview, deliver, wait.

use crate::shared::{
    Camera, CameraConfig, CameraError, ColorFormat, DEFAULT_CAPTURE_TIMEOUT,
    DEFAULT_JPEG_QUALITY, ImageInfo, JpegCodec, LocalStorage, PixelFormat, Surface, UploadClient,
    UploadOutcome, WorkingMode, blit,
};
use std::{
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

/// Images cycle through this many file names.
pub const FILENAME_CYCLE: u32 = 20;

/// Longest uninterrupted sleep between iterations, so a stop request is
/// noticed promptly even with long intervals.
const STOP_POLL: Duration = Duration::from_millis(100);

pub fn image_filename(n: u32) -> String {
    format!("image_{n:03}.jpg")
}

#[derive(Debug)]
pub enum Delivery {
    Upload(UploadClient),
    Store(LocalStorage),
}

impl Delivery {
    pub fn from_config(config: &CameraConfig) -> Self {
        match &config.upload {
            Some(upload) => Self::Upload(UploadClient::new(upload.clone())),
            None => Self::Store(LocalStorage::new(&config.storage_dir)),
        }
    }
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    Uploaded(UploadOutcome),
    /// Path of the stored image, or `None` if writing failed.
    Stored(Option<PathBuf>),
}

#[derive(Debug)]
pub struct IterationReport {
    pub sequence: u64,
    pub filename: String,
    pub pixel_format: PixelFormat,
    pub jpeg_len: usize,
    pub delivery: DeliveryOutcome,
    /// Why the frame was not shown on the display, if it was not.
    pub preview_error: Option<CameraError>,
}

impl core::fmt::Display for IterationReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.delivery {
            DeliveryOutcome::Uploaded(outcome) => write!(
                f,
                "{} {:.2} ms {}",
                self.filename,
                outcome.elapsed.as_secs_f64() * 1000.0,
                outcome.result
            ),
            DeliveryOutcome::Stored(Some(_)) => write!(f, "{}", self.filename),
            DeliveryOutcome::Stored(None) => write!(f, "{} (not stored)", self.filename),
        }
    }
}

pub struct CaptureSession {
    camera: Camera,
    mode: WorkingMode,
    codec: JpegCodec,
    surface: Option<Box<dyn Surface>>,
    delivery: Delivery,
    capture_timeout: Duration,
    jpeg_quality: u8,
    counter: u32,
    sequence: u64,
}

impl core::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("camera", &self.camera)
            .field("mode", &self.mode)
            .field("display", &self.surface.is_some())
            .field("delivery", &self.delivery)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl CaptureSession {
    /// Wraps a camera that has already been started.
    pub fn new(camera: Camera, delivery: Delivery) -> Result<Self, CameraError> {
        let mode = camera.working_mode().ok_or(CameraError::NotAllocated)?;
        Ok(Self {
            camera,
            mode,
            codec: JpegCodec::new(),
            surface: None,
            delivery,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            counter: 0,
            sequence: 0,
        })
    }

    /// Builds the session a [`CameraConfig`] describes, opening the display
    /// surface if one is configured.
    pub fn from_config(camera: Camera, config: &CameraConfig) -> Result<Self, CameraError> {
        let mut session = Self::new(camera, Delivery::from_config(config))?
            .with_capture_timeout(config.capture_timeout)
            .with_jpeg_quality(config.jpeg_quality);
        if let Some(display) = &config.display {
            session.surface = Some(open_surface(display)?);
        }
        Ok(session)
    }

    pub fn with_surface(mut self, surface: impl Surface + 'static) -> Self {
        self.surface = Some(Box::new(surface));
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

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn working_mode(&self) -> WorkingMode {
        self.mode
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    pub fn surface(&self) -> Option<&dyn Surface> {
        self.surface.as_deref()
    }

    /// One iteration: capture, convert to JPEG, preview, deliver.
    ///
    /// Upload and storage failures are reported in the returned report, not
    /// as errors.
    pub fn run_once(&mut self) -> Result<IterationReport, CameraError> {
        let frame = self.camera.capture(self.capture_timeout)?;
        self.counter = (self.counter + 1) % FILENAME_CYCLE;
        let filename = image_filename(self.counter);
        self.sequence += 1;

        let width = self.mode.resolution.width as usize;
        let height = self.mode.resolution.height as usize;

        let (jpeg, preview) = match self.mode.pixel_format {
            PixelFormat::Yuyv => {
                let preview = match self.surface.as_deref_mut() {
                    Some(surface) => {
                        let info = ImageInfo {
                            width,
                            height,
                            pixel_size: 2,
                        };
                        Some(blit(&info, frame, ColorFormat::Yuyv, surface, 0, 0))
                    },
                    None => None,
                };
                let jpeg = self
                    .codec
                    .compress_yuyv_to_jpeg(frame, width, height, self.jpeg_quality)?;
                (jpeg, preview)
            },
            format if format.is_jpeg() => {
                if frame.is_empty() {
                    return Err(CameraError::invalid_frame("driver returned an empty frame"));
                }
                let preview = match self.surface.as_deref_mut() {
                    Some(surface) => Some(
                        self.codec
                            .decompress_jpeg(frame)
                            .and_then(|(info, rgb)| blit(&info, rgb, ColorFormat::Rgb, surface, 0, 0)),
                    ),
                    None => None,
                };
                (frame, preview)
            },
            _ => return Err(CameraError::UnsupportedFormat),
        };

        let preview_error = match preview {
            Some(Err(err)) if err.is_fatal() => return Err(err),
            Some(Err(err)) => {
                #[cfg(feature = "tracing")]
                asimov_module::tracing::warn!(
                    target: "asimov_timelapse_module",
                    %err,
                    "frame not displayed"
                );
                Some(err)
            },
            _ => None,
        };

        let jpeg_len = jpeg.len();
        let delivery = match &mut self.delivery {
            Delivery::Upload(client) => DeliveryOutcome::Uploaded(client.upload(&filename, jpeg)),
            Delivery::Store(storage) => DeliveryOutcome::Stored(storage.store(&filename, jpeg)),
        };

        #[cfg(feature = "tracing")]
        asimov_module::tracing::debug!(
            target: "asimov_timelapse_module",
            sequence = self.sequence,
            filename = %filename,
            jpeg_len,
            "frame delivered"
        );

        Ok(IterationReport {
            sequence: self.sequence,
            filename,
            pixel_format: self.mode.pixel_format,
            jpeg_len,
            delivery,
            preview_error,
        })
    }

    /// Runs iterations every `interval` until `stop` is set or a fatal error
    /// occurs. Returns the number of completed iterations.
    ///
    /// Each completed iteration goes to `on_report`; each frame dropped on a
    /// non-fatal error goes to `on_skip`.
    pub fn run(
        &mut self,
        interval: Duration,
        stop: &AtomicBool,
        mut on_report: impl FnMut(&IterationReport),
        mut on_skip: impl FnMut(&CameraError),
    ) -> Result<u64, CameraError> {
        let mut completed = 0;
        while !stop.load(Ordering::Relaxed) {
            match self.run_once() {
                Ok(report) => {
                    completed += 1;
                    on_report(&report);
                },
                Err(err) if !err.is_fatal() => {
                    #[cfg(feature = "tracing")]
                    asimov_module::tracing::warn!(
                        target: "asimov_timelapse_module",
                        %err,
                        "skipping frame"
                    );
                    on_skip(&err);
                },
                Err(err) => return Err(err),
            }
            sleep_unless_stopped(interval, stop);
        }
        Ok(completed)
    }
}

fn sleep_unless_stopped(interval: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + interval;
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        std::thread::sleep(remaining.min(STOP_POLL));
    }
}

fn open_surface(path: &str) -> Result<Box<dyn Surface>, CameraError> {
    cfg_if::cfg_if! {
        if #[cfg(all(feature = "fbdev", target_os = "linux"))] {
            Ok(Box::new(crate::shared::drivers::fbdev::FramebufferSurface::open(path)?))
        } else {
            Err(CameraError::NoDriver(path.to_string()))
        }
    }
}
