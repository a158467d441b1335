// This is free and unencumbered software released into the public domain.

#[cfg(not(feature = "std"))]
compile_error!("asimov-timelapse-camera requires the 'std' feature");

use asimov_module::SysexitsError::{self, *};
use asimov_timelapse_module::{
    cli,
    shared::{
        Camera, CameraConfig, CameraError, CaptureSession, DEFAULT_CAPTURE_TIMEOUT,
        DEFAULT_DEVICE, DEFAULT_FRAMEBUFFER, DEFAULT_JPEG_QUALITY, DEFAULT_STORAGE_DIR,
        PixelFormat, Resolution, UploadConfig, session::DeliveryOutcome,
    },
};
use clap::Parser;
use clientele::StandardOptions;
use std::{
    error::Error as StdError,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// Captures a still every INTERVAL milliseconds and stores or uploads it.
#[derive(Debug, Parser)]
struct Options {
    #[clap(flatten)]
    flags: StandardOptions,

    /// Milliseconds to wait between captures
    #[arg(value_name = "INTERVAL")]
    interval: u64,

    /// Video device node or index
    #[arg(long, default_value = DEFAULT_DEVICE)]
    device: String,

    /// Frame size: qvga, vga, svga, hd, or WxH
    #[arg(short = 's', long = "size", default_value = "vga")]
    size: Resolution,

    /// Preferred pixel format (mjpg, jpeg, yuyv)
    #[arg(short = 'f', long)]
    format: Option<PixelFormat>,

    /// Preview each frame on a framebuffer
    #[arg(
        long,
        value_name = "FRAMEBUFFER",
        num_args = 0..=1,
        default_missing_value = DEFAULT_FRAMEBUFFER
    )]
    display: Option<String>,

    /// Upload images to HOST[:PORT] instead of storing them
    #[arg(short = 'u', long, value_name = "HOST[:PORT]")]
    upload: Option<UploadConfig>,

    /// Server path the upload form is posted to
    #[arg(long, default_value = UploadConfig::DEFAULT_PATH)]
    path: String,

    /// Directory images are stored in when not uploading
    #[arg(short = 'o', long, value_name = "DIR", default_value = DEFAULT_STORAGE_DIR)]
    output: PathBuf,

    /// JPEG quality for raw frames (1-100)
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    quality: u8,

    /// Milliseconds to wait for a frame before giving up
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_CAPTURE_TIMEOUT.as_millis() as u64)]
    capture_timeout: u64,

    /// Run unattended: no interrupt handler, no per-frame output
    #[arg(long)]
    agent: bool,
}

impl Options {
    fn to_config(&self) -> Result<CameraConfig, CameraError> {
        if self.capture_timeout == 0 {
            return Err(CameraError::invalid_config("capture timeout must be positive"));
        }

        let mut config = CameraConfig::new(self.size, Duration::from_millis(self.interval))
            .with_device(self.device.clone())
            .with_capture_timeout(Duration::from_millis(self.capture_timeout))
            .with_jpeg_quality(self.quality)
            .with_storage_dir(self.output.clone())
            .with_agent(self.agent);
        if let Some(format) = self.format {
            config = config.with_pixel_format(format);
        }
        if let Some(display) = &self.display {
            config = config.with_display(display.clone());
        }
        if let Some(upload) = &self.upload {
            config = config.with_upload(upload.clone().with_path(self.path.clone()));
        }
        Ok(config)
    }
}

pub fn main() -> Result<SysexitsError, Box<dyn StdError>> {
    asimov_module::dotenv().ok();
    let args = asimov_module::args_os()?;
    let options = Options::parse_from(args);

    if options.flags.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(EX_OK);
    }

    if options.flags.license {
        print!("{}", include_str!("../../UNLICENSE"));
        return Ok(EX_OK);
    }

    #[cfg(feature = "tracing")]
    asimov_module::init_tracing_subscriber(&options.flags).expect("failed to initialize logging");

    let exit_code = match run_camera(&options) {
        Ok(()) => EX_OK,
        Err(err) => cli::handle_error(&err, &options.flags),
    };

    Ok(exit_code)
}

fn run_camera(options: &Options) -> Result<(), CameraError> {
    let config = options.to_config()?;
    let flags = &options.flags;

    let mut camera = Camera::open(&config.device)?;
    let info = camera.refresh_info()?;
    cli::info_user(
        flags,
        &format!(
            "camera {}: driver \"{}\", card \"{}\", bus \"{}\"",
            config.device, info.driver, info.card, info.bus_info
        ),
    );

    let mode = camera.start(config.resolution, config.pixel_format)?;
    if mode.resolution != config.resolution {
        cli::warn_user(
            flags,
            &format!("driver adjusted {} to {}", config.resolution, mode.resolution),
        );
    }
    cli::info_user(
        flags,
        &format!(
            "capturing {} at {} every {} ms",
            mode.pixel_format,
            mode.resolution,
            config.interval.as_millis()
        ),
    );

    let mut session = CaptureSession::from_config(camera, &config)?;

    let stop = Arc::new(AtomicBool::new(false));
    if !config.agent {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .map_err(|e| CameraError::other(format!("{e}")))?;
    }

    let show_reports = !config.agent || flags.verbose >= 1;
    let completed = session.run(
        config.interval,
        &stop,
        |report| {
            if let DeliveryOutcome::Uploaded(outcome) = &report.delivery {
                if let Some(err) = &outcome.error {
                    cli::warn_user_with_error(
                        flags,
                        &format!("{} not uploaded", report.filename),
                        err,
                    );
                }
            }
            if let Some(err) = &report.preview_error {
                cli::warn_user_with_error(
                    flags,
                    &format!("{} not displayed", report.filename),
                    err,
                );
            }
            if show_reports {
                println!("{report}");
            }
        },
        |err| cli::warn_user_with_error(flags, "frame skipped", err),
    )?;

    if stop.load(Ordering::SeqCst) {
        cli::info_user(flags, "terminated by user");
    }
    cli::info_user(flags, &format!("captured {completed} images"));
    Ok(())
}
