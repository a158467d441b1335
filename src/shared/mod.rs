// This is free and unencumbered software released into the public domain.

mod buffer;
pub use buffer::*;

pub mod codec;
pub use codec::{JpegCodec, yuyv_to_rgb};

mod config;
pub use config::*;

mod display;
pub use display::*;

mod driver;
pub use driver::*;

pub mod drivers {
    pub mod memory;

    #[cfg(all(feature = "v4l2", target_os = "linux"))]
    pub mod v4l2;

    #[cfg(all(feature = "fbdev", target_os = "linux"))]
    pub mod fbdev;
}

mod error;
pub use error::*;

mod frame;
pub use frame::*;

mod open;
pub use open::*;

pub mod session;
pub use session::{CaptureSession, Delivery, IterationReport};

pub mod storage;
pub use storage::LocalStorage;

pub mod upload;
pub use upload::{UploadClient, UploadOutcome, UploadState};
