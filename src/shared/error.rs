// This is free and unencumbered software released into the public domain.

use std::{error::Error as StdError, io, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("no suitable capture backend available for `{0}`")]
    NoDriver(String),

    #[error("failed to open video device `{path}`")]
    DeviceOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("no usable pixel format (need MJPG, JPEG, or YUYV)")]
    UnsupportedFormat,

    #[error("format negotiation failed: {0}")]
    FormatNegotiation(String),

    #[error("failed to map capture buffer")]
    BufferMap(#[source] io::Error),

    #[error("capture buffer is not allocated")]
    NotAllocated,

    #[error("no frame within {0:?}")]
    CaptureTimeout(Duration),

    #[error("capture failed while {context}")]
    CaptureIo {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("input does not look like a JPEG image")]
    InvalidJpeg(#[source] Box<dyn StdError + Send + Sync>),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("JPEG encoding failed")]
    Encode(#[source] Box<dyn StdError + Send + Sync>),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("driver error while {context}")]
    DriverError {
        context: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("{0}")]
    Other(String),
}

impl CameraError {
    #[inline]
    pub fn driver(context: &'static str, source: impl StdError + Send + Sync + 'static) -> Self {
        Self::DriverError {
            context,
            source: Box::new(source),
        }
    }

    #[inline]
    pub fn capture_io(context: &'static str, source: io::Error) -> Self {
        Self::CaptureIo { context, source }
    }

    #[inline]
    pub fn negotiation(msg: impl Into<String>) -> Self {
        Self::FormatNegotiation(msg.into())
    }

    #[inline]
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    #[inline]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    #[inline]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether the capture loop has to stop after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::InvalidJpeg(_) | Self::InvalidFrame(_) | Self::Encode(_)
        )
    }
}

/// Failures of a single upload. None of them ends the capture loop.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("cannot resolve host `{host}`")]
    HostResolution {
        host: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("cannot connect to {addr}")]
    Connection {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to send request")]
    Send(#[source] io::Error),

    #[error("peer closed the connection without a response")]
    EmptyResponse,

    #[error("failed to receive response")]
    Receive(#[source] io::Error),

    #[error("message buffer holds {capacity} bytes, request needs {needed}")]
    BufferTooSmall { needed: usize, capacity: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(CameraError::UnsupportedFormat.is_fatal());
        assert!(CameraError::CaptureTimeout(Duration::from_secs(2)).is_fatal());
        assert!(CameraError::BufferMap(io::Error::other("mmap")).is_fatal());
        assert!(!CameraError::invalid_frame("short").is_fatal());
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            CameraError::CaptureTimeout(Duration::from_secs(2)).to_string(),
            "no frame within 2s"
        );
        assert_eq!(
            UploadError::BufferTooSmall {
                needed: 10,
                capacity: 4
            }
            .to_string(),
            "message buffer holds 4 bytes, request needs 10"
        );
    }
}
