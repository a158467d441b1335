// This is free and unencumbered software released into the public domain.

//! Blitting decoded frames onto a 32-bit BGR0 pixel surface.

use crate::shared::{CameraError, ColorFormat, ImageInfo, codec::yuyv_to_rgb};

pub const SURFACE_BYTES_PER_PIXEL: usize = 4;

/// A writable rectangle of 4-byte little-endian BGR0 pixels.
pub trait Surface {
    fn width(&self) -> usize;

    fn height(&self) -> usize;

    /// Pixels per row, including any padding.
    fn stride(&self) -> usize {
        self.width()
    }

    fn pixels_mut(&mut self) -> &mut [u8];
}

/// Heap-backed surface, mostly for previews in tests.
#[derive(Clone, Debug)]
pub struct MemorySurface {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl MemorySurface {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width * height * SURFACE_BYTES_PER_PIXEL],
        }
    }

    /// The BGR0 word at `(x, y)`.
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let at = (y * self.width + x) * SURFACE_BYTES_PER_PIXEL;
        [
            self.data[at],
            self.data[at + 1],
            self.data[at + 2],
            self.data[at + 3],
        ]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Surface for MemorySurface {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

#[inline]
fn bgr0(rgb: [u8; 3]) -> [u8; 4] {
    [rgb[2], rgb[1], rgb[0], 0]
}

/// Copies a frame onto `surface` with its top-left corner at `(x0, y0)`.
///
/// `Rgb` sources are decoded images described by `info` (3 bytes per pixel,
/// or 1 for gray). `Yuyv` sources are raw captures; two pixels are converted
/// per step. There is no scaling or clipping: a frame that does not fit is
/// rejected before anything is written.
pub fn blit(
    info: &ImageInfo,
    source: &[u8],
    format: ColorFormat,
    surface: &mut dyn Surface,
    x0: usize,
    y0: usize,
) -> Result<(), CameraError> {
    let ImageInfo { width, height, .. } = *info;
    if x0 + width > surface.width() || y0 + height > surface.height() {
        return Err(CameraError::invalid_frame(format!(
            "{width}x{height} frame at ({x0}, {y0}) does not fit a {}x{} surface",
            surface.width(),
            surface.height()
        )));
    }

    let src_stride = match format {
        ColorFormat::Rgb => match info.pixel_size {
            1 | 3 => width * info.pixel_size,
            n => {
                return Err(CameraError::invalid_frame(format!(
                    "cannot display {n} bytes per pixel"
                )));
            },
        },
        ColorFormat::Yuyv if width % 2 == 0 => width * 2,
        ColorFormat::Yuyv => {
            return Err(CameraError::invalid_frame("YUYV frame width must be even"));
        },
    };
    if source.len() < src_stride * height {
        return Err(CameraError::invalid_frame(format!(
            "{format} source holds {} bytes, expected {}",
            source.len(),
            src_stride * height
        )));
    }

    let dst_stride = surface.stride() * SURFACE_BYTES_PER_PIXEL;
    let pixels = surface.pixels_mut();

    for (y, src) in source.chunks_exact(src_stride).take(height).enumerate() {
        let start = (y0 + y) * dst_stride + x0 * SURFACE_BYTES_PER_PIXEL;
        let dst = &mut pixels[start..start + width * SURFACE_BYTES_PER_PIXEL];

        match (format, info.pixel_size) {
            (ColorFormat::Rgb, 1) => {
                for (gray, out) in src.iter().zip(dst.chunks_exact_mut(4)) {
                    out.copy_from_slice(&bgr0([*gray; 3]));
                }
            },
            (ColorFormat::Rgb, _) => {
                for (rgb, out) in src.chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
                    out.copy_from_slice(&bgr0([rgb[0], rgb[1], rgb[2]]));
                }
            },
            (ColorFormat::Yuyv, _) => {
                for (yuyv, out) in src.chunks_exact(4).zip(dst.chunks_exact_mut(8)) {
                    let [first, second] = yuyv_to_rgb(yuyv[0], yuyv[1], yuyv[2], yuyv[3]);
                    out[..4].copy_from_slice(&bgr0(first));
                    out[4..].copy_from_slice(&bgr0(second));
                }
            },
        }
    }
    Ok(())
}
