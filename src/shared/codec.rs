// This is free and unencumbered software released into the public domain.

//! JPEG decode/encode and the YUYV colorspace helpers.

use crate::shared::{CameraError, DEFAULT_JPEG_QUALITY, GrowBuffer, ImageInfo};
use image::{ImageDecoder, codecs::jpeg::JpegDecoder};
use std::io::Cursor;

/// Converts one YUYV macropixel (two pixels sharing chroma) to two RGB pixels.
///
/// Fixed-point BT.601-style math with a reduced luma factor (31 instead of
/// 37). Results are truncated to a byte without saturation, so extreme
/// luma/chroma combinations wrap around.
#[inline]
pub fn yuyv_to_rgb(y0: u8, u: u8, y1: u8, v: u8) -> [[u8; 3]; 2] {
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let pixel = |y: u8| {
        let p = 31 * (i32::from(y) - 16);
        let blue = (p + 65 * d + 16) >> 5;
        let green = (p - 12 * d - 26 * e + 16) >> 5;
        let red = (p + 51 * e + 16) >> 5;
        [red as u8, green as u8, blue as u8]
    };
    [pixel(y0), pixel(y1)]
}

/// Repacks a YUYV row into YCbCr triples, duplicating the shared chroma.
fn repack_yuyv_row(src: &[u8], dst: &mut [u8]) {
    for (yuyv, ycbcr) in src.chunks_exact(4).zip(dst.chunks_exact_mut(6)) {
        let (y0, u, y1, v) = (yuyv[0], yuyv[1], yuyv[2], yuyv[3]);
        ycbcr.copy_from_slice(&[y0, u, v, y1, u, v]);
    }
}

/// JPEG codec writing its output into a reusable scratch buffer.
///
/// Each call invalidates the output of the previous one.
#[derive(Debug, Default)]
pub struct JpegCodec {
    scratch: GrowBuffer,
    ycbcr: GrowBuffer,
    encoded: Vec<u8>,
}

impl JpegCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capacity of the scratch buffer; never decreases.
    pub fn scratch_capacity(&self) -> usize {
        self.scratch.capacity()
    }

    /// Decodes a JPEG/MJPEG payload to interleaved RGB (or gray for
    /// single-component images).
    pub fn decompress_jpeg(&mut self, jpeg: &[u8]) -> Result<(ImageInfo, &[u8]), CameraError> {
        let decoder = JpegDecoder::new(Cursor::new(jpeg))
            .map_err(|e| CameraError::InvalidJpeg(Box::new(e)))?;

        let (width, height) = decoder.dimensions();
        let info = ImageInfo {
            width: width as usize,
            height: height as usize,
            pixel_size: decoder.color_type().bytes_per_pixel() as usize,
        };
        let len = usize::try_from(decoder.total_bytes())
            .map_err(|_| CameraError::invalid_frame("decoded image too large"))?;

        let out = self.scratch.ensure(len);
        decoder
            .read_image(out)
            .map_err(|e| CameraError::InvalidJpeg(Box::new(e)))?;

        Ok((info, &self.scratch.as_slice()[..len]))
    }

    pub fn compress_yuyv(
        &mut self,
        yuyv: &[u8],
        width: usize,
        height: usize,
    ) -> Result<&[u8], CameraError> {
        self.compress_yuyv_to_jpeg(yuyv, width, height, DEFAULT_JPEG_QUALITY)
    }

    /// Encodes a raw YUYV frame as JPEG, row by row through YCbCr.
    pub fn compress_yuyv_to_jpeg(
        &mut self,
        yuyv: &[u8],
        width: usize,
        height: usize,
        quality: u8,
    ) -> Result<&[u8], CameraError> {
        if width == 0 || height == 0 || width % 2 != 0 {
            return Err(CameraError::invalid_frame(format!(
                "YUYV frame needs a non-zero even width, got {width}x{height}"
            )));
        }
        let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
            return Err(CameraError::invalid_frame(format!(
                "{width}x{height} exceeds the JPEG size limit"
            )));
        };
        let src_stride = width * 2;
        if yuyv.len() < src_stride * height {
            return Err(CameraError::invalid_frame(format!(
                "YUYV frame holds {} bytes, {width}x{height} needs {}",
                yuyv.len(),
                src_stride * height
            )));
        }

        let dst_stride = width * 3;
        let ycbcr = self.ycbcr.ensure(dst_stride * height);
        for (src, dst) in yuyv
            .chunks_exact(src_stride)
            .zip(ycbcr.chunks_exact_mut(dst_stride))
        {
            repack_yuyv_row(src, dst);
        }

        self.encoded.clear();
        let encoder = jpeg_encoder::Encoder::new(&mut self.encoded, quality.clamp(1, 100));
        encoder
            .encode(
                &self.ycbcr.as_slice()[..dst_stride * height],
                w,
                h,
                jpeg_encoder::ColorType::Ycbcr,
            )
            .map_err(|e| CameraError::Encode(Box::new(e)))?;

        let len = self.encoded.len();
        self.scratch.ensure(len).copy_from_slice(&self.encoded);
        Ok(&self.scratch.as_slice()[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_input_is_gray() {
        let [a, b] = yuyv_to_rgb(128, 128, 128, 128);
        assert_eq!(a, b);
        assert!(a[0] == a[1] && a[1] == a[2]);
        // 31 * 112 / 32 rounds to 109: darker than 128 by the reduced luma factor.
        assert_eq!(a[0], 109);
    }

    #[test]
    fn chroma_moves_channels_apart() {
        let [pixel, _] = yuyv_to_rgb(128, 128, 128, 200);
        let [red, green, blue] = pixel;
        assert!(red > green && red > blue);

        let [pixel, _] = yuyv_to_rgb(128, 200, 128, 128);
        let [red, _, blue] = pixel;
        assert!(blue > red);
    }

    #[test]
    fn extreme_values_wrap_instead_of_saturating() {
        // p = 31 * 239 = 7409, blue = (7409 + 65 * 127 + 16) >> 5 = 490
        let [pixel, _] = yuyv_to_rgb(255, 255, 255, 128);
        assert_eq!(pixel[2], (490 & 0xff) as u8);
    }

    #[test]
    fn repacking_duplicates_chroma() {
        let mut out = [0u8; 12];
        repack_yuyv_row(&[10, 20, 30, 40, 50, 60, 70, 80], &mut out);
        assert_eq!(out, [10, 20, 40, 30, 20, 40, 50, 60, 80, 70, 60, 80]);
    }

    #[test]
    fn uniform_frame_round_trips_within_tolerance() {
        let (width, height) = (64, 48);
        // Y=150, Cb=128, Cr=128: a light neutral gray.
        let yuyv: Vec<u8> = [150u8, 128, 150, 128]
            .iter()
            .copied()
            .cycle()
            .take(width * height * 2)
            .collect();

        let mut codec = JpegCodec::new();
        let jpeg = codec.compress_yuyv(&yuyv, width, height).unwrap().to_vec();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let (info, rgb) = codec.decompress_jpeg(&jpeg).unwrap();
        assert_eq!(info, ImageInfo { width, height, pixel_size: 3 });
        assert!(rgb.iter().all(|&c| c.abs_diff(150) <= 4), "colour drifted");
    }

    #[test]
    fn rejects_short_and_odd_frames() {
        let mut codec = JpegCodec::new();
        assert!(matches!(
            codec.compress_yuyv(&[0; 10], 4, 4),
            Err(CameraError::InvalidFrame(_))
        ));
        assert!(matches!(
            codec.compress_yuyv(&[0; 64], 3, 4),
            Err(CameraError::InvalidFrame(_))
        ));
    }

    #[test]
    fn rejects_non_jpeg_input() {
        let mut codec = JpegCodec::new();
        assert!(matches!(
            codec.decompress_jpeg(b"definitely not a jpeg"),
            Err(CameraError::InvalidJpeg(_))
        ));
    }

    #[test]
    fn scratch_capacity_is_monotonic() {
        let mut codec = JpegCodec::new();
        let mut last = 0;
        for (w, h) in [(64, 48), (16, 16), (128, 96)] {
            let yuyv = vec![128u8; w * h * 2];
            let jpeg = codec.compress_yuyv(&yuyv, w, h).unwrap().to_vec();
            assert!(codec.scratch_capacity() >= last);
            last = codec.scratch_capacity();

            let (info, _) = codec.decompress_jpeg(&jpeg).unwrap();
            assert!(codec.scratch_capacity() >= info.len());
            assert!(codec.scratch_capacity() >= last);
            last = codec.scratch_capacity();
        }
        assert!(last >= 128 * 96 * 3);
    }
}
