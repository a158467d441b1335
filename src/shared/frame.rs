// This is free and unencumbered software released into the public domain.

use derive_more::Display;
use serde::Serialize;

/// Four-character code packed little-endian, as V4L2 does.
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

pub fn fourcc_to_string(code: u32) -> String {
    code.to_le_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect::<String>()
        .trim_end()
        .to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Mjpeg,
    Jpeg,
    Yuyv,
    Other(u32),
}

impl PixelFormat {
    pub const MJPG: u32 = fourcc(b"MJPG");
    pub const JPEG: u32 = fourcc(b"JPEG");
    pub const YUYV: u32 = fourcc(b"YUYV");

    /// Formats tried during negotiation. Only the first three are ever selected;
    /// the rest are probed so `DriverInfo` can report them.
    pub const PROBE_CANDIDATES: [PixelFormat; 9] = [
        PixelFormat::Mjpeg,
        PixelFormat::Jpeg,
        PixelFormat::Yuyv,
        PixelFormat::Other(fourcc(b"UYVY")),
        PixelFormat::Other(fourcc(b"RGB3")),
        PixelFormat::Other(fourcc(b"BGR3")),
        PixelFormat::Other(fourcc(b"YU12")),
        PixelFormat::Other(fourcc(b"NV12")),
        PixelFormat::Other(fourcc(b"H264")),
    ];

    /// Selection order when no hint applies.
    pub const PREFERENCE: [PixelFormat; 3] =
        [PixelFormat::Mjpeg, PixelFormat::Jpeg, PixelFormat::Yuyv];

    pub fn from_fourcc(code: u32) -> Self {
        match code {
            Self::MJPG => Self::Mjpeg,
            Self::JPEG => Self::Jpeg,
            Self::YUYV => Self::Yuyv,
            other => Self::Other(other),
        }
    }

    pub fn fourcc(self) -> u32 {
        match self {
            Self::Mjpeg => Self::MJPG,
            Self::Jpeg => Self::JPEG,
            Self::Yuyv => Self::YUYV,
            Self::Other(code) => code,
        }
    }

    /// Whether frames in this format are already JPEG bitstreams.
    pub fn is_jpeg(self) -> bool {
        matches!(self, Self::Mjpeg | Self::Jpeg)
    }

    pub fn is_selectable(self) -> bool {
        Self::PREFERENCE.contains(&self)
    }
}

impl core::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&fourcc_to_string(self.fourcc()))
    }
}

impl core::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mjpg" | "mjpeg" => Ok(Self::Mjpeg),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "yuyv" | "yuv" => Ok(Self::Yuyv),
            other => Err(format!("unknown pixel format `{other}` (expected mjpg, jpeg, or yuyv)")),
        }
    }
}

impl Serialize for PixelFormat {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
#[display("{width}x{height}")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const QVGA: Resolution = Resolution::new(320, 240);
    pub const VGA: Resolution = Resolution::new(640, 480);
    pub const SVGA: Resolution = Resolution::new(800, 600);
    pub const HD: Resolution = Resolution::new(1080, 720);

    /// Geometry used when probing which formats the driver accepts.
    pub const PROBE: Resolution = Resolution::QVGA;

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::VGA
    }
}

impl core::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "qvga" => return Ok(Self::QVGA),
            "vga" => return Ok(Self::VGA),
            "svga" => return Ok(Self::SVGA),
            "hd" => return Ok(Self::HD),
            _ => {},
        }

        let Some((w, h)) = s.split_once('x') else {
            return Err(format!(
                "invalid size `{s}`; use qvga, vga, svga, hd, or WxH (e.g. 640x480)"
            ));
        };
        let width: u32 = w.trim().parse().map_err(|_| format!("invalid width: {w}"))?;
        let height: u32 = h.trim().parse().map_err(|_| format!("invalid height: {h}"))?;
        if width == 0 || height == 0 || width % 2 != 0 {
            return Err(format!("size {width}x{height} must be non-zero with an even width"));
        }
        Ok(Self::new(width, height))
    }
}

/// What the driver settled on after the final set-format call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct WorkingMode {
    pub resolution: Resolution,
    pub pixel_format: PixelFormat,
    pub field: u32,
}

/// Geometry of a decoded image held in the codec's scratch buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: usize,
    pub height: usize,
    /// Bytes per pixel.
    pub pixel_size: usize,
}

impl ImageInfo {
    pub fn len(&self) -> usize {
        self.width * self.height * self.pixel_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ColorFormat {
    #[display("RGB")]
    Rgb,
    #[display("YUYV")]
    Yuyv,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_codes() {
        assert_eq!(PixelFormat::YUYV, 0x5659_5559);
        assert_eq!(PixelFormat::from_fourcc(fourcc(b"MJPG")), PixelFormat::Mjpeg);
        assert_eq!(PixelFormat::Other(fourcc(b"NV12")).to_string(), "NV12");
        assert_eq!(fourcc_to_string(fourcc(b"Y16 ")), "Y16");
    }

    #[test]
    fn parse_formats_and_sizes() {
        assert_eq!("MJPEG".parse::<PixelFormat>(), Ok(PixelFormat::Mjpeg));
        assert_eq!("yuv".parse::<PixelFormat>(), Ok(PixelFormat::Yuyv));
        assert!("h264".parse::<PixelFormat>().is_err());

        assert_eq!("svga".parse::<Resolution>(), Ok(Resolution::SVGA));
        assert_eq!("1280x720".parse::<Resolution>(), Ok(Resolution::new(1280, 720)));
        assert!("641x480".parse::<Resolution>().is_err());
        assert!("wide".parse::<Resolution>().is_err());
        assert_eq!(Resolution::HD.to_string(), "1080x720");
    }
}
