use std::fmt;

use crate::utils::TIME_UNIT_NS;

/// Device-native pixel layouts understood by the frame decoder.
///
/// Each variant maps to the V4L2 FourCC the device reports for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 4:2:2, `Y0 U Y1 V`
    Yuyv,
    /// Packed 4:2:2, `U Y0 V Y1`
    Uyvy,
    /// Packed 4:2:2, `Y0 V Y1 U`
    Yvyu,
    /// Packed 4:2:2, `Y0 Y1 U V`
    Yyuv,
    /// Planar 4:2:0, Y then U then V. The canonical layout.
    Yu12,
    /// Planar 4:2:0, Y then V then U
    Yv12,
    /// Semi-planar 4:2:0, interleaved UV
    Nv12,
    /// Semi-planar 4:2:0, interleaved VU
    Nv21,
    /// Semi-planar 4:2:2, interleaved UV
    Nv16,
    /// Semi-planar 4:2:2, interleaved VU
    Nv61,
    /// Packed 4:1:1, 12 bytes per 8 pixels
    Y41p,
    /// 8 bit greyscale
    Grey,
    /// 10 bit greyscale, bit packed
    Y10b,
    /// 16 bit greyscale, little endian
    Y16,
    Rgb24,
    Bgr24,
    BayerBggr,
    BayerGbrg,
    BayerGrbg,
    BayerRggb,
    Mjpeg,
    Jpeg,
    H264,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 23] = [
        PixelFormat::Yuyv,
        PixelFormat::Uyvy,
        PixelFormat::Yvyu,
        PixelFormat::Yyuv,
        PixelFormat::Yu12,
        PixelFormat::Yv12,
        PixelFormat::Nv12,
        PixelFormat::Nv21,
        PixelFormat::Nv16,
        PixelFormat::Nv61,
        PixelFormat::Y41p,
        PixelFormat::Grey,
        PixelFormat::Y10b,
        PixelFormat::Y16,
        PixelFormat::Rgb24,
        PixelFormat::Bgr24,
        PixelFormat::BayerBggr,
        PixelFormat::BayerGbrg,
        PixelFormat::BayerGrbg,
        PixelFormat::BayerRggb,
        PixelFormat::Mjpeg,
        PixelFormat::Jpeg,
        PixelFormat::H264,
    ];

    pub fn fourcc(self) -> [u8; 4] {
        *match self {
            PixelFormat::Yuyv => b"YUYV",
            PixelFormat::Uyvy => b"UYVY",
            PixelFormat::Yvyu => b"YVYU",
            PixelFormat::Yyuv => b"YYUV",
            PixelFormat::Yu12 => b"YU12",
            PixelFormat::Yv12 => b"YV12",
            PixelFormat::Nv12 => b"NV12",
            PixelFormat::Nv21 => b"NV21",
            PixelFormat::Nv16 => b"NV16",
            PixelFormat::Nv61 => b"NV61",
            PixelFormat::Y41p => b"Y41P",
            PixelFormat::Grey => b"GREY",
            PixelFormat::Y10b => b"Y10B",
            PixelFormat::Y16 => b"Y16 ",
            PixelFormat::Rgb24 => b"RGB3",
            PixelFormat::Bgr24 => b"BGR3",
            PixelFormat::BayerBggr => b"BA81",
            PixelFormat::BayerGbrg => b"GBRG",
            PixelFormat::BayerGrbg => b"GRBG",
            PixelFormat::BayerRggb => b"RGGB",
            PixelFormat::Mjpeg => b"MJPG",
            PixelFormat::Jpeg => b"JPEG",
            PixelFormat::H264 => b"H264",
        }
    }

    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        Self::ALL.into_iter().find(|f| &f.fourcc() == fourcc)
    }

    /// Formats whose frames have a variable size and go through a codec.
    pub fn is_compressed(self) -> bool {
        matches!(
            self,
            PixelFormat::Mjpeg | PixelFormat::Jpeg | PixelFormat::H264
        )
    }

    pub fn bayer_order(self) -> Option<BayerOrder> {
        match self {
            PixelFormat::BayerGbrg => Some(BayerOrder::Gbrg),
            PixelFormat::BayerGrbg => Some(BayerOrder::Grbg),
            PixelFormat::BayerBggr => Some(BayerOrder::Bggr),
            PixelFormat::BayerRggb => Some(BayerOrder::Rggb),
            _ => None,
        }
    }

    /// Bytes a full uncompressed frame occupies, `None` for compressed formats.
    pub fn frame_size(self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Yuyv
            | PixelFormat::Uyvy
            | PixelFormat::Yvyu
            | PixelFormat::Yyuv
            | PixelFormat::Nv16
            | PixelFormat::Nv61
            | PixelFormat::Y16 => Some(pixels * 2),
            PixelFormat::Yu12
            | PixelFormat::Yv12
            | PixelFormat::Nv12
            | PixelFormat::Nv21
            | PixelFormat::Y41p => Some(pixels * 3 / 2),
            PixelFormat::Grey
            | PixelFormat::BayerBggr
            | PixelFormat::BayerGbrg
            | PixelFormat::BayerGrbg
            | PixelFormat::BayerRggb => Some(pixels),
            PixelFormat::Y10b => Some(pixels * 10 / 8),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(pixels * 3),
            PixelFormat::Mjpeg | PixelFormat::Jpeg | PixelFormat::H264 => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fourcc = self.fourcc();
        write!(f, "{}", String::from_utf8_lossy(&fourcc).trim_end())
    }
}

/// Colour filter layout of the first two pixels of the first two rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BayerOrder {
    Gbrg,
    Grbg,
    Bggr,
    Rggb,
}

/// Frames per second as a rational `num / den`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    /// Whole frames per second, never below one.
    pub fn whole_fps(&self) -> u32 {
        if self.den == 0 {
            return 1;
        }
        (self.num / self.den).max(1)
    }

    pub fn frame_interval_ns(&self) -> u64 {
        if self.num == 0 {
            return TIME_UNIT_NS;
        }
        TIME_UNIT_NS * self.den as u64 / self.num as u64
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self { num: 30, den: 1 }
    }
}

/// Pixel format, resolution and rate asked of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatRequest {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
}

impl FormatRequest {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            frame_rate: FrameRate::default(),
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: FrameRate) -> Self {
        self.frame_rate = frame_rate;
        self
    }
}

impl Default for FormatRequest {
    fn default() -> Self {
        Self::new(PixelFormat::Yu12, 640, 480)
    }
}

/// A frame exactly as the device handed it over.
#[derive(Debug)]
pub struct RawFrame {
    /// Device buffer the frame was dequeued from
    pub index: usize,
    pub data: Vec<u8>,
    pub format: PixelFormat,
    /// Monotonic capture time in nanoseconds
    pub timestamp_ns: u64,
    pub is_keyframe: bool,
}

impl RawFrame {
    pub fn bytes_used(&self) -> usize {
        self.data.len()
    }
}

/// A frame in the canonical YU12 (I420) layout.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ns: u64,
    pub sequence: u64,
}

impl DecodedFrame {
    pub fn y_plane(&self) -> &[u8] {
        let luma = self.width as usize * self.height as usize;
        &self.data[..luma]
    }

    pub fn u_plane(&self) -> &[u8] {
        let luma = self.width as usize * self.height as usize;
        &self.data[luma..luma + luma / 4]
    }

    pub fn v_plane(&self) -> &[u8] {
        let luma = self.width as usize * self.height as usize;
        &self.data[luma + luma / 4..luma + luma / 2]
    }
}

#[derive(Debug, Clone)]
pub struct EncodedVideoFrame {
    pub data: Vec<u8>,
    pub is_keyframe: bool,
    /// Presentation TimeStamp, nanoseconds since the first frame
    pub pts: i64,
    /// Decode TimeStamp, nanoseconds since the first frame
    pub dts: i64,
    /// Nanoseconds since the previous emitted packet, zero for the first
    pub duration: i64,
}
