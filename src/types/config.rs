use std::time::Duration;

use super::video_frame::{BayerOrder, FormatRequest};

/// Output codec of the buffered video encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// Frames are copied verbatim, used for devices that already deliver compressed data
    Raw,
    Mjpeg,
    Mpeg4,
    H264,
}

impl VideoCodec {
    /// FFmpeg encoder name, `None` for raw passthrough.
    pub fn encoder_name(&self) -> Option<&'static str> {
        match self {
            VideoCodec::Raw => None,
            VideoCodec::Mjpeg => Some("mjpeg"),
            VideoCodec::Mpeg4 => Some("mpeg4"),
            VideoCodec::H264 => Some("libx264"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPreset {
    Low,
    Medium,
    High,
    Ultra,
}

/// Where presentation timestamps come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtsMode {
    /// Device capture timestamps, relative to the first frame
    WallClock,
    /// Frame count times the nominal frame interval
    FixedFps,
}

/// Shape of the producer throttle curve once the ring passes its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpegBackend {
    /// The `image` crate's baseline JPEG decoder
    Image,
    /// FFmpeg's MJPEG decoder
    Ffmpeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFlags {
    Window,
    Maximized,
    Fullscreen,
}

/// Everything the capture loop needs to know before it starts streaming.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub request: FormatRequest,
    /// Interval between timed photos, `None` disables the photo timer
    pub photo_interval: Option<Duration>,
    /// Number of timed photos to take, `None` for no limit
    pub photo_count: Option<u32>,
    /// Recording length after which the video timer stops the recording
    pub video_duration: Option<Duration>,
    /// `false` runs without a render sink
    pub render_enabled: bool,
    pub render_flags: RenderFlags,
    pub jpeg_backend: JpegBackend,
    /// Bayer order of raw sensor data delivered as YUYV, `None` for real YUYV
    pub yuyv_bayer: Option<BayerOrder>,
    pub soft_autofocus: bool,
    pub caption_name: String,
    pub event_capacity: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            request: FormatRequest::default(),
            photo_interval: None,
            photo_count: None,
            video_duration: None,
            render_enabled: true,
            render_flags: RenderFlags::Window,
            jpeg_backend: JpegBackend::Image,
            yuyv_bayer: None,
            soft_autofocus: false,
            caption_name: "uvcap".to_string(),
            event_capacity: 16,
        }
    }
}
