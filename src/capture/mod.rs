//! The capture loop and the collaborators it drives.

pub mod video;

use crate::encoders::{
    codec::FrameCodec,
    muxer::Muxer,
    ring_buffer::SchedulerConfig,
    video::FlushReport,
};
use crate::types::{
    config::{PtsMode, QualityPreset, RenderFlags, SchedulerMode, VideoCodec},
    error::Result,
    video_frame::{DecodedFrame, FormatRequest, RawFrame},
};

/// The camera: format negotiation, streaming and buffer exchange.
pub trait CaptureDevice: Send {
    /// Configures the device, returning the format it actually settled on.
    fn negotiate_format(&mut self, request: &FormatRequest) -> Result<FormatRequest>;

    /// First format/resolution pair the device reports as usable.
    fn first_valid_format(&self) -> Option<FormatRequest>;

    fn start_stream(&mut self) -> Result<()>;

    fn stop_stream(&mut self) -> Result<()>;

    /// Next filled buffer, `None` if nothing arrived in time.
    fn next_raw_frame(&mut self) -> Option<RawFrame>;

    /// Hands a buffer back to the device for refilling.
    fn release_frame(&mut self, frame: RawFrame);

    /// Number of buffers the device cycles through.
    fn buffer_count(&self) -> usize;
}

/// Where decoded frames are displayed.
pub trait RenderSink: Send {
    fn open(&mut self, width: u32, height: u32, flags: RenderFlags) -> Result<()>;

    fn push_frame(&mut self, frame: &DecodedFrame) -> Result<()>;

    fn set_caption(&mut self, caption: &str);

    fn close(&mut self);

    /// `true` once the user closed the display.
    fn quit_requested(&self) -> bool {
        false
    }
}

/// Software autofocus driven by decoded frames.
pub trait FocusAnalyzer: Send {
    /// Analyses one frame, returns `true` while focus is still being searched.
    fn run(&mut self, frame: &DecodedFrame) -> bool;
}

/// Notifications emitted by the capture loop.
#[derive(Debug)]
pub enum CaptureEvent {
    /// A frame captured by the photo timer or a one shot request
    Photo(DecodedFrame),
    /// The stream restarted with a new format
    FormatChanged(FormatRequest),
    RecordingStarted { codec: VideoCodec },
    /// Recording ended, with the flush report when flushing succeeded
    RecordingStopped(Option<FlushReport>),
    /// The video timer ran out and stopped the recording
    VideoTimerExpired,
}

/// How to record, and where the packets go.
pub struct RecordRequest {
    pub codec: VideoCodec,
    pub quality: QualityPreset,
    pub pts_mode: PtsMode,
    pub scheduler: SchedulerConfig,
    pub muxer: Box<dyn Muxer>,
    /// Replaces the FFmpeg codec named by `codec`
    pub frame_codec: Option<Box<dyn FrameCodec>>,
}

impl RecordRequest {
    pub fn new(muxer: Box<dyn Muxer>) -> Self {
        Self {
            codec: VideoCodec::Raw,
            quality: QualityPreset::Medium,
            pts_mode: PtsMode::WallClock,
            scheduler: SchedulerConfig::default(),
            muxer,
            frame_codec: None,
        }
    }

    pub fn with_codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_quality(mut self, quality: QualityPreset) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_pts_mode(mut self, pts_mode: PtsMode) -> Self {
        self.pts_mode = pts_mode;
        self
    }

    pub fn with_scheduler(mut self, mode: SchedulerMode, threshold: f64, max_delay_ms: u64) -> Self {
        self.scheduler = SchedulerConfig {
            mode,
            threshold,
            max_delay_ms,
        };
        self
    }

    pub fn with_frame_codec(mut self, codec: Box<dyn FrameCodec>) -> Self {
        self.frame_codec = Some(codec);
        self
    }
}

pub enum RecordCommand {
    Start(RecordRequest),
    Stop,
}
