#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use uvcap_rs::{
    capture::{CaptureDevice, FocusAnalyzer, RenderSink},
    encoders::{
        codec::{CodecOutput, CodecPacket, FrameCodec},
        muxer::Muxer,
    },
    types::{
        config::RenderFlags,
        error::{Result, UvcapError},
        video_frame::{DecodedFrame, EncodedVideoFrame, FormatRequest, PixelFormat, RawFrame},
    },
};

pub const FRAME_INTERVAL_NS: u64 = 33_333_333;

static LOGGING: Once = Once::new();

pub fn init_test_logging() {
    LOGGING.call_once(|| {
        simple_logging::log_to_stderr(log::LevelFilter::Debug);
    });
}

/// Polls `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// A uniform grey JPEG of the given size.
pub fn grey_jpeg(width: u32, height: u32, level: u8) -> Vec<u8> {
    let pixels = vec![level; width as usize * height as usize * 3];
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 95)
        .encode(&pixels, width, height, image::ExtendedColorType::Rgb8)
        .expect("jpeg encoding");
    out
}

#[derive(Debug, Default)]
pub struct DeviceLog {
    pub negotiated: Vec<FormatRequest>,
    pub rejected: Vec<FormatRequest>,
    pub stream_starts: usize,
    pub stream_stops: usize,
    pub delivered: u64,
    pub released: u64,
}

/// Produces endless frames in whatever format was negotiated last.
pub struct SyntheticDevice {
    supported: Vec<FormatRequest>,
    current: Option<FormatRequest>,
    streaming: bool,
    sequence: u64,
    max_frames: Option<u64>,
    jpeg: Option<Vec<u8>>,
    pub log: Arc<Mutex<DeviceLog>>,
}

impl SyntheticDevice {
    pub fn new(supported: Vec<FormatRequest>) -> Self {
        Self {
            supported,
            current: None,
            streaming: false,
            sequence: 0,
            max_frames: None,
            jpeg: None,
            log: Arc::new(Mutex::new(DeviceLog::default())),
        }
    }

    pub fn with_max_frames(mut self, max: u64) -> Self {
        self.max_frames = Some(max);
        self
    }

    fn frame_bytes(&mut self, request: &FormatRequest) -> Vec<u8> {
        match request.format.frame_size(request.width, request.height) {
            Some(size) => (0..size).map(|i| (i % 251) as u8).collect(),
            None => self
                .jpeg
                .get_or_insert_with(|| grey_jpeg(request.width, request.height, 128))
                .clone(),
        }
    }
}

impl CaptureDevice for SyntheticDevice {
    fn negotiate_format(&mut self, request: &FormatRequest) -> Result<FormatRequest> {
        let found = self.supported.iter().any(|s| {
            s.format == request.format && s.width == request.width && s.height == request.height
        });
        if !found {
            self.log.lock().unwrap().rejected.push(*request);
            return Err(UvcapError::Device(format!(
                "{} {}x{} not supported",
                request.format, request.width, request.height
            )));
        }
        self.current = Some(*request);
        self.jpeg = None;
        self.log.lock().unwrap().negotiated.push(*request);
        Ok(*request)
    }

    fn first_valid_format(&self) -> Option<FormatRequest> {
        self.supported.first().copied()
    }

    fn start_stream(&mut self) -> Result<()> {
        self.streaming = true;
        self.log.lock().unwrap().stream_starts += 1;
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<()> {
        self.streaming = false;
        self.log.lock().unwrap().stream_stops += 1;
        Ok(())
    }

    fn next_raw_frame(&mut self) -> Option<RawFrame> {
        std::thread::sleep(Duration::from_millis(1));
        if !self.streaming || self.max_frames.is_some_and(|max| self.sequence >= max) {
            return None;
        }
        let request = self.current?;
        let data = self.frame_bytes(&request);
        let frame = RawFrame {
            index: (self.sequence % 4) as usize,
            data,
            format: request.format,
            timestamp_ns: 1_000_000_000 + self.sequence * FRAME_INTERVAL_NS,
            is_keyframe: true,
        };
        self.sequence += 1;
        self.log.lock().unwrap().delivered += 1;
        Some(frame)
    }

    fn release_frame(&mut self, _frame: RawFrame) {
        self.log.lock().unwrap().released += 1;
    }

    fn buffer_count(&self) -> usize {
        4
    }
}

#[derive(Debug, Default)]
pub struct SinkLog {
    pub opens: Vec<(u32, u32)>,
    pub closes: usize,
    pub frames: usize,
    pub captions: Vec<String>,
    pub last_frame_len: usize,
}

pub struct RecordingSink {
    fail_open: bool,
    quit_after: Option<usize>,
    pub log: Arc<Mutex<SinkLog>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            fail_open: false,
            quit_after: None,
            log: Arc::new(Mutex::new(SinkLog::default())),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    pub fn quitting_after(frames: usize) -> Self {
        Self {
            quit_after: Some(frames),
            ..Self::new()
        }
    }
}

impl RenderSink for RecordingSink {
    fn open(&mut self, width: u32, height: u32, _flags: RenderFlags) -> Result<()> {
        if self.fail_open {
            return Err(UvcapError::Render("no display".to_string()));
        }
        self.log.lock().unwrap().opens.push((width, height));
        Ok(())
    }

    fn push_frame(&mut self, frame: &DecodedFrame) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.frames += 1;
        log.last_frame_len = frame.data.len();
        Ok(())
    }

    fn set_caption(&mut self, caption: &str) {
        self.log.lock().unwrap().captions.push(caption.to_string());
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closes += 1;
    }

    fn quit_requested(&self) -> bool {
        self.quit_after
            .is_some_and(|n| self.log.lock().unwrap().frames >= n)
    }
}

/// Reports "still searching" for a fixed number of frames.
pub struct CountingFocus {
    pub runs: Arc<Mutex<usize>>,
    searching_for: usize,
}

impl CountingFocus {
    pub fn new(searching_for: usize) -> Self {
        Self {
            runs: Arc::new(Mutex::new(0)),
            searching_for,
        }
    }
}

impl FocusAnalyzer for CountingFocus {
    fn run(&mut self, _frame: &DecodedFrame) -> bool {
        let mut runs = self.runs.lock().unwrap();
        *runs += 1;
        *runs < self.searching_for
    }
}

/// Emits each frame only after `delay` later frames were submitted.
pub struct FixedDelayCodec {
    delay: usize,
    queue: VecDeque<usize>,
    flushing: bool,
    never_finish: bool,
}

impl FixedDelayCodec {
    pub fn new(delay: usize) -> Self {
        Self {
            delay,
            queue: VecDeque::new(),
            flushing: false,
            never_finish: false,
        }
    }

    /// A codec that keeps producing packets after end of input.
    pub fn stuck(delay: usize) -> Self {
        Self {
            never_finish: true,
            ..Self::new(delay)
        }
    }
}

impl FrameCodec for FixedDelayCodec {
    fn send_frame(&mut self, yu12: &[u8], _pts_ns: i64) -> Result<()> {
        self.queue.push_back(yu12.len());
        Ok(())
    }

    fn send_flush(&mut self) -> Result<()> {
        self.flushing = true;
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<CodecOutput> {
        if self.never_finish && self.flushing {
            return Ok(CodecOutput::Packet(CodecPacket {
                data: vec![0; 4],
                is_keyframe: false,
                dts_ns: None,
            }));
        }
        if self.queue.len() > self.delay || (self.flushing && !self.queue.is_empty()) {
            let len = self.queue.pop_front().unwrap_or(0);
            return Ok(CodecOutput::Packet(CodecPacket {
                data: vec![0xAB; len.min(16)],
                is_keyframe: false,
                dts_ns: None,
            }));
        }
        if self.flushing {
            Ok(CodecOutput::Finished)
        } else {
            Ok(CodecOutput::Pending)
        }
    }

    fn name(&self) -> &str {
        "fixed-delay"
    }
}

#[derive(Default)]
pub struct MuxerLog {
    pub packets: Vec<EncodedVideoFrame>,
    pub finished: bool,
}

pub struct CollectingMuxer {
    pub log: Arc<Mutex<MuxerLog>>,
}

impl CollectingMuxer {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(MuxerLog::default())),
        }
    }
}

impl Muxer for CollectingMuxer {
    fn write_video_packet(&mut self, packet: &EncodedVideoFrame) -> Result<()> {
        self.log.lock().unwrap().packets.push(packet.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.log.lock().unwrap().finished = true;
        Ok(())
    }
}

/// Blocks for `stall` on the first packet, then collects like [`CollectingMuxer`].
pub struct StallingMuxer {
    stall: Option<Duration>,
    pub log: Arc<Mutex<MuxerLog>>,
}

impl StallingMuxer {
    pub fn new(stall: Duration) -> Self {
        Self {
            stall: Some(stall),
            log: Arc::new(Mutex::new(MuxerLog::default())),
        }
    }
}

impl Muxer for StallingMuxer {
    fn write_video_packet(&mut self, packet: &EncodedVideoFrame) -> Result<()> {
        if let Some(stall) = self.stall.take() {
            std::thread::sleep(stall);
        }
        self.log.lock().unwrap().packets.push(packet.clone());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.log.lock().unwrap().finished = true;
        Ok(())
    }
}

pub fn request(format: PixelFormat, width: u32, height: u32) -> FormatRequest {
    FormatRequest::new(format, width, height)
}
