use std::collections::VecDeque;

use ffmpeg_next::{self as ffmpeg, Rational};

use crate::decoder::converters::yuyv_to_yu12;
use crate::types::{
    config::{QualityPreset, VideoCodec},
    error::{Result, UvcapError},
    video_frame::{FrameRate, PixelFormat},
};
use crate::utils::{alloc_buffer, yu12_size};

/// Most frames any codec may hold back before emitting output.
pub const MAX_DELAYED_FRAMES: usize = 68;

/// Codec clock in ticks per second. MPEG-4 part 2 caps the denominator at 65535.
pub const CODEC_TIME_BASE: i64 = 60_000;

pub fn ns_to_codec_ticks(ns: i64) -> i64 {
    ns * 3 / 50_000
}

pub fn codec_ticks_to_ns(ticks: i64) -> i64 {
    ticks * 50_000 / 3
}

#[derive(Debug)]
pub struct CodecPacket {
    pub data: Vec<u8>,
    pub is_keyframe: bool,
    /// Decode timestamp reported by the codec, in nanoseconds
    pub dts_ns: Option<i64>,
}

#[derive(Debug)]
pub enum CodecOutput {
    Packet(CodecPacket),
    /// Nothing ready until more input arrives
    Pending,
    /// Flushing finished, nothing more will come out
    Finished,
}

/// A frame compressor fed with YU12 frames.
pub trait FrameCodec: Send {
    fn send_frame(&mut self, yu12: &[u8], pts_ns: i64) -> Result<()>;

    /// Signals end of input so held back frames are released.
    fn send_flush(&mut self) -> Result<()>;

    fn receive_packet(&mut self) -> Result<CodecOutput>;

    fn name(&self) -> &str;
}

pub struct FfmpegCodec {
    encoder: Option<ffmpeg::codec::encoder::Video>,
    format: ffmpeg::format::Pixel,
    width: u32,
    height: u32,
    name: &'static str,
    eof_sent: bool,
}

impl FfmpegCodec {
    pub fn open(
        codec: VideoCodec,
        width: u32,
        height: u32,
        frame_rate: FrameRate,
        quality: QualityPreset,
    ) -> Result<Self> {
        ffmpeg::init()?;
        let name = codec
            .encoder_name()
            .ok_or_else(|| UvcapError::CodecOpen("raw passthrough has no codec".to_string()))?;
        let encoder_codec = ffmpeg::codec::encoder::find_by_name(name)
            .ok_or_else(|| UvcapError::CodecOpen(format!("encoder {name} not found")))?;

        let mut encoder_ctx = ffmpeg::codec::context::Context::new_with_codec(encoder_codec)
            .encoder()
            .video()
            .map_err(|e| UvcapError::CodecOpen(format!("{name}: {e}")))?;

        let format = match codec {
            VideoCodec::Mjpeg => ffmpeg::format::Pixel::YUVJ420P,
            _ => ffmpeg::format::Pixel::YUV420P,
        };
        encoder_ctx.set_width(width);
        encoder_ctx.set_height(height);
        encoder_ctx.set_format(format);
        encoder_ctx.set_time_base(Rational::new(1, CODEC_TIME_BASE as i32));
        encoder_ctx.set_frame_rate(Some(Rational::new(
            frame_rate.num as i32,
            frame_rate.den.max(1) as i32,
        )));
        encoder_ctx.set_gop(frame_rate.whole_fps());
        // Output must stay in submission order for the delayed pts queue
        encoder_ctx.set_max_b_frames(0);
        if codec != VideoCodec::H264 {
            encoder_ctx.set_bit_rate(Self::bit_rate(width, height, frame_rate, quality));
        }

        let opts = Self::get_encoder_params(codec, &quality);
        let encoder = encoder_ctx
            .open_with(opts)
            .map_err(|e| UvcapError::CodecOpen(format!("{name}: {e}")))?;
        log::info!("Opened {name} encoder for {width}x{height} @ {:.2} fps", frame_rate.as_f64());

        Ok(Self {
            encoder: Some(encoder),
            format,
            width,
            height,
            name,
            eof_sent: false,
        })
    }

    fn bit_rate(width: u32, height: u32, frame_rate: FrameRate, quality: QualityPreset) -> usize {
        // hundredths of a bit per pixel
        let centibits = match quality {
            QualityPreset::Low => 5,
            QualityPreset::Medium => 10,
            QualityPreset::High => 20,
            QualityPreset::Ultra => 40,
        };
        width as usize * height as usize * frame_rate.whole_fps() as usize * centibits / 100
    }

    fn get_encoder_params(codec: VideoCodec, quality: &QualityPreset) -> ffmpeg::Dictionary<'static> {
        let mut opts = ffmpeg::Dictionary::new();
        if codec == VideoCodec::H264 {
            opts.set("preset", "veryfast");
            opts.set("rc-lookahead", "1");
            match quality {
                QualityPreset::Low => opts.set("crf", "30"),
                QualityPreset::Medium => opts.set("crf", "25"),
                QualityPreset::High => opts.set("crf", "20"),
                QualityPreset::Ultra => opts.set("crf", "15"),
            }
        }
        opts
    }

    fn encoder(&mut self) -> Result<&mut ffmpeg::codec::encoder::Video> {
        self.encoder
            .as_mut()
            .ok_or_else(|| UvcapError::Encoding(format!("{} encoder is closed", self.name)))
    }
}

impl FrameCodec for FfmpegCodec {
    fn send_frame(&mut self, yu12: &[u8], pts_ns: i64) -> Result<()> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut frame = ffmpeg::util::frame::Video::new(self.format, self.width, self.height);

        let planes = [
            (&yu12[..w * h], w, h),
            (&yu12[w * h..w * h * 5 / 4], w / 2, h / 2),
            (&yu12[w * h * 5 / 4..w * h * 3 / 2], w / 2, h / 2),
        ];
        for (plane, (src, plane_w, plane_h)) in planes.into_iter().enumerate() {
            let stride = frame.stride(plane);
            let dst = frame.data_mut(plane);
            for row in 0..plane_h {
                dst[row * stride..row * stride + plane_w]
                    .copy_from_slice(&src[row * plane_w..(row + 1) * plane_w]);
            }
        }
        frame.set_pts(Some(ns_to_codec_ticks(pts_ns)));

        self.encoder()?.send_frame(&frame)?;
        Ok(())
    }

    fn send_flush(&mut self) -> Result<()> {
        if !self.eof_sent {
            self.encoder()?.send_eof()?;
            self.eof_sent = true;
        }
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<CodecOutput> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        match self.encoder()?.receive_packet(&mut packet) {
            Ok(()) => Ok(CodecOutput::Packet(CodecPacket {
                data: packet.data().map(|d| d.to_vec()).unwrap_or_default(),
                is_keyframe: packet.is_key(),
                dts_ns: packet.dts().map(codec_ticks_to_ns),
            })),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                Ok(CodecOutput::Pending)
            }
            Err(ffmpeg::Error::Eof) => Ok(CodecOutput::Finished),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Presentation timestamps of frames submitted to a codec but not yet emitted.
///
/// Packets are assumed to come out in submission order, each one takes the
/// oldest pending timestamp.
#[derive(Debug, Default)]
pub struct DelayedPts {
    queue: VecDeque<i64>,
}

impl DelayedPts {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::with_capacity(MAX_DELAYED_FRAMES),
        }
    }

    pub fn push(&mut self, pts: i64) {
        if self.queue.len() >= MAX_DELAYED_FRAMES {
            if let Some(lost) = self.queue.pop_front() {
                log::warn!("Delayed pts queue full, discarding pts {lost}");
            }
        }
        self.queue.push_back(pts);
    }

    pub fn pop(&mut self) -> Option<i64> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// An open codec plus the bookkeeping needed to timestamp and flush it.
pub struct VideoCodecState {
    pub(crate) codec: Box<dyn FrameCodec>,
    pub(crate) pts: DelayedPts,
    /// Frames the codec holds back, learnt from its first output
    pub(crate) delayed_frames: Option<usize>,
    pub(crate) flush_done: bool,
    input_format: PixelFormat,
    width: u32,
    height: u32,
    conv_buf: Option<Vec<u8>>,
}

impl VideoCodecState {
    pub fn new(
        codec: Box<dyn FrameCodec>,
        input_format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let conv_buf = match input_format {
            PixelFormat::Yu12 => None,
            PixelFormat::Yuyv => Some(alloc_buffer(yu12_size(width, height), 0)?),
            other => {
                return Err(UvcapError::Validation(format!(
                    "{} cannot encode {other} input",
                    codec.name()
                )))
            }
        };

        Ok(Self {
            codec,
            pts: DelayedPts::new(),
            delayed_frames: None,
            flush_done: false,
            input_format,
            width,
            height,
            conv_buf,
        })
    }

    pub fn delayed_frames(&self) -> Option<usize> {
        self.delayed_frames
    }

    pub fn pending(&self) -> usize {
        self.pts.len()
    }

    /// Converts `data` to YU12 if needed and hands it to the codec.
    pub fn submit(&mut self, data: &[u8], pts_ns: i64) -> Result<()> {
        let (w, h) = (self.width as usize, self.height as usize);
        let needed = match self.input_format {
            PixelFormat::Yuyv => w * h * 2,
            _ => yu12_size(self.width, self.height),
        };
        if data.len() < needed {
            return Err(UvcapError::Encoding(format!(
                "{} frame of {} bytes, need {needed}",
                self.input_format,
                data.len()
            )));
        }

        match self.conv_buf.as_mut() {
            Some(buf) => {
                yuyv_to_yu12(buf, data, w, h);
                self.codec.send_frame(buf, pts_ns)?;
            }
            None => self.codec.send_frame(&data[..needed], pts_ns)?,
        }
        self.pts.push(pts_ns);
        Ok(())
    }

    /// Timestamp for a packet the codec just emitted.
    pub(crate) fn take_pts(&mut self) -> Option<i64> {
        let pts = self.pts.pop();
        if self.delayed_frames.is_none() {
            let delay = self.pts.len();
            log::debug!("{} holds back {delay} frames", self.codec.name());
            self.delayed_frames = Some(delay);
        }
        pts
    }

    /// Number of flush rounds allowed before giving up.
    pub(crate) fn flush_bound(&self) -> usize {
        self.delayed_frames
            .unwrap_or(self.pts.len())
            .min(MAX_DELAYED_FRAMES)
            + 1
    }
}
