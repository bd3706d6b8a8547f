use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

use crate::types::{
    config::{PtsMode, QualityPreset, SchedulerMode, VideoCodec},
    error::{Result, UvcapError},
    video_frame::{EncodedVideoFrame, FrameRate, PixelFormat},
};
use crate::utils::validate_dimensions;

use super::codec::{
    CodecOutput, CodecPacket, FfmpegCodec, FrameCodec, VideoCodecState, MAX_DELAYED_FRAMES,
};
use super::muxer::Muxer;
use super::ring_buffer::{
    ring_capacity, slot_payload_size, FrameProducer, RingStats, SchedulerConfig, VideoRingBuffer,
};

/// Minimum number of encoded packets buffered between the encoder and whoever
/// drains them. Grown so a flush of a full ring plus every delayed frame fits.
pub const ENCODED_QUEUE_SIZE: usize = 120;

/// Pause of the consumer thread when the ring is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Everything fixed for the lifetime of one recording.
#[derive(Debug, Clone)]
pub struct EncoderContext {
    pub input_format: PixelFormat,
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub quality: QualityPreset,
    pub pts_mode: PtsMode,
    pub scheduler: SchedulerConfig,
}

impl EncoderContext {
    /// Compressed input defaults to raw passthrough, anything else to MPEG-4.
    pub fn new(input_format: PixelFormat, width: u32, height: u32, frame_rate: FrameRate) -> Self {
        let codec = if input_format.is_compressed() {
            VideoCodec::Raw
        } else {
            VideoCodec::Mpeg4
        };
        Self {
            input_format,
            codec,
            width,
            height,
            frame_rate,
            quality: QualityPreset::Medium,
            pts_mode: PtsMode::WallClock,
            scheduler: SchedulerConfig::default(),
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

    pub fn with_scheduler_mode(mut self, mode: SchedulerMode) -> Self {
        self.scheduler.mode = mode;
        self
    }

    pub fn with_scheduler_threshold(mut self, threshold: f64) -> Self {
        self.scheduler.threshold = threshold;
        self
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.scheduler.max_delay_ms = max_delay_ms;
        self
    }

    pub fn ring_capacity(&self) -> usize {
        ring_capacity(self.frame_rate)
    }

    pub fn slot_size(&self) -> usize {
        slot_payload_size(self.input_format, self.width, self.height)
    }
}

/// Result of one [`VideoEncoder::drain_one`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// The ring held no frame
    Empty,
    /// One frame was consumed and this many packets came out
    Encoded(usize),
    /// One frame was consumed but the codec is still holding it back
    Delayed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Frames taken out of the ring during the flush
    pub drained_frames: usize,
    /// Packets released by flushing the codec
    pub flushed_packets: usize,
    /// Packets emitted over the encoder's lifetime
    pub total_packets: u64,
    pub ring: RingStats,
}

/// Stamps durations on outgoing packets and queues them for the muxer.
struct PacketOutput {
    sender: HeapProd<EncodedVideoFrame>,
    last_pts: Option<i64>,
    packets: u64,
}

impl PacketOutput {
    fn emit(&mut self, data: Vec<u8>, is_keyframe: bool, pts: i64, dts: i64) {
        let duration = self.last_pts.map(|last| pts - last).unwrap_or(0);
        self.last_pts = Some(pts);

        match self.sender.try_push(EncodedVideoFrame {
            data,
            is_keyframe,
            pts,
            dts,
            duration,
        }) {
            Ok(()) => self.packets += 1,
            Err(_) => log::error!("Could not send encoded packet to the ringbuf"),
        }
    }
}

/// Buffered video encoder: a frame ring on the input side, a codec (or raw
/// passthrough) in the middle and a packet queue on the output side.
pub struct VideoEncoder {
    ctx: EncoderContext,
    ring: Arc<VideoRingBuffer>,
    producer: Option<FrameProducer>,
    codec: Option<VideoCodecState>,
    output: PacketOutput,
    encoded_frame_recv: Option<HeapCons<EncodedVideoFrame>>,
    frame_count: i64,
    flushed: bool,
    closed: bool,
}

impl VideoEncoder {
    /// Opens the codec named by `ctx`, falling back to raw passthrough if it
    /// cannot be opened.
    pub fn open(mut ctx: EncoderContext) -> Result<Self> {
        validate_dimensions(ctx.width, ctx.height)?;
        let codec: Option<Box<dyn FrameCodec>> = match ctx.codec {
            VideoCodec::Raw => None,
            codec => match FfmpegCodec::open(codec, ctx.width, ctx.height, ctx.frame_rate, ctx.quality)
            {
                Ok(ffmpeg_codec) => Some(Box::new(ffmpeg_codec)),
                Err(e) => {
                    log::warn!("{e}, falling back to raw passthrough");
                    ctx.codec = VideoCodec::Raw;
                    None
                }
            },
        };
        Self::build(ctx, codec)
    }

    /// Opens an encoder around an already constructed codec.
    pub fn open_with_codec(ctx: EncoderContext, codec: Box<dyn FrameCodec>) -> Result<Self> {
        validate_dimensions(ctx.width, ctx.height)?;
        Self::build(ctx, Some(codec))
    }

    fn build(ctx: EncoderContext, codec: Option<Box<dyn FrameCodec>>) -> Result<Self> {
        let codec = match codec {
            Some(codec) => Some(VideoCodecState::new(
                codec,
                ctx.input_format,
                ctx.width,
                ctx.height,
            )?),
            None => None,
        };

        let ring = Arc::new(VideoRingBuffer::new(ctx.ring_capacity(), ctx.slot_size())?);
        let producer = FrameProducer::new(Arc::clone(&ring), ctx.scheduler);

        let video_ring_buffer = HeapRb::<EncodedVideoFrame>::new(encoded_queue_size(
            ring.capacity(),
        ));
        let (video_ring_sender, video_ring_receiver) = video_ring_buffer.split();

        log::info!(
            "Video encoder ready: {:?} from {} {}x{}, ring of {} frames",
            ctx.codec,
            ctx.input_format,
            ctx.width,
            ctx.height,
            ring.capacity()
        );

        Ok(Self {
            ctx,
            ring,
            producer: Some(producer),
            codec,
            output: PacketOutput {
                sender: video_ring_sender,
                last_pts: None,
                packets: 0,
            },
            encoded_frame_recv: Some(video_ring_receiver),
            frame_count: 0,
            flushed: false,
            closed: false,
        })
    }

    pub fn context(&self) -> &EncoderContext {
        &self.ctx
    }

    /// Codec actually in use, [`VideoCodec::Raw`] after a fallback.
    pub fn codec(&self) -> VideoCodec {
        self.ctx.codec
    }

    pub fn ring(&self) -> &VideoRingBuffer {
        &self.ring
    }

    pub fn delayed_frames(&self) -> Option<usize> {
        self.codec.as_ref().and_then(|c| c.delayed_frames())
    }

    /// Frames submitted to the codec that have not produced a packet yet.
    pub fn pending_frames(&self) -> usize {
        self.codec.as_ref().map(|c| c.pending()).unwrap_or(0)
    }

    /// Detaches the ring's only writer, for use on the capture thread.
    pub fn take_producer(&mut self) -> Option<FrameProducer> {
        self.producer.take()
    }

    pub fn take_encoded_recv(&mut self) -> Option<HeapCons<EncodedVideoFrame>> {
        self.encoded_frame_recv.take()
    }

    /// Producer throttle for the current ring fill.
    pub fn scheduler_delay(&self) -> Duration {
        self.ring.scheduler_delay(&self.ctx.scheduler)
    }

    /// Queues a raw frame through the encoder's own producer.
    pub fn submit_raw_frame(&mut self, data: &[u8], timestamp_ns: u64, is_keyframe: bool) -> Result<()> {
        match self.producer.as_mut() {
            Some(producer) => producer.push_frame(data, timestamp_ns, is_keyframe),
            None => Err(UvcapError::Validation(
                "frame producer was handed out, push through it instead".to_string(),
            )),
        }
    }

    fn next_pts(&mut self, relative_ts: u64) -> i64 {
        let pts = match self.ctx.pts_mode {
            PtsMode::WallClock => relative_ts as i64,
            PtsMode::FixedFps => self.frame_count * self.ctx.frame_rate.frame_interval_ns() as i64,
        };
        self.frame_count += 1;
        pts
    }

    /// Consumes at most one frame from the ring.
    pub fn drain_one(&mut self) -> Result<DrainStatus> {
        if self.closed {
            return Ok(DrainStatus::Empty);
        }
        let Some(frame) = self.ring.pop_frame() else {
            return Ok(DrainStatus::Empty);
        };
        let pts = self.next_pts(frame.timestamp_ns);

        let Some(state) = self.codec.as_mut() else {
            self.output.emit(frame.data, frame.is_keyframe, pts, pts);
            return Ok(DrainStatus::Encoded(1));
        };

        state.submit(&frame.data, pts)?;
        let emitted = Self::collect_packets(state, &mut self.output)?;
        Ok(if emitted == 0 {
            DrainStatus::Delayed
        } else {
            DrainStatus::Encoded(emitted)
        })
    }

    fn collect_packets(state: &mut VideoCodecState, output: &mut PacketOutput) -> Result<usize> {
        let mut emitted = 0;
        loop {
            match state.codec.receive_packet()? {
                CodecOutput::Packet(packet) => {
                    Self::emit_packet(state, output, packet);
                    emitted += 1;
                }
                CodecOutput::Pending => break,
                CodecOutput::Finished => {
                    state.flush_done = true;
                    break;
                }
            }
        }
        Ok(emitted)
    }

    fn emit_packet(
        state: &mut VideoCodecState,
        output: &mut PacketOutput,
        packet: CodecPacket,
    ) {
        let pts = match state.take_pts() {
            Some(pts) => pts,
            None => {
                log::warn!(
                    "{} emitted more packets than frames submitted",
                    state.codec.name()
                );
                output.last_pts.unwrap_or(0)
            }
        };
        let dts = packet.dts_ns.unwrap_or(pts);
        output.emit(packet.data, packet.is_keyframe, pts, dts);
    }

    /// Drains the ring (bounded by its capacity), then releases every frame the
    /// codec still holds back. Gives up with [`UvcapError::FlushTimeout`] if the
    /// codec keeps going past its learnt delay.
    pub fn flush(&mut self) -> Result<FlushReport> {
        let mut report = FlushReport::default();

        for _ in 0..self.ring.capacity() {
            match self.drain_one() {
                Ok(DrainStatus::Empty) => break,
                Ok(_) => report.drained_frames += 1,
                Err(e) => {
                    log::error!("Dropping frame while flushing: {e}");
                    report.drained_frames += 1;
                }
            }
        }

        if let Some(state) = self.codec.as_mut() {
            if !state.flush_done {
                let bound = state.flush_bound();
                state.codec.send_flush()?;

                let mut counter = 0;
                while !state.flush_done && counter < bound {
                    match state.codec.receive_packet()? {
                        CodecOutput::Packet(packet) => {
                            Self::emit_packet(state, &mut self.output, packet);
                            report.flushed_packets += 1;
                        }
                        CodecOutput::Pending => {}
                        CodecOutput::Finished => state.flush_done = true,
                    }
                    counter += 1;
                }

                if !state.flush_done {
                    self.flushed = true;
                    log::error!(
                        "{} still busy after {counter} flush rounds",
                        state.codec.name()
                    );
                    return Err(UvcapError::FlushTimeout {
                        flushed: report.flushed_packets,
                        pending: state.pending(),
                    });
                }
            }
        }

        self.flushed = true;
        report.total_packets = self.output.packets;
        report.ring = self.ring.stats();
        log::info!(
            "Encoder flushed: {} frames drained, {} delayed packets, {} total",
            report.drained_frames,
            report.flushed_packets,
            report.total_packets
        );
        Ok(report)
    }

    /// Flushes if that has not happened yet and releases the codec. Safe to call
    /// more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if !self.flushed {
            if let Err(e) = self.flush() {
                log::error!("Error while flushing video encoder during close: {e}");
            }
        }
        self.codec.take();
        self.closed = true;
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer thread moving frames from the ring through the encoder to a muxer.
pub struct EncoderWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<FlushReport>>>,
}

impl EncoderWorker {
    pub fn spawn(mut encoder: VideoEncoder, muxer: Box<dyn Muxer>) -> Result<Self> {
        let encoded_recv = encoder.take_encoded_recv().ok_or_else(|| {
            UvcapError::Init("encoded packet receiver was already taken".to_string())
        })?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("uvcap-encoder".to_string())
            .spawn(move || encoder_loop(encoder, encoded_recv, muxer, thread_stop))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    /// Signals the thread, waits for it to flush and returns its report.
    pub fn stop(mut self) -> Result<FlushReport> {
        self.join()
    }

    fn join(&mut self) -> Result<FlushReport> {
        self.stop.store(true, Ordering::Release);
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| UvcapError::Encoding("encoder thread panicked".to_string()))?,
            None => Ok(FlushReport::default()),
        }
    }
}

impl Drop for EncoderWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.join() {
                log::error!("Error while stopping encoder thread: {e}");
            }
        }
    }
}

/// Queue size that holds every packet a flush of `ring_capacity` frames can emit.
pub fn encoded_queue_size(ring_capacity: usize) -> usize {
    ENCODED_QUEUE_SIZE.max(ring_capacity + MAX_DELAYED_FRAMES + 1)
}

fn forward(recv: &mut HeapCons<EncodedVideoFrame>, muxer: &mut dyn Muxer) {
    while let Some(packet) = recv.try_pop() {
        if let Err(e) = muxer.write_video_packet(&packet) {
            log::error!("Muxer rejected video packet: {e}");
        }
    }
}

fn encoder_loop(
    mut encoder: VideoEncoder,
    mut recv: HeapCons<EncodedVideoFrame>,
    mut muxer: Box<dyn Muxer>,
    stop: Arc<AtomicBool>,
) -> Result<FlushReport> {
    while !stop.load(Ordering::Acquire) {
        match encoder.drain_one() {
            Ok(DrainStatus::Empty) => {
                forward(&mut recv, muxer.as_mut());
                std::thread::sleep(IDLE_SLEEP);
            }
            Ok(_) => forward(&mut recv, muxer.as_mut()),
            Err(e) => log::error!("Error encoding video frame: {e}"),
        }
    }

    for _ in 0..encoder.ring().capacity() {
        match encoder.drain_one() {
            Ok(DrainStatus::Empty) => break,
            Ok(_) => {}
            Err(e) => log::error!("Error encoding video frame: {e}"),
        }
        forward(&mut recv, muxer.as_mut());
    }

    let report = encoder.flush();
    forward(&mut recv, muxer.as_mut());
    encoder.close();
    muxer.finish()?;
    report
}
