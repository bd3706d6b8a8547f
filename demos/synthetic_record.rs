use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use uvcap_rs::{
    capture::{CaptureDevice, CaptureEvent, RecordRequest},
    encoders::muxer::ChannelMuxer,
    monotonic_ns,
    pipeline::builder::CaptureBuilder,
    types::{
        config::{QualityPreset, VideoCodec},
        error::{Result, UvcapError},
        video_frame::{FormatRequest, PixelFormat, RawFrame},
    },
};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

/// YUYV test pattern: a bright bar sweeping across a chroma gradient.
struct PatternDevice {
    format: Option<FormatRequest>,
    streaming: bool,
    sequence: u64,
    next_due: u64,
}

impl PatternDevice {
    fn new() -> Self {
        Self {
            format: None,
            streaming: false,
            sequence: 0,
            next_due: 0,
        }
    }

    fn render(&self, width: usize, height: usize) -> Vec<u8> {
        let bar = (self.sequence as usize * 4) % width;
        let mut data = Vec::with_capacity(width * height * 2);
        for y in 0..height {
            for x in (0..width).step_by(2) {
                let luma = if x.abs_diff(bar) < 8 { 235 } else { 16 + (y * 160 / height) as u8 };
                let u = (x * 255 / width) as u8;
                let v = 255 - (y * 255 / height) as u8;
                data.extend_from_slice(&[luma, u, luma, v]);
            }
        }
        data
    }
}

impl CaptureDevice for PatternDevice {
    fn negotiate_format(&mut self, request: &FormatRequest) -> Result<FormatRequest> {
        if request.format != PixelFormat::Yuyv {
            return Err(UvcapError::Device(format!(
                "pattern device only produces YUYV, not {}",
                request.format
            )));
        }
        self.format = Some(*request);
        Ok(*request)
    }

    fn first_valid_format(&self) -> Option<FormatRequest> {
        Some(FormatRequest::new(PixelFormat::Yuyv, WIDTH, HEIGHT))
    }

    fn start_stream(&mut self) -> Result<()> {
        self.streaming = true;
        self.next_due = monotonic_ns();
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<()> {
        self.streaming = false;
        Ok(())
    }

    fn next_raw_frame(&mut self) -> Option<RawFrame> {
        let format = self.format?;
        if !self.streaming {
            std::thread::sleep(Duration::from_millis(10));
            return None;
        }

        let now = monotonic_ns();
        if now < self.next_due {
            std::thread::sleep(Duration::from_nanos(self.next_due - now));
        }
        self.next_due += format.frame_rate.frame_interval_ns();

        let frame = RawFrame {
            index: (self.sequence % 4) as usize,
            data: self.render(format.width as usize, format.height as usize),
            format: format.format,
            timestamp_ns: monotonic_ns(),
            is_keyframe: true,
        };
        self.sequence += 1;
        Some(frame)
    }

    fn release_frame(&mut self, _frame: RawFrame) {}

    fn buffer_count(&self) -> usize {
        4
    }
}

fn main() -> Result<()> {
    simple_logging::log_to_stderr(log::LevelFilter::Info);
    log::info!("Synthetic Recording Example");
    log::info!("===========================");
    log::info!("Records five seconds of a test pattern as MPEG-4");
    log::info!("Press Ctrl-C to stop early");

    let mut capture = CaptureBuilder::new()
        .with_device(Box::new(PatternDevice::new()))
        .with_format(PixelFormat::Yuyv)
        .with_resolution(WIDTH, HEIGHT)
        .with_video_timer(Duration::from_secs(5))
        .without_render()
        .build()?;

    let handle = capture.handle();
    let events = capture
        .take_event_receiver()
        .ok_or_else(|| UvcapError::Init("event receiver already taken".to_string()))?;
    let capture_thread = capture.spawn()?;

    let stop = Arc::new(AtomicBool::new(false));
    let ctrlc_stop = Arc::clone(&stop);
    let ctrlc_handle = handle.clone();
    ctrlc::set_handler(move || {
        println!("Stopping...");
        if let Err(e) = ctrlc_handle.stop_video() {
            log::error!("Could not stop recording: {e}");
        }
        ctrlc_stop.store(true, Ordering::Release);
    })
    .map_err(|e| UvcapError::Init(e.to_string()))?;

    let (muxer, packets) = ChannelMuxer::new(64);
    handle.start_video(
        RecordRequest::new(Box::new(muxer))
            .with_codec(VideoCodec::Mpeg4)
            .with_quality(QualityPreset::High),
    )?;

    let mut total_bytes = 0usize;
    let mut count = 0u64;
    loop {
        while let Ok(packet) = packets.try_recv() {
            count += 1;
            total_bytes += packet.data.len();
            log::info!(
                "packet {count}: {} bytes, key: {}, pts: {:.3}s",
                packet.data.len(),
                packet.is_keyframe,
                packet.pts as f64 / 1e9
            );
        }

        match events.recv_timeout(Duration::from_millis(20)) {
            Ok(CaptureEvent::RecordingStopped(report)) => {
                if let Some(report) = report {
                    log::info!(
                        "Flushed: {} packets, {} frames dropped",
                        report.total_packets,
                        report.ring.dropped
                    );
                }
                break;
            }
            Ok(event) => log::info!("Event: {event:?}"),
            Err(_) if stop.load(Ordering::Acquire) => break,
            Err(_) => {}
        }
    }

    while let Ok(packet) = packets.try_recv() {
        count += 1;
        total_bytes += packet.data.len();
    }
    log::info!("Recorded {count} packets, {total_bytes} bytes");

    handle.quit();
    capture_thread
        .join()
        .map_err(|_| UvcapError::Other("capture thread panicked".to_string()))??;
    Ok(())
}
