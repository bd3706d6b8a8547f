use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

use crate::decoder::FrameDecoder;
use crate::encoders::{
    ring_buffer::FrameProducer,
    video::{EncoderContext, EncoderWorker, VideoEncoder},
};
use crate::types::{
    config::{CaptureOptions, VideoCodec},
    error::{Result, UvcapError},
    video_frame::{FormatRequest, PixelFormat, RawFrame},
};
use crate::utils::TIME_UNIT_NS;
use crate::{CaptureControls, CaptureHandle};

use super::{CaptureDevice, CaptureEvent, FocusAnalyzer, RecordCommand, RecordRequest, RenderSink};

/// Pending record commands before senders start failing.
const COMMAND_QUEUE_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Stopped,
    Streaming,
    Restarting,
}

/// Measures the frame rate over windows of at least one second of capture time.
#[derive(Debug, Default)]
struct FpsCounter {
    window_start: Option<u64>,
    frames: u32,
    fps: f64,
}

impl FpsCounter {
    fn reset(&mut self) {
        *self = Self::default();
    }

    /// Returns the new rate when a window closes with a different value.
    fn update(&mut self, timestamp_ns: u64) -> Option<f64> {
        let start = *self.window_start.get_or_insert(timestamp_ns);
        if timestamp_ns == start {
            return None;
        }
        self.frames += 1;

        let elapsed = timestamp_ns.saturating_sub(start);
        if elapsed < TIME_UNIT_NS {
            return None;
        }
        let fps = self.frames as f64 * TIME_UNIT_NS as f64 / elapsed as f64;
        self.window_start = Some(timestamp_ns);
        self.frames = 0;

        if (fps * 100.0).round() != (self.fps * 100.0).round() {
            self.fps = fps;
            return Some(fps);
        }
        None
    }
}

#[derive(Debug, Default)]
struct PhotoTimer {
    last_ns: Option<u64>,
    taken: u32,
}

struct Recording {
    producer: FrameProducer,
    worker: EncoderWorker,
    raw_input: bool,
    started_ns: Option<u64>,
}

/// Owns the acquisition thread's state: device streaming, decode, render,
/// timed captures, recording and format restarts.
pub struct CaptureLoop {
    device: Box<dyn CaptureDevice>,
    render: Option<Box<dyn RenderSink>>,
    focus: Option<Box<dyn FocusAnalyzer>>,
    options: CaptureOptions,
    controls: Arc<CaptureControls>,
    command_tx: Sender<RecordCommand>,
    command_rx: Receiver<RecordCommand>,
    event_tx: Sender<CaptureEvent>,
    event_rx: Option<Receiver<CaptureEvent>>,
    state: CaptureState,
    current: FormatRequest,
    decoder: Option<FrameDecoder>,
    render_active: bool,
    stream_on: bool,
    recording: Option<Recording>,
    fps: FpsCounter,
    photo_timer: PhotoTimer,
    closed: bool,
}

impl CaptureLoop {
    pub fn new(
        device: Box<dyn CaptureDevice>,
        render: Option<Box<dyn RenderSink>>,
        focus: Option<Box<dyn FocusAnalyzer>>,
        options: CaptureOptions,
    ) -> Self {
        let (command_tx, command_rx) = bounded(COMMAND_QUEUE_SIZE);
        let (event_tx, event_rx) = bounded(options.event_capacity.max(1));
        let controls = Arc::new(CaptureControls::new());
        controls.set_soft_autofocus(options.soft_autofocus);

        Self {
            device,
            render,
            focus,
            current: options.request,
            options,
            controls,
            command_tx,
            command_rx,
            event_tx,
            event_rx: Some(event_rx),
            state: CaptureState::Stopped,
            decoder: None,
            render_active: false,
            stream_on: false,
            recording: None,
            fps: FpsCounter::default(),
            photo_timer: PhotoTimer::default(),
            closed: true,
        }
    }

    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle::new(Arc::clone(&self.controls), self.command_tx.clone())
    }

    pub fn take_event_receiver(&mut self) -> Option<Receiver<CaptureEvent>> {
        self.event_rx.take()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Format the device is currently streaming.
    pub fn current_format(&self) -> FormatRequest {
        self.current
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Runs the loop on its own thread.
    pub fn spawn(mut self) -> Result<JoinHandle<Result<()>>> {
        let handle = std::thread::Builder::new()
            .name("uvcap-capture".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    /// Streams until quit is requested. Only a failed format negotiation (or a
    /// failed restart) ends the loop with an error.
    pub fn run(&mut self) -> Result<()> {
        if self.state != CaptureState::Stopped {
            return Err(UvcapError::Validation(
                "capture loop is already running".to_string(),
            ));
        }
        self.closed = false;

        let result = self.start().and_then(|_| self.stream());
        if let Err(ref e) = result {
            log::error!("Capture loop ended with error: {e}");
        }
        self.shutdown();
        result
    }

    fn start(&mut self) -> Result<()> {
        self.current = self.negotiate(self.options.request)?;
        self.setup_session()?;
        self.state = CaptureState::Streaming;
        log::info!(
            "Streaming {} {}x{} @ {:.2} fps",
            self.current.format,
            self.current.width,
            self.current.height,
            self.current.frame_rate.as_f64()
        );
        Ok(())
    }

    fn stream(&mut self) -> Result<()> {
        loop {
            if self.controls.is_stopped() {
                log::info!("Quit requested, leaving capture loop");
                return Ok(());
            }
            self.process_commands();

            let raw = self.device.next_raw_frame();
            if self.controls.take_restart() {
                if let Some(raw) = raw {
                    self.device.release_frame(raw);
                }
                self.restart()?;
                continue;
            }

            let Some(raw) = raw else {
                continue;
            };
            self.process_frame(&raw);
            self.device.release_frame(raw);
        }
    }

    /// Tries `request`, then the first format the device reports as valid.
    fn negotiate(&mut self, request: FormatRequest) -> Result<FormatRequest> {
        match self.device.negotiate_format(&request) {
            Ok(actual) => Ok(actual),
            Err(e) => {
                log::warn!(
                    "Could not set {} {}x{}: {e}, trying the first valid format",
                    request.format,
                    request.width,
                    request.height
                );
                let fallback = self.device.first_valid_format().ok_or_else(|| {
                    UvcapError::FormatNegotiation("device reports no valid format".to_string())
                })?;
                self.device.negotiate_format(&fallback).map_err(|e| {
                    UvcapError::FormatNegotiation(format!(
                        "fallback {} {}x{} failed: {e}",
                        fallback.format, fallback.width, fallback.height
                    ))
                })
            }
        }
    }

    fn setup_session(&mut self) -> Result<()> {
        self.decoder = Some(FrameDecoder::new(
            &self.current,
            self.device.buffer_count(),
            self.options.jpeg_backend,
            self.options.yuyv_bayer,
        )?);
        self.open_render();
        self.device.start_stream()?;
        self.stream_on = true;
        self.fps.reset();
        self.photo_timer.last_ns = None;
        Ok(())
    }

    fn open_render(&mut self) {
        self.render_active = false;
        if !self.options.render_enabled {
            return;
        }
        if let Some(render) = self.render.as_mut() {
            match render.open(
                self.current.width,
                self.current.height,
                self.options.render_flags,
            ) {
                Ok(()) => self.render_active = true,
                Err(e) => log::warn!("Render sink unavailable, continuing without it: {e}"),
            }
        }
    }

    fn close_render(&mut self) {
        if self.render_active {
            if let Some(render) = self.render.as_mut() {
                render.close();
            }
            self.render_active = false;
        }
    }

    fn stop_device_stream(&mut self) {
        if self.stream_on {
            if let Err(e) = self.device.stop_stream() {
                log::error!("Failed to stop device stream: {e}");
            }
            self.stream_on = false;
        }
    }

    fn restart(&mut self) -> Result<()> {
        self.state = CaptureState::Restarting;
        log::info!("Restarting stream for a format change");

        if self.recording.is_some() {
            log::warn!("Format change while recording, stopping the recording");
            self.stop_recording();
        }
        self.stop_device_stream();
        self.close_render();
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
        }

        let request = self.controls.take_pending_format().unwrap_or(self.current);
        self.current = self.negotiate(request)?;
        self.setup_session()?;
        self.state = CaptureState::Streaming;

        log::info!(
            "Restarted with {} {}x{}",
            self.current.format,
            self.current.width,
            self.current.height
        );
        send_event(&self.event_tx, CaptureEvent::FormatChanged(self.current));
        Ok(())
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                RecordCommand::Start(request) => {
                    if let Err(e) = self.start_recording(request) {
                        log::error!("Could not start recording: {e}");
                    }
                }
                RecordCommand::Stop => self.stop_recording(),
            }
        }
    }

    fn start_recording(&mut self, request: RecordRequest) -> Result<()> {
        if self.recording.is_some() {
            log::warn!("Already recording, ignoring start request");
            return Ok(());
        }

        let raw_input = self.current.format.is_compressed() && request.codec == VideoCodec::Raw;
        let input_format = if raw_input {
            self.current.format
        } else {
            PixelFormat::Yu12
        };

        let mut ctx = EncoderContext::new(
            input_format,
            self.current.width,
            self.current.height,
            self.current.frame_rate,
        )
        .with_codec(request.codec)
        .with_quality(request.quality)
        .with_pts_mode(request.pts_mode);
        ctx.scheduler = request.scheduler;

        let mut encoder = match request.frame_codec {
            Some(codec) => VideoEncoder::open_with_codec(ctx, codec)?,
            None => VideoEncoder::open(ctx)?,
        };
        let codec = encoder.codec();
        let producer = encoder
            .take_producer()
            .ok_or_else(|| UvcapError::Init("encoder has no frame producer".to_string()))?;
        let worker = EncoderWorker::spawn(encoder, request.muxer)?;

        self.recording = Some(Recording {
            producer,
            worker,
            raw_input,
            started_ns: None,
        });
        log::info!("Recording started ({codec:?})");
        send_event(&self.event_tx, CaptureEvent::RecordingStarted { codec });
        Ok(())
    }

    fn stop_recording(&mut self) {
        let Some(recording) = self.recording.take() else {
            return;
        };
        drop(recording.producer);

        let report = match recording.worker.stop() {
            Ok(report) => {
                log::info!(
                    "Recording stopped: {} packets, {} frames dropped",
                    report.total_packets,
                    report.ring.dropped
                );
                Some(report)
            }
            Err(e) => {
                log::error!("Recording stopped with error: {e}");
                None
            }
        };
        send_event(&self.event_tx, CaptureEvent::RecordingStopped(report));
    }

    fn process_frame(&mut self, raw: &RawFrame) {
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        let frame = match decoder.decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Dropping frame {}: {e}", raw.index);
                return;
            }
        };

        if let Some(focus) = self.focus.as_mut() {
            let one_shot = self.controls.soft_focus_requested();
            if self.controls.soft_autofocus() || one_shot {
                let searching = focus.run(frame);
                if one_shot && !searching {
                    self.controls.clear_soft_focus();
                }
            }
        }

        if let Some(fps) = self.fps.update(raw.timestamp_ns) {
            if self.render_active {
                if let Some(render) = self.render.as_mut() {
                    let caption = format!(
                        "{} - {} - {}x{} ({fps:.2} fps) - seq: {}",
                        self.options.caption_name,
                        self.current.format,
                        self.current.width,
                        self.current.height,
                        frame.sequence
                    );
                    render.set_caption(&caption);
                }
            }
        }

        if self.render_active {
            if let Some(render) = self.render.as_mut() {
                if let Err(e) = render.push_frame(frame) {
                    log::warn!("Render sink rejected frame: {e}");
                }
                if render.quit_requested() {
                    log::info!("Render sink closed, quitting");
                    self.controls.quit();
                }
            }
        }

        let mut photo = self.controls.take_save_photo();
        if let Some(interval) = self.options.photo_interval {
            let limit_reached = self
                .options
                .photo_count
                .is_some_and(|count| self.photo_timer.taken >= count);
            let last = *self.photo_timer.last_ns.get_or_insert(raw.timestamp_ns);
            if !limit_reached
                && raw.timestamp_ns.saturating_sub(last) >= interval.as_nanos() as u64
            {
                self.photo_timer.last_ns = Some(raw.timestamp_ns);
                self.photo_timer.taken += 1;
                photo = true;
            }
        }
        if photo {
            send_event(&self.event_tx, CaptureEvent::Photo(frame.clone()));
        }

        let mut timer_expired = false;
        if let Some(recording) = self.recording.as_mut() {
            let data = if recording.raw_input {
                &raw.data[..]
            } else {
                &frame.data[..]
            };
            let started = *recording.started_ns.get_or_insert(raw.timestamp_ns);
            if let Err(e) = recording
                .producer
                .push_frame(data, raw.timestamp_ns, raw.is_keyframe)
            {
                log::error!("Dropping frame {} from recording: {e}", raw.index);
            }
            // Counted from the first frame offered, dropped frames included
            if let Some(duration) = self.options.video_duration {
                timer_expired =
                    raw.timestamp_ns.saturating_sub(started) >= duration.as_nanos() as u64;
            }

            let delay = recording.producer.delay();
            if delay > Duration::ZERO {
                log::trace!("Encoder ring filling up, waiting {delay:?}");
                std::thread::sleep(delay);
            }
        }

        if timer_expired {
            log::info!("Video timer expired");
            self.stop_recording();
            send_event(&self.event_tx, CaptureEvent::VideoTimerExpired);
        }
    }

    /// Stops recording and streaming and closes the render sink. Safe to call
    /// more than once.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.stop_recording();
        self.stop_device_stream();
        self.close_render();
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
        }
        self.state = CaptureState::Stopped;
        self.closed = true;
        log::info!("Capture loop shut down");
    }
}

fn send_event(tx: &Sender<CaptureEvent>, event: CaptureEvent) {
    match tx.try_send(event) {
        Ok(_) => {}
        Err(TrySendError::Full(_)) => {
            log::error!("Could not send capture event. Receiver is full");
        }
        Err(TrySendError::Disconnected(_)) => {
            log::debug!("Capture event dropped, receiver disconnected");
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
