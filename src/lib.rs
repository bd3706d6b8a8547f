//! # uvcap-rs
//!
//! `uvcap-rs` is a camera capture pipeline for UVC style devices. It pulls frames
//! from a device, converts whatever pixel layout the device delivers into
//! planar YU12, shows them on a render sink and optionally records them through
//! a ring buffered, rate adaptive video encoder.
//!
//! ## Features
//!
//! - Software conversion of packed/planar YUV, greyscale, RGB and bayer formats
//! - JPEG/MJPEG decompression through the `image` crate or FFmpeg
//! - Format negotiation with fallback and in-place format restarts
//! - Timed photo and video capture
//! - Recording through FFmpeg (MJPEG, MPEG-4, H.264) or raw passthrough, with a
//!   producer throttle that backs off as the encoder ring fills up
//!
//! The device, render sink, autofocus and muxer are supplied by the caller
//! through the traits in [`capture`] and [`encoders::muxer`].
//!
//! ## Example
//!
//! ```no_run
//! use uvcap_rs::{
//!     capture::{CaptureDevice, RecordRequest},
//!     encoders::muxer::ChannelMuxer,
//!     pipeline::builder::CaptureBuilder,
//!     types::{config::VideoCodec, video_frame::PixelFormat},
//! };
//!
//! fn record(device: Box<dyn CaptureDevice>) -> Result<(), Box<dyn std::error::Error>> {
//!     let capture = CaptureBuilder::new()
//!         .with_device(device)
//!         .with_format(PixelFormat::Mjpeg)
//!         .with_resolution(1280, 720)
//!         .without_render()
//!         .build()?;
//!
//!     let handle = capture.handle();
//!     let worker = capture.spawn()?;
//!
//!     let (muxer, packets) = ChannelMuxer::new(64);
//!     handle.start_video(RecordRequest::new(Box::new(muxer)).with_codec(VideoCodec::Raw))?;
//!     for packet in packets.iter().take(100) {
//!         println!("{} bytes, pts {}", packet.data.len(), packet.pts);
//!     }
//!
//!     handle.quit();
//!     worker.join().map_err(|_| "capture thread panicked")??;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

use crossbeam::channel::{Sender, TrySendError};

use capture::{RecordCommand, RecordRequest};
use types::{
    error::{Result, UvcapError},
    video_frame::FormatRequest,
};

pub mod capture;
pub mod decoder;
pub mod encoders;
pub mod pipeline;
pub mod types;
mod utils;

pub use capture::video::{CaptureLoop, CaptureState};
pub use pipeline::builder::CaptureBuilder;
pub use types::config::{PtsMode, QualityPreset, SchedulerMode, VideoCodec};
pub use utils::monotonic_ns;

/// Flags shared between the capture thread and everyone controlling it.
pub struct CaptureControls {
    stop_flag: AtomicBool,
    restart_flag: AtomicBool,
    save_photo_flag: AtomicBool,
    soft_autofocus_flag: AtomicBool,
    soft_focus_flag: AtomicBool,
    pending_format: Mutex<Option<FormatRequest>>,
}

impl Default for CaptureControls {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureControls {
    pub fn new() -> Self {
        Self {
            stop_flag: AtomicBool::new(false),
            restart_flag: AtomicBool::new(false),
            save_photo_flag: AtomicBool::new(false),
            soft_autofocus_flag: AtomicBool::new(false),
            soft_focus_flag: AtomicBool::new(false),
            pending_format: Mutex::new(None),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub fn quit(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub fn request_restart(&self) {
        self.restart_flag.store(true, Ordering::Release);
    }

    /// Consumes a pending restart request.
    pub fn take_restart(&self) -> bool {
        self.restart_flag.swap(false, Ordering::AcqRel)
    }

    pub fn set_pending_format(&self, request: FormatRequest) {
        *self
            .pending_format
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(request);
    }

    pub fn take_pending_format(&self) -> Option<FormatRequest> {
        self.pending_format
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn request_save_photo(&self) {
        self.save_photo_flag.store(true, Ordering::Release);
    }

    pub fn take_save_photo(&self) -> bool {
        self.save_photo_flag.swap(false, Ordering::AcqRel)
    }

    pub fn soft_autofocus(&self) -> bool {
        self.soft_autofocus_flag.load(Ordering::Acquire)
    }

    pub fn set_soft_autofocus(&self, enabled: bool) {
        self.soft_autofocus_flag.store(enabled, Ordering::Release);
    }

    pub fn request_soft_focus(&self) {
        self.soft_focus_flag.store(true, Ordering::Release);
    }

    pub fn soft_focus_requested(&self) -> bool {
        self.soft_focus_flag.load(Ordering::Acquire)
    }

    pub fn clear_soft_focus(&self) {
        self.soft_focus_flag.store(false, Ordering::Release);
    }
}

/// Cloneable remote control for a running [`CaptureLoop`].
#[derive(Clone)]
pub struct CaptureHandle {
    controls: Arc<CaptureControls>,
    commands: Sender<RecordCommand>,
}

impl CaptureHandle {
    pub(crate) fn new(controls: Arc<CaptureControls>, commands: Sender<RecordCommand>) -> Self {
        Self { controls, commands }
    }

    pub fn controls(&self) -> &CaptureControls {
        &self.controls
    }

    /// Asks the loop to stop after the current frame.
    pub fn quit(&self) {
        self.controls.quit();
    }

    /// Restarts the stream with the current format, e.g. after a control change.
    pub fn request_format_restart(&self) {
        self.controls.request_restart();
    }

    /// Restarts the stream with a new format and resolution.
    pub fn request_format(&self, request: FormatRequest) {
        self.controls.set_pending_format(request);
        self.controls.request_restart();
    }

    /// Emits the next decoded frame as a photo.
    pub fn save_photo(&self) {
        self.controls.request_save_photo();
    }

    pub fn set_soft_autofocus(&self, enabled: bool) {
        self.controls.set_soft_autofocus(enabled);
    }

    /// Runs the focus analyser until it reports focus was found.
    pub fn request_soft_focus(&self) {
        self.controls.request_soft_focus();
    }

    pub fn start_video(&self, request: RecordRequest) -> Result<()> {
        self.send(RecordCommand::Start(request))
    }

    pub fn stop_video(&self) -> Result<()> {
        self.send(RecordCommand::Stop)
    }

    fn send(&self, command: RecordCommand) -> Result<()> {
        match self.commands.try_send(command) {
            Ok(_) => Ok(()),
            Err(TrySendError::Full(_)) => Err(UvcapError::Other(
                "capture command queue is full".to_string(),
            )),
            Err(TrySendError::Disconnected(_)) => Err(UvcapError::Other(
                "capture loop is gone".to_string(),
            )),
        }
    }
}
