use std::time::Duration;

use crate::{
    capture::{video::CaptureLoop, CaptureDevice, FocusAnalyzer, RenderSink},
    types::{
        config::{CaptureOptions, JpegBackend, RenderFlags},
        error::{Result, UvcapError},
        video_frame::{BayerOrder, FrameRate, PixelFormat},
    },
    utils::validate_dimensions,
};

pub struct CaptureBuilder {
    device: Option<Box<dyn CaptureDevice>>,
    render: Option<Box<dyn RenderSink>>,
    focus: Option<Box<dyn FocusAnalyzer>>,
    options: CaptureOptions,
}

impl Default for CaptureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBuilder {
    pub fn new() -> Self {
        Self {
            device: None,
            render: None,
            focus: None,
            options: CaptureOptions::default(),
        }
    }

    pub fn with_device(mut self, device: Box<dyn CaptureDevice>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_render_sink(mut self, render: Box<dyn RenderSink>) -> Self {
        self.render = Some(render);
        self
    }

    pub fn with_focus_analyzer(mut self, focus: Box<dyn FocusAnalyzer>) -> Self {
        self.focus = Some(focus);
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.options.request.format = format;
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.options.request.width = width;
        self.options.request.height = height;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: FrameRate) -> Self {
        self.options.request.frame_rate = frame_rate;
        self
    }

    /// Takes a photo every `interval`, stopping after `count` photos if given.
    pub fn with_photo_timer(mut self, interval: Duration, count: Option<u32>) -> Self {
        self.options.photo_interval = Some(interval);
        self.options.photo_count = count;
        self
    }

    /// Stops every recording once it has run for `duration`.
    pub fn with_video_timer(mut self, duration: Duration) -> Self {
        self.options.video_duration = Some(duration);
        self
    }

    pub fn with_render_flags(mut self, flags: RenderFlags) -> Self {
        self.options.render_flags = flags;
        self
    }

    pub fn without_render(mut self) -> Self {
        self.options.render_enabled = false;
        self
    }

    pub fn with_jpeg_backend(mut self, backend: JpegBackend) -> Self {
        self.options.jpeg_backend = backend;
        self
    }

    /// Treats YUYV frames as a bayer mosaic with the given order.
    pub fn with_yuyv_bayer(mut self, order: BayerOrder) -> Self {
        self.options.yuyv_bayer = Some(order);
        self
    }

    pub fn with_soft_autofocus(mut self) -> Self {
        self.options.soft_autofocus = true;
        self
    }

    pub fn with_caption_name(mut self, name: impl Into<String>) -> Self {
        self.options.caption_name = name.into();
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.options.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<CaptureLoop> {
        let device = match self.device {
            Some(device) => device,
            None => {
                return Err(UvcapError::Init(
                    "Capture device was not specified".to_string(),
                ))
            }
        };

        validate_dimensions(self.options.request.width, self.options.request.height)?;
        if self.options.request.frame_rate.num == 0 || self.options.request.frame_rate.den == 0 {
            return Err(UvcapError::Validation(format!(
                "invalid frame rate {}/{}",
                self.options.request.frame_rate.num, self.options.request.frame_rate.den
            )));
        }
        if self.options.photo_count == Some(0) {
            return Err(UvcapError::Validation(
                "photo timer needs at least one picture".to_string(),
            ));
        }
        if self.options.render_enabled && self.render.is_none() {
            log::debug!("No render sink given, frames will not be displayed");
        }

        Ok(CaptureLoop::new(
            device,
            self.render,
            self.focus,
            self.options,
        ))
    }
}
