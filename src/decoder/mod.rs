//! Conversion of device frames into the canonical YU12 layout.

pub mod bayer;
pub mod converters;
pub mod jpeg;

use std::collections::HashMap;

use crate::types::{
    config::JpegBackend,
    error::{Result, UvcapError},
    video_frame::{BayerOrder, DecodedFrame, FormatRequest, PixelFormat, RawFrame},
};
use crate::utils::{alloc_black_yu12, alloc_buffer, validate_dimensions, yu12_size};

use self::bayer::bayer_to_rgb24;
use self::converters::rgb3_to_yu12;
use self::jpeg::{open_jpeg_decoder, JpegDecoder};

/// Converts one frame of a single pixel layout into YU12.
pub trait FrameConverter: Send {
    /// `out` is exactly one YU12 frame, `input` at least one full source frame.
    /// Returns the number of bytes written.
    fn convert(&mut self, out: &mut [u8], input: &[u8], width: u32, height: u32) -> Result<usize>;

    fn close(&mut self) {}
}

type ConvertFn = fn(&mut [u8], &[u8], usize, usize);

/// Stateless converter wrapping one of the functions in [`converters`].
pub struct PlainConverter(ConvertFn);

impl FrameConverter for PlainConverter {
    fn convert(&mut self, out: &mut [u8], input: &[u8], width: u32, height: u32) -> Result<usize> {
        (self.0)(out, input, width as usize, height as usize);
        Ok(yu12_size(width, height))
    }
}

/// Demosaics into a lazily allocated RGB scratch buffer, then converts to YU12.
pub struct BayerConverter {
    order: BayerOrder,
    scratch: Option<Vec<u8>>,
}

impl BayerConverter {
    pub fn new(order: BayerOrder) -> Self {
        Self {
            order,
            scratch: None,
        }
    }
}

impl FrameConverter for BayerConverter {
    fn convert(&mut self, out: &mut [u8], input: &[u8], width: u32, height: u32) -> Result<usize> {
        let (w, h) = (width as usize, height as usize);
        let mut scratch = match self.scratch.take() {
            Some(buf) => buf,
            None => alloc_buffer(w * h * 3, 0)?,
        };
        bayer_to_rgb24(&mut scratch, &input[..w * h], w, h, self.order);
        rgb3_to_yu12(out, &scratch, w, h);
        self.scratch = Some(scratch);
        Ok(yu12_size(width, height))
    }

    fn close(&mut self) {
        self.scratch.take();
    }
}

pub struct JpegConverter {
    decoder: Box<dyn JpegDecoder>,
}

impl JpegConverter {
    pub fn new(decoder: Box<dyn JpegDecoder>) -> Self {
        Self { decoder }
    }
}

impl FrameConverter for JpegConverter {
    fn convert(&mut self, out: &mut [u8], input: &[u8], _width: u32, _height: u32) -> Result<usize> {
        self.decoder.decode(out, input)
    }

    fn close(&mut self) {
        self.decoder.close();
    }
}

/// Table of pixel format to converter.
#[derive(Default)]
pub struct ConverterRegistry {
    converters: HashMap<PixelFormat, Box<dyn FrameConverter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every uncompressed layout with its default converter.
    pub fn with_uncompressed() -> Self {
        use converters::*;

        let mut registry = Self::new();
        let plain: [(PixelFormat, ConvertFn); 16] = [
            (PixelFormat::Yuyv, yuyv_to_yu12),
            (PixelFormat::Uyvy, uyvy_to_yu12),
            (PixelFormat::Yvyu, yvyu_to_yu12),
            (PixelFormat::Yyuv, yyuv_to_yu12),
            (PixelFormat::Yu12, yu12_copy),
            (PixelFormat::Yv12, yv12_to_yu12),
            (PixelFormat::Nv12, nv12_to_yu12),
            (PixelFormat::Nv21, nv21_to_yu12),
            (PixelFormat::Nv16, nv16_to_yu12),
            (PixelFormat::Nv61, nv61_to_yu12),
            (PixelFormat::Y41p, y41p_to_yu12),
            (PixelFormat::Grey, grey_to_yu12),
            (PixelFormat::Y10b, y10b_to_yu12),
            (PixelFormat::Y16, y16_to_yu12),
            (PixelFormat::Rgb24, rgb3_to_yu12),
            (PixelFormat::Bgr24, bgr3_to_yu12),
        ];
        for (format, convert) in plain {
            registry.register(format, Box::new(PlainConverter(convert)));
        }
        for format in [
            PixelFormat::BayerBggr,
            PixelFormat::BayerGbrg,
            PixelFormat::BayerGrbg,
            PixelFormat::BayerRggb,
        ] {
            if let Some(order) = format.bayer_order() {
                registry.register(format, Box::new(BayerConverter::new(order)));
            }
        }
        registry
    }

    /// Registers `converter` for `format`, replacing any previous one.
    pub fn register(&mut self, format: PixelFormat, converter: Box<dyn FrameConverter>) {
        if let Some(mut old) = self.converters.insert(format, converter) {
            old.close();
        }
    }

    pub fn contains(&self, format: PixelFormat) -> bool {
        self.converters.contains_key(&format)
    }

    pub fn get_mut(&mut self, format: PixelFormat) -> Option<&mut (dyn FrameConverter + 'static)> {
        self.converters.get_mut(&format).map(|c| c.as_mut())
    }

    pub fn close(&mut self) {
        for converter in self.converters.values_mut() {
            converter.close();
        }
    }
}

/// Decoded frame slots, one per device buffer, recycled by buffer index.
pub struct FrameQueue {
    slots: Vec<DecodedFrame>,
}

impl FrameQueue {
    pub fn new(count: usize, width: u32, height: u32) -> Result<Self> {
        let count = count.max(1);
        let mut slots = Vec::new();
        slots.try_reserve_exact(count)?;
        for _ in 0..count {
            slots.push(DecodedFrame {
                data: alloc_black_yu12(width, height)?,
                width,
                height,
                timestamp_ns: 0,
                sequence: 0,
            });
        }
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> &DecodedFrame {
        &self.slots[index % self.slots.len()]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut DecodedFrame {
        let len = self.slots.len();
        &mut self.slots[index % len]
    }
}

/// Decodes raw frames of the negotiated format into [`FrameQueue`] slots.
pub struct FrameDecoder {
    format: PixelFormat,
    width: u32,
    height: u32,
    registry: ConverterRegistry,
    queue: FrameQueue,
    sequence: u64,
    closed: bool,
}

impl FrameDecoder {
    /// Sets up a decoder for `request`. `buffer_count` is the number of device
    /// buffers, `yuyv_bayer` marks YUYV frames that actually carry a bayer mosaic.
    pub fn new(
        request: &FormatRequest,
        buffer_count: usize,
        jpeg_backend: JpegBackend,
        yuyv_bayer: Option<BayerOrder>,
    ) -> Result<Self> {
        let mut registry = ConverterRegistry::with_uncompressed();
        match request.format {
            PixelFormat::Mjpeg | PixelFormat::Jpeg => {
                let jpeg = open_jpeg_decoder(jpeg_backend, request.width, request.height)?;
                registry.register(request.format, Box::new(JpegConverter::new(jpeg)));
            }
            PixelFormat::Yuyv => {
                if let Some(order) = yuyv_bayer {
                    registry.register(PixelFormat::Yuyv, Box::new(BayerConverter::new(order)));
                }
            }
            _ => {}
        }
        Self::with_registry(request, buffer_count, registry)
    }

    /// Sets up a decoder dispatching through a caller built registry.
    pub fn with_registry(
        request: &FormatRequest,
        buffer_count: usize,
        registry: ConverterRegistry,
    ) -> Result<Self> {
        validate_dimensions(request.width, request.height)?;
        if !registry.contains(request.format) {
            return Err(UvcapError::Validation(format!(
                "no converter registered for {}",
                request.format
            )));
        }
        if request.format == PixelFormat::Y41p && request.width % 8 != 0 {
            return Err(UvcapError::Validation(format!(
                "Y41P needs a width divisible by 8, got {}",
                request.width
            )));
        }

        let queue = FrameQueue::new(buffer_count, request.width, request.height)?;
        log::debug!(
            "Frame decoder ready for {} {}x{} with {} slots",
            request.format,
            request.width,
            request.height,
            queue.len()
        );

        Ok(Self {
            format: request.format,
            width: request.width,
            height: request.height,
            registry,
            queue,
            sequence: 0,
            closed: false,
        })
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Decodes `raw` into the slot of its device buffer and returns that slot.
    pub fn decode(&mut self, raw: &RawFrame) -> Result<&DecodedFrame> {
        let slot = self.queue.slot_mut(raw.index);
        let written = Self::convert_into(
            &mut self.registry,
            self.format,
            self.width,
            self.height,
            &mut slot.data,
            &raw.data,
        )?;
        log::trace!("Decoded frame {} ({} bytes)", raw.index, written);

        self.sequence += 1;
        slot.timestamp_ns = raw.timestamp_ns;
        slot.sequence = self.sequence;
        Ok(self.queue.slot(raw.index))
    }

    /// Decodes `input` into a caller owned YU12 buffer.
    pub fn decode_into(&mut self, out: &mut [u8], input: &[u8]) -> Result<usize> {
        Self::convert_into(
            &mut self.registry,
            self.format,
            self.width,
            self.height,
            out,
            input,
        )
    }

    fn convert_into(
        registry: &mut ConverterRegistry,
        format: PixelFormat,
        width: u32,
        height: u32,
        out: &mut [u8],
        input: &[u8],
    ) -> Result<usize> {
        if input.is_empty() {
            return Err(UvcapError::Decode("empty frame".to_string()));
        }
        let out_size = yu12_size(width, height);
        if out.len() < out_size {
            return Err(UvcapError::Validation(format!(
                "output buffer holds {} bytes, need {out_size}",
                out.len()
            )));
        }

        let input = match format.frame_size(width, height) {
            Some(expected) if input.len() < expected => {
                return Err(UvcapError::Decode(format!(
                    "short {format} frame: {} of {expected} bytes",
                    input.len()
                )));
            }
            Some(expected) if input.len() > expected => {
                log::warn!(
                    "{format} frame of {} bytes exceeds the expected {expected}, clipping",
                    input.len()
                );
                &input[..expected]
            }
            _ => input,
        };

        let converter = registry
            .get_mut(format)
            .ok_or_else(|| UvcapError::Decode(format!("no converter for {format}")))?;
        converter.convert(&mut out[..out_size], input, width, height)
    }

    /// Releases converter state. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.registry.close();
        self.closed = true;
    }
}

impl Drop for FrameDecoder {
    fn drop(&mut self) {
        self.close();
    }
}
