//! JPEG/MJPEG decompression into YU12.
//!
//! Two interchangeable backends sit behind [`JpegDecoder`]: the `image` crate's
//! baseline decoder, and FFmpeg's MJPEG decoder. Both are chosen once when the
//! session is set up and decode into a caller supplied YU12 buffer.

use std::io::Cursor;

use ffmpeg_next::{self as ffmpeg, format::Pixel};
use image::{ColorType, ImageDecoder};

use crate::types::config::JpegBackend;
use crate::types::error::{Result, UvcapError};
use crate::utils::{alloc_buffer, yu12_size, NEUTRAL_CHROMA};

use super::converters::{grey_to_yu12, rgb3_to_yu12, split_planes};

/// Frames at or below this size hold no more than a JPEG header.
pub const JPEG_HEADER_THRESHOLD: usize = 0xaf;

pub trait JpegDecoder: Send {
    /// Decodes one compressed frame into `out`, returning the number of bytes written.
    fn decode(&mut self, out: &mut [u8], input: &[u8]) -> Result<usize>;

    /// Releases decoder resources. Safe to call more than once.
    fn close(&mut self);
}

pub fn open_jpeg_decoder(
    backend: JpegBackend,
    width: u32,
    height: u32,
) -> Result<Box<dyn JpegDecoder>> {
    match backend {
        JpegBackend::Image => Ok(Box::new(ImageJpegDecoder::new(width, height)?)),
        JpegBackend::Ffmpeg => Ok(Box::new(FfmpegJpegDecoder::new(width, height)?)),
    }
}

fn check_input(input: &[u8]) -> Result<()> {
    if input.len() <= JPEG_HEADER_THRESHOLD {
        return Err(UvcapError::Decode(format!(
            "jpeg frame of {} bytes holds no image data",
            input.len()
        )));
    }
    Ok(())
}

pub struct ImageJpegDecoder {
    width: u32,
    height: u32,
    scratch: Option<Vec<u8>>,
}

impl ImageJpegDecoder {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let scratch = alloc_buffer(width as usize * height as usize * 3, 0)?;
        Ok(Self {
            width,
            height,
            scratch: Some(scratch),
        })
    }
}

impl JpegDecoder for ImageJpegDecoder {
    fn decode(&mut self, out: &mut [u8], input: &[u8]) -> Result<usize> {
        check_input(input)?;
        let scratch = self
            .scratch
            .as_mut()
            .ok_or_else(|| UvcapError::Decode("jpeg decoder is closed".to_string()))?;

        let decoder = image::codecs::jpeg::JpegDecoder::new(Cursor::new(input))
            .map_err(|e| UvcapError::Decode(format!("bad jpeg header: {e}")))?;
        let (width, height) = decoder.dimensions();
        if width != self.width || height != self.height {
            return Err(UvcapError::Decode(format!(
                "jpeg is {width}x{height}, expected {}x{}",
                self.width, self.height
            )));
        }

        let color = decoder.color_type();
        let needed = decoder.total_bytes() as usize;
        if needed > scratch.len() {
            return Err(UvcapError::Decode(format!(
                "unsupported jpeg colour type {color:?}"
            )));
        }
        decoder
            .read_image(&mut scratch[..needed])
            .map_err(|e| UvcapError::Decode(format!("corrupt jpeg data: {e}")))?;

        let (w, h) = (width as usize, height as usize);
        match color {
            ColorType::Rgb8 => rgb3_to_yu12(out, scratch, w, h),
            ColorType::L8 => grey_to_yu12(out, scratch, w, h),
            other => {
                return Err(UvcapError::Decode(format!(
                    "unsupported jpeg colour type {other:?}"
                )))
            }
        }
        Ok(yu12_size(width, height))
    }

    fn close(&mut self) {
        self.scratch.take();
    }
}

pub struct FfmpegJpegDecoder {
    decoder: Option<ffmpeg::decoder::Video>,
    frame: ffmpeg::util::frame::Video,
    width: u32,
    height: u32,
}

impl FfmpegJpegDecoder {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        ffmpeg::init()?;
        let codec = ffmpeg::decoder::find(ffmpeg::codec::Id::MJPEG)
            .ok_or(ffmpeg::Error::DecoderNotFound)?;
        let mut context = ffmpeg::codec::context::Context::new_with_codec(codec);
        // One frame out per packet in
        context.set_threading(ffmpeg::codec::threading::Config {
            kind: ffmpeg::codec::threading::Type::None,
            count: 1,
            ..Default::default()
        });
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| UvcapError::Init(format!("could not open mjpeg decoder: {e}")))?;

        Ok(Self {
            decoder: Some(decoder),
            frame: ffmpeg::util::frame::Video::empty(),
            width,
            height,
        })
    }
}

impl JpegDecoder for FfmpegJpegDecoder {
    fn decode(&mut self, out: &mut [u8], input: &[u8]) -> Result<usize> {
        check_input(input)?;
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| UvcapError::Decode("jpeg decoder is closed".to_string()))?;

        let packet = ffmpeg::Packet::copy(input);
        decoder
            .send_packet(&packet)
            .map_err(|e| UvcapError::Decode(format!("mjpeg decoder rejected frame: {e}")))?;
        match decoder.receive_frame(&mut self.frame) {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                return Err(UvcapError::Decode(
                    "mjpeg decoder is holding the frame back".to_string(),
                ))
            }
            Err(e) => {
                return Err(UvcapError::Decode(format!(
                    "mjpeg decoder produced no frame: {e}"
                )))
            }
        }

        if self.frame.width() != self.width || self.frame.height() != self.height {
            return Err(UvcapError::Decode(format!(
                "jpeg is {}x{}, expected {}x{}",
                self.frame.width(),
                self.frame.height(),
                self.width,
                self.height
            )));
        }

        frame_to_yu12(out, &self.frame)?;
        Ok(yu12_size(self.width, self.height))
    }

    fn close(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.flush();
        }
    }
}

/// Copies a decoded planar frame into YU12, averaging chroma blocks down to 4:2:0.
fn frame_to_yu12(out: &mut [u8], frame: &ffmpeg::util::frame::Video) -> Result<()> {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let (y, u, v) = split_planes(out, w, h);

    let luma = frame.data(0);
    let stride = frame.stride(0);
    for (row, dst) in y.chunks_exact_mut(w).enumerate() {
        dst.copy_from_slice(&luma[row * stride..row * stride + w]);
    }

    let (chroma_w, chroma_h) = match frame.format() {
        Pixel::GRAY8 => {
            u.fill(NEUTRAL_CHROMA);
            v.fill(NEUTRAL_CHROMA);
            return Ok(());
        }
        Pixel::YUVJ420P | Pixel::YUV420P => (w.div_ceil(2), h.div_ceil(2)),
        Pixel::YUVJ422P | Pixel::YUV422P => (w.div_ceil(2), h),
        Pixel::YUVJ444P | Pixel::YUV444P => (w, h),
        other => {
            return Err(UvcapError::Decode(format!(
                "unsupported mjpeg output format {other:?}"
            )))
        }
    };

    downsample_plane(u, frame.data(1), frame.stride(1), chroma_w, chroma_h, w / 2, h / 2);
    downsample_plane(v, frame.data(2), frame.stride(2), chroma_w, chroma_h, w / 2, h / 2);
    Ok(())
}

/// Box filters a plane down by integer factors.
fn downsample_plane(
    dst: &mut [u8],
    src: &[u8],
    stride: usize,
    src_w: usize,
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
) {
    let fx = (src_w / dst_w).max(1);
    let fy = (src_h / dst_h).max(1);
    let area = (fx * fy) as u32;

    for row in 0..dst_h {
        for col in 0..dst_w {
            let mut sum = 0u32;
            for sy in row * fy..row * fy + fy {
                let line = &src[sy * stride..];
                for sx in col * fx..col * fx + fx {
                    sum += line[sx] as u32;
                }
            }
            dst[row * dst_w + col] = (sum / area) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_only_frames_are_rejected() {
        let mut decoder = ImageJpegDecoder::new(16, 16).unwrap();
        let mut out = vec![0u8; yu12_size(16, 16)];
        let err = decoder
            .decode(&mut out, &[0u8; JPEG_HEADER_THRESHOLD])
            .unwrap_err();
        assert!(matches!(err, UvcapError::Decode(_)));
    }

    #[test]
    fn close_twice_is_harmless() {
        let mut decoder = ImageJpegDecoder::new(16, 16).unwrap();
        decoder.close();
        decoder.close();
        let mut out = vec![0u8; yu12_size(16, 16)];
        assert!(decoder.decode(&mut out, &[0u8; 512]).is_err());
    }

    fn grey_jpeg(width: u32, height: u32, level: u8) -> Vec<u8> {
        let pixels = vec![level; width as usize * height as usize * 3];
        let mut out = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 95)
            .encode(&pixels, width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    #[test]
    fn ffmpeg_decoder_emits_every_frame_immediately() {
        let mut decoder = FfmpegJpegDecoder::new(32, 16).unwrap();
        let threading = decoder.decoder.as_ref().unwrap().threading();
        assert_eq!(threading.count, 1);

        let mut out = vec![0u8; yu12_size(32, 16)];
        for level in [40u8, 128, 220] {
            let written = decoder.decode(&mut out, &grey_jpeg(32, 16, level)).unwrap();
            assert_eq!(written, out.len());
            assert!(out[..32 * 16]
                .iter()
                .all(|&p| (p as i32 - level as i32).abs() <= 3));
        }
        decoder.close();
        decoder.close();
    }

    #[test]
    fn downsample_averages_blocks() {
        let src = [10, 20, 30, 40, 50, 60, 70, 80];
        let mut dst = [0u8; 2];
        downsample_plane(&mut dst, &src, 4, 4, 2, 2, 1);
        assert_eq!(dst, [35, 55]);
    }
}
