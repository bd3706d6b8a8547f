use std::error::Error;
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum UvcapError {
    /// Errors from FFmpeg
    FFmpeg(ffmpeg_next::Error),
    /// Errors from the image crate's codecs
    Image(image::ImageError),
    /// I/O errors
    Io(io::Error),
    /// A buffer could not be allocated
    AllocationFailure(String),
    /// Neither the requested nor any fallback format could be set on the device
    FormatNegotiation(String),
    /// A single frame could not be decoded, the frame is dropped
    Decode(String),
    /// The selected codec could not be opened
    CodecOpen(String),
    /// The ring buffer slot at the write index was still in use
    RingBufferOverrun { dropped: u64 },
    /// The codec did not finish flushing within its bound
    FlushTimeout { flushed: usize, pending: usize },
    /// Device errors
    Device(String),
    /// Render sink errors
    Render(String),
    /// Initialization errors
    Init(String),
    /// Encoding errors
    Encoding(String),
    /// Validation errors
    Validation(String),
    /// Other errors
    Other(String),
}

impl fmt::Display for UvcapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UvcapError::FFmpeg(err) => write!(f, "FFmpeg error: {err}"),
            UvcapError::Image(err) => write!(f, "Image error: {err}"),
            UvcapError::Io(err) => write!(f, "I/O error: {err}"),
            UvcapError::AllocationFailure(msg) => write!(f, "Allocation failure: {msg}"),
            UvcapError::FormatNegotiation(msg) => write!(f, "Format negotiation error: {msg}"),
            UvcapError::Decode(msg) => write!(f, "Decode error: {msg}"),
            UvcapError::CodecOpen(msg) => write!(f, "Codec open error: {msg}"),
            UvcapError::RingBufferOverrun { dropped } => {
                write!(f, "Ring buffer overrun ({dropped} frames dropped so far)")
            }
            UvcapError::FlushTimeout { flushed, pending } => write!(
                f,
                "Encoder flush gave up after {flushed} packets with {pending} still pending"
            ),
            UvcapError::Device(msg) => write!(f, "Device error: {msg}"),
            UvcapError::Render(msg) => write!(f, "Render error: {msg}"),
            UvcapError::Init(msg) => write!(f, "Initialization error: {msg}"),
            UvcapError::Encoding(msg) => write!(f, "Encoding error: {msg}"),
            UvcapError::Validation(msg) => write!(f, "Validation error: {msg}"),
            UvcapError::Other(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl Error for UvcapError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            UvcapError::FFmpeg(err) => Some(err),
            UvcapError::Image(err) => Some(err),
            UvcapError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ffmpeg_next::Error> for UvcapError {
    fn from(err: ffmpeg_next::Error) -> Self {
        UvcapError::FFmpeg(err)
    }
}

impl From<image::ImageError> for UvcapError {
    fn from(err: image::ImageError) -> Self {
        UvcapError::Image(err)
    }
}

impl From<io::Error> for UvcapError {
    fn from(err: io::Error) -> Self {
        UvcapError::Io(err)
    }
}

impl From<std::collections::TryReserveError> for UvcapError {
    fn from(err: std::collections::TryReserveError) -> Self {
        UvcapError::AllocationFailure(err.to_string())
    }
}

impl From<String> for UvcapError {
    fn from(err: String) -> Self {
        UvcapError::Other(err)
    }
}

impl From<&str> for UvcapError {
    fn from(err: &str) -> Self {
        UvcapError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, UvcapError>;
