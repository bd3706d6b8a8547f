pub mod codec;
pub mod muxer;
pub mod ring_buffer;
pub mod video;
