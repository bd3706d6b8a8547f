use crate::types::error::{Result, UvcapError};

pub const TIME_UNIT_NS: u64 = 1_000_000_000;

/// Luma value of a black pixel.
pub const BLACK_LUMA: u8 = 0x00;
/// Chroma value of a colourless pixel.
pub const NEUTRAL_CHROMA: u8 = 0x80;

/// Monotonic clock reading in nanoseconds, the same clock V4L2 stamps buffers with.
pub fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid, writable timespec
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if ret != 0 {
        log::warn!("clock_gettime failed: {}", std::io::Error::last_os_error());
        return 0;
    }
    ts.tv_sec as u64 * TIME_UNIT_NS + ts.tv_nsec as u64
}

/// Allocates `len` bytes set to `fill`, reporting OOM instead of aborting.
pub fn alloc_buffer(len: usize, fill: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|e| {
        UvcapError::AllocationFailure(format!("could not allocate {len} bytes: {e}"))
    })?;
    buf.resize(len, fill);
    Ok(buf)
}

/// Size of a YU12 frame.
pub fn yu12_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3 / 2
}

/// Allocates a YU12 frame already painted black.
pub fn alloc_black_yu12(width: u32, height: u32) -> Result<Vec<u8>> {
    let mut buf = alloc_buffer(yu12_size(width, height), NEUTRAL_CHROMA)?;
    fill_black_yu12(&mut buf, width, height);
    Ok(buf)
}

pub fn fill_black_yu12(buf: &mut [u8], width: u32, height: u32) {
    let luma = (width as usize * height as usize).min(buf.len());
    buf[..luma].fill(BLACK_LUMA);
    buf[luma..].fill(NEUTRAL_CHROMA);
}

/// Frame sizes must be even in both directions for 4:2:0 subsampling.
pub fn validate_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(UvcapError::Validation(format!(
            "frame dimensions must be even and non zero, got {width}x{height}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn black_frame_layout() {
        let buf = alloc_black_yu12(4, 2).unwrap();
        assert_eq!(buf.len(), 12);
        assert!(buf[..8].iter().all(|&b| b == BLACK_LUMA));
        assert!(buf[8..].iter().all(|&b| b == NEUTRAL_CHROMA));
    }

    #[test]
    fn odd_dimensions_rejected() {
        assert!(validate_dimensions(640, 480).is_ok());
        assert!(validate_dimensions(641, 480).is_err());
        assert!(validate_dimensions(0, 480).is_err());
    }

    #[test]
    fn monotonic_clock_advances() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(b >= a);
    }
}
