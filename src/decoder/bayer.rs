//! Bilinear demosaicing of 8 bit bayer mosaics.

use crate::types::video_frame::BayerOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Red = 0,
    Green = 1,
    Blue = 2,
}

impl BayerOrder {
    fn pattern(self) -> [[Channel; 2]; 2] {
        use Channel::*;
        match self {
            BayerOrder::Gbrg => [[Green, Blue], [Red, Green]],
            BayerOrder::Grbg => [[Green, Red], [Blue, Green]],
            BayerOrder::Bggr => [[Blue, Green], [Green, Red]],
            BayerOrder::Rggb => [[Red, Green], [Green, Blue]],
        }
    }
}

/// Mirrors an out of range coordinate back into `0..len`, keeping its parity.
#[inline]
fn reflect(pos: isize, len: usize) -> usize {
    let len = len as isize;
    if pos < 0 {
        (-pos).min(len - 1) as usize
    } else if pos >= len {
        (2 * (len - 1) - pos).max(0) as usize
    } else {
        pos as usize
    }
}

/// Demosaics `width * height` bayer samples into interleaved RGB24.
///
/// Each missing channel is the mean of the 3x3 neighbours sampling it, edges are
/// mirrored so border pixels see the same neighbourhood shape as interior ones.
pub fn bayer_to_rgb24(rgb: &mut [u8], input: &[u8], width: usize, height: usize, order: BayerOrder) {
    let pattern = order.pattern();

    for y in 0..height {
        for x in 0..width {
            let own = pattern[y & 1][x & 1];
            let mut sum = [0u32; 3];
            let mut count = [0u32; 3];

            for dy in -1isize..=1 {
                for dx in -1isize..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let ny = reflect(y as isize + dy, height);
                    let nx = reflect(x as isize + dx, width);
                    let channel = pattern[ny & 1][nx & 1];
                    if channel != own {
                        sum[channel as usize] += input[ny * width + nx] as u32;
                        count[channel as usize] += 1;
                    }
                }
            }

            let out = &mut rgb[(y * width + x) * 3..(y * width + x) * 3 + 3];
            for c in 0..3 {
                out[c] = if c == own as usize {
                    input[y * width + x]
                } else if count[c] > 0 {
                    ((sum[c] + count[c] / 2) / count[c]) as u8
                } else {
                    0
                };
            }
        }
    }
}
