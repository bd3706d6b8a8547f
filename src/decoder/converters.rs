//! Pixel layout converters producing YU12.
//!
//! Every converter takes a YU12 output slice of exactly `w * h * 3 / 2` bytes
//! and an input slice holding at least one full frame of its layout. Chroma is
//! averaged across each pair of rows when the source carries more vertical
//! chroma resolution than 4:2:0. RGB input is converted with full-range BT.601
//! (JFIF) coefficients in 16.16 fixed point.

use crate::utils::NEUTRAL_CHROMA;

/// Byte offsets of `Y0`, `U`, `Y1` and `V` inside one 4 byte, two pixel group.
#[derive(Debug, Clone, Copy)]
pub struct Packed422Layout {
    pub y0: usize,
    pub u: usize,
    pub y1: usize,
    pub v: usize,
}

pub const YUYV_LAYOUT: Packed422Layout = Packed422Layout {
    y0: 0,
    u: 1,
    y1: 2,
    v: 3,
};
pub const UYVY_LAYOUT: Packed422Layout = Packed422Layout {
    y0: 1,
    u: 0,
    y1: 3,
    v: 2,
};
pub const YVYU_LAYOUT: Packed422Layout = Packed422Layout {
    y0: 0,
    u: 3,
    y1: 2,
    v: 1,
};
pub const YYUV_LAYOUT: Packed422Layout = Packed422Layout {
    y0: 0,
    u: 2,
    y1: 1,
    v: 3,
};

pub(crate) fn split_planes(
    out: &mut [u8],
    width: usize,
    height: usize,
) -> (&mut [u8], &mut [u8], &mut [u8]) {
    let luma = width * height;
    let (y, chroma) = out.split_at_mut(luma);
    let (u, v) = chroma.split_at_mut(luma / 4);
    (y, u, &mut v[..luma / 4])
}

#[inline]
fn avg2(a: u8, b: u8) -> u8 {
    ((a as u16 + b as u16) >> 1) as u8
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Packed 4:2:2 (any of the four byte orders) to YU12.
pub fn packed422_to_yu12(
    out: &mut [u8],
    input: &[u8],
    width: usize,
    height: usize,
    layout: Packed422Layout,
) {
    let (y, u, v) = split_planes(out, width, height);
    let stride = width * 2;

    for (dst, src) in y.chunks_exact_mut(width).zip(input.chunks_exact(stride)) {
        for (px, group) in dst.chunks_exact_mut(2).zip(src.chunks_exact(4)) {
            px[0] = group[layout.y0];
            px[1] = group[layout.y1];
        }
    }

    let chroma_width = width / 2;
    for row in 0..height / 2 {
        let top = &input[2 * row * stride..(2 * row + 1) * stride];
        let bottom = &input[(2 * row + 1) * stride..(2 * row + 2) * stride];
        let u_row = &mut u[row * chroma_width..(row + 1) * chroma_width];
        let v_row = &mut v[row * chroma_width..(row + 1) * chroma_width];
        for (col, (t, b)) in top.chunks_exact(4).zip(bottom.chunks_exact(4)).enumerate() {
            u_row[col] = avg2(t[layout.u], b[layout.u]);
            v_row[col] = avg2(t[layout.v], b[layout.v]);
        }
    }
}

pub fn yuyv_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    packed422_to_yu12(out, input, width, height, YUYV_LAYOUT);
}

pub fn uyvy_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    packed422_to_yu12(out, input, width, height, UYVY_LAYOUT);
}

pub fn yvyu_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    packed422_to_yu12(out, input, width, height, YVYU_LAYOUT);
}

pub fn yyuv_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    packed422_to_yu12(out, input, width, height, YYUV_LAYOUT);
}

pub fn yu12_copy(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    let size = width * height * 3 / 2;
    out[..size].copy_from_slice(&input[..size]);
}

/// YV12 only differs from YU12 by the order of its chroma planes.
pub fn yv12_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    let luma = width * height;
    let quarter = luma / 4;
    let (y, u, v) = split_planes(out, width, height);
    y.copy_from_slice(&input[..luma]);
    v.copy_from_slice(&input[luma..luma + quarter]);
    u.copy_from_slice(&input[luma + quarter..luma + 2 * quarter]);
}

fn semi_planar_to_yu12(
    out: &mut [u8],
    input: &[u8],
    width: usize,
    height: usize,
    vertical_422: bool,
    swap_uv: bool,
) {
    let luma = width * height;
    let (y, u, v) = split_planes(out, width, height);
    y.copy_from_slice(&input[..luma]);

    let (u_idx, v_idx) = if swap_uv { (1, 0) } else { (0, 1) };
    let chroma = &input[luma..];
    let chroma_width = width / 2;

    for row in 0..height / 2 {
        let u_row = &mut u[row * chroma_width..(row + 1) * chroma_width];
        let v_row = &mut v[row * chroma_width..(row + 1) * chroma_width];
        if vertical_422 {
            let top = &chroma[2 * row * width..(2 * row + 1) * width];
            let bottom = &chroma[(2 * row + 1) * width..(2 * row + 2) * width];
            for (col, (t, b)) in top.chunks_exact(2).zip(bottom.chunks_exact(2)).enumerate() {
                u_row[col] = avg2(t[u_idx], b[u_idx]);
                v_row[col] = avg2(t[v_idx], b[v_idx]);
            }
        } else {
            let src = &chroma[row * width..(row + 1) * width];
            for (col, pair) in src.chunks_exact(2).enumerate() {
                u_row[col] = pair[u_idx];
                v_row[col] = pair[v_idx];
            }
        }
    }
}

pub fn nv12_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    semi_planar_to_yu12(out, input, width, height, false, false);
}

pub fn nv21_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    semi_planar_to_yu12(out, input, width, height, false, true);
}

pub fn nv16_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    semi_planar_to_yu12(out, input, width, height, true, false);
}

pub fn nv61_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    semi_planar_to_yu12(out, input, width, height, true, true);
}

/// Packed 4:1:1: `U0 Y0 V0 Y1 U4 Y2 V4 Y3 Y4 Y5 Y6 Y7` for every 8 pixels.
/// Width must be a multiple of 8.
pub fn y41p_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    const LUMA_OFFSETS: [usize; 8] = [1, 3, 5, 7, 8, 9, 10, 11];
    let (y, u, v) = split_planes(out, width, height);
    let stride = width * 12 / 8;

    for (dst, src) in y.chunks_exact_mut(width).zip(input.chunks_exact(stride)) {
        for (px, group) in dst.chunks_exact_mut(8).zip(src.chunks_exact(12)) {
            for (p, &offset) in px.iter_mut().zip(LUMA_OFFSETS.iter()) {
                *p = group[offset];
            }
        }
    }

    let chroma_width = width / 2;
    for row in 0..height / 2 {
        let top = &input[2 * row * stride..(2 * row + 1) * stride];
        let bottom = &input[(2 * row + 1) * stride..(2 * row + 2) * stride];
        let u_row = &mut u[row * chroma_width..(row + 1) * chroma_width];
        let v_row = &mut v[row * chroma_width..(row + 1) * chroma_width];
        for (group, (t, b)) in top.chunks_exact(12).zip(bottom.chunks_exact(12)).enumerate() {
            let u0 = avg2(t[0], b[0]);
            let v0 = avg2(t[2], b[2]);
            let u4 = avg2(t[4], b[4]);
            let v4 = avg2(t[6], b[6]);
            u_row[group * 4..group * 4 + 4].copy_from_slice(&[u0, u0, u4, u4]);
            v_row[group * 4..group * 4 + 4].copy_from_slice(&[v0, v0, v4, v4]);
        }
    }
}

pub fn grey_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    let luma = width * height;
    out[..luma].copy_from_slice(&input[..luma]);
    out[luma..luma * 3 / 2].fill(NEUTRAL_CHROMA);
}

/// 10 bit greyscale packed MSB first with no padding, four pixels in five bytes.
pub fn y10b_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    let luma = width * height;
    let mut bytes = input.iter();
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;

    for px in out[..luma].iter_mut() {
        while bits < 10 {
            acc = (acc << 8) | *bytes.next().unwrap_or(&0) as u32;
            bits += 8;
        }
        bits -= 10;
        let sample = (acc >> bits) & 0x3ff;
        acc &= (1 << bits) - 1;
        *px = (sample >> 2) as u8;
    }
    out[luma..luma * 3 / 2].fill(NEUTRAL_CHROMA);
}

/// 16 bit little endian greyscale, the high byte becomes luma.
pub fn y16_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    let luma = width * height;
    for (px, sample) in out[..luma].iter_mut().zip(input.chunks_exact(2)) {
        *px = sample[1];
    }
    out[luma..luma * 3 / 2].fill(NEUTRAL_CHROMA);
}

#[inline]
pub fn rgb_to_y(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8((19595 * r + 38470 * g + 7471 * b + 32768) >> 16)
}

#[inline]
pub fn rgb_to_u(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((-11059 * r - 21709 * g + 32768 * b + 32768) >> 16) + 128)
}

#[inline]
pub fn rgb_to_v(r: i32, g: i32, b: i32) -> u8 {
    clamp_u8(((32768 * r - 27439 * g - 5329 * b + 32768) >> 16) + 128)
}

/// Interleaved 24 bit RGB (or BGR when `bgr` is set) to YU12.
pub fn rgb24_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize, bgr: bool) {
    let (ri, bi) = if bgr { (2, 0) } else { (0, 2) };
    let (y, u, v) = split_planes(out, width, height);
    let stride = width * 3;

    for (dst, src) in y.chunks_exact_mut(width).zip(input.chunks_exact(stride)) {
        for (px, rgb) in dst.iter_mut().zip(src.chunks_exact(3)) {
            *px = rgb_to_y(rgb[ri] as i32, rgb[1] as i32, rgb[bi] as i32);
        }
    }

    let chroma_width = width / 2;
    for row in 0..height / 2 {
        let top = &input[2 * row * stride..(2 * row + 1) * stride];
        let bottom = &input[(2 * row + 1) * stride..(2 * row + 2) * stride];
        for col in 0..chroma_width {
            let mut sum = [0i32; 3];
            for line in [top, bottom] {
                for px in line[col * 6..col * 6 + 6].chunks_exact(3) {
                    sum[0] += px[ri] as i32;
                    sum[1] += px[1] as i32;
                    sum[2] += px[bi] as i32;
                }
            }
            let (r, g, b) = (sum[0] / 4, sum[1] / 4, sum[2] / 4);
            u[row * chroma_width + col] = rgb_to_u(r, g, b);
            v[row * chroma_width + col] = rgb_to_v(r, g, b);
        }
    }
}

pub fn rgb3_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    rgb24_to_yu12(out, input, width, height, false);
}

pub fn bgr3_to_yu12(out: &mut [u8], input: &[u8], width: usize, height: usize) {
    rgb24_to_yu12(out, input, width, height, true);
}
