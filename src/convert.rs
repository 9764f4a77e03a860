//! Planar 4:2:0 to RGB conversion.
//!
//! Decodes a strided luma/chroma sample buffer into a dense RGB grid using
//! the fixed BT.601-derived transform:
//! - R = Y + 1.370705 * V
//! - G = Y - 0.337633 * U - 0.698001 * V
//! - B = Y + 1.732446 * U
//!
//! with U and V re-centered by subtracting 128.

use crate::frame::{RawPlanarBuffer, RgbFrame, RGB_BYTES_PER_PIXEL};

const R_FROM_V: f32 = 1.370705;
const G_FROM_U: f32 = 0.337633;
const G_FROM_V: f32 = 0.698001;
const B_FROM_U: f32 = 1.732446;

/// Convert a raw 4:2:0 planar buffer into a dense RGB frame of the same
/// dimensions.
///
/// Deterministic, no I/O, total over well-formed input. Preconditions (not
/// checked here): width and height are even, and each plane is at least as
/// long as its strides imply. Strides are always honored, so padded buffers
/// decode identically to tightly packed ones.
///
/// Each channel is computed in f32, truncated toward zero, then clamped to
/// `[0, 255]`.
pub fn yuv420_to_rgb(buffer: &RawPlanarBuffer) -> RgbFrame {
    let width = buffer.width as usize;
    let height = buffer.height as usize;
    let mut data = Vec::with_capacity(width * height * RGB_BYTES_PER_PIXEL);

    for y in 0..height {
        for x in 0..width {
            let luma_index = y * buffer.luma_row_stride + x;
            // Chroma is sampled at half resolution in both axes; both planes
            // share the same index formula over their own bytes.
            let chroma_index =
                (y / 2) * buffer.chroma_row_stride + (x / 2) * buffer.chroma_pixel_stride;

            let luma = buffer.luma[luma_index] as f32;
            let u = (buffer.chroma_u[chroma_index] as i32 - 128) as f32;
            let v = (buffer.chroma_v[chroma_index] as i32 - 128) as f32;

            let r = luma + R_FROM_V * v;
            let g = luma - G_FROM_U * u - G_FROM_V * v;
            let b = luma + B_FROM_U * u;

            data.push(clamp_channel(r));
            data.push(clamp_channel(g));
            data.push(clamp_channel(b));
        }
    }

    RgbFrame::from_raw(buffer.width, buffer.height, data)
}

/// Truncate toward zero, then clamp to the byte range. Values outside
/// `[0, 255]` clamp, never wrap.
fn clamp_channel(value: f32) -> u8 {
    (value as i32).clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tightly packed buffer with every sample set to the given values.
    fn solid_buffer(width: u32, height: u32, y: u8, u: u8, v: u8) -> RawPlanarBuffer {
        let w = width as usize;
        let h = height as usize;
        RawPlanarBuffer {
            width,
            height,
            luma: vec![y; w * h],
            chroma_u: vec![u; (w / 2) * (h / 2)],
            chroma_v: vec![v; (w / 2) * (h / 2)],
            luma_row_stride: w,
            chroma_row_stride: w / 2,
            chroma_pixel_stride: 1,
        }
    }

    #[test]
    fn test_mid_gray_maps_to_mid_gray() {
        // Zero-centered chroma leaves luma untouched.
        let frame = yuv420_to_rgb(&solid_buffer(4, 4, 128, 128, 128));
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(frame.pixel(x, y), [128, 128, 128]);
            }
        }
    }

    #[test]
    fn test_overflow_clamps_high() {
        // U centered to +127: B = 255 + 1.732446 * 127 ~ 475, clamps to 255.
        let frame = yuv420_to_rgb(&solid_buffer(2, 2, 255, 255, 128));
        let [r, g, b] = frame.pixel(0, 0);
        assert_eq!(b, 255, "B must clamp, never wrap");
        assert_eq!(r, 255);
        // G = 255 - 0.337633 * 127 = 212.12, truncates to 212.
        assert_eq!(g, 212);
    }

    #[test]
    fn test_underflow_clamps_low() {
        // V centered to -128: R = 0 + 1.370705 * -128 ~ -175, clamps to 0.
        let frame = yuv420_to_rgb(&solid_buffer(2, 2, 0, 128, 0));
        assert_eq!(frame.pixel(1, 1)[0], 0);
    }

    #[test]
    fn test_truncates_toward_zero_not_round() {
        // V centered to +10: R = 100 + 13.70705 = 113.707; rounding would
        // give 114, truncation gives 113.
        let frame = yuv420_to_rgb(&solid_buffer(2, 2, 100, 128, 138));
        let [r, g, b] = frame.pixel(0, 0);
        assert_eq!(r, 113);
        // G = 100 - 0.698001 * 10 = 93.02, truncates to 93.
        assert_eq!(g, 93);
        assert_eq!(b, 100);
    }

    #[test]
    fn test_deterministic() {
        let buffer = solid_buffer(4, 2, 77, 140, 95);
        assert_eq!(yuv420_to_rgb(&buffer), yuv420_to_rgb(&buffer));
    }

    #[test]
    fn test_padded_strides_decode_like_tight_packing() {
        // Same logical 4x4 content, one buffer tightly packed, one with row
        // padding and spaced chroma samples. Padding bytes are set to a
        // sentinel that would corrupt the output if it ever leaked in.
        let width = 4usize;
        let height = 4usize;

        let mut tight = solid_buffer(4, 4, 0, 0, 0);
        for y in 0..height {
            for x in 0..width {
                tight.luma[y * width + x] = (16 * y + x) as u8;
            }
        }
        for y in 0..height / 2 {
            for x in 0..width / 2 {
                tight.chroma_u[y * (width / 2) + x] = (120 + 4 * y + x) as u8;
                tight.chroma_v[y * (width / 2) + x] = (136 - 4 * y - x) as u8;
            }
        }

        let luma_row_stride = width + 5;
        let chroma_pixel_stride = 2;
        let chroma_row_stride = (width / 2) * chroma_pixel_stride + 3;
        let mut padded = RawPlanarBuffer {
            width: 4,
            height: 4,
            luma: vec![0xAB; luma_row_stride * height],
            chroma_u: vec![0xAB; chroma_row_stride * (height / 2)],
            chroma_v: vec![0xAB; chroma_row_stride * (height / 2)],
            luma_row_stride,
            chroma_row_stride,
            chroma_pixel_stride,
        };
        for y in 0..height {
            for x in 0..width {
                padded.luma[y * luma_row_stride + x] = tight.luma[y * width + x];
            }
        }
        for y in 0..height / 2 {
            for x in 0..width / 2 {
                let index = y * chroma_row_stride + x * chroma_pixel_stride;
                padded.chroma_u[index] = tight.chroma_u[y * (width / 2) + x];
                padded.chroma_v[index] = tight.chroma_v[y * (width / 2) + x];
            }
        }

        assert_eq!(
            yuv420_to_rgb(&tight),
            yuv420_to_rgb(&padded),
            "padding bytes must never leak into the output"
        );
    }

    #[test]
    fn test_chroma_shared_across_2x2_block() {
        // A single chroma sample covers a 2x2 luma block, so pixels inside
        // one block with equal luma decode identically.
        let mut buffer = solid_buffer(2, 2, 0, 0, 0);
        buffer.luma = vec![90, 90, 90, 90];
        buffer.chroma_u = vec![150];
        buffer.chroma_v = vec![110];
        let frame = yuv420_to_rgb(&buffer);
        let expected = frame.pixel(0, 0);
        assert_eq!(frame.pixel(1, 0), expected);
        assert_eq!(frame.pixel(0, 1), expected);
        assert_eq!(frame.pixel(1, 1), expected);
    }
}
