//! Chrominance histogram ("vectorscope") computed from BGRA frames.
//!
//! Each opaque pixel is mapped to a `(U, V)` pair with a fixed-point
//! BT.601 or BT.709 transform (divide by 1024, +128 bias) and counted in a
//! 256x256 byte grid with saturating increments. V is flipped so that the
//! vertical axis points up. Pixels whose chroma falls outside `[0, 255]` are
//! dropped instead of clamped, so extreme colors are invisible rather than
//! piling up along the border.

use crate::colorspace::ResolvedColorspace;
use crate::render::capture::CapturedFrame;

pub const SCOPE_SIZE: u32 = 256;
pub const SCOPE_CELLS: usize = (SCOPE_SIZE * SCOPE_SIZE) as usize;

const BYTES_PER_PIXEL: usize = 4;

pub struct Histogram {
    cells: Box<[u8]>,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            cells: vec![0u8; SCOPE_CELLS].into_boxed_slice(),
        }
    }

    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Value at column `u`, row `y` (row 0 is the top, i.e. V = 255).
    pub fn cell(&self, u: u8, y: u8) -> u8 {
        self.cells[u as usize + SCOPE_SIZE as usize * y as usize]
    }

    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    pub fn compute(
        &mut self,
        frame: &CapturedFrame<'_>,
        colorspace: ResolvedColorspace,
    ) {
        self.clear();

        let row_bytes = frame.width as usize * BYTES_PER_PIXEL;

        for y in 0..frame.height as usize {
            let start = frame.stride * y;
            let Some(row) = frame.data.get(start..start + row_bytes) else {
                break;
            };

            for px in row.chunks_exact(BYTES_PER_PIXEL) {
                let (b, g, r, a) = (px[0], px[1], px[2], px[3]);
                if a == 0 {
                    continue;
                }

                let (u, v) = chroma(colorspace, r, g, b);
                if !(0..=255).contains(&u) || !(0..=255).contains(&v) {
                    continue;
                }

                let index =
                    u as usize + SCOPE_SIZE as usize * (255 - v) as usize;
                let cell = &mut self.cells[index];
                *cell = cell.saturating_add(1);
            }
        }
    }
}

/// Fixed-point `(U, V)` for an 8-bit RGB triple, before range checks.
pub fn chroma(
    colorspace: ResolvedColorspace,
    r: u8,
    g: u8,
    b: u8,
) -> (i32, i32) {
    let (r, g, b) = (r as i32, g as i32, b as i32);

    match colorspace {
        ResolvedColorspace::Bt601 => (
            (-172 * r - 338 * g + 512 * b) / 1024 + 128,
            (512 * r - 428 * g - 82 * b) / 1024 + 128,
        ),
        ResolvedColorspace::Bt709 => (
            (-89 * r - 301 * g + 392 * b) / 1024 + 128,
            (553 * r - 501 * g - 50 * b) / 1024 + 128,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_frame(width: u32, height: u32, bgra: [u8; 4]) -> Vec<u8> {
        bgra.iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect()
    }

    fn view(
        data: &[u8],
        stride: usize,
        width: u32,
        height: u32,
    ) -> CapturedFrame<'_> {
        CapturedFrame {
            data,
            stride,
            width,
            height,
        }
    }

    fn total(histogram: &Histogram) -> u64 {
        histogram.cells().iter().map(|&c| c as u64).sum()
    }

    #[test]
    fn gray_lands_in_center_for_both_colorspaces() {
        let data = uniform_frame(8, 8, [128, 128, 128, 255]);

        for colorspace in
            [ResolvedColorspace::Bt601, ResolvedColorspace::Bt709]
        {
            let mut histogram = Histogram::new();
            histogram.compute(&view(&data, 32, 8, 8), colorspace);

            assert_eq!(histogram.cell(128, 127), 64);
            assert_eq!(total(&histogram), 64);
        }
    }

    #[test]
    fn saturates_at_255() {
        let data = uniform_frame(40, 10, [128, 128, 128, 255]);
        let mut histogram = Histogram::new();
        histogram
            .compute(&view(&data, 160, 40, 10), ResolvedColorspace::Bt709);

        assert_eq!(histogram.cell(128, 127), 255);
        assert_eq!(total(&histogram), 255);
    }

    #[test]
    fn transparent_pixels_never_count() {
        let mut data = uniform_frame(4, 4, [10, 200, 30, 0]);
        let mut histogram = Histogram::new();
        histogram.compute(&view(&data, 16, 4, 4), ResolvedColorspace::Bt601);
        assert_eq!(total(&histogram), 0);

        data[3] = 1;
        histogram.compute(&view(&data, 16, 4, 4), ResolvedColorspace::Bt601);
        assert_eq!(total(&histogram), 1);
    }

    #[test]
    fn out_of_range_chroma_is_dropped() {
        // Pure red pushes BT.709 V to 265.
        assert_eq!(chroma(ResolvedColorspace::Bt709, 255, 0, 0), (106, 265));

        let data = uniform_frame(4, 4, [0, 0, 255, 255]);
        let mut histogram = Histogram::new();
        histogram.compute(&view(&data, 16, 4, 4), ResolvedColorspace::Bt709);
        assert_eq!(total(&histogram), 0);

        histogram.compute(&view(&data, 16, 4, 4), ResolvedColorspace::Bt601);
        assert_eq!(histogram.cell(86, 0), 16);
    }

    #[test]
    fn chroma_truncates_toward_zero() {
        assert_eq!(chroma(ResolvedColorspace::Bt601, 0, 0, 255), (255, 108));
        assert_eq!(chroma(ResolvedColorspace::Bt601, 255, 255, 0), (1, 148));
        assert_eq!(chroma(ResolvedColorspace::Bt709, 0, 0, 255), (225, 116));
    }

    #[test]
    fn honors_row_stride_padding() {
        let (width, height, stride) = (3u32, 2u32, 16usize);
        let mut data = vec![0u8; stride * height as usize];

        for y in 0..height as usize {
            for x in 0..width as usize {
                let offset = stride * y + 4 * x;
                data[offset..offset + 4]
                    .copy_from_slice(&[128, 128, 128, 255]);
            }
            // Opaque junk in the padding must be ignored.
            let pad = stride * y + 12;
            data[pad..pad + 4].copy_from_slice(&[255, 0, 0, 255]);
        }

        let mut histogram = Histogram::new();
        histogram.compute(
            &view(&data, stride, width, height),
            ResolvedColorspace::Bt601,
        );

        assert_eq!(histogram.cell(128, 127), 6);
        assert_eq!(total(&histogram), 6);
    }

    #[test]
    fn recompute_clears_previous_pass() {
        let gray = uniform_frame(2, 2, [128, 128, 128, 255]);
        let blue = uniform_frame(2, 2, [255, 0, 0, 255]);
        let mut histogram = Histogram::new();

        histogram.compute(&view(&gray, 8, 2, 2), ResolvedColorspace::Bt601);
        histogram.compute(&view(&blue, 8, 2, 2), ResolvedColorspace::Bt601);

        assert_eq!(histogram.cell(128, 127), 0);
        assert_eq!(histogram.cell(255, 255 - 108), 4);
    }
}
