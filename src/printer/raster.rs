//! Bit-image rasterization.
//!
//! An image is reduced to a grid of ink dots, which is then cut into stripes of 24 rows.
//! Each stripe is sent as one `ESC * 33` command carrying 3 bytes per column:
//!
//! ```text
//!            column x
//! byte 0   rows y + 0 .. y + 7     (row y in bit 7)
//! byte 1   rows y + 8 .. y + 15
//! byte 2   rows y + 16 .. y + 23
//! ```

use super::command::{
    CENTER_ALIGN, LINE_FEED, SELECT_BIT_IMAGE_MODE, SET_LINE_SPACE_24, SET_LINE_SPACE_32,
};
use crate::error::{Error, Result};

use std::iter::FusedIterator;
use std::mem;

use image::{imageops::FilterType, DynamicImage, Rgba};

/// The number of pixel rows per stripe.
pub const STRIPE_HEIGHT: u32 = 24;

/// Darker pixels than this (by luminance) are printed.
const INK_THRESHOLD: u32 = 127;

/// The commands sent before the first stripe.
const PROLOGUE: &[&[u8]] = &[SET_LINE_SPACE_24, CENTER_ALIGN];

/// The commands sent after the last stripe.
const EPILOGUE: &[&[u8]] = &[SET_LINE_SPACE_32, LINE_FEED];

/// A monochrome image: `true` means ink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    width: u32,
    height: u32,
    ink: Vec<bool>,
}

impl PixelGrid {
    /// Create a grid from row-major ink values.
    pub fn new(width: u32, height: u32, ink: Vec<bool>) -> Result<Self> {
        let expected = (width as usize) * (height as usize);

        if ink.len() != expected {
            return Err(Error::WrongPixelCount {
                expected,
                actual: ink.len(),
            });
        }

        Ok(Self { width, height, ink })
    }

    pub fn from_fn<F>(width: u32, height: u32, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> bool,
    {
        let ink = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();

        Self { width, height, ink }
    }

    /// Resample the image to exactly `width` x `height` and threshold it.
    /// Only fully opaque pixels can carry ink.
    pub fn from_image(image: &DynamicImage, width: u32, height: u32) -> Self {
        if (width == 0) || (height == 0) {
            return Self::from_fn(width, height, |_, _| false);
        }

        let resized = image
            .resize_exact(width, height, FilterType::Triangle)
            .to_rgba8();

        Self::from_fn(width, height, |x, y| is_ink(resized.get_pixel(x, y)))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        (self.width == 0) || (self.height == 0)
    }

    /// Rows outside of the grid carry no ink.
    pub fn ink(&self, x: u32, y: u32) -> bool {
        if (x >= self.width) || (y >= self.height) {
            return false;
        }

        self.ink[(y as usize) * (self.width as usize) + (x as usize)]
    }
}

fn is_ink(pixel: &Rgba<u8>) -> bool {
    let [r, g, b, a] = pixel.0;

    // Ignore transparency.
    if a != 0xff {
        return false;
    }

    // Rec. 601 weights in per mille.
    let luminance = (299 * (r as u32) + 587 * (g as u32) + 114 * (b as u32)) / 1000;
    luminance < INK_THRESHOLD
}

struct BitWriter<'a> {
    output: &'a mut [u8],
    bit_idx: usize,
}

impl<'a> BitWriter<'a> {
    pub fn new(output: &'a mut [u8]) -> Self {
        Self { output, bit_idx: 7 }
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.output[0] |= (bit as u8) << self.bit_idx;

        if self.bit_idx == 0 {
            let output = mem::take(&mut self.output);
            self.output = &mut output[1..];

            self.bit_idx = 7;
        } else {
            self.bit_idx -= 1;
        }
    }
}

/// One band of up to 24 pixel rows in wire layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterStripe {
    top: u32,
    rows: u32,
    columns: u16,
    data: Vec<u8>,
}

impl RasterStripe {
    /// The first pixel row covered by the stripe.
    pub fn top(&self) -> u32 {
        self.top
    }

    /// The number of pixel rows taken from the grid (24 except for the last stripe).
    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn columns(&self) -> u16 {
        self.columns
    }

    /// The `nL nH` column count.
    pub fn column_count_bytes(&self) -> [u8; 2] {
        self.columns.to_le_bytes()
    }

    /// The 3 bytes of column `x`.
    pub fn slice(&self, x: u16) -> [u8; 3] {
        let offset = 3 * (x as usize);
        [self.data[offset], self.data[offset + 1], self.data[offset + 2]]
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Append the complete bit image command including the trailing line feed.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.reserve(SELECT_BIT_IMAGE_MODE.len() + 2 + self.data.len() + LINE_FEED.len());
        out.extend_from_slice(SELECT_BIT_IMAGE_MODE);
        out.extend_from_slice(&self.column_count_bytes());
        out.extend_from_slice(&self.data);
        out.extend_from_slice(LINE_FEED);
    }
}

/// Cut a grid into stripes. The grid is consumed in a single pass.
pub fn encode(grid: PixelGrid) -> Encoder {
    Encoder { grid, next_top: 0 }
}

pub struct Encoder {
    grid: PixelGrid,
    next_top: u32,
}

impl Encoder {
    fn remaining(&self) -> usize {
        if self.grid.is_empty() || (self.next_top >= self.grid.height) {
            return 0;
        }

        (self.grid.height - self.next_top).div_ceil(STRIPE_HEIGHT) as usize
    }
}

impl Iterator for Encoder {
    type Item = RasterStripe;

    fn next(&mut self) -> Option<RasterStripe> {
        if self.remaining() == 0 {
            return None;
        }

        let top = self.next_top;
        self.next_top = top.saturating_add(STRIPE_HEIGHT);

        // Wider images cannot be expressed with `nL nH` and are clipped.
        let columns = self.grid.width.min(u16::MAX as u32) as u16;
        let mut data = vec![0x00; 3 * (columns as usize)];

        for (x, slice) in data.chunks_exact_mut(3).enumerate() {
            let mut bit_writer = BitWriter::new(slice);

            for y in top..top.saturating_add(STRIPE_HEIGHT) {
                bit_writer.write_bit(self.grid.ink(x as u32, y));
            }
        }

        Some(RasterStripe {
            top,
            rows: (self.grid.height - top).min(STRIPE_HEIGHT),
            columns,
            data,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Encoder {}

impl FusedIterator for Encoder {}

/// A unit of the raster wire stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RasterFrame {
    Command(&'static [u8]),
    Stripe(RasterStripe),
}

impl RasterFrame {
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            RasterFrame::Command(bytes) => out.extend_from_slice(bytes),
            RasterFrame::Stripe(stripe) => stripe.write_to(out),
        }
    }
}

/// Everything to send for one image: line spacing and alignment, the stripes,
/// and the restored line spacing. An empty grid produces nothing at all.
pub fn frames(grid: PixelGrid) -> impl Iterator<Item = RasterFrame> {
    let (prologue, epilogue) = if grid.is_empty() {
        (&[][..], &[][..])
    } else {
        (PROLOGUE, EPILOGUE)
    };

    prologue
        .iter()
        .copied()
        .map(RasterFrame::Command)
        .chain(encode(grid).map(RasterFrame::Stripe))
        .chain(epilogue.iter().copied().map(RasterFrame::Command))
}

#[cfg(test)]
mod tests {
    use super::*;

    use image::{GrayImage, Luma, RgbaImage};

    #[test]
    fn test_bit_writer_is_msb_first() {
        let mut out = [0u8; 2];
        let mut bit_writer = BitWriter::new(&mut out);

        for bit in [true, false, false, false, false, false, false, true, true] {
            bit_writer.write_bit(bit);
        }

        assert_eq!(out, [0b1000_0001, 0b1000_0000]);
    }

    #[test]
    fn test_single_dot_positions() {
        // One dot in row 9 of column 1.
        let grid = PixelGrid::from_fn(3, 24, |x, y| (x == 1) && (y == 9));
        let stripes: Vec<_> = encode(grid).collect();

        assert_eq!(stripes.len(), 1);
        assert_eq!(stripes[0].slice(0), [0, 0, 0]);
        assert_eq!(stripes[0].slice(1), [0, 0b0100_0000, 0]);
        assert_eq!(stripes[0].slice(2), [0, 0, 0]);
    }

    #[test]
    fn test_size_hint_counts_partial_stripe() {
        let encoder = encode(PixelGrid::from_fn(8, 49, |_, _| false));
        assert_eq!(encoder.len(), 3);
    }

    #[test]
    fn test_wire_layout_of_stripe() {
        let grid = PixelGrid::from_fn(2, 1, |x, _| x == 0);
        let stripe = encode(grid).next().unwrap();

        let mut out = Vec::new();
        stripe.write_to(&mut out);

        assert_eq!(
            out,
            [0x1b, 0x2a, 33, 0x02, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0a]
        );
    }

    #[test]
    fn test_threshold() {
        assert!(is_ink(&Rgba([0, 0, 0, 0xff])));
        assert!(is_ink(&Rgba([126, 126, 126, 0xff])));
        assert!(!is_ink(&Rgba([127, 127, 127, 0xff])));
        assert!(!is_ink(&Rgba([0xff, 0xff, 0xff, 0xff])));
        assert!(!is_ink(&Rgba([0, 0, 0, 0x80])));
    }

    #[test]
    fn test_from_image_keeps_dimensions() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_fn(4, 4, |x, _| {
            if x < 2 {
                Luma([0x00])
            } else {
                Luma([0xff])
            }
        }));

        let grid = PixelGrid::from_image(&image, 4, 4);

        assert_eq!((grid.width(), grid.height()), (4, 4));
        assert!(grid.ink(0, 0));
        assert!(!grid.ink(3, 3));
    }

    #[test]
    fn test_from_image_transparent_is_blank() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(5, 5, Rgba([0, 0, 0, 0])));
        let grid = PixelGrid::from_image(&image, 5, 5);

        assert!((0..5).all(|y| (0..5).all(|x| !grid.ink(x, y))));
    }

    #[test]
    fn test_new_checks_pixel_count() {
        assert_eq!(
            PixelGrid::new(3, 2, vec![false; 5]),
            Err(Error::WrongPixelCount {
                expected: 6,
                actual: 5
            })
        );

        let grid = PixelGrid::new(3, 2, vec![false, false, true, false, false, false]).unwrap();
        assert!(grid.ink(2, 0));
        assert!(!grid.ink(0, 1));
    }

    #[test]
    fn test_frames_of_empty_grid() {
        assert_eq!(frames(PixelGrid::from_fn(0, 10, |_, _| true)).count(), 0);
        assert_eq!(frames(PixelGrid::from_fn(10, 0, |_, _| true)).count(), 0);
    }
}
