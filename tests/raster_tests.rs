//! Integration tests for the bit-image encoder
//!
//! Tests the stripe layout including:
//! - Stripe counts and column counts for various sizes
//! - The bit position of every dot
//! - Empty grids and the wire framing

use escpos_usb::printer::raster::{encode, frames, PixelGrid, RasterFrame, STRIPE_HEIGHT};

/// Deterministic pseudo-random ink pattern.
fn noise(width: u32, height: u32, seed: u32) -> PixelGrid {
    let mut state = seed;

    PixelGrid::from_fn(width, height, |_, _| {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
        (state >> 16) & 1 == 1
    })
}

mod stripes {
    use super::*;

    #[test]
    fn test_stripe_count_and_column_count() {
        for (width, height) in [(1, 1), (7, 23), (8, 24), (5, 25), (300, 100), (384, 48)] {
            let stripes: Vec<_> = encode(noise(width, height, 7)).collect();

            assert_eq!(
                stripes.len() as u32,
                height.div_ceil(STRIPE_HEIGHT),
                "{}x{}",
                width,
                height
            );

            for (idx, stripe) in stripes.iter().enumerate() {
                assert_eq!(stripe.top(), (idx as u32) * STRIPE_HEIGHT);
                assert_eq!(stripe.columns() as u32, width);
                assert_eq!(stripe.column_count_bytes(), (width as u16).to_le_bytes());
                assert_eq!(stripe.data().len(), 3 * (width as usize));
            }
        }
    }

    #[test]
    fn test_column_count_is_little_endian() {
        let stripe = encode(PixelGrid::from_fn(384, 1, |_, _| false))
            .next()
            .unwrap();

        assert_eq!(stripe.column_count_bytes(), [0x80, 0x01]);
    }

    #[test]
    fn test_width_is_clipped_to_16_bits() {
        let stripe = encode(PixelGrid::from_fn(70_000, 1, |_, _| true))
            .next()
            .unwrap();

        assert_eq!(stripe.columns(), u16::MAX);
        assert_eq!(stripe.column_count_bytes(), [0xff, 0xff]);
        assert_eq!(stripe.data().len(), 3 * (u16::MAX as usize));
    }

    #[test]
    fn test_every_bit_matches_its_dot() {
        let (width, height) = (37, 61);
        let grid = noise(width, height, 42);
        let reference = grid.clone();

        for stripe in encode(grid) {
            for x in 0..stripe.columns() {
                let slice = stripe.slice(x);

                for k in 0..STRIPE_HEIGHT {
                    let byte = slice[(k / 8) as usize];
                    let bit = (byte >> (7 - (k % 8))) & 1 == 1;
                    let y = stripe.top() + k;

                    let expected = (y < height) && reference.ink(x as u32, y);
                    assert_eq!(bit, expected, "x = {}, y = {}", x, y);
                }
            }
        }
    }

    #[test]
    fn test_encoder_is_single_pass() {
        let mut encoder = encode(noise(4, 30, 1));

        assert!(encoder.next().is_some());
        assert!(encoder.next().is_some());
        assert!(encoder.next().is_none());
        assert!(encoder.next().is_none());
    }
}

mod empty {
    use super::*;

    #[test]
    fn test_zero_sized_grids_yield_nothing() {
        assert_eq!(encode(PixelGrid::from_fn(0, 0, |_, _| true)).count(), 0);
        assert_eq!(encode(PixelGrid::from_fn(0, 30, |_, _| true)).count(), 0);
        assert_eq!(encode(PixelGrid::from_fn(30, 0, |_, _| true)).count(), 0);
    }

    #[test]
    fn test_zero_sized_grids_send_no_commands() {
        assert!(frames(PixelGrid::new(0, 0, Vec::new()).unwrap()).next().is_none());
    }
}

mod scenarios {
    use super::*;

    #[test]
    fn test_full_ink_48_by_26() {
        let stripes: Vec<_> = encode(PixelGrid::from_fn(48, 26, |_, _| true)).collect();

        assert_eq!(stripes.len(), 2);

        // Rows 0 to 23: every bit is set.
        assert_eq!((stripes[0].top(), stripes[0].rows()), (0, 24));
        assert!(stripes[0].data().iter().all(|&byte| byte == 0xff));

        // Rows 24 and 25: only the top 2 bits of each slice.
        assert_eq!((stripes[1].top(), stripes[1].rows()), (24, 2));

        for x in 0..48 {
            assert_eq!(stripes[1].slice(x), [0b1100_0000, 0x00, 0x00]);
        }
    }

    #[test]
    fn test_wire_framing() {
        let mut wire = Vec::new();

        for frame in frames(PixelGrid::from_fn(1, 25, |_, y| y == 24)) {
            frame.write_to(&mut wire);
        }

        assert_eq!(
            wire,
            [
                0x1b, 0x33, 24, // line spacing 24
                0x1b, 0x61, 0x31, // center
                0x1b, 0x2a, 33, 0x01, 0x00, 0x00, 0x00, 0x00, 0x0a, // rows 0 to 23
                0x1b, 0x2a, 33, 0x01, 0x00, 0x80, 0x00, 0x00, 0x0a, // row 24
                0x1b, 0x33, 32, // line spacing 32
                0x0a,
            ]
        );
    }

    #[test]
    fn test_frame_order() {
        let frames: Vec<_> = frames(PixelGrid::from_fn(2, 50, |_, _| false)).collect();

        assert_eq!(frames.len(), 2 + 3 + 2);
        assert!(matches!(frames[0], RasterFrame::Command(_)));
        assert!(matches!(frames[1], RasterFrame::Command(_)));
        assert!(frames[2..5]
            .iter()
            .all(|frame| matches!(frame, RasterFrame::Stripe(_))));
        assert!(matches!(frames[5], RasterFrame::Command(_)));
        assert!(matches!(frames[6], RasterFrame::Command(_)));
    }
}
