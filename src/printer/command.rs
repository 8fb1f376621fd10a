pub const ESC: u8 = 0x1b;
pub const LF: u8 = 0x0a;

/// `ESC * 33`: 24-dot double-density bit image. Followed by `nL nH` and 3 bytes per column.
pub const SELECT_BIT_IMAGE_MODE: &[u8] = &[ESC, 0x2a, 33];

/// `ESC 3 24`: line spacing of exactly one stripe, so stripes join without gaps.
pub const SET_LINE_SPACE_24: &[u8] = &[ESC, 0x33, 24];

/// `ESC 3 32`: back to the usual text line spacing.
pub const SET_LINE_SPACE_32: &[u8] = &[ESC, 0x33, 32];

/// `ESC a 1`
pub const CENTER_ALIGN: &[u8] = &[ESC, 0x61, 0x31];

pub const LINE_FEED: &[u8] = &[LF];
