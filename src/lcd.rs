//! LCD geometry.
//!
//! The core only publishes where the frame buffer lives; rendering it (to a
//! terminal, Braille cells, or anything else) is entirely the host's job.

/// Base of the video RAM in data segment 0.
pub const VRAM_BASE: u16 = 0xF800;

/// Visible dot-matrix width in pixels.
pub const LCD_WIDTH: usize = 96;

/// Visible dot-matrix height in pixels.
pub const LCD_HEIGHT: usize = 32;

/// Width of one VRAM row in pixels (the row stride is `VRAM_WIDTH / 8`
/// bytes; columns beyond `LCD_WIDTH` are not displayed).
pub const VRAM_WIDTH: usize = 128;

/// Number of VRAM rows.
pub const VRAM_HEIGHT: usize = 32;
