//! Alert overlay.
//!
//! Draws a solid red banner in the top-left corner with `FALL DETECTED!` and
//! the fall confidence. Text uses a built-in 5x7 bitmap font so the output is
//! byte-for-byte reproducible.

use image::{Rgb, RgbImage};

use crate::frame::Frame;

/// Banner corners, inclusive, in frame pixels.
pub const BANNER_TOP_LEFT: (u32, u32) = (5, 5);
pub const BANNER_BOTTOM_RIGHT: (u32, u32) = (300, 70);

pub const BANNER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

pub const HEADLINE: &str = "FALL DETECTED!";

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;

const HEADLINE_ORIGIN: (u32, u32) = (15, 16);
const HEADLINE_SCALE: u32 = 3;
const DETAIL_ORIGIN: (u32, u32) = (15, 46);
const DETAIL_SCALE: u32 = 2;

/// Draws the fall banner onto triggered frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameAnnotator;

impl FrameAnnotator {
    pub fn new() -> Self {
        Self
    }

    /// Overlay the banner when `triggered`; otherwise hand the frame back untouched.
    ///
    /// Frames that cannot be rasterized are returned unchanged; the encoder
    /// reports them.
    pub fn annotate(&self, frame: Frame, triggered: bool, confidence: f32) -> Frame {
        if !triggered {
            return frame;
        }
        let mut image = match frame.to_rgb_image() {
            Ok(image) => image,
            Err(err) => {
                log::debug!("frame {}: overlay skipped: {}", frame.sequence(), err);
                return frame;
            }
        };
        draw_banner(&mut image, confidence);
        frame.with_rgb(image)
    }
}

/// Text shown under the headline, e.g. `CONF 97.3%`.
pub fn confidence_label(confidence: f32) -> String {
    let pct = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0) * 100.0
    } else {
        0.0
    };
    format!("CONF {:.1}%", pct)
}

fn draw_banner(image: &mut RgbImage, confidence: f32) {
    let (x0, y0) = BANNER_TOP_LEFT;
    let (x1, y1) = BANNER_BOTTOM_RIGHT;
    fill_rect(image, x0, y0, x1, y1, BANNER_COLOR);
    draw_text(image, HEADLINE, HEADLINE_ORIGIN, HEADLINE_SCALE, TEXT_COLOR);
    draw_text(
        image,
        &confidence_label(confidence),
        DETAIL_ORIGIN,
        DETAIL_SCALE,
        TEXT_COLOR,
    );
}

fn put_pixel_clipped(image: &mut RgbImage, x: u32, y: u32, color: Rgb<u8>) {
    if x < image.width() && y < image.height() {
        image.put_pixel(x, y, color);
    }
}

fn fill_rect(image: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    let x_end = x1.min(image.width().saturating_sub(1));
    let y_end = y1.min(image.height().saturating_sub(1));
    if x0 > x_end || y0 > y_end || image.width() == 0 || image.height() == 0 {
        return;
    }
    for y in y0..=y_end {
        for x in x0..=x_end {
            image.put_pixel(x, y, color);
        }
    }
}

fn draw_text(image: &mut RgbImage, text: &str, origin: (u32, u32), scale: u32, color: Rgb<u8>) {
    let mut pen_x = origin.0;
    for ch in text.chars() {
        let rows = glyph(ch);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0b10000 >> col) == 0 {
                    continue;
                }
                let px = pen_x + col * scale;
                let py = origin.1 + row as u32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        put_pixel_clipped(image, px + dx, py + dy, color);
                    }
                }
            }
        }
        pen_x += GLYPH_ADVANCE * scale;
    }
}

/// 5x7 glyph rows, most significant of the low five bits is the left column.
fn glyph(ch: char) -> [u8; GLYPH_HEIGHT as usize] {
    match ch.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        '%' => [0x19, 0x1A, 0x02, 0x04, 0x08, 0x0B, 0x13],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        _ => [0x00; GLYPH_HEIGHT as usize],
    }
}
