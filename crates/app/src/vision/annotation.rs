//! Overlay drawing on RGB canvases: detection boxes with labels and text
//! banners, rendered with a built-in 5x7 bitmap font.

use anyhow::{Result, anyhow};
use image::{Rgb, RgbImage};
use video_ingest::Frame;

pub(crate) const GREEN: Rgb<u8> = Rgb([0, 220, 0]);
pub(crate) const RED: Rgb<u8> = Rgb([230, 0, 0]);
pub(crate) const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub(crate) const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
pub(crate) const SLATE: Rgb<u8> = Rgb([32, 32, 32]);

const GLYPH_ADVANCE: i32 = 6;
const GLYPH_HEIGHT: i32 = 7;

/// A box to draw, in frame pixels (left, top, width, height).
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct BoxOverlay {
    pub(crate) bbox_xywh: [f32; 4],
    pub(crate) color: Rgb<u8>,
    pub(crate) label: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BannerEdge {
    Top,
    Bottom,
}

/// Convert a BGR8 frame into an RGB canvas.
pub(crate) fn frame_to_canvas(frame: &Frame) -> Result<RgbImage> {
    let mut rgb = Vec::with_capacity(frame.data.len());
    for px in frame.data.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    RgbImage::from_vec(frame.width as u32, frame.height as u32, rgb).ok_or_else(|| {
        anyhow!(
            "frame buffer of {} bytes does not fit {}x{}",
            frame.data.len(),
            frame.width,
            frame.height
        )
    })
}

pub(crate) fn draw_box(canvas: &mut RgbImage, overlay: &BoxOverlay) {
    let [x, y, w, h] = overlay.bbox_xywh;
    if w <= 0.0 || h <= 0.0 {
        return;
    }
    let left = x.round() as i32;
    let top = y.round() as i32;
    let right = (x + w).round() as i32;
    let bottom = (y + h).round() as i32;

    // Two pixel border so boxes stay visible after JPEG compression.
    draw_rectangle(canvas, left, top, right, bottom, overlay.color);
    draw_rectangle(canvas, left + 1, top + 1, right - 1, bottom - 1, overlay.color);

    if overlay.label.is_empty() {
        return;
    }
    let label_y = if top >= GLYPH_HEIGHT + 4 {
        top - GLYPH_HEIGHT - 4
    } else {
        top + 3
    };
    let text_width = text_width(&overlay.label);
    fill_rect(
        canvas,
        left,
        label_y,
        left + text_width + 2,
        label_y + GLYPH_HEIGHT + 2,
        overlay.color,
    );
    draw_text(canvas, left + 2, label_y + 1, &overlay.label, BLACK);
}

/// Draw a full-width text bar along one edge of the canvas.
pub(crate) fn draw_banner(
    canvas: &mut RgbImage,
    edge: BannerEdge,
    text: &str,
    fg: Rgb<u8>,
    bg: Rgb<u8>,
) {
    let width = canvas.width() as i32;
    let height = canvas.height() as i32;
    let bar_height = GLYPH_HEIGHT + 6;
    let top = match edge {
        BannerEdge::Top => 0,
        BannerEdge::Bottom => (height - bar_height).max(0),
    };
    fill_rect(canvas, 0, top, width - 1, top + bar_height - 1, bg);
    draw_text(canvas, 4, top + 3, text, fg);
}

pub(crate) fn text_width(text: &str) -> i32 {
    text.chars().count() as i32 * GLYPH_ADVANCE
}

fn draw_rectangle(
    canvas: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    let width = canvas.width() as i32;
    let height = canvas.height() as i32;
    if right < left || bottom < top || width == 0 || height == 0 {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for x in left..=right {
        canvas.put_pixel(x as u32, top as u32, color);
        canvas.put_pixel(x as u32, bottom as u32, color);
    }
    for y in top..=bottom {
        canvas.put_pixel(left as u32, y as u32, color);
        canvas.put_pixel(right as u32, y as u32, color);
    }
}

fn fill_rect(canvas: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = canvas.width() as i32;
    let height = canvas.height() as i32;
    if right < left || bottom < top || width == 0 || height == 0 {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            canvas.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_text(canvas: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = canvas.width() as i32;
    let height = canvas.height() as i32;
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            canvas.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000],
        '#' => [0b01010, 0b01010, 0b11111, 0b01010, 0b11111, 0b01010, 0b01010],
        '/' => [0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00000, 0b00100],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00110, 0b00110],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, BLACK)
    }

    #[test]
    fn canvas_swaps_bgr_to_rgb() {
        let frame = Frame::from_bgr(vec![10, 20, 30, 40, 50, 60], 2, 1, 0).unwrap();
        let canvas = frame_to_canvas(&frame).unwrap();
        assert_eq!(canvas.get_pixel(0, 0), &Rgb([30, 20, 10]));
        assert_eq!(canvas.get_pixel(1, 0), &Rgb([60, 50, 40]));
    }

    #[test]
    fn box_border_uses_overlay_color() {
        let mut canvas = blank(64, 64);
        draw_box(
            &mut canvas,
            &BoxOverlay {
                bbox_xywh: [10.0, 20.0, 30.0, 30.0],
                color: RED,
                label: String::new(),
            },
        );
        assert_eq!(canvas.get_pixel(10, 20), &RED);
        assert_eq!(canvas.get_pixel(40, 50), &RED);
        assert_eq!(canvas.get_pixel(25, 35), &BLACK);
    }

    #[test]
    fn overlays_clip_at_the_canvas_edge() {
        let mut canvas = blank(16, 32);
        draw_box(
            &mut canvas,
            &BoxOverlay {
                bbox_xywh: [-5.0, -5.0, 100.0, 100.0],
                color: GREEN,
                label: "person 99%".into(),
            },
        );
        assert_eq!(canvas.get_pixel(0, 31), &GREEN);
        assert_eq!(canvas.get_pixel(15, 31), &GREEN);

        draw_banner(&mut canvas, BannerEdge::Bottom, "ALERT: KNIFE", WHITE, RED);
        assert_eq!(canvas.get_pixel(15, 31), &RED);
        assert_eq!(canvas.get_pixel(15, 10), &GREEN);
    }

    #[test]
    fn degenerate_boxes_are_skipped() {
        let mut canvas = blank(8, 8);
        draw_box(
            &mut canvas,
            &BoxOverlay {
                bbox_xywh: [2.0, 2.0, 0.0, 4.0],
                color: RED,
                label: "x".into(),
            },
        );
        assert!(canvas.pixels().all(|px| *px == BLACK));
    }

    #[test]
    fn every_letter_and_digit_has_a_glyph() {
        for ch in ('A'..='Z').chain('0'..='9') {
            assert!(glyph_bits(ch).is_some(), "{ch}");
        }
        assert!(glyph_bits('~').is_none());
    }
}
