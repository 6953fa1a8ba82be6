use image::error::{LimitError, LimitErrorKind};
use image::{ImageError, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

use crate::capture::{ElementKind, RawCapture};

/// Size of generated thumbnails (square)
pub const THUMBNAIL_SIZE: u32 = 256;

/// Smallest thumbnail edge that will be rendered
pub const MIN_THUMBNAIL_SIZE: u32 = 32;

/// Largest thumbnail edge that will be rendered
pub const MAX_THUMBNAIL_SIZE: u32 = 4096;

/// File extension of generated thumbnails
pub const THUMBNAIL_EXTENSION: &str = "png";

const BACKGROUND: Rgba<u8> = Rgba([142, 142, 147, 255]);
const FLOOR: Rgba<u8> = Rgba([110, 110, 115, 255]);
const WALL: Rgba<u8> = Rgba([235, 235, 240, 255]);
const OPENING: Rgba<u8> = Rgba([120, 200, 255, 255]);
const OBJECT: Rgba<u8> = Rgba([255, 214, 10, 255]);
const LABEL: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// 5×7 bitmap glyphs for the label, one byte per row, low 5 bits used
const GLYPH_R: [u8; 7] = [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001];
const GLYPH_O: [u8; 7] = [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110];
const GLYPH_M: [u8; 7] = [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001];
const LABEL_GLYPHS: [[u8; 7]; 4] = [GLYPH_R, GLYPH_O, GLYPH_O, GLYPH_M];

/// Render a thumbnail for a capture and encode it as PNG.
///
/// There is no real renderer for captured rooms, so this draws a top-down
/// outline of every element above a "ROOM" label.
///
/// Sizes above `MAX_THUMBNAIL_SIZE` are refused with a limits error.
pub fn render_png(capture: &RawCapture, size: u32) -> Result<Vec<u8>, ImageError> {
    if size > MAX_THUMBNAIL_SIZE {
        return Err(ImageError::Limits(LimitError::from_kind(
            LimitErrorKind::DimensionError,
        )));
    }
    let img = render(capture, size);
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Draw the thumbnail into an RGBA buffer.
/// `size` is clamped to `MIN_THUMBNAIL_SIZE..=MAX_THUMBNAIL_SIZE`.
pub fn render(capture: &RawCapture, size: u32) -> RgbaImage {
    let size = size.clamp(MIN_THUMBNAIL_SIZE, MAX_THUMBNAIL_SIZE);
    let mut img = RgbaImage::from_pixel(size, size, BACKGROUND);

    let scale = (size / 64).max(1);
    let margin = size / 10;
    let label_height = 7 * scale;

    draw_plan(&mut img, capture, margin, size - 2 * margin - label_height - margin / 2);
    draw_label(&mut img, scale, size - margin - label_height);

    img
}

/// Outline every element's footprint, fitted into a `extent`-pixel square
/// centred horizontally, `margin` pixels from the top.
fn draw_plan(img: &mut RgbaImage, capture: &RawCapture, margin: u32, extent: u32) {
    let Some((min, max)) = capture.bounds() else {
        return;
    };
    let span = (max[0] - min[0]).max(max[2] - min[2]);
    if !span.is_finite() || span <= 0.0 {
        return;
    }

    let px_per_m = extent as f32 / span;
    let left = (img.width() as f32 - (max[0] - min[0]) * px_per_m) / 2.0;
    let top = margin as f32 + (extent as f32 - (max[2] - min[2]) * px_per_m) / 2.0;
    let project = |p: [f32; 3]| {
        (
            (left + (p[0] - min[0]) * px_per_m).round() as i64,
            (top + (p[2] - min[2]) * px_per_m).round() as i64,
        )
    };

    // Floor first so walls and objects draw over it
    let mut elements: Vec<_> = capture.elements.iter().collect();
    elements.sort_by_key(|e| e.kind != ElementKind::Floor);

    for element in elements {
        let colour = match element.kind {
            ElementKind::Floor => FLOOR,
            ElementKind::Wall => WALL,
            ElementKind::Door | ElementKind::Window | ElementKind::Opening => OPENING,
            ElementKind::Object => OBJECT,
        };
        let corners = element.corners();
        for i in 0..4 {
            let a = project(corners[i]);
            let b = project(corners[(i + 1) % 4]);
            draw_line(img, a, b, colour);
        }
    }
}

fn draw_label(img: &mut RgbaImage, scale: u32, top: u32) {
    let glyph_count = LABEL_GLYPHS.len() as u32;
    let width = (glyph_count * 5 + (glyph_count - 1)) * scale;
    let left = img.width().saturating_sub(width) / 2;

    for (g, glyph) in LABEL_GLYPHS.iter().enumerate() {
        let glyph_left = left + g as u32 * 6 * scale;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..5u32 {
                if bits & (0b10000 >> col) == 0 {
                    continue;
                }
                let x0 = glyph_left + col * scale;
                let y0 = top + row as u32 * scale;
                for y in y0..y0 + scale {
                    for x in x0..x0 + scale {
                        put(img, x as i64, y as i64, LABEL);
                    }
                }
            }
        }
    }
}

/// Bresenham line, clipped to the image
fn draw_line(img: &mut RgbaImage, (x0, y0): (i64, i64), (x1, y1): (i64, i64), colour: Rgba<u8>) {
    let (dx, dy) = ((x1 - x0).abs(), -(y1 - y0).abs());
    let (sx, sy) = (if x0 < x1 { 1 } else { -1 }, if y0 < y1 { 1 } else { -1 });
    let (mut x, mut y, mut err) = (x0, y0, dx + dy);

    loop {
        put(img, x, y, colour);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn put(img: &mut RgbaImage, x: i64, y: i64, colour: Rgba<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, colour);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_decodes_at_requested_size() {
        let room = RawCapture::rectangular_room(4.0, 3.0, 2.5);
        let bytes = render_png(&room, THUMBNAIL_SIZE).unwrap();

        let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Png).unwrap();
        assert_eq!(decoded.width(), THUMBNAIL_SIZE);
        assert_eq!(decoded.height(), THUMBNAIL_SIZE);
    }

    #[test]
    fn test_plan_draws_walls() {
        let room = RawCapture::rectangular_room(4.0, 4.0, 2.5);
        let img = render(&room, THUMBNAIL_SIZE);

        assert_eq!(*img.get_pixel(0, 0), BACKGROUND);
        let wall_pixels = img.pixels().filter(|p| **p == WALL).count();
        assert!(wall_pixels > 100, "only {} wall pixels", wall_pixels);
    }

    #[test]
    fn test_label_is_drawn_without_geometry() {
        let img = render(&RawCapture::new(vec![]), THUMBNAIL_SIZE);
        let label_pixels = img.pixels().filter(|p| **p == LABEL).count();
        // 4 glyphs, scale 4: every lit cell is 16 pixels
        let lit_cells: u32 = LABEL_GLYPHS.iter().flatten().map(|row| row.count_ones()).sum();
        assert_eq!(label_pixels as u32, lit_cells * 16);
    }

    #[test]
    fn test_tiny_sizes_are_clamped() {
        let img = render(&RawCapture::rectangular_room(1.0, 1.0, 1.0), 4);
        assert_eq!(img.dimensions(), (32, 32));
    }

    #[test]
    fn test_oversized_render_is_refused() {
        let room = RawCapture::rectangular_room(1.0, 1.0, 1.0);
        let err = render_png(&room, u32::MAX).unwrap_err();
        assert!(matches!(err, ImageError::Limits(_)));
        assert!(render_png(&room, MAX_THUMBNAIL_SIZE + 1).is_err());

        let img = render(&room, u32::MAX);
        assert_eq!(img.dimensions(), (MAX_THUMBNAIL_SIZE, MAX_THUMBNAIL_SIZE));
    }
}
