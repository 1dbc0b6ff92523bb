//! Text overlay drawn onto RGB24 frames with a fixed-width 5x7 bitmap font.

/// Accent colour of the overlay.
pub const ACCENT: [u8; 3] = [200, 100, 0];

const GLYPH_WIDTH: usize = 5;
const GLYPH_HEIGHT: usize = 7;
/// Each glyph bit is drawn as a `SCALE` x `SCALE` block.
const SCALE: usize = 2;
const ADVANCE: usize = (GLYPH_WIDTH + 1) * SCALE;

/// Distance of the text origin from the right edge.
const ANCHOR_RIGHT: usize = 300;
/// Distance of the text baseline from the bottom edge.
const ANCHOR_BOTTOM: usize = 20;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AnnotateError {
    #[error("no glyph for {0:?}")]
    UnsupportedGlyph(char),
    #[error("text of {text_width}x{text_height} does not fit in a {width}x{height} image")]
    OutOfBounds {
        text_width: usize,
        text_height: usize,
        width: usize,
        height: usize,
    },
    #[error("rgb buffer holds {actual} bytes, {expected} expected")]
    BufferSize { expected: usize, actual: usize },
}

/// Draws `text` near the bottom-right corner of an RGB24 image.
///
/// Nothing is drawn unless the whole text can be.
pub fn annotate(rgb: &mut [u8], width: u32, height: u32, text: &str) -> Result<(), AnnotateError> {
    let width = width as usize;
    let height = height as usize;
    let expected = width * height * 3;
    if rgb.len() != expected {
        return Err(AnnotateError::BufferSize {
            expected,
            actual: rgb.len(),
        });
    }

    let glyphs = text
        .chars()
        .map(|c| glyph_bits(c).ok_or(AnnotateError::UnsupportedGlyph(c)))
        .collect::<Result<Vec<_>, _>>()?;

    let text_width = glyphs.len() * ADVANCE;
    let text_height = GLYPH_HEIGHT * SCALE;
    let left = width.saturating_sub(ANCHOR_RIGHT);
    let baseline = height.checked_sub(ANCHOR_BOTTOM);
    let top = baseline.and_then(|b| b.checked_sub(text_height));
    let top = match top {
        Some(top) if left + text_width <= width => top,
        _ => {
            return Err(AnnotateError::OutOfBounds {
                text_width,
                text_height,
                width,
                height,
            });
        }
    };

    for (i, glyph) in glyphs.iter().enumerate() {
        let x0 = left + i * ADVANCE;
        for (row, pattern) in glyph.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                    continue;
                }
                for dy in 0..SCALE {
                    let y = top + row * SCALE + dy;
                    for dx in 0..SCALE {
                        let x = x0 + col * SCALE + dx;
                        let offset = (y * width + x) * 3;
                        rgb[offset..offset + 3].copy_from_slice(&ACCENT);
                    }
                }
            }
        }
    }

    Ok(())
}

fn glyph_bits(ch: char) -> Option<[u8; GLYPH_HEIGHT]> {
    match ch {
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        '-' => Some([0, 0, 0, 0b11111, 0, 0, 0]),
        ':' => Some([0, 0b00110, 0b00110, 0, 0b00110, 0b00110, 0]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        '/' => Some([
            0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000,
        ]),
        ' ' => Some([0; GLYPH_HEIGHT]),
        _ => None,
    }
}
