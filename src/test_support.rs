//! Synthetic images for tests.
//!
//! We draw our own test images instead of checking in binary fixtures. Text is
//! rendered with a 5×7 block font, which is crude but very legible to OCR at
//! large scales.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// A tiny deterministic xorshift generator, so test images are reproducible.
pub struct Noise(u64);

impl Noise {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    /// A value in `lo..=hi`.
    pub fn next_in(&mut self, lo: u8, hi: u8) -> u8 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        let span = u64::from(hi - lo) + 1;
        lo + (self.0 % span) as u8
    }
}

/// Encode an image as PNG.
pub fn encode_png(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("PNG encoding should not fail in tests");
    bytes
}

/// Noisy off-white "paper" with dark bars standing in for lines of text.
///
/// Sharp, well-exposed and large enough on disk to pass every default quality
/// gate when it is at least 1000×800.
pub fn paper_with_text(width: u32, height: u32) -> RgbImage {
    let mut noise = Noise::new(u64::from(width) * 31 + u64::from(height));
    RgbImage::from_fn(width, height, |x, y| {
        let in_line = (y / 12) % 3 == 1 && x > width / 10 && x < width * 9 / 10;
        let in_word_gap = (x / 40) % 5 == 4;
        let v = if in_line && !in_word_gap {
            noise.next_in(20, 60)
        } else {
            noise.next_in(190, 250)
        };
        Rgb([v, v, v])
    })
}

/// 5×7 glyphs, one string per row, `#` for ink.
fn glyph(c: char) -> [&'static str; 7] {
    match c.to_ascii_uppercase() {
        'A' => [".###.", "#...#", "#...#", "#####", "#...#", "#...#", "#...#"],
        'B' => ["####.", "#...#", "#...#", "####.", "#...#", "#...#", "####."],
        'C' => [".###.", "#...#", "#....", "#....", "#....", "#...#", ".###."],
        'D' => ["####.", "#...#", "#...#", "#...#", "#...#", "#...#", "####."],
        'E' => ["#####", "#....", "#....", "####.", "#....", "#....", "#####"],
        'F' => ["#####", "#....", "#....", "####.", "#....", "#....", "#...."],
        'G' => [".###.", "#...#", "#....", "#.###", "#...#", "#...#", ".###."],
        'H' => ["#...#", "#...#", "#...#", "#####", "#...#", "#...#", "#...#"],
        'I' => [".###.", "..#..", "..#..", "..#..", "..#..", "..#..", ".###."],
        'J' => ["..###", "...#.", "...#.", "...#.", "...#.", "#..#.", ".##.."],
        'K' => ["#...#", "#..#.", "#.#..", "##...", "#.#..", "#..#.", "#...#"],
        'L' => ["#....", "#....", "#....", "#....", "#....", "#....", "#####"],
        'M' => ["#...#", "##.##", "#.#.#", "#.#.#", "#...#", "#...#", "#...#"],
        'N' => ["#...#", "#...#", "##..#", "#.#.#", "#..##", "#...#", "#...#"],
        'O' | '0' => [".###.", "#...#", "#...#", "#...#", "#...#", "#...#", ".###."],
        'P' => ["####.", "#...#", "#...#", "####.", "#....", "#....", "#...."],
        'Q' => [".###.", "#...#", "#...#", "#...#", "#.#.#", "#..#.", ".##.#"],
        'R' => ["####.", "#...#", "#...#", "####.", "#.#..", "#..#.", "#...#"],
        'S' => [".####", "#....", "#....", ".###.", "....#", "....#", "####."],
        'T' => ["#####", "..#..", "..#..", "..#..", "..#..", "..#..", "..#.."],
        'U' => ["#...#", "#...#", "#...#", "#...#", "#...#", "#...#", ".###."],
        'V' => ["#...#", "#...#", "#...#", "#...#", "#...#", ".#.#.", "..#.."],
        'W' => ["#...#", "#...#", "#...#", "#.#.#", "#.#.#", "#.#.#", ".#.#."],
        'X' => ["#...#", "#...#", ".#.#.", "..#..", ".#.#.", "#...#", "#...#"],
        'Y' => ["#...#", "#...#", ".#.#.", "..#..", "..#..", "..#..", "..#.."],
        'Z' => ["#####", "....#", "...#.", "..#..", ".#...", "#....", "#####"],
        '1' => ["..#..", ".##..", "..#..", "..#..", "..#..", "..#..", ".###."],
        '2' => [".###.", "#...#", "....#", "...#.", "..#..", ".#...", "#####"],
        '3' => ["#####", "...#.", "..#..", "...#.", "....#", "#...#", ".###."],
        '4' => ["...#.", "..##.", ".#.#.", "#..#.", "#####", "...#.", "...#."],
        '5' => ["#####", "#....", "####.", "....#", "....#", "#...#", ".###."],
        '6' => ["..##.", ".#...", "#....", "####.", "#...#", "#...#", ".###."],
        '7' => ["#####", "....#", "...#.", "..#..", ".#...", ".#...", ".#..."],
        '8' => [".###.", "#...#", "#...#", ".###.", "#...#", "#...#", ".###."],
        '9' => [".###.", "#...#", "#...#", ".####", "....#", "...#.", ".##.."],
        '.' => [".....", ".....", ".....", ".....", ".....", ".##..", ".##.."],
        ',' => [".....", ".....", ".....", ".....", ".##..", "..#..", ".#..."],
        '/' => ["....#", "....#", "...#.", "..#..", ".#...", "#....", "#...."],
        '$' => ["..#..", ".####", "#.#..", ".###.", "..#.#", "####.", "..#.."],
        ':' => [".....", ".##..", ".##..", ".....", ".##..", ".##..", "....."],
        '-' => [".....", ".....", ".....", "#####", ".....", ".....", "....."],
        _ => [".....", ".....", ".....", ".....", ".....", ".....", "....."],
    }
}

/// Render lines of text as black block glyphs.
///
/// `scale` is the size of one glyph dot in pixels. When `paper_noise` is set,
/// the white background gets light grain so the image looks (and compresses)
/// like a photo.
pub fn render_text(lines: &[&str], scale: u32, paper_noise: bool) -> RgbImage {
    let margin = 12 * scale;
    let advance = 6 * scale;
    let line_height = 11 * scale;
    let max_chars = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as u32;
    let width = (2 * margin + max_chars * advance).max(600);
    let height = (2 * margin + lines.len() as u32 * line_height).max(400);

    let mut noise = Noise::new(u64::from(width) ^ u64::from(height) << 16);
    let mut image = RgbImage::from_fn(width, height, |_, _| {
        let v = if paper_noise { noise.next_in(225, 255) } else { 255 };
        Rgb([v, v, v])
    });

    for (row, line) in lines.iter().enumerate() {
        let top = margin + row as u32 * line_height;
        for (col, c) in line.chars().enumerate() {
            let left = margin + col as u32 * advance;
            for (gy, bits) in glyph(c).iter().enumerate() {
                for (gx, bit) in bits.chars().enumerate() {
                    if bit != '#' {
                        continue;
                    }
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let x = left + gx as u32 * scale + dx;
                            let y = top + gy as u32 * scale + dy;
                            image.put_pixel(x, y, Rgb([0, 0, 0]));
                        }
                    }
                }
            }
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_text_draws_ink() {
        let image = render_text(&["TOTAL 4.84"], 4, false);
        let ink = image.pixels().filter(|p| p.0[0] == 0).count();
        assert!(ink > 100);
        assert!(image.width() >= 600 && image.height() >= 400);
    }
}
