#![forbid(unsafe_code)]

//! Drawing primitives over a premultiplied ARGB8888 pixel slice.
//!
//! [`Canvas`] borrows the pixels of one buffer for one render pass. The
//! [`Draw`] trait provides the handful of operations the renderer needs:
//! filled and outlined rectangles (source copy), and coverage masks or
//! pre-colored bitmaps composited with Porter-Duff OVER.
//!
//! Every operation clips to the canvas; coordinates may be negative or run
//! past the edges.

use wtw_core::{Rect, Rgba};
use wtw_text::{Glyph, GlyphBitmap};

/// `a * b / 255`, rounded.
#[inline]
const fn mul_div255(a: u32, b: u32) -> u32 {
    let t = a * b + 128;
    (t + (t >> 8)) >> 8
}

/// Scale every channel of a premultiplied pixel by `coverage / 255`.
#[inline]
pub const fn scale(px: u32, coverage: u8) -> u32 {
    let c = coverage as u32;
    if c == 255 {
        return px;
    }
    let a = mul_div255(px >> 24, c);
    let r = mul_div255((px >> 16) & 0xFF, c);
    let g = mul_div255((px >> 8) & 0xFF, c);
    let b = mul_div255(px & 0xFF, c);
    (a << 24) | (r << 16) | (g << 8) | b
}

/// Porter-Duff OVER for premultiplied ARGB: `src + dst * (1 - src_alpha)`.
#[inline]
pub fn over(src: u32, dst: u32) -> u32 {
    let sa = src >> 24;
    if sa == 255 {
        return src;
    }
    if sa == 0 && src == 0 {
        return dst;
    }
    let inv = 255 - sa;
    let a = sa + mul_div255(dst >> 24, inv);
    let r = ((src >> 16) & 0xFF) + mul_div255((dst >> 16) & 0xFF, inv);
    let g = ((src >> 8) & 0xFF) + mul_div255((dst >> 8) & 0xFF, inv);
    let b = (src & 0xFF) + mul_div255(dst & 0xFF, inv);
    (a.min(255) << 24) | (r.min(255) << 16) | (g.min(255) << 8) | b.min(255)
}

/// Mutable view of a pixel buffer.
#[derive(Debug)]
pub struct Canvas<'a> {
    pixels: &'a mut [u32],
    width: u32,
    height: u32,
    stride: usize,
}

impl<'a> Canvas<'a> {
    /// Wrap `pixels` laid out in rows of `stride` pixels.
    ///
    /// Returns `None` if the slice is too short for the dimensions.
    pub fn new(pixels: &'a mut [u32], width: u32, height: u32, stride: usize) -> Option<Self> {
        if stride < width as usize {
            return None;
        }
        let needed = stride.checked_mul(height as usize)?;
        if pixels.len() < needed {
            return None;
        }
        Some(Self {
            pixels,
            width,
            height,
            stride,
        })
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The whole canvas as a rectangle.
    #[inline]
    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }

    /// Pixel at `(x, y)`, if inside.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y as usize * self.stride + x as usize).copied()
    }

    /// Set every pixel to `color`.
    pub fn clear(&mut self, color: Rgba) {
        let bounds = self.bounds();
        self.fill_rect(bounds, color);
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> usize {
        // Callers pass coordinates already clipped to the canvas.
        y as usize * self.stride + x as usize
    }

    /// Composite a `w`×`h` block at `(x, y)`; `src(col, row)` yields the
    /// premultiplied source pixel for that block position.
    fn composite<F>(&mut self, x: i32, y: i32, w: u32, h: u32, mut src: F)
    where
        F: FnMut(usize, usize) -> u32,
    {
        let Some(clip) = Rect::new(x, y, w, h).intersection_opt(&self.bounds()) else {
            return;
        };
        let col0 = clip.x.abs_diff(x) as usize;
        let row0 = clip.y.abs_diff(y) as usize;
        for row in 0..clip.height as usize {
            let base = self.index(clip.x, clip.y + row as i32);
            for col in 0..clip.width as usize {
                let s = src(col0 + col, row0 + row);
                let d = &mut self.pixels[base + col];
                *d = over(s, *d);
            }
        }
    }
}

/// Drawing operations used by the renderer.
pub trait Draw {
    /// Replace the pixels of `rect` with `color`.
    fn fill_rect(&mut self, rect: Rect, color: Rgba);

    /// Replace a one-pixel border just inside `rect` with `color`.
    fn outline_rect(&mut self, rect: Rect, color: Rgba);

    /// Composite `color` through an 8-bit coverage `mask` of `w`×`h`.
    fn draw_mask(&mut self, x: i32, y: i32, w: u32, h: u32, mask: &[u8], color: Rgba);

    /// Composite premultiplied ARGB `pixels` of `w`×`h`.
    fn draw_argb(&mut self, x: i32, y: i32, w: u32, h: u32, pixels: &[u32]);

    /// Draw `glyph` with its bitmap's top-left at `(x, y)`. Mask glyphs take
    /// `color`; color glyphs keep their own.
    fn draw_glyph(&mut self, x: i32, y: i32, glyph: &Glyph, color: Rgba) {
        match &glyph.bitmap {
            GlyphBitmap::Mask(mask) => {
                self.draw_mask(x, y, glyph.width, glyph.height, mask, color);
            }
            GlyphBitmap::Argb(pixels) => {
                self.draw_argb(x, y, glyph.width, glyph.height, pixels);
            }
        }
    }
}

impl Draw for Canvas<'_> {
    fn fill_rect(&mut self, rect: Rect, color: Rgba) {
        let Some(clip) = rect.intersection_opt(&self.bounds()) else {
            return;
        };
        let px = color.to_premultiplied_argb();
        for row in 0..clip.height as i32 {
            let start = self.index(clip.x, clip.y + row);
            self.pixels[start..start + clip.width as usize].fill(px);
        }
    }

    fn outline_rect(&mut self, rect: Rect, color: Rgba) {
        if rect.is_empty() {
            return;
        }
        let (x, y, w, h) = (rect.x, rect.y, rect.width, rect.height);
        self.fill_rect(Rect::new(x, y, w, 1), color);
        self.fill_rect(Rect::new(x, rect.bottom().saturating_sub(1), w, 1), color);
        self.fill_rect(Rect::new(x, y, 1, h), color);
        self.fill_rect(Rect::new(rect.right().saturating_sub(1), y, 1, h), color);
    }

    fn draw_mask(&mut self, x: i32, y: i32, w: u32, h: u32, mask: &[u8], color: Rgba) {
        if mask.len() < w as usize * h as usize {
            tracing::warn!(w, h, len = mask.len(), "glyph mask shorter than its size");
            return;
        }
        let px = color.to_premultiplied_argb();
        let stride = w as usize;
        self.composite(x, y, w, h, |col, row| scale(px, mask[row * stride + col]));
    }

    fn draw_argb(&mut self, x: i32, y: i32, w: u32, h: u32, pixels: &[u32]) {
        if pixels.len() < w as usize * h as usize {
            tracing::warn!(w, h, len = pixels.len(), "color glyph shorter than its size");
            return;
        }
        let stride = w as usize;
        self.composite(x, y, w, h, |col, row| pixels[row * stride + col]);
    }
}
