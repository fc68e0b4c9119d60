#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use super::{FontBackend, FontMetrics, Glyph, GlyphBitmap};
use crate::glyph_cache::GlyphCache;

/// Deterministic font of solid box glyphs.
///
/// Every drawable codepoint gets a box one pixel narrower than its advance
/// and as tall as the ascent; whitespace has an advance but no ink.
/// Advances and kerning pairs can be overridden per codepoint, codepoints
/// can be removed, and some can be given color (ARGB) glyphs. Layout and
/// rendering behave exactly like with an outline font, which makes this
/// the backend for headless runs and tests.
///
/// ```
/// use wtw_text::font::{FixedFont, FontBackend};
///
/// let font = FixedFont::new(8, 16).with_kerning('A' as u32, 'V' as u32, -2);
/// assert_eq!(font.glyph('A' as u32).unwrap().advance, 8);
/// assert_eq!(font.kerning('A' as u32, 'V' as u32), -2);
/// ```
#[derive(Debug)]
pub struct FixedFont {
    advance: i32,
    metrics: FontMetrics,
    advances: FxHashMap<u32, i32>,
    kerning: FxHashMap<(u32, u32), i32>,
    missing: FxHashSet<u32>,
    color: FxHashMap<u32, u32>,
    cache: RefCell<GlyphCache>,
}

impl FixedFont {
    /// Boxes `advance` pixels wide on lines `line_height` pixels tall.
    pub fn new(advance: u32, line_height: u32) -> Self {
        let line_height = line_height.max(1);
        Self {
            advance: i32::try_from(advance).unwrap_or(i32::MAX),
            metrics: FontMetrics {
                line_height,
                ascent: i32::try_from(line_height - line_height / 4).unwrap_or(i32::MAX),
            },
            advances: FxHashMap::default(),
            kerning: FxHashMap::default(),
            missing: FxHashSet::default(),
            color: FxHashMap::default(),
            cache: RefCell::new(GlyphCache::default()),
        }
    }

    /// Give `codepoint` its own advance.
    pub fn with_advance(mut self, codepoint: u32, advance: i32) -> Self {
        self.advances.insert(codepoint, advance);
        self
    }

    /// Kern the pair `left`,`right` by `delta` pixels.
    pub fn with_kerning(mut self, left: u32, right: u32, delta: i32) -> Self {
        self.kerning.insert((left, right), delta);
        self
    }

    /// Make `codepoint` undrawable.
    pub fn without_glyph(mut self, codepoint: u32) -> Self {
        self.missing.insert(codepoint);
        self
    }

    /// Draw `codepoint` as a pre-colored glyph of premultiplied `argb`.
    pub fn with_color_glyph(mut self, codepoint: u32, argb: u32) -> Self {
        self.color.insert(codepoint, argb);
        self
    }

    fn build(&self, codepoint: u32) -> Option<Rc<Glyph>> {
        if self.missing.contains(&codepoint) {
            return None;
        }
        let advance = self.advances.get(&codepoint).copied().unwrap_or(self.advance);
        let inked = char::from_u32(codepoint).is_some_and(|c| !c.is_whitespace());
        let (width, height) = if inked {
            (
                u32::try_from(advance.saturating_sub(1)).unwrap_or(0),
                u32::try_from(self.metrics.ascent).unwrap_or(0),
            )
        } else {
            (0, 0)
        };
        let area = width as usize * height as usize;
        let bitmap = match self.color.get(&codepoint) {
            Some(&argb) => GlyphBitmap::Argb(vec![argb; area]),
            None => GlyphBitmap::Mask(vec![0xFF; area]),
        };
        Some(Rc::new(Glyph {
            advance,
            left: 0,
            top: self.metrics.ascent,
            width,
            height,
            bitmap,
        }))
    }
}

impl Default for FixedFont {
    fn default() -> Self {
        Self::new(8, 16)
    }
}

impl FontBackend for FixedFont {
    fn metrics(&self) -> FontMetrics {
        self.metrics
    }

    fn glyph(&self, codepoint: u32) -> Option<Rc<Glyph>> {
        self.cache
            .borrow_mut()
            .get_or_insert_with(codepoint, |cp| self.build(cp))
    }

    fn kerning(&self, left: u32, right: u32) -> i32 {
        self.kerning.get(&(left, right)).copied().unwrap_or(0)
    }
}
