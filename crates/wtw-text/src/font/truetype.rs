#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use fontdue::{Font, FontSettings};

use super::{FontBackend, FontError, FontMetrics, Glyph, GlyphBitmap};
use crate::glyph_cache::GlyphCache;

/// Outline font rasterized with `fontdue`.
pub struct TrueTypeFont {
    font: Font,
    px: f32,
    metrics: FontMetrics,
    path: PathBuf,
    cache: RefCell<GlyphCache>,
}

impl fmt::Debug for TrueTypeFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrueTypeFont")
            .field("path", &self.path)
            .field("px", &self.px)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl TrueTypeFont {
    /// Load the font at `path` for rasterization at `px` pixels.
    pub fn open(path: &Path, px: f32) -> Result<Self, FontError> {
        let data = std::fs::read(path).map_err(|source| FontError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(data, px, path)
    }

    /// Parse font `data`; `path` is only used in diagnostics.
    pub fn from_bytes(data: Vec<u8>, px: f32, path: &Path) -> Result<Self, FontError> {
        let settings = FontSettings {
            scale: px,
            ..FontSettings::default()
        };
        let font = Font::from_bytes(data, settings).map_err(|reason| FontError::Parse {
            path: path.to_path_buf(),
            reason,
        })?;
        let line = font
            .horizontal_line_metrics(px)
            .ok_or_else(|| FontError::NoMetrics {
                path: path.to_path_buf(),
            })?;

        let metrics = FontMetrics {
            line_height: line.new_line_size.ceil().max(1.0) as u32,
            ascent: line.ascent.ceil() as i32,
        };
        tracing::info!(
            path = %path.display(),
            px,
            line_height = metrics.line_height,
            ascent = metrics.ascent,
            glyphs = font.glyph_count(),
            "font loaded"
        );

        Ok(Self {
            font,
            px,
            metrics,
            path: path.to_path_buf(),
            cache: RefCell::new(GlyphCache::default()),
        })
    }

    /// Rasterization size in pixels.
    pub fn pixel_size(&self) -> f32 {
        self.px
    }

    fn rasterize(&self, codepoint: u32) -> Option<Rc<Glyph>> {
        let ch = char::from_u32(codepoint)?;
        if self.font.lookup_glyph_index(ch) == 0 {
            return None;
        }
        let (m, coverage) = self.font.rasterize(ch, self.px);
        Some(Rc::new(Glyph {
            advance: m.advance_width.round() as i32,
            left: m.xmin,
            top: m.ymin + m.height as i32,
            width: m.width as u32,
            height: m.height as u32,
            bitmap: GlyphBitmap::Mask(coverage),
        }))
    }
}

impl Drop for TrueTypeFont {
    fn drop(&mut self) {
        let stats = self.cache.get_mut().stats();
        tracing::debug!(
            path = %self.path.display(),
            hits = stats.hits,
            misses = stats.misses,
            glyphs = stats.size,
            hit_rate = stats.hit_rate(),
            "glyph cache"
        );
    }
}

impl FontBackend for TrueTypeFont {
    fn metrics(&self) -> FontMetrics {
        self.metrics
    }

    fn glyph(&self, codepoint: u32) -> Option<Rc<Glyph>> {
        self.cache
            .borrow_mut()
            .get_or_insert_with(codepoint, |cp| self.rasterize(cp))
    }

    fn kerning(&self, left: u32, right: u32) -> i32 {
        match (char::from_u32(left), char::from_u32(right)) {
            (Some(l), Some(r)) => self
                .font
                .horizontal_kern(l, r, self.px)
                .map_or(0, |k| k.round() as i32),
            _ => 0,
        }
    }
}
