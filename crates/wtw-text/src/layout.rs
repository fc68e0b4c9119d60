#![forbid(unsafe_code)]

//! Single-line glyph layout with kerning and ellipsis truncation.
//!
//! [`LayoutEngine::measure`] returns the natural width of a line.
//! [`LayoutEngine::layout`] with a width budget places glyphs left to
//! right and, when the line does not fit, ends it with `…`:
//!
//! 1. Glyphs are accepted while the glyph plus an ellipsis still fit.
//! 2. At the first glyph that would crowd out the ellipsis, the rest of
//!    the line is measured once. If it fits, no ellipsis is needed and
//!    every remaining glyph is placed.
//! 3. Otherwise the ellipsis goes at the current pen position and the line
//!    ends. If even the ellipsis does not fit, glyphs are placed for as
//!    long as they fit on their own.
//!
//! Pen arithmetic is done in `i64` so signed kerning and advances never
//! overflow; reported widths are clamped to `0..=u32::MAX`.

use std::rc::Rc;

use crate::decoder::{Codepoints, REPLACEMENT};
use crate::font::{FontBackend, Glyph};

/// HORIZONTAL ELLIPSIS.
pub const ELLIPSIS: u32 = 0x2026;

/// One positioned glyph.
#[derive(Debug, Clone)]
pub struct GlyphPlacement {
    /// The decoded codepoint (the glyph may be a fallback).
    pub codepoint: u32,
    /// Pen position the glyph is drawn at, kerning applied.
    pub x: i32,
    /// Horizontal advance of the glyph.
    pub advance: i32,
    /// Kerning against the previous placed codepoint.
    pub kerning: i32,
    /// Shared handle into the font's glyph cache.
    pub glyph: Rc<Glyph>,
}

/// Placements for one line.
#[derive(Debug, Clone, Default)]
pub struct LineLayout {
    /// Glyphs in pen order.
    pub placements: Vec<GlyphPlacement>,
    /// Rightmost pen extent reached.
    pub width: u32,
    /// Whether any of the line was cut off.
    pub truncated: bool,
}

impl LineLayout {
    /// Whether the line ends in an inserted ellipsis.
    pub fn has_ellipsis(&self) -> bool {
        self.truncated
            && self
                .placements
                .last()
                .is_some_and(|p| p.codepoint == ELLIPSIS)
    }
}

/// Reusable layout state; keeps the decoded codepoints of the current line.
#[derive(Debug, Default)]
pub struct LayoutEngine {
    codepoints: Vec<u32>,
}

impl LayoutEngine {
    /// Create an engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Natural width of `line`: the rightmost pen extent with no budget.
    pub fn measure<F: FontBackend + ?Sized>(&mut self, line: &[u8], font: &F) -> u32 {
        self.decode(line);
        clamp_u32(extent_from(font, &self.codepoints, 0, None))
    }

    /// Lay out `line`. Without a budget every glyph is placed; with one the
    /// line is truncated with an ellipsis as described in the module docs.
    pub fn layout<F: FontBackend + ?Sized>(
        &mut self,
        line: &[u8],
        font: &F,
        budget: Option<u32>,
    ) -> LineLayout {
        self.decode(line);
        match budget {
            None => place_all(font, &self.codepoints),
            Some(budget) => place_within(font, &self.codepoints, i64::from(budget)),
        }
    }

    fn decode(&mut self, line: &[u8]) {
        self.codepoints.clear();
        self.codepoints.extend(Codepoints::new(line));
    }
}

/// Glyph for `codepoint`, falling back to U+FFFD.
fn resolve<F: FontBackend + ?Sized>(font: &F, codepoint: u32) -> Option<Rc<Glyph>> {
    font.glyph(codepoint).or_else(|| {
        if codepoint == REPLACEMENT {
            None
        } else {
            font.glyph(REPLACEMENT)
        }
    })
}

/// Rightmost pen extent of `cps` starting at `pen` after `prev`.
fn extent_from<F: FontBackend + ?Sized>(font: &F, cps: &[u32], pen: i64, prev: Option<u32>) -> i64 {
    let mut pen = pen;
    let mut prev = prev;
    let mut extent = pen.max(0);
    for &cp in cps {
        let Some(glyph) = resolve(font, cp) else {
            continue;
        };
        let kern = prev.map_or(0, |p| font.kerning(p, cp));
        pen += i64::from(kern) + i64::from(glyph.advance);
        extent = extent.max(pen);
        prev = Some(cp);
    }
    extent
}

struct Pen {
    x: i64,
    extent: i64,
    prev: Option<u32>,
    placements: Vec<GlyphPlacement>,
}

impl Pen {
    fn new(capacity: usize) -> Self {
        Self {
            x: 0,
            extent: 0,
            prev: None,
            placements: Vec::with_capacity(capacity),
        }
    }

    fn place(&mut self, codepoint: u32, kerning: i32, glyph: Rc<Glyph>) {
        let origin = self.x + i64::from(kerning);
        let advance = glyph.advance;
        self.placements.push(GlyphPlacement {
            codepoint,
            x: clamp_i32(origin),
            advance,
            kerning,
            glyph,
        });
        self.x = origin + i64::from(advance);
        self.extent = self.extent.max(self.x);
        self.prev = Some(codepoint);
    }

    fn finish(self, truncated: bool) -> LineLayout {
        LineLayout {
            width: clamp_u32(self.extent),
            placements: self.placements,
            truncated,
        }
    }
}

fn place_all<F: FontBackend + ?Sized>(font: &F, cps: &[u32]) -> LineLayout {
    let mut pen = Pen::new(cps.len());
    for &cp in cps {
        let Some(glyph) = resolve(font, cp) else {
            continue;
        };
        let kern = pen.prev.map_or(0, |p| font.kerning(p, cp));
        pen.place(cp, kern, glyph);
    }
    pen.finish(false)
}

fn place_within<F: FontBackend + ?Sized>(font: &F, cps: &[u32], budget: i64) -> LineLayout {
    let ellipsis = font.glyph(ELLIPSIS);
    let ellipsis_advance = ellipsis.as_ref().map_or(0, |g| i64::from(g.advance.max(0)));

    let mut pen = Pen::new(cps.len());
    let mut checked = false;
    let mut fits = false;
    let mut squeeze = false;

    for (i, &cp) in cps.iter().enumerate() {
        let Some(glyph) = resolve(font, cp) else {
            continue;
        };
        let kern = pen.prev.map_or(0, |p| font.kerning(p, cp));
        let step = i64::from(kern) + i64::from(glyph.advance);
        let remaining = budget - pen.x;

        if !fits && !squeeze && step + ellipsis_advance > remaining {
            if !checked {
                checked = true;
                fits = extent_from(font, &cps[i..], pen.x, pen.prev) <= budget;
            }
            if !fits {
                match &ellipsis {
                    Some(e) if pen.x + ellipsis_advance <= budget => {
                        pen.place(ELLIPSIS, 0, Rc::clone(e));
                        return pen.finish(true);
                    }
                    _ => squeeze = true,
                }
            }
        }

        if step > remaining {
            return pen.finish(true);
        }
        pen.place(cp, kern, glyph);
    }
    pen.finish(false)
}

fn clamp_u32(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

fn clamp_i32(v: i64) -> i32 {
    i32::try_from(v).unwrap_or(if v < 0 { i32::MIN } else { i32::MAX })
}
