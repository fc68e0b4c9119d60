#![forbid(unsafe_code)]

//! Frame rendering: text block background plus one laid-out line per row.

use wtw_core::{ColorScheme, Rect, Rgba, Sides};
use wtw_text::{FontBackend, LayoutEngine};

use crate::canvas::{Canvas, Draw};

/// Placement and colors of the text block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderOptions {
    /// Left edge of the block within the surface.
    pub x: i32,
    /// Top edge of the block within the surface.
    pub y: i32,
    /// Space between the block edge and the text.
    pub padding: Sides,
    /// Foreground and background colors.
    pub colors: ColorScheme,
    /// Outline the block in the foreground color.
    pub outline: bool,
}

/// What one render pass drew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderSummary {
    /// Lines drawn.
    pub lines: usize,
    /// Lines cut short to fit the surface.
    pub truncated: usize,
    /// Background block after clipping to the surface.
    pub block: Rect,
}

/// Draws frames. Owns the layout scratch space so repeated renders do not
/// reallocate.
#[derive(Debug, Default)]
pub struct Renderer {
    layout: LayoutEngine,
}

impl Renderer {
    /// Create a renderer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw `lines` onto `canvas`.
    ///
    /// The canvas is cleared to transparent, the background block sized to
    /// the widest line plus padding is filled, and each line is laid out
    /// against the width left between the block origin and the surface's
    /// right edge, minus padding on both sides.
    pub fn render<'l, I, F>(
        &mut self,
        canvas: &mut Canvas<'_>,
        lines: I,
        font: &F,
        options: &RenderOptions,
    ) -> RenderSummary
    where
        I: IntoIterator<Item = &'l [u8]>,
        I::IntoIter: Clone,
        F: FontBackend + ?Sized,
    {
        let _span = tracing::debug_span!("render", w = canvas.width(), h = canvas.height()).entered();
        let lines = lines.into_iter();
        let metrics = font.metrics();
        let pad = options.padding;
        // Text runs from inside the padding to the surface's far edges.
        let room = Rect::new(
            options.x,
            options.y,
            span(options.x, canvas.width()),
            span(options.y, canvas.height()),
        )
        .inner(pad);

        let mut count = 0usize;
        let mut widest = 0u32;
        for line in lines.clone() {
            widest = widest.max(self.layout.measure(line, font));
            count += 1;
        }

        let text_height = u32::try_from(count)
            .unwrap_or(u32::MAX)
            .saturating_mul(metrics.line_height);
        let block = Rect::new(room.x, room.y, widest, text_height)
            .outer(pad)
            .intersection(&canvas.bounds());

        canvas.clear(Rgba::TRANSPARENT);
        canvas.fill_rect(block, options.colors.bg);
        if options.outline {
            canvas.outline_rect(block, options.colors.fg);
        }

        let budget = room.width;

        let pen_x = i64::from(room.x);
        let mut top = i64::from(room.y);
        let mut truncated = 0usize;
        for line in lines {
            let laid = self.layout.layout(line, font, Some(budget));
            if laid.truncated {
                truncated += 1;
            }
            let baseline = top + i64::from(metrics.ascent);
            for p in &laid.placements {
                let gx = pen_x + i64::from(p.x) + i64::from(p.glyph.left);
                let gy = baseline - i64::from(p.glyph.top);
                canvas.draw_glyph(clamp(gx), clamp(gy), &p.glyph, options.colors.fg);
            }
            top += i64::from(metrics.line_height);
        }

        tracing::debug!(lines = count, truncated, widest, budget, "frame rendered");
        RenderSummary {
            lines: count,
            truncated,
            block,
        }
    }
}

/// Distance from `start` to the far edge `end`, zero when past it.
fn span(start: i32, end: u32) -> u32 {
    u32::try_from((i64::from(end) - i64::from(start)).max(0)).unwrap_or(u32::MAX)
}

fn clamp(v: i64) -> i32 {
    i32::try_from(v).unwrap_or(if v < 0 { i32::MIN } else { i32::MAX })
}
