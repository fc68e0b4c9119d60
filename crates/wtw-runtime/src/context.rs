#![forbid(unsafe_code)]

//! Everything a render needs, bundled and passed by reference.

use std::fmt;

use wtw_core::{ConfigError, OverlayConfig};
use wtw_render::{Canvas, RenderOptions, RenderSummary, Renderer};
use wtw_text::FontBackend;

/// Configuration, font, and renderer of one overlay.
pub struct AppContext {
    config: OverlayConfig,
    font: Box<dyn FontBackend>,
    renderer: Renderer,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("font", &self.font.metrics())
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Validate `config` and pair it with a loaded font.
    pub fn new(config: OverlayConfig, font: Box<dyn FontBackend>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            font,
            renderer: Renderer::new(),
        })
    }

    /// The overlay configuration.
    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// The font backend.
    pub fn font(&self) -> &dyn FontBackend {
        self.font.as_ref()
    }

    /// Block placement and colors derived from the configuration.
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            x: self.config.geometry.x,
            y: self.config.geometry.y,
            padding: self.config.padding_sides(),
            colors: self.config.colors,
            outline: self.config.outline,
        }
    }

    /// Draw one frame's lines.
    pub fn render<'l, I>(&mut self, canvas: &mut Canvas<'_>, lines: I) -> RenderSummary
    where
        I: IntoIterator<Item = &'l [u8]>,
        I::IntoIter: Clone,
    {
        let options = self.render_options();
        self.renderer
            .render(canvas, lines, self.font.as_ref(), &options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wtw_core::{OverlayGeometry, Rect, Sides};
    use wtw_text::FixedFont;

    #[test]
    fn invalid_config_is_rejected() {
        let config = OverlayConfig::default().with_delimiter("");
        let err = AppContext::new(config, Box::new(FixedFont::default())).unwrap_err();
        assert_eq!(err, ConfigError::EmptyDelimiter);
    }

    #[test]
    fn options_follow_config() {
        let config = OverlayConfig::default()
            .with_padding(3)
            .with_geometry(OverlayGeometry {
                x: 5,
                y: 7,
                ..OverlayGeometry::default()
            })
            .outline(true);
        let ctx = AppContext::new(config, Box::new(FixedFont::default())).unwrap();
        let opts = ctx.render_options();
        assert_eq!(
            (opts.x, opts.y, opts.padding, opts.outline),
            (5, 7, Sides::all(3), true)
        );
    }

    #[test]
    fn render_uses_context_font() {
        let mut ctx =
            AppContext::new(OverlayConfig::default(), Box::new(FixedFont::new(6, 12))).unwrap();
        let mut pixels = vec![0u32; 100 * 20];
        let mut canvas = Canvas::new(&mut pixels, 100, 20, 100).unwrap();
        let lines: [&[u8]; 1] = [b"abcd"];
        let summary = ctx.render(&mut canvas, lines);
        assert_eq!(summary.block, Rect::new(0, 0, 24, 12));
    }
}
