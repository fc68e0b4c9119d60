#![forbid(unsafe_code)]

use wtw_core::ConfigError;

/// Point size used when the pattern gives neither `size` nor `pixelsize`.
pub const DEFAULT_POINT_SIZE: f32 = 12.0;

/// Resolution used to convert points to pixels.
pub const DEFAULT_DPI: f32 = 96.0;

/// A parsed font pattern: `name[:attr=value]...`.
///
/// Recognized attributes are `size` (points), `pixelsize` (overrides
/// `size`) and `dpi`. Unknown attributes are ignored so patterns written
/// for other tools still load.
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    /// Family name or path to a font file.
    pub name: String,
    /// Size in points.
    pub size: Option<f32>,
    /// Size in pixels; wins over `size`.
    pub pixel_size: Option<f32>,
    /// Dots per inch for the point conversion.
    pub dpi: f32,
}

impl FontSpec {
    /// Parse a pattern such as `monospace:size=16:dpi=96`.
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        let mut parts = pattern.split(':');
        let name = parts.next().unwrap_or_default().trim();
        let mut spec = Self {
            name: if name.is_empty() {
                "monospace".to_string()
            } else {
                name.to_string()
            },
            size: None,
            pixel_size: None,
            dpi: DEFAULT_DPI,
        };

        for attr in parts.filter(|p| !p.is_empty()) {
            let Some((key, value)) = attr.split_once('=') else {
                tracing::debug!(attr, "ignoring font attribute without value");
                continue;
            };
            let slot = match key.trim() {
                "size" => &mut spec.size,
                "pixelsize" => &mut spec.pixel_size,
                "dpi" => {
                    spec.dpi = parse_positive(pattern, value)?;
                    continue;
                }
                other => {
                    tracing::debug!(attr = other, "ignoring unknown font attribute");
                    continue;
                }
            };
            *slot = Some(parse_positive(pattern, value)?);
        }
        Ok(spec)
    }

    /// Rasterization size in pixels.
    pub fn pixel_size(&self) -> f32 {
        match (self.pixel_size, self.size) {
            (Some(px), _) => px,
            (None, Some(pt)) => pt * self.dpi / 72.0,
            (None, None) => DEFAULT_POINT_SIZE * self.dpi / 72.0,
        }
    }
}

fn parse_positive(pattern: &str, value: &str) -> Result<f32, ConfigError> {
    match value.trim().parse::<f32>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        Ok(_) => Err(ConfigError::InvalidFontSpec {
            spec: pattern.to_string(),
            reason: "sizes must be positive",
        }),
        Err(_) => Err(ConfigError::InvalidFontSpec {
            spec: pattern.to_string(),
            reason: "sizes must be numbers",
        }),
    }
}
