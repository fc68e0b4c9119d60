#![forbid(unsafe_code)]

//! Overlay configuration.
//!
//! [`OverlayConfig`] is the static description of one overlay: colors, font,
//! geometry, frame delimiter, and the restart cadence of the child command.
//! The binary builds it from command-line flags; tests build it directly.
//!
//! # Example
//!
//! ```
//! use wtw_core::{OverlayConfig, RestartPeriod};
//!
//! let config = OverlayConfig::default()
//!     .with_restart(RestartPeriod::from_secs(-1))
//!     .with_padding(4);
//! assert!(config.validate().is_ok());
//! assert_eq!(config.restart, RestartPeriod::Immediate);
//! ```

use std::fmt;
use std::time::Duration;

use crate::color::ColorScheme;
use crate::geometry::{Sides, Size};

/// Default font pattern (`name:attr=value`).
pub const DEFAULT_FONT: &str = "monospace:size=16:dpi=96";

/// Default frame delimiter: a line holding a single EOT control byte.
pub const DEFAULT_DELIMITER: &str = "\u{4}";

/// Default restart period in seconds.
pub const DEFAULT_PERIOD_SECS: i64 = 5;

/// Error produced while building or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A color was not `rrggbb` / `rrggbbaa` hex.
    InvalidColor { value: String },
    /// A font pattern could not be parsed.
    InvalidFontSpec { spec: String, reason: &'static str },
    /// The frame delimiter is empty.
    EmptyDelimiter,
    /// The frame delimiter spans lines and could never match one.
    MultilineDelimiter,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidColor { value } => {
                write!(f, "invalid color {value:?}: expected rrggbb or rrggbbaa hex")
            }
            Self::InvalidFontSpec { spec, reason } => {
                write!(f, "invalid font spec {spec:?}: {reason}")
            }
            Self::EmptyDelimiter => write!(f, "frame delimiter must not be empty"),
            Self::MultilineDelimiter => {
                write!(f, "frame delimiter must not contain a newline")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// When to start the child command again after it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPeriod {
    /// Restart as soon as the exit has been reaped.
    Immediate,
    /// Restart once this much time has passed since the exit.
    After(Duration),
    /// Run the command once.
    Never,
}

impl RestartPeriod {
    /// Map a signed period in seconds: negative restarts immediately,
    /// zero never restarts, positive waits that many seconds.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            s if s < 0 => Self::Immediate,
            0 => Self::Never,
            s => Self::After(Duration::from_secs(s.unsigned_abs())),
        }
    }
}

impl Default for RestartPeriod {
    fn default() -> Self {
        Self::from_secs(DEFAULT_PERIOD_SECS)
    }
}

/// Requested overlay placement. Zero width/height means "use whatever the
/// compositor negotiates"; `x`/`y` offset the text block inside the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverlayGeometry {
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
}

impl OverlayGeometry {
    /// Requested surface size (zero components are unconstrained).
    pub const fn requested_size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Stacking layer of the overlay surface, bottom to top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShellLayer {
    Background,
    /// Above the wallpaper, below windows.
    #[default]
    Bottom,
    Top,
    Overlay,
}

/// Layer-surface parameters passed to the display when the surface is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerOptions {
    /// Namespace reported to the compositor.
    pub namespace: String,
    /// Stacking layer.
    pub layer: ShellLayer,
    /// Exclusive zone; `-1` lets the overlay sit under panels without
    /// reserving space.
    pub exclusive_zone: i32,
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            namespace: "text".to_string(),
            layer: ShellLayer::Bottom,
            exclusive_zone: -1,
        }
    }
}

/// Complete static configuration of one overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Text and background colors.
    pub colors: ColorScheme,
    /// Font pattern, e.g. `monospace:size=16` or `/path/font.ttf:pixelsize=20`.
    pub font: String,
    /// Restart cadence of the child command.
    pub restart: RestartPeriod,
    /// Padding around the text block, in pixels.
    pub padding: u32,
    /// Requested surface size and text origin.
    pub geometry: OverlayGeometry,
    /// A line equal to this string ends a frame.
    pub delimiter: String,
    /// Draw a foreground-colored outline around the background block.
    pub outline: bool,
    /// Layer-surface parameters.
    pub layer: LayerOptions,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            colors: ColorScheme::default(),
            font: DEFAULT_FONT.to_string(),
            restart: RestartPeriod::default(),
            padding: 0,
            geometry: OverlayGeometry::default(),
            delimiter: DEFAULT_DELIMITER.to_string(),
            outline: false,
            layer: LayerOptions::default(),
        }
    }
}

impl OverlayConfig {
    /// Override the color scheme.
    pub fn with_colors(mut self, colors: ColorScheme) -> Self {
        self.colors = colors;
        self
    }

    /// Override the font pattern.
    pub fn with_font(mut self, font: impl Into<String>) -> Self {
        self.font = font.into();
        self
    }

    /// Override the restart cadence.
    pub fn with_restart(mut self, restart: RestartPeriod) -> Self {
        self.restart = restart;
        self
    }

    /// Override the padding.
    pub fn with_padding(mut self, padding: u32) -> Self {
        self.padding = padding;
        self
    }

    /// Override the requested geometry.
    pub fn with_geometry(mut self, geometry: OverlayGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Override the frame delimiter.
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Enable or disable the block outline.
    pub fn outline(mut self, enabled: bool) -> Self {
        self.outline = enabled;
        self
    }

    /// Padding as uniform sides.
    pub fn padding_sides(&self) -> Sides {
        Sides::all(self.padding)
    }

    /// Check cross-field constraints the type system does not capture.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delimiter.is_empty() {
            return Err(ConfigError::EmptyDelimiter);
        }
        if self.delimiter.contains('\n') {
            return Err(ConfigError::MultilineDelimiter);
        }
        Ok(())
    }
}
