#![forbid(unsafe_code)]

//! Font backends.
//!
//! Layout only needs four things from a font: line metrics, a glyph per
//! codepoint, its advance, and a kerning delta between neighbours. The
//! [`FontBackend`] trait captures exactly that. Two backends ship:
//!
//! - [`TrueTypeFont`]: rasterizes TrueType/OpenType outlines with
//!   `fontdue`, caching glyphs by codepoint.
//! - [`FixedFont`]: deterministic box glyphs with configurable advances and
//!   kerning pairs, for headless runs and tests.

mod discovery;
mod fixed;
mod spec;
mod truetype;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::rc::Rc;

use wtw_core::ConfigError;

pub use discovery::{font_dirs, resolve_font};
pub use fixed::FixedFont;
pub use spec::{FontSpec, DEFAULT_DPI, DEFAULT_POINT_SIZE};
pub use truetype::TrueTypeFont;

/// Pixels of a rasterized glyph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlyphBitmap {
    /// 8-bit coverage, composited through the foreground color.
    Mask(Vec<u8>),
    /// Pre-rendered premultiplied ARGB (color emoji), composited as is.
    Argb(Vec<u32>),
}

impl GlyphBitmap {
    /// Whether the glyph carries its own colors.
    pub fn is_color(&self) -> bool {
        matches!(self, Self::Argb(_))
    }
}

/// One rasterized glyph.
///
/// `left` and `top` place the bitmap relative to the pen position on the
/// baseline: its top-left pixel lands at `(pen + left, baseline - top)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph {
    /// Horizontal pen advance in pixels.
    pub advance: i32,
    /// Left side bearing.
    pub left: i32,
    /// Distance from the baseline up to the bitmap's top row.
    pub top: i32,
    /// Bitmap width in pixels.
    pub width: u32,
    /// Bitmap height in pixels.
    pub height: u32,
    /// Row-major pixels, `width * height` long.
    pub bitmap: GlyphBitmap,
}

/// Vertical metrics shared by every line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontMetrics {
    /// Distance between successive baselines.
    pub line_height: u32,
    /// Distance from a line's top to its baseline.
    pub ascent: i32,
}

/// Source of glyphs and spacing for layout.
///
/// Methods take `&self`; backends cache behind interior mutability and hand
/// out shared glyph handles that outlive cache eviction.
pub trait FontBackend {
    /// Line metrics.
    fn metrics(&self) -> FontMetrics;

    /// The glyph for `codepoint`, or `None` if the font cannot draw it.
    fn glyph(&self, codepoint: u32) -> Option<Rc<Glyph>>;

    /// Signed kerning adjustment between `left` and `right`, in pixels.
    fn kerning(&self, left: u32, right: u32) -> i32;
}

impl<F: FontBackend + ?Sized> FontBackend for Box<F> {
    fn metrics(&self) -> FontMetrics {
        (**self).metrics()
    }

    fn glyph(&self, codepoint: u32) -> Option<Rc<Glyph>> {
        (**self).glyph(codepoint)
    }

    fn kerning(&self, left: u32, right: u32) -> i32 {
        (**self).kerning(left, right)
    }
}

/// Errors from font selection and loading.
#[derive(Debug)]
pub enum FontError {
    /// The font pattern is malformed.
    Spec(ConfigError),
    /// No installed font matches the family name.
    NotFound { family: String },
    /// Reading the font file failed.
    Io { path: PathBuf, source: io::Error },
    /// The file is not a usable font.
    Parse { path: PathBuf, reason: &'static str },
    /// The font reports no usable line metrics at this size.
    NoMetrics { path: PathBuf },
}

impl fmt::Display for FontError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spec(err) => write!(f, "{err}"),
            Self::NotFound { family } => write!(f, "no installed font matches {family:?}"),
            Self::Io { path, source } => {
                write!(f, "failed to read font {}: {source}", path.display())
            }
            Self::Parse { path, reason } => {
                write!(f, "failed to parse font {}: {reason}", path.display())
            }
            Self::NoMetrics { path } => {
                write!(f, "font {} has no horizontal line metrics", path.display())
            }
        }
    }
}

impl std::error::Error for FontError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spec(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for FontError {
    fn from(err: ConfigError) -> Self {
        Self::Spec(err)
    }
}

/// Parse `pattern`, locate the font file, and load it.
pub fn load(pattern: &str) -> Result<TrueTypeFont, FontError> {
    let spec = FontSpec::parse(pattern)?;
    let path = resolve_font(&spec.name, &font_dirs())?;
    TrueTypeFont::open(&path, spec.pixel_size())
}
