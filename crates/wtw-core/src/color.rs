#![forbid(unsafe_code)]

//! RGBA colors and the overlay color scheme.
//!
//! Colors are configured as straight-alpha `rrggbbaa` hex and stored packed
//! in a `u32`. The pixel buffer wants premultiplied ARGB, so the conversion
//! lives here next to the parser.

use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;

/// A straight-alpha RGBA color packed as `0xRRGGBBAA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Rgba(pub u32);

impl Rgba {
    /// Fully transparent (alpha = 0).
    pub const TRANSPARENT: Self = Self(0);
    /// Opaque black.
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    /// Opaque white.
    pub const WHITE: Self = Self::rgb(255, 255, 255);

    /// Create an opaque RGB color (alpha = 255).
    #[inline]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    /// Create an RGBA color with explicit alpha.
    #[inline]
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self(((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | (a as u32))
    }

    /// Red channel.
    #[inline]
    pub const fn r(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Green channel.
    #[inline]
    pub const fn g(self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Blue channel.
    #[inline]
    pub const fn b(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Alpha channel.
    #[inline]
    pub const fn a(self) -> u8 {
        self.0 as u8
    }

    #[inline]
    const fn premul(c: u8, a: u8) -> u32 {
        (c as u32 * a as u32 + 127) / 255
    }

    /// Convert to a premultiplied `0xAARRGGBB` pixel.
    ///
    /// This is the in-memory layout of a little-endian ARGB8888 surface.
    #[inline]
    pub const fn to_premultiplied_argb(self) -> u32 {
        let a = self.a();
        (a as u32) << 24
            | Self::premul(self.r(), a) << 16
            | Self::premul(self.g(), a) << 8
            | Self::premul(self.b(), a)
    }

    /// Parse `rrggbbaa` or `rrggbb` hex, with an optional `#` or `0x` prefix.
    ///
    /// Six-digit colors are opaque.
    pub fn from_hex(input: &str) -> Result<Self, ConfigError> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix('#')
            .or_else(|| trimmed.strip_prefix("0x"))
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        let invalid = || ConfigError::InvalidColor {
            value: input.to_string(),
        };

        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let value = u32::from_str_radix(digits, 16).map_err(|_| invalid())?;
        match digits.len() {
            8 => Ok(Self(value)),
            6 => Ok(Self((value << 8) | 0xFF)),
            _ => Err(invalid()),
        }
    }
}

impl FromStr for Rgba {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Foreground/background pair used for text and its backdrop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorScheme {
    pub fg: Rgba,
    pub bg: Rgba,
}

impl ColorScheme {
    /// Create a scheme from explicit colors.
    pub const fn new(fg: Rgba, bg: Rgba) -> Self {
        Self { fg, bg }
    }
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            fg: Rgba(0xbbbb_bbff),
            bg: Rgba(0x0000_00ff),
        }
    }
}
