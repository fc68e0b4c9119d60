#![forbid(unsafe_code)]

//! Text pipeline for wtw: bytes in, positioned glyphs out.
//!
//! # Role in wtw
//! Child output arrives as raw bytes. [`FrameReader`] splits it into lines
//! and frames, stored in a [`TextBuffer`]. At render time each line is
//! decoded by the [`decoder`] and laid out by the [`LayoutEngine`] against a
//! [`FontBackend`], yielding [`GlyphPlacement`]s ready for compositing.
//!
//! # Primary responsibilities
//! - **Decoding**: validating, resynchronizing UTF-8 decode.
//! - **Framing**: bounded non-blocking reads, delimiter detection.
//! - **Fonts**: font pattern parsing, discovery, `fontdue` rasterization,
//!   glyph caching, and a deterministic fixed font.
//! - **Layout**: kerning and ellipsis truncation within a width budget.

pub mod decoder;
pub mod font;
pub mod frame_reader;
pub mod glyph_cache;
pub mod layout;
pub mod text_buffer;

pub use decoder::{Codepoints, DecoderState, REPLACEMENT, decode};
pub use font::{
    FixedFont, FontBackend, FontError, FontMetrics, FontSpec, Glyph, GlyphBitmap, TrueTypeFont,
};
pub use frame_reader::{FrameReader, ReadOutcome};
pub use glyph_cache::{CacheStats, GlyphCache};
pub use layout::{ELLIPSIS, GlyphPlacement, LayoutEngine, LineLayout};
pub use text_buffer::TextBuffer;
