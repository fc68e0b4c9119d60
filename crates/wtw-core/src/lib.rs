#![forbid(unsafe_code)]

//! Core: geometry, colors, overlay configuration, and logging setup.
//!
//! # Role in wtw
//! `wtw-core` is the leaf crate every other crate builds on. It has no
//! knowledge of fonts, pixel buffers, or processes; it only describes *what*
//! the overlay should look like and *how* it should behave, and installs the
//! tracing subscriber for the binary.

pub mod color;
pub mod config;
pub mod geometry;
pub mod logging;

pub use color::{ColorScheme, Rgba};
pub use config::{
    ConfigError, LayerOptions, OverlayConfig, OverlayGeometry, RestartPeriod, ShellLayer,
};
pub use geometry::{Rect, Sides, Size};
