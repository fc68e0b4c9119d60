#![deny(unsafe_code)]

//! Pixels for wtw: shared-memory buffers and compositing.
//!
//! # Role in wtw
//! The runtime asks the [`BufferPool`] for a fresh buffer each frame, lets
//! the [`Renderer`] draw the frame's lines into it through a [`Canvas`],
//! then submits it to the display. The pool tracks each buffer until the
//! display releases it.
//!
//! # Pixel format
//! 32-bit ARGB, premultiplied alpha, little-endian (`0xAARRGGBB` per `u32`),
//! rows padded to a 4-byte stride.

pub mod canvas;
pub mod pool;
pub mod renderer;

pub use canvas::{Canvas, Draw};
pub use pool::{
    BufferId, BufferPool, BufferState, FrameBuffer, PoolError, PoolStats, SurfaceBuffer, stride,
};
pub use renderer::{RenderOptions, RenderSummary, Renderer};
