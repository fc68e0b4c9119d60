#![forbid(unsafe_code)]

//! The display connection, as the event loop sees it.
//!
//! A [`DisplayBackend`] is a pollable connection to something that shows
//! surfaces: it creates one overlay surface, takes finished buffers, and
//! reports configure, close, and buffer-release events. `WaylandDisplay`
//! (feature `wayland`) talks to a compositor through the wlr layer shell;
//! [`HeadlessDisplay`] is an in-process implementation over a socket pair.

mod headless;
#[cfg(feature = "wayland")]
mod wayland;

pub use headless::{HeadlessDisplay, HeadlessFrame};
#[cfg(feature = "wayland")]
pub use wayland::WaylandDisplay;

use std::fmt;
use std::io;
use std::os::fd::BorrowedFd;

use bitflags::bitflags;
use wtw_core::{LayerOptions, Size};
use wtw_render::{BufferId, SurfaceBuffer};

bitflags! {
    /// Global interfaces the display advertises.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// Surface creation.
        const COMPOSITOR  = 0b001;
        /// Shared-memory buffers.
        const SHM         = 0b010;
        /// Anchored overlay (layer) surfaces.
        const LAYER_SHELL = 0b100;
    }
}

impl Capabilities {
    /// Everything the overlay needs.
    pub const REQUIRED: Self = Self::COMPOSITOR.union(Self::SHM).union(Self::LAYER_SHELL);

    /// Required interfaces this display lacks.
    pub fn missing(self) -> Self {
        Self::REQUIRED.difference(self)
    }
}

/// Notification from the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    /// The surface now has this size.
    Configure { size: Size },
    /// The surface was closed; the overlay should exit.
    Closed,
    /// The display is done reading this buffer.
    BufferReleased(BufferId),
}

/// How the overlay surface should be created.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SurfaceRequest {
    /// Desired size; zero components let the display choose.
    pub size: Size,
    /// Layer-surface parameters.
    pub layer: LayerOptions,
}

/// Errors on the display connection.
#[derive(Debug)]
pub enum DisplayError {
    /// No display could be reached.
    Unavailable(String),
    /// Socket I/O failed.
    Io(io::Error),
    /// The peer hung up.
    Disconnected,
    /// The peer sent something unintelligible.
    Protocol(String),
    /// A buffer was attached before the surface existed.
    NoSurface,
}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "cannot connect to display: {msg}"),
            Self::Io(err) => write!(f, "display I/O error: {err}"),
            Self::Disconnected => write!(f, "display socket disconnected"),
            Self::Protocol(msg) => write!(f, "display protocol error: {msg}"),
            Self::NoSurface => write!(f, "no surface has been created"),
        }
    }
}

impl std::error::Error for DisplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for DisplayError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// A connection to a display.
pub trait DisplayBackend {
    /// Descriptor to poll for incoming events.
    fn fd(&self) -> BorrowedFd<'_>;

    /// Advertised interfaces.
    fn capabilities(&self) -> Capabilities;

    /// Create the overlay surface. The display answers with a configure.
    fn create_surface(&mut self, request: &SurfaceRequest) -> Result<(), DisplayError>;

    /// Attach a finished buffer to the surface and commit it.
    fn attach(&mut self, buffer: SurfaceBuffer<'_>) -> Result<(), DisplayError>;

    /// Send queued requests.
    fn flush(&mut self) -> Result<(), DisplayError>;

    /// Read and decode whatever events are available, without blocking.
    fn dispatch(&mut self) -> Result<Vec<DisplayEvent>, DisplayError>;

    /// Flush, then collect every event the display sends in answer.
    fn roundtrip(&mut self) -> Result<Vec<DisplayEvent>, DisplayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_lists_absent_interfaces() {
        assert!(Capabilities::REQUIRED.missing().is_empty());
        let partial = Capabilities::COMPOSITOR | Capabilities::SHM;
        assert_eq!(partial.missing(), Capabilities::LAYER_SHELL);
        assert_eq!(Capabilities::empty().missing(), Capabilities::REQUIRED);
    }
}
