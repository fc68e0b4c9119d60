#![forbid(unsafe_code)]

//! Runtime for wtw: the child process, signals, the display, and the loop
//! that ties them together.
//!
//! # Role in wtw
//! `wtw-runtime` is the orchestrator. The [`EventLoop`] waits on a
//! [`SignalChannel`], the child's output pipe, and a [`DisplayBackend`];
//! it lets the [`ProcessSupervisor`] start and reap the child, feeds output
//! through the frame reader from `wtw-text`, and renders finished frames
//! into buffers from `wtw-render`'s pool.
//!
//! # Key components
//! - [`ProcessSupervisor`] and [`RestartScheduler`]: child lifecycle and
//!   restart cadence.
//! - [`SignalChannel`]: `signalfd`-based signal delivery.
//! - [`DisplayBackend`], `WaylandDisplay`, and [`HeadlessDisplay`]: the
//!   display connection.
//! - [`AppContext`]: configuration, font, and renderer in one value.
//! - [`EventLoop`]: the readiness-driven main loop.

pub mod context;
pub mod display;
pub mod event_loop;
pub mod signals;
pub mod supervisor;

pub use context::AppContext;
pub use display::{
    Capabilities, DisplayBackend, DisplayError, DisplayEvent, HeadlessDisplay, HeadlessFrame,
    SurfaceRequest,
};
#[cfg(feature = "wayland")]
pub use display::WaylandDisplay;
pub use event_loop::{EventLoop, LoopStats, RuntimeError, SetupError};
pub use signals::{LoopSignal, SignalChannel};
pub use supervisor::{
    AlarmTimer, ExitReason, ProcessSupervisor, RestartScheduler, RestartTimer, SupervisorState,
    SupervisorStats,
};
