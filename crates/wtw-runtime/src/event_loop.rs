#![forbid(unsafe_code)]

//! The single-threaded, readiness-driven main loop.
//!
//! Each iteration:
//!
//! 1. flush queued display requests;
//! 2. start the child if a restart is due and the last run is drained;
//! 3. wait on the signal channel, the child's output (while open), and
//!    the display connection;
//! 4. handle signals: reap exited children, mark timer restarts, stop on
//!    termination requests;
//! 5. read child output and render each completed frame;
//! 6. dispatch display events: configure, close, buffer release.
//!
//! The wait is the only blocking call. The loop ends successfully when the
//! surface is closed.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::os::fd::AsFd;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::signal::Signal;
use wtw_core::{ConfigError, Size};
use wtw_render::{BufferPool, PoolError};
use wtw_text::{FontError, FrameReader, ReadOutcome};

use crate::context::AppContext;
use crate::display::{Capabilities, DisplayBackend, DisplayError, DisplayEvent, SurfaceRequest};
use crate::signals::{LoopSignal, SignalChannel};
use crate::supervisor::{AlarmTimer, ProcessSupervisor, RestartTimer};

/// Frames rendered per wake before other sources get a turn.
pub const MAX_FRAMES_PER_WAKE: usize = 8;

/// Failures before the loop starts.
#[derive(Debug)]
pub enum SetupError {
    /// The configuration is inconsistent.
    Config(ConfigError),
    /// The font could not be loaded.
    Font(FontError),
    /// The display could not be reached or answered badly.
    Display(DisplayError),
    /// The display lacks interfaces the overlay needs.
    MissingCapabilities(Capabilities),
    /// The signal channel could not be opened.
    Signals(io::Error),
    /// No command was given.
    EmptyCommand,
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Font(err) => write!(f, "bad font: {err}"),
            Self::Display(err) => write!(f, "could not set up display: {err}"),
            Self::MissingCapabilities(missing) => {
                write!(f, "display is missing required interfaces: {missing:?}")
            }
            Self::Signals(err) => write!(f, "could not open signal channel: {err}"),
            Self::EmptyCommand => write!(f, "no command given"),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Font(err) => Some(err),
            Self::Display(err) => Some(err),
            Self::Signals(err) => Some(err),
            Self::MissingCapabilities(_) | Self::EmptyCommand => None,
        }
    }
}

impl From<ConfigError> for SetupError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<FontError> for SetupError {
    fn from(err: FontError) -> Self {
        Self::Font(err)
    }
}

impl From<DisplayError> for SetupError {
    fn from(err: DisplayError) -> Self {
        Self::Display(err)
    }
}

/// Failures that end a running loop.
#[derive(Debug)]
pub enum RuntimeError {
    /// Waiting for readiness failed.
    Poll(io::Error),
    /// Reading the signal channel failed.
    Signals(io::Error),
    /// Collecting the child failed.
    Wait(io::Error),
    /// Reading the child's output failed.
    ChildOutput(io::Error),
    /// The display connection failed or hung up.
    Display(DisplayError),
    /// A buffer changed hands out of order.
    Buffer(PoolError),
    /// A termination signal arrived.
    Terminated(Signal),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll(err) => write!(f, "poll failed: {err}"),
            Self::Signals(err) => write!(f, "reading signals failed: {err}"),
            Self::Wait(err) => write!(f, "waitpid failed: {err}"),
            Self::ChildOutput(err) => write!(f, "reading child output failed: {err}"),
            Self::Display(err) => write!(f, "{err}"),
            Self::Buffer(err) => write!(f, "{err}"),
            Self::Terminated(signal) => write!(f, "terminated by {signal}"),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Poll(err) | Self::Signals(err) | Self::Wait(err) | Self::ChildOutput(err) => {
                Some(err)
            }
            Self::Display(err) => Some(err),
            Self::Buffer(err) => Some(err),
            Self::Terminated(_) => None,
        }
    }
}

/// Counters for one run of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopStats {
    /// Loop iterations.
    pub iterations: u64,
    /// Frames drawn and attached.
    pub frames_rendered: u64,
    /// Frames dropped (no surface size yet, or no buffer memory).
    pub frames_skipped: u64,
    /// Lines cut short with an ellipsis, over all frames.
    pub lines_truncated: u64,
    /// Buffers handed back by the display.
    pub buffers_released: u64,
}

#[derive(Debug, Default)]
struct Readiness {
    signals: bool,
    pipe: bool,
    display: bool,
    display_hangup: bool,
}

/// Owns every resource of a running overlay.
///
/// Fields drop in order: the child is stopped and the alarm cancelled
/// before the signal mask is restored.
pub struct EventLoop<D: DisplayBackend, T: RestartTimer = AlarmTimer> {
    supervisor: ProcessSupervisor<T>,
    signals: SignalChannel,
    ctx: AppContext,
    display: D,
    reader: FrameReader,
    pool: BufferPool,
    surface_size: Size,
    closed: bool,
    stats: LoopStats,
}

impl<D: DisplayBackend, T: RestartTimer> fmt::Debug for EventLoop<D, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("supervisor", &self.supervisor)
            .field("surface_size", &self.surface_size)
            .field("closed", &self.closed)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<D: DisplayBackend> EventLoop<D> {
    /// Set up with the process alarm as restart timer.
    pub fn new(ctx: AppContext, display: D, command: Vec<OsString>) -> Result<Self, SetupError> {
        Self::with_timer(ctx, display, command, AlarmTimer::default())
    }
}

impl<D: DisplayBackend, T: RestartTimer> EventLoop<D, T> {
    /// Check the display, open the signal channel, create the surface, and
    /// wait for its first configure. The child is started on the first
    /// iteration of [`run`](Self::run).
    pub fn with_timer(
        ctx: AppContext,
        mut display: D,
        command: Vec<OsString>,
        timer: T,
    ) -> Result<Self, SetupError> {
        if command.is_empty() {
            return Err(SetupError::EmptyCommand);
        }
        let missing = display.capabilities().missing();
        if !missing.is_empty() {
            return Err(SetupError::MissingCapabilities(missing));
        }
        let signals = SignalChannel::open().map_err(SetupError::Signals)?;

        let config = ctx.config();
        let request = SurfaceRequest {
            size: config.geometry.requested_size(),
            layer: config.layer.clone(),
        };
        let supervisor = ProcessSupervisor::new(command, config.restart, timer);
        let reader = FrameReader::new(config.delimiter.as_bytes());

        display.create_surface(&request)?;
        let mut event_loop = Self {
            supervisor,
            signals,
            ctx,
            display,
            reader,
            pool: BufferPool::new(),
            surface_size: Size::ZERO,
            closed: false,
            stats: LoopStats::default(),
        };
        let events = event_loop.display.roundtrip()?;
        event_loop.apply_display_events(events);
        tracing::info!(
            width = event_loop.surface_size.width,
            height = event_loop.surface_size.height,
            "surface configured"
        );
        Ok(event_loop)
    }

    /// Run until the surface is closed or something fails.
    pub fn run(&mut self) -> Result<LoopStats, RuntimeError> {
        while !self.closed {
            self.stats.iterations += 1;
            self.display.flush().map_err(RuntimeError::Display)?;

            if self.supervisor.spawn_if_due() {
                self.reader.reset();
            }

            let ready = self.wait()?;
            if ready.signals {
                self.handle_signals()?;
            }
            if ready.pipe {
                self.read_child()?;
            }
            if ready.display {
                let events = self.display.dispatch().map_err(RuntimeError::Display)?;
                self.apply_display_events(events);
            } else if ready.display_hangup {
                return Err(RuntimeError::Display(DisplayError::Disconnected));
            }
        }
        tracing::info!(
            frames = self.stats.frames_rendered,
            iterations = self.stats.iterations,
            "surface closed"
        );
        Ok(self.stats)
    }

    fn wait(&self) -> Result<Readiness, RuntimeError> {
        let queued = self.reader.has_queued_line() && self.supervisor.pipe().is_some();
        let mut fds = vec![
            PollFd::new(self.signals.as_fd(), PollFlags::POLLIN),
            PollFd::new(self.display.fd(), PollFlags::POLLIN),
        ];
        if let Some(pipe) = self.supervisor.pipe() {
            fds.push(PollFd::new(pipe, PollFlags::POLLIN));
        }
        let timeout = if queued {
            PollTimeout::ZERO
        } else {
            PollTimeout::NONE
        };

        loop {
            match poll(&mut fds, timeout) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(RuntimeError::Poll(err.into())),
            }
        }

        let revents = |i: usize| {
            fds.get(i)
                .and_then(|fd| fd.revents())
                .unwrap_or(PollFlags::empty())
        };
        let readable = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
        let display = revents(1);
        Ok(Readiness {
            signals: revents(0).intersects(PollFlags::POLLIN),
            pipe: queued || revents(2).intersects(readable),
            display: display.intersects(PollFlags::POLLIN),
            display_hangup: display.intersects(PollFlags::POLLHUP | PollFlags::POLLERR),
        })
    }

    fn handle_signals(&mut self) -> Result<(), RuntimeError> {
        for signal in self.signals.drain().map_err(RuntimeError::Signals)? {
            match signal {
                LoopSignal::ChildExited => {
                    self.supervisor.reap().map_err(RuntimeError::Wait)?;
                }
                LoopSignal::Timer => self.supervisor.on_timer(),
                LoopSignal::Terminate(signal) => {
                    tracing::info!(%signal, "termination requested");
                    return Err(RuntimeError::Terminated(signal));
                }
            }
        }
        Ok(())
    }

    fn read_child(&mut self) -> Result<(), RuntimeError> {
        for _ in 0..MAX_FRAMES_PER_WAKE {
            let Some(pipe) = self.supervisor.pipe_mut() else {
                return Ok(());
            };
            match self.reader.read_from(pipe) {
                Ok(ReadOutcome::Frame) => self.render_frame()?,
                Ok(ReadOutcome::Pending) => return Ok(()),
                Ok(ReadOutcome::Eof { frame }) => {
                    if frame {
                        self.render_frame()?;
                    }
                    self.supervisor.close_pipe();
                    return Ok(());
                }
                Err(err) => {
                    self.supervisor.close_pipe();
                    return Err(RuntimeError::ChildOutput(err));
                }
            }
        }
        Ok(())
    }

    fn render_frame(&mut self) -> Result<(), RuntimeError> {
        let size = self.surface_size;
        if size.is_empty() {
            tracing::debug!("surface not configured yet; frame skipped");
            self.stats.frames_skipped += 1;
            return Ok(());
        }
        let id = match self.pool.acquire(size) {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(%err, "no buffer for frame; frame skipped");
                self.stats.frames_skipped += 1;
                return Ok(());
            }
        };

        let summary = {
            let mut canvas = self.pool.canvas(id).map_err(RuntimeError::Buffer)?;
            self.ctx.render(&mut canvas, self.reader.frame().lines())
        };
        let surface = self.pool.submit(id).map_err(RuntimeError::Buffer)?;
        self.display
            .attach(surface)
            .map_err(RuntimeError::Display)?;

        self.stats.frames_rendered += 1;
        self.stats.lines_truncated += summary.truncated as u64;
        tracing::debug!(
            buffer = %id,
            lines = summary.lines,
            truncated = summary.truncated,
            frame = self.stats.frames_rendered,
            "frame attached"
        );
        Ok(())
    }

    fn apply_display_events(&mut self, events: Vec<DisplayEvent>) {
        for event in events {
            match event {
                DisplayEvent::Configure { size } => {
                    if size != self.surface_size {
                        tracing::debug!(width = size.width, height = size.height, "configure");
                        self.surface_size = size;
                    }
                }
                DisplayEvent::Closed => {
                    tracing::debug!("surface closed by display");
                    self.closed = true;
                }
                DisplayEvent::BufferReleased(id) => match self.pool.release(id) {
                    Ok(true) => self.stats.buffers_released += 1,
                    Ok(false) => {}
                    Err(err) => tracing::warn!(%err, "unexpected buffer release"),
                },
            }
        }
    }

    /// The overlay context.
    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// The display connection.
    pub fn display(&self) -> &D {
        &self.display
    }

    /// The display connection, mutably.
    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    /// The child supervisor.
    pub fn supervisor(&self) -> &ProcessSupervisor<T> {
        &self.supervisor
    }

    /// The buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Current surface size.
    pub fn surface_size(&self) -> Size {
        self.surface_size
    }

    /// Counters so far.
    pub fn stats(&self) -> LoopStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::HeadlessDisplay;
    use crate::supervisor::tests::RecordingTimer;
    use nix::sys::signal::raise;
    use pretty_assertions::assert_eq;
    use wtw_core::{OverlayConfig, RestartPeriod};
    use wtw_text::FixedFont;

    fn context() -> AppContext {
        let config = OverlayConfig::default().with_restart(RestartPeriod::Never);
        AppContext::new(config, Box::new(FixedFont::new(8, 16))).unwrap()
    }

    fn sh(script: &str) -> Vec<OsString> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    fn setup(
        display: HeadlessDisplay,
        script: &str,
    ) -> Result<EventLoop<HeadlessDisplay, RecordingTimer>, SetupError> {
        EventLoop::with_timer(context(), display, sh(script), RecordingTimer::default())
    }

    #[test]
    fn empty_command_is_a_setup_error() {
        let display = HeadlessDisplay::new(Size::new(10, 10)).unwrap();
        let err = EventLoop::with_timer(context(), display, Vec::new(), RecordingTimer::default())
            .unwrap_err();
        assert!(matches!(err, SetupError::EmptyCommand));
    }

    #[test]
    fn missing_layer_shell_is_a_setup_error() {
        let display = HeadlessDisplay::new(Size::new(10, 10))
            .unwrap()
            .with_capabilities(Capabilities::COMPOSITOR | Capabilities::SHM);
        let err = setup(display, "true").unwrap_err();
        assert!(matches!(
            err,
            SetupError::MissingCapabilities(missing) if missing == Capabilities::LAYER_SHELL
        ));
    }

    #[test]
    fn setup_waits_for_configure() {
        let display = HeadlessDisplay::new(Size::new(320, 200)).unwrap();
        let event_loop = setup(display, "true").unwrap();
        assert_eq!(event_loop.surface_size(), Size::new(320, 200));
    }

    #[test]
    fn frames_replace_each_other() {
        let display = HeadlessDisplay::new(Size::new(200, 100))
            .unwrap()
            .with_recording(true)
            .with_frame_limit(2);
        let mut event_loop = setup(
            display,
            r"printf 'hello\n\004\n'; sleep 0.1; printf 'world\nfoo\n\004\n'; sleep 5",
        )
        .unwrap();
        let stats = event_loop.run().unwrap();
        assert_eq!(stats.frames_rendered, 2);

        let frames = event_loop.display().frames();
        assert_eq!(frames.len(), 2);
        let bg = context().config().colors.bg.to_premultiplied_argb();
        // "hello": one line of five 8px cells.
        assert_eq!(frames[0].bounds_of(bg).map(|r| (r.width, r.height)), Some((40, 16)));
        // "world" / "foo": widest line is five cells, two lines.
        assert_eq!(frames[1].bounds_of(bg).map(|r| (r.width, r.height)), Some((40, 32)));
    }

    #[test]
    fn released_buffers_leave_the_pool() {
        let display = HeadlessDisplay::new(Size::new(64, 32))
            .unwrap()
            .with_frame_limit(3);
        let mut event_loop = setup(
            display,
            r"for i in 1 2 3; do printf 'x\n\004\n'; sleep 0.05; done; sleep 5",
        )
        .unwrap();
        event_loop.run().unwrap();
        // The last release is queued with the close and dispatched with it.
        assert_eq!(event_loop.stats().buffers_released, 3);
        assert!(event_loop.pool().is_empty());
    }

    #[test]
    fn terminate_signal_ends_loop_with_error() {
        let display = HeadlessDisplay::new(Size::new(10, 10)).unwrap();
        let mut event_loop = setup(display, "sleep 5").unwrap();
        raise(Signal::SIGTERM).unwrap();
        let err = event_loop.run().unwrap_err();
        assert!(matches!(err, RuntimeError::Terminated(Signal::SIGTERM)));
    }

    #[test]
    fn display_hangup_is_fatal() {
        let display = HeadlessDisplay::new(Size::new(10, 10)).unwrap();
        let mut event_loop = setup(display, "sleep 5").unwrap();
        event_loop.display_mut().hang_up();
        let err = event_loop.run().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Display(DisplayError::Disconnected)
        ));
    }
}
