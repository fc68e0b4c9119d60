#![forbid(unsafe_code)]

//! Child-process lifecycle: start, reap, and restart cadence.
//!
//! The supervisor runs one command at a time with its stdout piped back to
//! the overlay. Restart decisions are made by [`RestartScheduler`], a pure
//! state machine driven by three events (child exited, timer fired, spawn
//! attempted) and a [`RestartTimer`] it arms.
//!
//! A new child is started only when a restart is due, no child is running,
//! and the previous child's output pipe has been read to the end.
//!
//! | state             | child | pipe   | restart due |
//! |-------------------|-------|--------|-------------|
//! | `Idle`            | none  | closed | no          |
//! | `Running`         | yes   | any    | any         |
//! | `Draining`        | none  | open   | any         |
//! | `RestartPending`  | none  | closed | yes         |

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::process::CommandExt;
use std::process::{ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::signal::{Signal, killpg};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, alarm};
use wtw_core::RestartPeriod;

/// Delay before retrying a failed spawn under [`RestartPeriod::Immediate`].
pub const SPAWN_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// How long a child gets to exit after `SIGTERM` at teardown before the
/// group is sent `SIGKILL`.
pub const TEARDOWN_GRACE: Duration = Duration::from_millis(500);

// ── Timer ─────────────────────────────────────────────────────────────────

/// One-shot timer whose expiry is reported back through
/// [`RestartScheduler::on_timer`]. Arming replaces any earlier deadline.
pub trait RestartTimer {
    /// Fire once after `after`.
    fn arm(&mut self, after: Duration);
    /// Forget any pending deadline.
    fn cancel(&mut self);
}

/// Timer backed by `alarm(2)`; expiry arrives as `SIGALRM`.
#[derive(Debug, Default)]
pub struct AlarmTimer {
    armed: bool,
}

impl RestartTimer for AlarmTimer {
    fn arm(&mut self, after: Duration) {
        // alarm(0) would cancel, so round sub-second periods up.
        let secs = after.as_secs() + u64::from(after.subsec_nanos() > 0);
        let secs = u32::try_from(secs).unwrap_or(u32::MAX).max(1);
        let _previous = alarm::set(secs);
        self.armed = true;
    }

    fn cancel(&mut self) {
        if self.armed {
            alarm::cancel();
            self.armed = false;
        }
    }
}

impl Drop for AlarmTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────────

/// Restart decisions, independent of real processes.
#[derive(Debug)]
pub struct RestartScheduler<T> {
    period: RestartPeriod,
    due: bool,
    timer: T,
}

impl<T: RestartTimer> RestartScheduler<T> {
    /// A scheduler with the first start already due.
    pub fn new(period: RestartPeriod, timer: T) -> Self {
        Self {
            period,
            due: true,
            timer,
        }
    }

    /// Configured period.
    pub fn period(&self) -> RestartPeriod {
        self.period
    }

    /// Whether a start is due.
    pub fn is_due(&self) -> bool {
        self.due
    }

    /// Whether a start should happen now.
    pub fn should_spawn(&self, child_running: bool, pipe_open: bool) -> bool {
        self.due && !child_running && !pipe_open
    }

    /// A start was attempted; the due flag is consumed either way.
    pub fn spawned(&mut self) {
        self.due = false;
    }

    /// The start failed: try again after the period (or the back-off for
    /// immediate restarts). A run-once command stays stopped.
    pub fn spawn_failed(&mut self) {
        self.due = false;
        match self.period {
            RestartPeriod::Immediate => self.timer.arm(SPAWN_RETRY_BACKOFF),
            RestartPeriod::After(period) => self.timer.arm(period),
            RestartPeriod::Never => {}
        }
    }

    /// The child was reaped.
    pub fn on_exit(&mut self) {
        match self.period {
            RestartPeriod::Immediate => self.due = true,
            RestartPeriod::After(period) if !self.due => self.timer.arm(period),
            RestartPeriod::After(_) => {}
            RestartPeriod::Never => self.timer.cancel(),
        }
    }

    /// The timer fired. Ignored while a child runs.
    pub fn on_timer(&mut self, child_running: bool) {
        if !child_running {
            self.due = true;
        }
    }

    /// The timer, for inspection.
    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// The timer, for driving it from tests or a simulated clock.
    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────

/// Lifecycle state, derived from the child, pipe, and due flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running,
    Draining,
    RestartPending,
}

/// How the last child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Exited with a status code.
    Exited(i32),
    /// Killed by a signal.
    Signaled(Signal),
    /// Gone, but its status was collected by someone else.
    Lost,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit status {code}"),
            Self::Signaled(signal) => write!(f, "killed by {signal}"),
            Self::Lost => write!(f, "exit status unavailable"),
        }
    }
}

/// Counters for a supervisor's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupervisorStats {
    /// Children started.
    pub spawns: u64,
    /// Start attempts that failed.
    pub spawn_failures: u64,
    /// Children reaped.
    pub reaps: u64,
}

/// Runs the command and restarts it according to its period.
pub struct ProcessSupervisor<T: RestartTimer = AlarmTimer> {
    command: Vec<OsString>,
    scheduler: RestartScheduler<T>,
    pid: Option<Pid>,
    pipe: Option<ChildStdout>,
    last_exit: Option<ExitReason>,
    stats: SupervisorStats,
}

impl<T: RestartTimer> fmt::Debug for ProcessSupervisor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("command", &self.command)
            .field("state", &self.state())
            .field("pid", &self.pid)
            .field("last_exit", &self.last_exit)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<T: RestartTimer> ProcessSupervisor<T> {
    /// Supervise `command` (program followed by arguments). The first start
    /// is due immediately.
    pub fn new(command: Vec<OsString>, period: RestartPeriod, timer: T) -> Self {
        Self {
            command,
            scheduler: RestartScheduler::new(period, timer),
            pid: None,
            pipe: None,
            last_exit: None,
            stats: SupervisorStats::default(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SupervisorState {
        match (self.pid, self.pipe.is_some(), self.scheduler.is_due()) {
            (Some(_), _, _) => SupervisorState::Running,
            (None, true, _) => SupervisorState::Draining,
            (None, false, true) => SupervisorState::RestartPending,
            (None, false, false) => SupervisorState::Idle,
        }
    }

    /// Pid of the running child.
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// How the last child ended.
    pub fn last_exit(&self) -> Option<ExitReason> {
        self.last_exit
    }

    /// Lifetime counters.
    pub fn stats(&self) -> SupervisorStats {
        self.stats
    }

    /// Restart scheduler.
    pub fn scheduler(&self) -> &RestartScheduler<T> {
        &self.scheduler
    }

    /// The child's output, while open.
    pub fn pipe(&self) -> Option<BorrowedFd<'_>> {
        self.pipe.as_ref().map(AsFd::as_fd)
    }

    /// The child's output, for reading.
    pub fn pipe_mut(&mut self) -> Option<&mut ChildStdout> {
        self.pipe.as_mut()
    }

    /// The output reached end of file (or failed); stop watching it.
    pub fn close_pipe(&mut self) {
        if self.pipe.take().is_some() {
            tracing::debug!(state = ?self.state(), "child output closed");
        }
    }

    /// Start the command if a restart is due and the previous run is fully
    /// drained. Returns true if a child was started.
    ///
    /// Spawn failures are logged and leave the supervisor idle with the
    /// timer re-armed.
    pub fn spawn_if_due(&mut self) -> bool {
        if !self
            .scheduler
            .should_spawn(self.pid.is_some(), self.pipe.is_some())
        {
            return false;
        }
        match self.spawn() {
            Ok(pid) => {
                self.scheduler.spawned();
                self.stats.spawns += 1;
                tracing::info!(pid = pid.as_raw(), spawns = self.stats.spawns, "child started");
                true
            }
            Err(err) => {
                self.scheduler.spawn_failed();
                self.stats.spawn_failures += 1;
                tracing::error!(
                    command = ?self.command.first(),
                    %err,
                    "could not start child"
                );
                false
            }
        }
    }

    fn spawn(&mut self) -> io::Result<Pid> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()?;
        let pid = Pid::from_raw(
            i32::try_from(child.id()).map_err(|_| io::Error::other("pid out of range"))?,
        );
        let Some(stdout) = child.stdout.take() else {
            return Err(io::Error::other("child stdout was not captured"));
        };
        set_nonblocking(&stdout)?;
        self.pid = Some(pid);
        self.pipe = Some(stdout);
        Ok(pid)
    }

    /// Collect the child if it has exited, without blocking, and apply the
    /// restart period. Returns the number of children collected (0 or 1).
    ///
    /// Stop/continue notifications are ignored; interrupted waits are
    /// retried.
    pub fn reap(&mut self) -> io::Result<usize> {
        let Some(pid) = self.pid else {
            return Ok(0);
        };
        let _span = tracing::debug_span!("reap", pid = pid.as_raw()).entered();
        let reason = loop {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break None,
                Ok(status) => match exit_reason(status) {
                    Some(reason) => break Some(reason),
                    None => continue,
                },
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    tracing::warn!("child was collected elsewhere; exit status lost");
                    break Some(ExitReason::Lost);
                }
                Err(err) => return Err(err.into()),
            }
        };
        let Some(reason) = reason else {
            return Ok(0);
        };

        self.pid = None;
        self.last_exit = Some(reason);
        self.stats.reaps += 1;
        self.scheduler.on_exit();
        tracing::info!(%reason, state = ?self.state(), "child exited");
        Ok(1)
    }

    /// The restart timer fired.
    pub fn on_timer(&mut self) {
        self.scheduler.on_timer(self.pid.is_some());
        tracing::debug!(due = self.scheduler.is_due(), "restart timer fired");
    }
}

impl<T: RestartTimer> Drop for ProcessSupervisor<T> {
    fn drop(&mut self) {
        let Some(pid) = self.pid.take() else {
            return;
        };
        let _span = tracing::debug_span!("teardown", pid = pid.as_raw()).entered();
        signal_group(pid, Signal::SIGTERM);
        let reason = match wait_for_exit(pid, Some(TEARDOWN_GRACE)) {
            Ok(Some(reason)) => reason,
            Ok(None) => {
                tracing::warn!(grace = ?TEARDOWN_GRACE, "child ignored SIGTERM; killing its group");
                signal_group(pid, Signal::SIGKILL);
                match wait_for_exit(pid, None) {
                    Ok(Some(reason)) => reason,
                    Ok(None) => return,
                    Err(err) => {
                        tracing::warn!(%err, "could not collect child");
                        return;
                    }
                }
            }
            Err(Errno::ECHILD) => ExitReason::Lost,
            Err(err) => {
                tracing::warn!(%err, "could not collect child");
                return;
            }
        };
        tracing::debug!(%reason, "child group terminated");
    }
}

fn signal_group(pid: Pid, signal: Signal) {
    match killpg(pid, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => tracing::warn!(%signal, %err, "could not signal child group"),
    }
}

fn exit_reason(status: WaitStatus) -> Option<ExitReason> {
    match status {
        WaitStatus::Exited(_, code) => Some(ExitReason::Exited(code)),
        WaitStatus::Signaled(_, signal, _) => Some(ExitReason::Signaled(signal)),
        _ => None,
    }
}

/// Wait for `pid` to exit, polling for at most `grace`, or blocking when
/// no grace is given. `Ok(None)` means it was still running at the deadline.
fn wait_for_exit(pid: Pid, grace: Option<Duration>) -> Result<Option<ExitReason>, Errno> {
    const POLL_INTERVAL: Duration = Duration::from_millis(10);
    let deadline = grace.map(|grace| Instant::now() + grace);
    let flags = deadline.map(|_| WaitPidFlag::WNOHANG);
    loop {
        match waitpid(pid, flags) {
            Ok(WaitStatus::StillAlive) => match deadline {
                Some(deadline) if Instant::now() < deadline => {
                    std::thread::sleep(POLL_INTERVAL);
                }
                _ => return Ok(None),
            },
            Ok(status) => {
                if let Some(reason) = exit_reason(status) {
                    return Ok(Some(reason));
                }
            }
            Err(Errno::EINTR) => {}
            Err(err) => return Err(err),
        }
    }
}

fn set_nonblocking(fd: &impl AsRawFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}
