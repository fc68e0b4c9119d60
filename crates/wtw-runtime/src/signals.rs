#![forbid(unsafe_code)]

//! Signal delivery as a pollable file descriptor.
//!
//! The loop thread blocks the signals it cares about and reads them from a
//! `signalfd`, so child exits, the restart alarm, and termination requests
//! arrive as ordinary readiness instead of interrupting arbitrary code.

use std::io;
use std::os::fd::{AsFd, BorrowedFd};

use nix::errno::Errno;
use nix::sys::signal::{SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};

/// Signals routed through the channel.
pub const HANDLED: [Signal; 4] = [
    Signal::SIGCHLD,
    Signal::SIGALRM,
    Signal::SIGTERM,
    Signal::SIGINT,
];

/// A signal, as the event loop sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    /// At least one child changed state.
    ChildExited,
    /// The restart alarm fired.
    Timer,
    /// The process was asked to stop.
    Terminate(Signal),
}

impl LoopSignal {
    fn from_signal(signal: Signal) -> Option<Self> {
        match signal {
            Signal::SIGCHLD => Some(Self::ChildExited),
            Signal::SIGALRM => Some(Self::Timer),
            Signal::SIGTERM | Signal::SIGINT => Some(Self::Terminate(signal)),
            _ => None,
        }
    }
}

/// Blocked signal set plus the descriptor that reports them.
///
/// Dropping the channel discards signals still queued on it, closes the
/// descriptor, and restores the calling thread's previous mask.
#[derive(Debug)]
pub struct SignalChannel {
    fd: SignalFd,
    previous: SigSet,
}

impl SignalChannel {
    /// Block [`HANDLED`] on the calling thread and open the descriptor.
    ///
    /// Must be called on the thread that runs the loop, before any other
    /// thread is spawned, so no thread is left with the signals unblocked.
    pub fn open() -> io::Result<Self> {
        let mut mask = SigSet::empty();
        for signal in HANDLED {
            mask.add(signal);
        }
        let previous = mask.thread_swap_mask(SigmaskHow::SIG_BLOCK)?;
        let fd = match SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC) {
            Ok(fd) => fd,
            Err(err) => {
                let _ = previous.thread_set_mask();
                return Err(err.into());
            }
        };
        tracing::debug!("signal channel open");
        Ok(Self { fd, previous })
    }

    /// Read every queued signal. Repeated signals of one kind collapse into
    /// a single entry, in first-seen order.
    pub fn drain(&mut self) -> io::Result<Vec<LoopSignal>> {
        let mut signals = Vec::new();
        loop {
            match self.fd.read_signal() {
                Ok(Some(info)) => {
                    let Some(signal) = i32::try_from(info.ssi_signo)
                        .ok()
                        .and_then(|n| Signal::try_from(n).ok())
                        .and_then(LoopSignal::from_signal)
                    else {
                        tracing::warn!(signo = info.ssi_signo, "unexpected signal on channel");
                        continue;
                    };
                    if !signals.contains(&signal) {
                        signals.push(signal);
                    }
                }
                Ok(None) | Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(signals)
    }
}

impl AsFd for SignalChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Drop for SignalChannel {
    fn drop(&mut self) {
        // Anything still queued would hit its default action once unblocked.
        match self.drain() {
            Ok(discarded) if !discarded.is_empty() => {
                tracing::debug!(?discarded, "discarding pending signals");
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, "could not drain signal channel"),
        }
        if let Err(err) = self.previous.thread_set_mask() {
            tracing::warn!(%err, "could not restore signal mask");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::raise;

    #[test]
    fn mapping_covers_handled_signals() {
        for signal in HANDLED {
            assert!(LoopSignal::from_signal(signal).is_some(), "{signal}");
        }
        assert_eq!(LoopSignal::from_signal(Signal::SIGUSR1), None);
    }

    #[test]
    fn raised_signals_are_read_and_coalesced() {
        let mut channel = SignalChannel::open().unwrap();
        assert!(channel.drain().unwrap().is_empty());

        raise(Signal::SIGTERM).unwrap();
        raise(Signal::SIGCHLD).unwrap();
        raise(Signal::SIGCHLD).unwrap();

        let signals = channel.drain().unwrap();
        assert_eq!(signals.len(), 2);
        assert!(signals.contains(&LoopSignal::Terminate(Signal::SIGTERM)));
        assert!(signals.contains(&LoopSignal::ChildExited));
        assert!(channel.drain().unwrap().is_empty());
    }

    #[test]
    fn queued_signals_do_not_fire_after_drop() {
        let channel = SignalChannel::open().unwrap();
        // Left pending, SIGALRM would end the test process when unblocked.
        raise(Signal::SIGALRM).unwrap();
        drop(channel);
        let mask = SigSet::thread_get_mask().unwrap();
        assert!(!mask.contains(Signal::SIGALRM));
    }
}
