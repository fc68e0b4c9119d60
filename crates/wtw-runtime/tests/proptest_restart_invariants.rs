//! Property tests for restart scheduling, driven by a simulated clock.
//!
//! The child is modelled by random lifetimes and drain delays; the timer is
//! a deadline the simulation advances to.
//!
//! 1. Periodic policy: a restart never happens sooner than one period after
//!    the previous child exited.
//! 2. Periodic policy: at most one start per timer expiry (plus the first).
//! 3. Immediate policy: the next start happens as soon as the previous run
//!    is reaped and drained, without the timer.
//! 4. A start never overlaps a running child or an open pipe.
//! 5. Run-once policy: exactly one start.

use std::time::Duration;

use proptest::prelude::*;
use wtw_core::RestartPeriod;
use wtw_runtime::{RestartScheduler, RestartTimer};

#[derive(Debug, Default)]
struct SimTimer {
    now: Duration,
    deadline: Option<Duration>,
    expiries: u32,
}

impl RestartTimer for SimTimer {
    fn arm(&mut self, after: Duration) {
        self.deadline = Some(self.now + after);
    }

    fn cancel(&mut self) {
        self.deadline = None;
    }
}

#[derive(Debug, Clone, Copy)]
struct Run {
    /// Time from start to exit.
    life: Duration,
    /// Time from exit to pipe EOF.
    drain: Duration,
}

#[derive(Debug, Default)]
struct Trace {
    starts: Vec<Duration>,
    exits: Vec<Duration>,
}

/// Simulate until `runs` children have been started (or the schedule goes
/// quiet), returning start and exit times.
fn simulate(period: RestartPeriod, runs: &[Run]) -> (Trace, u32) {
    let mut sched = RestartScheduler::new(period, SimTimer::default());
    let mut trace = Trace::default();
    let mut now = Duration::ZERO;
    // (exit time, eof time) of the current child
    let mut current: Option<(Duration, Duration)> = None;
    let mut running = false;
    let mut pipe_open = false;
    let mut next = 0usize;

    for _ in 0..10_000 {
        sched.timer_mut().now = now;
        if sched.should_spawn(running, pipe_open) {
            assert!(!running && !pipe_open, "start overlaps previous run");
            let Some(run) = runs.get(next) else { break };
            next += 1;
            sched.spawned();
            trace.starts.push(now);
            current = Some((now + run.life, now + run.life + run.drain));
            running = true;
            pipe_open = true;
            continue;
        }

        // Next event: exit, EOF, or timer expiry.
        let mut candidates = Vec::new();
        if let Some((exit, eof)) = current {
            if running {
                candidates.push(exit);
            }
            if pipe_open {
                candidates.push(eof);
            }
        }
        if let Some(deadline) = sched.timer().deadline {
            candidates.push(deadline);
        }
        let Some(&at) = candidates.iter().min() else { break };
        now = now.max(at);
        sched.timer_mut().now = now;

        if let Some((exit, eof)) = current {
            // Within one instant, signals are handled before pipe input.
            if running && exit <= now {
                running = false;
                trace.exits.push(exit);
                sched.on_exit();
            }
            if pipe_open && eof <= now {
                pipe_open = false;
            }
        }
        if sched.timer().deadline.is_some_and(|d| d <= now) {
            sched.timer_mut().deadline = None;
            sched.timer_mut().expiries += 1;
            sched.on_timer(running);
        }
    }
    let expiries = sched.timer().expiries;
    (trace, expiries)
}

fn run_strategy() -> impl Strategy<Value = Run> {
    (0u64..12_000, 0u64..3_000).prop_map(|(life, drain)| Run {
        life: Duration::from_millis(life),
        drain: Duration::from_millis(drain),
    })
}

proptest! {
    #[test]
    fn periodic_restart_waits_a_full_period(
        secs in 1u64..10,
        runs in prop::collection::vec(run_strategy(), 1..12),
    ) {
        let period = Duration::from_secs(secs);
        let (trace, expiries) = simulate(RestartPeriod::After(period), &runs);

        for (i, start) in trace.starts.iter().enumerate().skip(1) {
            let exit = trace.exits[i - 1];
            prop_assert!(
                *start >= exit + period,
                "start {} at {:?} only {:?} after exit",
                i, start, *start - exit
            );
        }
        prop_assert!(trace.starts.len() as u32 <= expiries + 1);
    }

    #[test]
    fn immediate_restart_follows_drain(
        runs in prop::collection::vec(run_strategy(), 1..12),
    ) {
        let (trace, expiries) = simulate(RestartPeriod::Immediate, &runs);
        prop_assert_eq!(trace.starts.len(), runs.len());
        prop_assert_eq!(expiries, 0);
        for i in 1..trace.starts.len() {
            let prev = runs[i - 1];
            let drained = trace.starts[i - 1] + prev.life + prev.drain;
            let expected = drained.max(trace.exits[i - 1]);
            prop_assert_eq!(trace.starts[i], expected);
        }
    }

    #[test]
    fn run_once_starts_exactly_once(
        runs in prop::collection::vec(run_strategy(), 1..6),
    ) {
        let (trace, _) = simulate(RestartPeriod::Never, &runs);
        prop_assert_eq!(trace.starts.len(), 1);
        prop_assert_eq!(trace.exits.len(), 1);
    }
}

#[test]
fn crash_loop_with_five_second_period() {
    // A child that dies instantly restarts at 0, 5, 10, ...
    let runs = vec![
        Run {
            life: Duration::ZERO,
            drain: Duration::ZERO,
        };
        4
    ];
    let (trace, _) = simulate(RestartPeriod::After(Duration::from_secs(5)), &runs);
    let secs: Vec<u64> = trace.starts.iter().map(Duration::as_secs).collect();
    assert_eq!(secs, vec![0, 5, 10, 15]);
}
