#![forbid(unsafe_code)]

//! `wtw`: show what a command prints as a text overlay.
//!
//! Exit status: 0 once the surface is closed, 1 on setup or runtime
//! failure, 2 on a usage error.

mod cli;

use std::ffi::OsString;
use std::fmt;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, info};
use wtw_runtime::{AppContext, DisplayBackend, EventLoop, RuntimeError, SetupError};

use crate::cli::{BackendArg, Cli};

#[derive(Debug)]
enum AppError {
    Setup(SetupError),
    Runtime(RuntimeError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup(err) => write!(f, "{err}"),
            Self::Runtime(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Setup(err) => Some(err),
            Self::Runtime(err) => Some(err),
        }
    }
}

impl From<SetupError> for AppError {
    fn from(err: SetupError) -> Self {
        Self::Setup(err)
    }
}

impl From<RuntimeError> for AppError {
    fn from(err: RuntimeError) -> Self {
        Self::Runtime(err)
    }
}

fn run(cli: Cli) -> Result<(), AppError> {
    let config = cli.overlay_config();
    debug!(?config, "configuration");

    let font = cli.load_font().map_err(SetupError::from)?;
    let ctx = AppContext::new(config, font).map_err(SetupError::from)?;

    match cli.backend {
        BackendArg::Wayland => drive(ctx, open_wayland()?, cli.command),
        BackendArg::Headless => {
            let display = cli
                .open_headless()
                .map_err(|err| SetupError::Display(err.into()))?;
            drive(ctx, display, cli.command)
        }
    }
}

#[cfg(feature = "wayland")]
fn open_wayland() -> Result<wtw_runtime::WaylandDisplay, SetupError> {
    Ok(wtw_runtime::WaylandDisplay::connect()?)
}

#[cfg(not(feature = "wayland"))]
fn open_wayland() -> Result<wtw_runtime::HeadlessDisplay, SetupError> {
    Err(SetupError::Display(wtw_runtime::DisplayError::Unavailable(
        "built without the wayland feature".to_string(),
    )))
}

fn drive<D: DisplayBackend>(
    ctx: AppContext,
    display: D,
    command: Vec<OsString>,
) -> Result<(), AppError> {
    let mut event_loop = EventLoop::new(ctx, display, command)?;
    let stats = event_loop.run()?;
    info!(
        frames = stats.frames_rendered,
        skipped = stats.frames_skipped,
        truncated = stats.lines_truncated,
        spawns = event_loop.supervisor().stats().spawns,
        "done"
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    wtw_core::logging::init(cli.verbose, cli.log_format.into());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("wtw: {err}");
            ExitCode::FAILURE
        }
    }
}
