#![forbid(unsafe_code)]

//! Logging and tracing support.
//!
//! Library crates log through `tracing` directly. Only the binary installs a
//! subscriber, once, through [`init`]. Output goes to stderr so the overlay
//! never interleaves with anything on stdout.

use tracing_subscriber::EnvFilter;

/// Crates whose verbosity follows the `-v` flags.
const CRATES: &[&str] = &["wtw", "wtw_core", "wtw_text", "wtw_render", "wtw_runtime"];

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line records.
    #[default]
    Pretty,
    /// One JSON object per record (requires the `tracing-json` feature).
    Json,
}

/// Map a `-v` count to a level name.
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Build the filter: `RUST_LOG` wins when set, otherwise every wtw crate
/// logs at the level chosen by `verbosity` and everything else at `warn`.
pub fn env_filter(verbosity: u8) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = level_for_verbosity(verbosity);
    let mut directives = String::from("warn");
    for krate in CRATES {
        directives.push(',');
        directives.push_str(krate);
        directives.push('=');
        directives.push_str(level);
    }
    EnvFilter::new(directives)
}

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed (tests, embedding).
pub fn init(verbosity: u8, format: LogFormat) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbosity))
        .with_writer(std::io::stderr)
        .with_target(true);

    match format {
        #[cfg(feature = "tracing-json")]
        LogFormat::Json => builder.json().try_init().is_ok(),
        #[cfg(not(feature = "tracing-json"))]
        LogFormat::Json => {
            let installed = builder.try_init().is_ok();
            if installed {
                tracing::warn!("JSON logging requested but the tracing-json feature is disabled");
            }
            installed
        }
        LogFormat::Pretty => builder.try_init().is_ok(),
    }
}
