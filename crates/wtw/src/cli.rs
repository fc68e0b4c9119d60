#![forbid(unsafe_code)]

//! Command-line interface.
//!
//! Short flags follow the classic `wtw` usage line; every option also has a
//! long form and a `WTW_*` environment variable.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{ArgAction, Parser, ValueEnum};
use wtw_core::logging::LogFormat;
use wtw_core::{
    ColorScheme, LayerOptions, OverlayConfig, OverlayGeometry, RestartPeriod, Rgba, ShellLayer,
    Size,
};
use wtw_runtime::HeadlessDisplay;
use wtw_text::{FixedFont, FontBackend, FontError};

/// Size written as `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions(pub Size);

impl FromStr for Dimensions {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| format!("{v:?} is not a positive integer"))
        };
        Ok(Self(Size::new(parse(w)?, parse(h)?)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormatArg {
    #[default]
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}

/// Where frames are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BackendArg {
    /// A compositor with the wlr layer shell.
    #[default]
    Wayland,
    /// An in-process display; see `--output`, `--dump` and `--frames`.
    Headless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LayerArg {
    Background,
    #[default]
    Bottom,
    Top,
    Overlay,
}

impl From<LayerArg> for ShellLayer {
    fn from(arg: LayerArg) -> Self {
        match arg {
            LayerArg::Background => Self::Background,
            LayerArg::Bottom => Self::Bottom,
            LayerArg::Top => Self::Top,
            LayerArg::Overlay => Self::Overlay,
        }
    }
}

/// Show a command's output as an on-screen text overlay.
///
/// The command's stdout is read line by line; a line equal to the
/// delimiter ends a frame, and each frame replaces the text on screen.
#[derive(Debug, Parser)]
#[command(name = "wtw", version, about, disable_help_flag = true)]
pub struct Cli {
    /// Background color (rrggbb or rrggbbaa).
    #[arg(short = 'b', long, env = "WTW_BACKGROUND", default_value = "000000ff")]
    pub background: Rgba,

    /// Text color (rrggbb or rrggbbaa).
    #[arg(short = 'c', long, env = "WTW_COLOR", default_value = "bbbbbbff")]
    pub color: Rgba,

    /// Font pattern, e.g. `monospace:size=16` or `/path/to/font.ttf:pixelsize=20`.
    #[arg(short = 'f', long, env = "WTW_FONT", default_value = wtw_core::config::DEFAULT_FONT)]
    pub font: String,

    /// Use built-in box glyphs of ADVANCExHEIGHT pixels instead of a font file.
    #[arg(long, env = "WTW_FIXED_FONT", value_name = "ADVANCExHEIGHT")]
    pub fixed_font: Option<Dimensions>,

    /// Seconds between restarts of the command: negative restarts at once,
    /// 0 runs it only once.
    #[arg(
        short = 'p',
        long,
        env = "WTW_PERIOD",
        default_value_t = wtw_core::config::DEFAULT_PERIOD_SECS,
        allow_negative_numbers = true
    )]
    pub period: i64,

    /// Surface width in pixels (0 = fill the output).
    #[arg(short = 'w', long, env = "WTW_WIDTH", default_value_t = 0)]
    pub width: u32,

    /// Surface height in pixels (0 = fill the output).
    #[arg(short = 'h', long, env = "WTW_HEIGHT", default_value_t = 0)]
    pub height: u32,

    /// Horizontal position of the text block.
    #[arg(short = 'x', long, env = "WTW_X", default_value_t = 0, allow_negative_numbers = true)]
    pub x: i32,

    /// Vertical position of the text block.
    #[arg(short = 'y', long, env = "WTW_Y", default_value_t = 0, allow_negative_numbers = true)]
    pub y: i32,

    /// Padding around the text, in pixels.
    #[arg(short = 'P', long, env = "WTW_PADDING", default_value_t = 0)]
    pub padding: u32,

    /// Line that ends a frame.
    #[arg(short = 'd', long, env = "WTW_DELIMITER", default_value = wtw_core::config::DEFAULT_DELIMITER)]
    pub delimiter: String,

    /// Outline the text block in the text color.
    #[arg(long, env = "WTW_OUTLINE")]
    pub outline: bool,

    /// Layer-surface namespace.
    #[arg(long, env = "WTW_NAMESPACE", default_value = "text")]
    pub namespace: String,

    /// Stacking layer of the overlay.
    #[arg(long, env = "WTW_LAYER", value_enum, default_value_t = LayerArg::Bottom)]
    pub layer: LayerArg,

    /// Display backend.
    #[arg(long, env = "WTW_BACKEND", value_enum, default_value_t = BackendArg::Wayland)]
    pub backend: BackendArg,

    /// Output size of the headless display.
    #[arg(long, env = "WTW_OUTPUT", default_value = "1920x1080", value_name = "WIDTHxHEIGHT")]
    pub output: Dimensions,

    /// Write each presented frame to this file as PPM.
    #[arg(long, env = "WTW_DUMP", value_name = "PATH")]
    pub dump: Option<PathBuf>,

    /// Close the surface after this many frames.
    #[arg(long, env = "WTW_FRAMES", value_name = "N")]
    pub frames: Option<u64>,

    /// More log output (repeatable).
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log record format.
    #[arg(long, env = "WTW_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    /// Print help.
    #[arg(long, action = ArgAction::Help)]
    pub help: Option<bool>,

    /// Command to run, followed by its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<OsString>,
}

impl Cli {
    /// Overlay configuration from the flags.
    pub fn overlay_config(&self) -> OverlayConfig {
        OverlayConfig {
            colors: ColorScheme::new(self.color, self.background),
            font: self.font.clone(),
            restart: RestartPeriod::from_secs(self.period),
            padding: self.padding,
            geometry: OverlayGeometry {
                width: self.width,
                height: self.height,
                x: self.x,
                y: self.y,
            },
            delimiter: self.delimiter.clone(),
            outline: self.outline,
            layer: LayerOptions {
                namespace: self.namespace.clone(),
                layer: self.layer.into(),
                ..LayerOptions::default()
            },
        }
    }

    /// Load the font the flags ask for.
    pub fn load_font(&self) -> Result<Box<dyn FontBackend>, FontError> {
        match self.fixed_font {
            Some(Dimensions(size)) => Ok(Box::new(FixedFont::new(size.width, size.height))),
            None => Ok(Box::new(wtw_text::font::load(&self.font)?)),
        }
    }

    /// Open the headless display the flags describe.
    pub fn open_headless(&self) -> io::Result<HeadlessDisplay> {
        let mut display = HeadlessDisplay::new(self.output.0)?;
        if let Some(path) = &self.dump {
            display = display.with_dump(path);
        }
        if let Some(frames) = self.frames {
            display = display.with_frame_limit(frames);
        }
        Ok(display)
    }
}
