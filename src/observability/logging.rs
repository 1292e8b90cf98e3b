//! Logging setup.
//!
//! Everything goes to stderr. Stdout carries recovered plaintexts and keys
//! and must stay parseable, so nothing else is ever written there.
//!
//! `-v` raises the level of this crate's own events only. Dependencies stay
//! at `warn` until `-vvv`, so a verbose run shows attack progress rather
//! than process-table noise. `RSARMAGEDDON_LOG_LEVEL` replaces the whole
//! filter with an env-filter directive.

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

use crate::cli::args::ColorChoice;

/// Environment variable that overrides the verbosity flags.
pub const LOG_LEVEL_ENV: &str = "RSARMAGEDDON_LOG_LEVEL";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with optional ANSI colors.
    #[default]
    Human,
    /// Newline-delimited JSON, one object per event.
    Json,
}

/// Filter directive for the given flags.
///
/// | flags   | directive                      |
/// |---------|--------------------------------|
/// | `-q`    | `error`                        |
/// | none    | `warn`                         |
/// | `-v`    | `warn,rsarmageddon=info`       |
/// | `-vv`   | `warn,rsarmageddon=debug`      |
/// | `-vvv`+ | `debug,rsarmageddon=trace`     |
#[must_use]
pub fn filter_directive(verbosity: u8, quiet: bool) -> String {
    let own = env!("CARGO_CRATE_NAME");
    match (quiet, verbosity) {
        (true, _) => "error".into(),
        (false, 0) => "warn".into(),
        (false, 1) => format!("warn,{own}=info"),
        (false, 2) => format!("warn,{own}=debug"),
        (false, _) => format!("debug,{own}=trace"),
    }
}

/// Initializes the global tracing subscriber.
///
/// Module targets are shown from `-vv` on, where runner and driver events
/// interleave. Uses `try_init()` so repeated calls are harmless.
pub fn init_logging(format: LogFormat, verbosity: u8, quiet: bool, color: ColorChoice) {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV)
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbosity, quiet)));

    let show_target = verbosity >= 2;

    let use_ansi = match color {
        ColorChoice::Auto => {
            std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
        }
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    };

    match format {
        LogFormat::Human => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(use_ansi)
                .with_target(show_target)
                .with_writer(std::io::stderr)
                .try_init();
        }
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_current_span(false)
                .with_target(show_target)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}
