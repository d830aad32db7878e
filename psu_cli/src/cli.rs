//! CLI argument definitions and shared statics.

use clap::{ArgAction, ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "psu", version, about = "Negative bench supply controller")]
pub struct Cli {
    /// Path to config TOML (missing file means built-in defaults)
    #[arg(long, value_name = "FILE", default_value = "etc/psu_config.toml")]
    pub config: PathBuf,

    /// Print events and errors as JSON lines instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Sweep overrides shared by commands that calibrate first.
#[derive(clap::Args, Debug, Clone, Copy, Default)]
pub struct SweepArgs {
    /// DAC code increment (overrides calibration.step)
    #[arg(long, value_name = "CODES")]
    pub step: Option<u16>,
    /// Settle wait after each DAC write in ms (overrides calibration.settle_ms)
    #[arg(long = "settle-ms", value_name = "MS")]
    pub settle_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sweep the DAC and print the resulting calibration table
    Calibrate {
        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Calibrate, drive the output to a voltage, and monitor current until the hold time ends
    Set {
        /// Output voltage in volts (must be <= 0)
        #[arg(long, allow_hyphen_values = true)]
        voltage: f64,
        /// How long to hold the output before switching it off
        #[arg(long = "hold-ms", value_name = "MS", default_value_t = 1000)]
        hold_ms: u64,
        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Fit current-correction coefficients from measured pairs
    #[command(group(ArgGroup::new("source").required(true).args(["csv", "pairs"])))]
    Fit {
        /// CSV with header `raw_ma,true_ma`
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
        /// Inline pairs, `raw true` separated by `;` or newlines
        #[arg(long, value_name = "PAIRS")]
        pairs: Option<String>,
    },
    /// Read JSON-line commands on stdin and print events as JSON lines on stdout
    Serve,
    /// Quick health check (bus presence / sim ok)
    SelfCheck,
}
