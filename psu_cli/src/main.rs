mod cli;
mod commands;
mod error_fmt;
mod sim;
mod wire;

use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use commands::Output;
use crossbeam_channel as xch;
use error_fmt::{exit_code_for_error, format_error_json, humanize};
use eyre::WrapErr;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("warning: could not install error reporter: {e}");
    }

    if let Err(err) = run(cli) {
        tracing::error!(error = %err, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}

fn run(cli: Cli) -> eyre::Result<()> {
    let (cfg, found) = load_config(&cli.config)?;
    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;
    if !found {
        tracing::info!(path = %cli.config.display(), "config not found; using built-in defaults");
    }
    cfg.validate().wrap_err("invalid configuration")?;

    let out = Output { json: cli.json };
    match cli.cmd {
        Commands::Calibrate { sweep } => commands::calibrate(&cfg, sweep, out),
        Commands::Set {
            voltage,
            hold_ms,
            sweep,
        } => commands::set(
            &cfg,
            voltage,
            Duration::from_millis(hold_ms),
            sweep,
            out,
            &interrupts(),
        ),
        Commands::Fit { csv, pairs } => commands::fit(csv.as_deref(), pairs.as_deref(), out),
        Commands::Serve => commands::serve(&cfg, &interrupts()),
        Commands::SelfCheck => commands::self_check(&cfg, out),
    }
}

/// Returns the parsed config and whether the file existed.
fn load_config(path: &Path) -> eyre::Result<(psu_config::Config, bool)> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let cfg = toml::from_str::<psu_config::Config>(&text)
                .wrap_err_with(|| format!("parse config {}", path.display()))?;
            Ok((cfg, true))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok((psu_config::Config::default(), false))
        }
        Err(e) => Err(e).wrap_err_with(|| format!("load config {}", path.display())),
    }
}

/// Console layer on stderr (pretty or JSON), plus an optional JSON file layer.
///
/// `RUST_LOG` wins over `--log-level`; the file layer uses `logging.level`
/// (default info) so operators can keep a detailed record with a quiet console.
fn init_tracing(json: bool, level: &str, logging: &psu_config::Logging) -> eyre::Result<()> {
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    let console = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    };

    let file = match logging.file.as_deref() {
        Some(path) => {
            let path = Path::new(path);
            let dir = path
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name"))?;
            let appender = match logging.rotation.as_deref().unwrap_or("never") {
                "daily" => tracing_appender::rolling::daily(dir, name),
                "hourly" => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let filter = EnvFilter::try_new(logging.level.as_deref().unwrap_or("info"))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("initialize logging")?;
    Ok(())
}

/// Ctrl-C becomes a message; the first one wins, later ones are dropped.
fn interrupts() -> xch::Receiver<()> {
    let (tx, rx) = xch::bounded(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    }) {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
    }
    rx
}
