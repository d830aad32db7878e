//! Subcommand implementations. Each builds a controller over the simulated bus,
//! drives it through its public API, and renders the events it publishes.

use crate::cli::SweepArgs;
use crate::error_fmt::RunAbort;
use crate::sim::make_bus;
use crate::wire::{Request, event_json, parse_line, status_json};
use crossbeam_channel as xch;
use eyre::WrapErr;
use psu_core::{
    ChannelNotifier, Controller, CorrectionModel, Event, FanoutNotifier, Notifier, SweepCfg,
    TracingNotifier,
};
use psu_hardware::SimulatedSupply;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

type SimController = Controller<SimulatedSupply>;

/// Where command output goes: JSON lines or short text lines, both on stdout.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    pub fn event(&self, ev: &Event) {
        if self.json {
            println!("{}", event_json(ev));
            return;
        }
        match ev {
            Event::CalibrationStarted => println!("calibrating..."),
            Event::CalibrationUpdate { .. } => {}
            Event::CalibrationComplete {
                point_count,
                min_voltage,
                max_voltage,
            } => println!(
                "calibration complete: {point_count} points ({min_voltage:.3} V .. {max_voltage:.3} V)"
            ),
            Event::VoltageSet { voltage, code } => {
                println!("output set to {voltage:.3} V (code {code})")
            }
            Event::CurrentData(r) => println!(
                "I = {:.1} mA (raw {:.1} mA, shunt {:.4} V, code {})",
                r.corrected_current, r.measured_current, r.shunt_voltage, r.dac_code
            ),
            Event::Overcurrent { current, limit } => {
                println!("OVERCURRENT {current:.1} mA > {limit:.1} mA, output off")
            }
            Event::MonitoringStopped => println!("monitoring stopped, output at 0 V"),
            Event::CorrectionUpdated { a, b } => println!("correction: a = {a:.6}, b = {b:.6}"),
            Event::Error { message } => println!("error: {message}"),
        }
    }
}

fn build(
    cfg: &psu_config::Config,
) -> eyre::Result<(SimController, xch::Receiver<Event>, Arc<ChannelNotifier>)> {
    let (notifier, rx) = ChannelNotifier::new();
    let notifier = Arc::new(notifier);
    // Events also go to the log, so a file sink keeps the full session record.
    let sinks: Vec<Arc<dyn Notifier>> = vec![Arc::new(TracingNotifier), notifier.clone()];
    let ctl = Controller::builder()
        .with_bus(make_bus(cfg)?)
        .with_notifier(FanoutNotifier::new(sinks))
        .apply_config(cfg)
        .try_build()?;
    Ok((ctl, rx, notifier))
}

fn sweep_params(defaults: &SweepCfg, args: SweepArgs) -> (u16, Duration) {
    (
        args.step.unwrap_or(defaults.step),
        args.settle_ms.map_or(defaults.settle, Duration::from_millis),
    )
}

/// Run a sweep to completion, rendering its events. Fails with the sweep's error.
fn run_calibration(
    ctl: &mut SimController,
    rx: &xch::Receiver<Event>,
    args: SweepArgs,
    out: Output,
) -> eyre::Result<()> {
    let (step, settle) = sweep_params(&ctl.config().sweep, args);
    ctl.request_calibration(step, settle)?;
    for ev in rx.iter() {
        let done = matches!(ev, Event::CalibrationComplete { .. } | Event::Error { .. });
        out.event(&ev);
        if done {
            break;
        }
    }
    ctl.wait_for_calibration();
    if let Some(e) = ctl.last_calibration_error() {
        return Err(e).wrap_err("calibration failed");
    }
    Ok(())
}

pub fn calibrate(cfg: &psu_config::Config, args: SweepArgs, out: Output) -> eyre::Result<()> {
    let (mut ctl, rx, _notifier) = build(cfg)?;
    run_calibration(&mut ctl, &rx, args, out)?;
    if !out.json {
        println!("{:>6}  {:>9}", "code", "volts");
        for p in ctl.calibration_table().points() {
            println!("{:>6}  {:>9.4}", p.code, p.voltage);
        }
    }
    Ok(())
}

pub fn set(
    cfg: &psu_config::Config,
    voltage: f64,
    hold: Duration,
    args: SweepArgs,
    out: Output,
    interrupt: &xch::Receiver<()>,
) -> eyre::Result<()> {
    let (mut ctl, rx, _notifier) = build(cfg)?;
    run_calibration(&mut ctl, &rx, args, out)?;
    ctl.set_voltage(voltage)
        .wrap_err_with(|| format!("set output to {voltage} V"))?;

    let deadline = xch::after(hold);
    let mut outcome: Result<(), RunAbort> = Ok(());
    let mut holding = true;
    while holding {
        xch::select! {
            recv(rx) -> ev => match ev {
                Ok(ev) => {
                    out.event(&ev);
                    match ev {
                        Event::Overcurrent { current, limit } => {
                            outcome = Err(RunAbort::Overcurrent { current, limit });
                            holding = false;
                        }
                        Event::Error { message } => {
                            outcome = Err(RunAbort::MonitorFault(message));
                            holding = false;
                        }
                        _ => {}
                    }
                }
                Err(_) => holding = false,
            },
            recv(deadline) -> _ => holding = false,
            recv(interrupt) -> _ => {
                outcome = Err(RunAbort::Interrupted);
                holding = false;
            }
        }
    }

    let stopped = ctl.stop_monitoring();
    for ev in rx.try_iter() {
        out.event(&ev);
    }
    outcome?;
    stopped?;
    Ok(())
}

pub fn fit(csv: Option<&Path>, pairs: Option<&str>, out: Output) -> eyre::Result<()> {
    let pairs = match (csv, pairs) {
        (Some(path), _) => psu_config::load_correction_csv(path)?,
        (None, Some(text)) => psu_config::parse_correction_pairs(&text.replace(';', "\n"))?,
        (None, None) => eyre::bail!("provide --csv or --pairs"),
    };
    let model = CorrectionModel::fit(&pairs.raw, &pairs.truth)?;
    info!(a = model.a, b = model.b, pairs = pairs.len(), "correction fitted");
    if out.json {
        println!(
            "{}",
            serde_json::json!({ "a": model.a, "b": model.b, "pairs": pairs.len() })
        );
    } else {
        println!("[correction]\na = {:.6}\nb = {:.6}", model.a, model.b);
    }
    Ok(())
}

pub fn self_check(cfg: &psu_config::Config, out: Output) -> eyre::Result<()> {
    let (mut ctl, rx, _notifier) = build(cfg)?;
    let quick = SweepArgs {
        step: Some(512),
        settle_ms: Some(0),
    };
    run_calibration(&mut ctl, &rx, quick, Output { json: false })
        .wrap_err("self-check sweep")?;
    let table = ctl.calibration_table();
    let (Some(lo), Some(hi)) = (table.min_voltage(), table.max_voltage()) else {
        eyre::bail!("self-check: sweep measured no negative output");
    };
    if out.json {
        println!(
            "{}",
            serde_json::json!({ "ok": true, "points": table.len(), "minVoltage": lo, "maxVoltage": hi })
        );
    } else {
        println!("OK ({} points, {lo:.3} V .. {hi:.3} V)", table.len());
    }
    Ok(())
}

/// JSON-lines transport: commands on stdin, events on stdout.
///
/// EOF or `quit` lets a running sweep finish before shutting down; an interrupt
/// shuts down immediately. Either way the output ends at 0.
pub fn serve(cfg: &psu_config::Config, interrupt: &xch::Receiver<()>) -> eyre::Result<()> {
    let (mut ctl, rx, notifier) = build(cfg)?;
    let defaults: SweepCfg = cfg.into();

    let printer = std::thread::spawn(move || {
        let stdout = std::io::stdout();
        for ev in rx.iter() {
            let mut w = stdout.lock();
            if writeln!(w, "{}", event_json(&ev)).and_then(|()| w.flush()).is_err() {
                break;
            }
        }
    });

    let (line_tx, line_rx) = xch::unbounded::<std::io::Result<String>>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    info!("serving JSON-line commands on stdin");
    let mut interrupted = false;
    let mut serving = true;
    while serving {
        xch::select! {
            recv(line_rx) -> msg => match msg {
                Ok(Ok(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        serving = dispatch(&mut ctl, &notifier, &defaults, line);
                    }
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "stdin read failed");
                    serving = false;
                }
                Err(_) => serving = false,
            },
            recv(interrupt) -> _ => {
                interrupted = true;
                serving = false;
            }
        }
    }

    if !interrupted {
        ctl.wait_for_calibration();
    }
    ctl.shutdown();
    drop(ctl);
    drop(notifier);
    if printer.join().is_err() {
        warn!("event printer panicked");
    }
    if interrupted {
        return Err(RunAbort::Interrupted.into());
    }
    Ok(())
}

/// Handle one transport line. Returns false when the client asked to quit.
fn dispatch(
    ctl: &mut SimController,
    notifier: &ChannelNotifier,
    defaults: &SweepCfg,
    line: &str,
) -> bool {
    match parse_line(line, defaults) {
        Ok(Request::Control(cmd)) => {
            // Rejections are already published as `error` events.
            let _ = ctl.handle(cmd);
        }
        Ok(Request::Status) => {
            let mut w = std::io::stdout().lock();
            let _ = writeln!(w, "{}", status_json(&ctl.status())).and_then(|()| w.flush());
        }
        Ok(Request::Quit) => return false,
        Err(e) => notifier.publish(Event::Error {
            message: format!("malformed command: {e}"),
        }),
    }
    true
}
