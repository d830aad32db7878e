//! Human-readable error descriptions and structured JSON error formatting.

use psu_core::error::{BuildError, PsuError};

/// Ways a `set` run ends early.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunAbort {
    #[error("overcurrent: {current:.1} mA exceeded limit {limit:.1} mA")]
    Overcurrent { current: f64, limit: f64 },
    #[error("current monitoring failed: {0}")]
    MonitorFault(String),
    #[error("interrupted")]
    Interrupted,
}

impl RunAbort {
    pub fn name(&self) -> &'static str {
        match self {
            RunAbort::Overcurrent { .. } => "Overcurrent",
            RunAbort::MonitorFault(_) => "MonitorFault",
            RunAbort::Interrupted => "Interrupted",
        }
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingBus => {
                "What happened: No bus was provided to the controller.\nLikely causes: The DAC/ADC backend failed to initialize.\nHow to fix: Check the hardware setup or run against the simulator.".to_string()
            }
            BuildError::MissingNotifier => {
                "What happened: No event sink was provided to the controller.\nLikely causes: Internal wiring error in the CLI.\nHow to fix: Report this as a bug.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(abort) = err.downcast_ref::<RunAbort>() {
        return match abort {
            RunAbort::Overcurrent { current, limit } => format!(
                "What happened: Overcurrent trip ({current:.1} mA > {limit:.1} mA); the output was switched off.\nLikely causes: Load resistance too low for the requested voltage, or a short.\nHow to fix: Check the load and wiring, lower the voltage, or raise limits.max_current_ma if the load is expected."
            ),
            RunAbort::MonitorFault(msg) => format!(
                "What happened: Current monitoring stopped on a hardware fault ({msg}); the output was switched off.\nLikely causes: ADC scan overrun or bus error.\nHow to fix: Check the ADC connection and adc.scan_rate_hz, then rerun."
            ),
            RunAbort::Interrupted => {
                "What happened: Interrupted by the user; the output was switched off.".to_string()
            }
        };
    }

    if let Some(pe) = err.downcast_ref::<PsuError>() {
        return match pe {
            PsuError::Validation(msg) => format!(
                "What happened: Request rejected ({msg}).\nLikely causes: Voltage outside [limits.min_voltage, 0] or too few correction pairs.\nHow to fix: Adjust the arguments and retry."
            ),
            PsuError::State(msg) => format!(
                "What happened: Command not allowed right now ({msg}).\nLikely causes: Supply not calibrated, or a sweep/monitor session is running.\nHow to fix: Calibrate first, or stop monitoring before calibrating."
            ),
            PsuError::Hardware(msg) => format!(
                "What happened: Hardware error ({msg}).\nLikely causes: SPI/ADC wiring, power, or a failing converter.\nHow to fix: Check connections and power, then rerun with --log-level=debug."
            ),
            PsuError::Timeout => {
                "What happened: Hardware did not respond in time.\nLikely causes: ADC not scanning or bus stalled.\nHow to fix: Check the ADC and consider raising adc.read_timeout_ms.".to_string()
            }
            PsuError::Numerical(msg) => format!(
                "What happened: Correction fit failed ({msg}).\nLikely causes: All raw readings identical or values out of range.\nHow to fix: Measure at several different currents and retry."
            ),
            PsuError::Internal(msg) => format!(
                "What happened: Internal error ({msg}).\nHow to fix: Re-run with --log-level=debug and report the log."
            ),
        };
    }

    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("correction csv must have headers") {
        return "Invalid headers in correction CSV. Expected 'raw_ma,true_ma'.".to_string();
    }

    if lower.contains("invalid configuration") {
        let cause = err.root_cause();
        return format!(
            "What happened: Configuration is invalid ({cause}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
        );
    }

    if lower.contains("load config") || lower.contains("parse config") {
        let cause = err.root_cause();
        return format!(
            "What happened: Could not load the config file.\nLikely causes: {cause}\nHow to fix: Fix the TOML syntax or point --config at a valid file."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error kind; anything unclassified returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(abort) = err.downcast_ref::<RunAbort>() {
        return match abort {
            RunAbort::Overcurrent { .. } => 7,
            RunAbort::MonitorFault(_) => 5,
            RunAbort::Interrupted => 130,
        };
    }
    if let Some(pe) = err.downcast_ref::<PsuError>() {
        return match pe {
            PsuError::Validation(_) => 3,
            PsuError::State(_) => 4,
            PsuError::Hardware(_) | PsuError::Timeout => 5,
            PsuError::Numerical(_) => 6,
            PsuError::Internal(_) => 1,
        };
    }
    1
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let reason = if let Some(abort) = err.downcast_ref::<RunAbort>() {
        abort.name()
    } else if let Some(pe) = err.downcast_ref::<PsuError>() {
        pe.kind()
    } else if err.downcast_ref::<BuildError>().is_some() {
        "build"
    } else {
        "Error"
    };

    let mut obj = json!({ "reason": reason, "message": humanize(err) });
    if let Some(RunAbort::Overcurrent { current, limit }) = err.downcast_ref::<RunAbort>() {
        obj["details"] = json!({ "current": current, "limit": limit });
    }
    obj.to_string()
}
