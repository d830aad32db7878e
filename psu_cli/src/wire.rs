//! JSON-lines encoding of events and decoding of transport commands.

use psu_core::{Command, Event, Status};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// One event as a JSON object tagged by `"event"`, with camelCase payload fields.
pub fn event_json(event: &Event) -> Value {
    let tag = event.name();
    match event {
        Event::CalibrationStarted | Event::MonitoringStopped => json!({ "event": tag }),
        Event::CalibrationUpdate {
            code,
            voltage,
            percent,
        } => json!({ "event": tag, "code": code, "voltage": voltage, "percent": percent }),
        Event::CalibrationComplete {
            point_count,
            min_voltage,
            max_voltage,
        } => json!({
            "event": tag,
            "pointCount": point_count,
            "minVoltage": min_voltage,
            "maxVoltage": max_voltage,
        }),
        Event::VoltageSet { voltage, code } => {
            json!({ "event": tag, "voltage": voltage, "code": code })
        }
        Event::CurrentData(r) => json!({
            "event": tag,
            "shuntVoltage": r.shunt_voltage,
            "measuredCurrent": r.measured_current,
            "correctedCurrent": r.corrected_current,
            "dacCode": r.dac_code,
            "setVoltage": r.set_voltage,
        }),
        Event::Overcurrent { current, limit } => {
            json!({ "event": tag, "current": current, "limit": limit })
        }
        Event::CorrectionUpdated { a, b } => json!({ "event": tag, "a": a, "b": b }),
        Event::Error { message } => json!({ "event": tag, "message": message }),
    }
}

/// Reply to a `status` request.
pub fn status_json(s: &Status) -> Value {
    json!({
        "event": "status",
        "calibrated": s.is_calibrated(),
        "pointCount": s.point_count,
        "minVoltage": s.min_voltage,
        "maxVoltage": s.max_voltage,
        "partialPoints": s.partial_points,
        "correction": { "a": s.correction.a, "b": s.correction.b },
        "calibrating": s.calibrating,
        "monitoring": s.monitoring,
        "dacCode": s.last_code,
        "setVoltage": s.last_set_voltage,
    })
}

/// A line read by `serve`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WireCommand {
    StartCalibration {
        step: Option<u16>,
        #[serde(alias = "settle")]
        settle_ms: Option<u64>,
    },
    SetVoltage {
        voltage: f64,
    },
    StopMonitoring,
    UpdateCorrection {
        #[serde(rename = "rawValues", alias = "raw_values")]
        raw_values: Vec<f64>,
        #[serde(rename = "trueValues", alias = "true_values")]
        true_values: Vec<f64>,
    },
    Status,
    Quit,
}

/// What `serve` should do with a decoded line.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Control(Command),
    Status,
    Quit,
}

impl WireCommand {
    /// Fill defaults (`step`, `settle`) from the loaded sweep config.
    pub fn into_request(self, defaults: &psu_core::SweepCfg) -> Request {
        match self {
            WireCommand::StartCalibration { step, settle_ms } => {
                Request::Control(Command::StartCalibration {
                    step: step.unwrap_or(defaults.step),
                    settle: settle_ms.map_or(defaults.settle, Duration::from_millis),
                })
            }
            WireCommand::SetVoltage { voltage } => {
                Request::Control(Command::SetVoltage { voltage })
            }
            WireCommand::StopMonitoring => Request::Control(Command::StopMonitoring),
            WireCommand::UpdateCorrection {
                raw_values,
                true_values,
            } => Request::Control(Command::UpdateCorrection {
                raw: raw_values,
                truth: true_values,
            }),
            WireCommand::Status => Request::Status,
            WireCommand::Quit => Request::Quit,
        }
    }
}

pub fn parse_line(line: &str, defaults: &psu_core::SweepCfg) -> Result<Request, serde_json::Error> {
    serde_json::from_str::<WireCommand>(line).map(|c| c.into_request(defaults))
}
