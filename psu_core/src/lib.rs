#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core logic of the negative supply controller (hardware-agnostic).
//!
//! All hardware access goes through `psu_traits::Bus` (one DAC, one ADC on a
//! shared bus). The controller turns operator commands into DAC codes and keeps
//! a safety monitor running while the output is energized.
//!
//! ## Architecture
//!
//! - **Calibration**: sweep DAC codes, record (voltage, code) pairs (`calibration`)
//! - **Interpolation**: voltage → code over the table (`interpolate`)
//! - **Correction**: linear raw → true current model with OLS fit (`correction`)
//! - **Monitoring**: background scan with overcurrent cutoff (`monitor`)
//! - **Control**: command entry point and task lifecycle (`controller`)
//! - **Events**: typed notifications and their sinks (`events`)
//!
//! The bus and the mutable controller state share one lock (`station`), so a DAC
//! write and the code recorded for telemetry never disagree.

pub mod builder;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod correction;
pub mod error;
pub mod events;
pub mod hw_error;
pub mod interpolate;
pub mod mocks;
pub mod monitor;
pub mod station;
pub mod status;
pub mod util;

pub use builder::ControllerBuilder;
pub use calibration::{CalibrationPoint, CalibrationTable, SweepFailure, sweep};
pub use config::{ControllerCfg, Limits, MonitorCfg, SweepCfg};
pub use controller::{Command, Controller};
pub use correction::CorrectionModel;
pub use error::{BuildError, PsuError, Result};
pub use events::{ChannelNotifier, CurrentReading, Event, FanoutNotifier, Notifier, TracingNotifier};
pub use interpolate::voltage_to_code;
pub use monitor::{MonitorSession, MonitorState, StopReason};
pub use station::{ControllerState, Station};
pub use status::Status;
