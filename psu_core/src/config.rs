//! Runtime configuration consumed by the controller.
//!
//! These are the typed, unit-carrying forms of the `psu_config` TOML sections
//! (see `conversions.rs`). Defaults match the bench board.
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepCfg {
    /// DAC code increment between calibration points.
    pub step: u16,
    /// Wait after each DAC write before sampling the output.
    pub settle: Duration,
    /// ADC channel wired to the supply output.
    pub voltage_channel: u8,
}

impl Default for SweepCfg {
    fn default() -> Self {
        Self {
            step: 32,
            settle: Duration::from_millis(50),
            voltage_channel: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorCfg {
    /// ADC channel wired to the shunt amplifier.
    pub current_channel: u8,
    pub scan_rate_hz: f64,
    /// Max wait for new samples per iteration.
    pub read_timeout: Duration,
    /// Sleep between iterations.
    pub poll_interval: Duration,
    pub shunt_ohms: f64,
    pub amp_gain: f64,
    /// Trip threshold applied to the corrected current (mA).
    pub max_current_ma: f64,
}

impl Default for MonitorCfg {
    fn default() -> Self {
        Self {
            current_channel: 5,
            scan_rate_hz: 1000.0,
            read_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            shunt_ohms: 0.1,
            amp_gain: 69.0,
            max_current_ma: 500.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    /// Most negative voltage accepted by `set_voltage`.
    pub min_voltage: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self { min_voltage: -10.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControllerCfg {
    pub sweep: SweepCfg,
    pub monitor: MonitorCfg,
    pub limits: Limits,
}
