//! `From` implementations bridging `psu_config` types to `psu_core` types.

use crate::config::{ControllerCfg, Limits, MonitorCfg, SweepCfg};
use crate::controller::Command;
use crate::correction::CorrectionModel;
use std::time::Duration;

// ── SweepCfg ─────────────────────────────────────────────────────────────────

impl From<&psu_config::Config> for SweepCfg {
    fn from(c: &psu_config::Config) -> Self {
        Self {
            step: c.calibration.step,
            settle: Duration::from_millis(c.calibration.settle_ms),
            voltage_channel: c.adc.voltage_channel,
        }
    }
}

// ── MonitorCfg ───────────────────────────────────────────────────────────────

impl From<&psu_config::Config> for MonitorCfg {
    fn from(c: &psu_config::Config) -> Self {
        Self {
            current_channel: c.adc.current_channel,
            scan_rate_hz: c.adc.scan_rate_hz,
            read_timeout: Duration::from_millis(c.adc.read_timeout_ms),
            poll_interval: Duration::from_millis(c.monitor.poll_ms),
            shunt_ohms: c.monitor.shunt_ohms,
            amp_gain: c.monitor.amp_gain,
            max_current_ma: c.limits.max_current_ma,
        }
    }
}

// ── Limits ───────────────────────────────────────────────────────────────────

impl From<&psu_config::Limits> for Limits {
    fn from(c: &psu_config::Limits) -> Self {
        Self {
            min_voltage: c.min_voltage,
        }
    }
}

// ── ControllerCfg ────────────────────────────────────────────────────────────

impl From<&psu_config::Config> for ControllerCfg {
    fn from(c: &psu_config::Config) -> Self {
        Self {
            sweep: c.into(),
            monitor: c.into(),
            limits: (&c.limits).into(),
        }
    }
}

// ── CorrectionModel ──────────────────────────────────────────────────────────

impl From<&psu_config::CorrectionCfg> for CorrectionModel {
    fn from(c: &psu_config::CorrectionCfg) -> Self {
        Self::new(c.a, c.b)
    }
}

// ── Command ──────────────────────────────────────────────────────────────────

impl From<psu_config::CorrectionPairs> for Command {
    fn from(p: psu_config::CorrectionPairs) -> Self {
        Command::UpdateCorrection {
            raw: p.raw,
            truth: p.truth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_maps_to_default_controller_cfg() {
        let cfg = psu_config::Config::default();
        assert_eq!(ControllerCfg::from(&cfg), ControllerCfg::default());
        assert_eq!(
            CorrectionModel::from(&cfg.correction),
            CorrectionModel::default()
        );
    }
}
