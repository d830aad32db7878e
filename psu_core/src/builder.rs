//! Builder for `Controller`.
//!
//! `try_build()` checks that a bus and a notifier were provided, validates the
//! runtime config, and parks the DAC at code 0 before handing out the controller.

use std::sync::Arc;

use eyre::WrapErr;
use psu_traits::clock::{Clock, MonotonicClock};
use psu_traits::{Bus, DAC_MAX_CODE};

use crate::config::ControllerCfg;
use crate::controller::Controller;
use crate::correction::CorrectionModel;
use crate::error::BuildError;
use crate::events::Notifier;
use crate::hw_error::from_bus;
use crate::station::{ControllerState, Station};

pub struct ControllerBuilder<B> {
    bus: Option<B>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    cfg: ControllerCfg,
    correction: CorrectionModel,
}

impl<B> Default for ControllerBuilder<B> {
    fn default() -> Self {
        Self {
            bus: None,
            notifier: None,
            clock: None,
            cfg: ControllerCfg::default(),
            correction: CorrectionModel::default(),
        }
    }
}

impl<B: Bus + Send + 'static> Controller<B> {
    /// Start building a Controller.
    pub fn builder() -> ControllerBuilder<B> {
        ControllerBuilder::default()
    }
}

impl<B: Bus + Send + 'static> ControllerBuilder<B> {
    pub fn with_bus(mut self, bus: B) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    /// Share an existing notifier (e.g. one the caller also inspects).
    pub fn with_shared_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Inject a custom clock (tests use a `TestClock`).
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn with_config(mut self, cfg: ControllerCfg) -> Self {
        self.cfg = cfg;
        self
    }

    /// Initial correction model (default: bench fit).
    pub fn with_correction(mut self, model: CorrectionModel) -> Self {
        self.correction = model;
        self
    }

    /// Take runtime config and the initial correction from a loaded TOML config.
    pub fn apply_config(self, cfg: &psu_config::Config) -> Self {
        self.with_config(cfg.into())
            .with_correction((&cfg.correction).into())
    }

    pub fn try_build(self) -> eyre::Result<Controller<B>> {
        let mut bus = self
            .bus
            .ok_or_else(|| eyre::Report::new(BuildError::MissingBus))?;
        let notifier = self
            .notifier
            .ok_or_else(|| eyre::Report::new(BuildError::MissingNotifier))?;
        validate(&self.cfg, &self.correction).map_err(eyre::Report::new)?;

        bus.write_code(0)
            .map_err(|e| eyre::Report::new(from_bus(e)))
            .wrap_err("failed to park DAC at code 0")?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()) as Arc<dyn Clock + Send + Sync>);
        let state = ControllerState {
            correction: self.correction,
            ..ControllerState::default()
        };
        tracing::debug!(cfg = ?self.cfg, "controller built");
        Ok(Controller::from_parts(
            Station::with_state(bus, state),
            notifier,
            clock,
            self.cfg,
        ))
    }
}

fn validate(cfg: &ControllerCfg, correction: &CorrectionModel) -> Result<(), BuildError> {
    if cfg.sweep.step == 0 || cfg.sweep.step > DAC_MAX_CODE {
        return Err(BuildError::InvalidConfig("sweep.step must be in [1, 4095]"));
    }
    let m = &cfg.monitor;
    if !(m.scan_rate_hz.is_finite() && m.scan_rate_hz > 0.0) {
        return Err(BuildError::InvalidConfig("monitor.scan_rate_hz must be > 0"));
    }
    if m.read_timeout.is_zero() {
        return Err(BuildError::InvalidConfig("monitor.read_timeout must be > 0"));
    }
    if m.poll_interval.is_zero() {
        return Err(BuildError::InvalidConfig("monitor.poll_interval must be > 0"));
    }
    if !(m.shunt_ohms.is_finite() && m.shunt_ohms > 0.0) {
        return Err(BuildError::InvalidConfig("monitor.shunt_ohms must be > 0"));
    }
    if !(m.amp_gain.is_finite() && m.amp_gain > 0.0) {
        return Err(BuildError::InvalidConfig("monitor.amp_gain must be > 0"));
    }
    if !(m.max_current_ma.is_finite() && m.max_current_ma > 0.0) {
        return Err(BuildError::InvalidConfig("monitor.max_current_ma must be > 0"));
    }
    if !(cfg.limits.min_voltage.is_finite() && cfg.limits.min_voltage < 0.0) {
        return Err(BuildError::InvalidConfig("limits.min_voltage must be < 0"));
    }
    if !(correction.a.is_finite() && correction.b.is_finite()) {
        return Err(BuildError::InvalidConfig("correction must be finite"));
    }
    Ok(())
}
