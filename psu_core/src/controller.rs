//! The controller: command entry point, calibration task, and monitor lifecycle.
//!
//! All commands are methods on `Controller` taking `&mut self`, so they are
//! serialized by ownership. Background work (one sweep, one monitor session)
//! runs on worker threads that share the station lock with the command path.
use crate::calibration::{CalibrationTable, sweep};
use crate::config::{ControllerCfg, SweepCfg};
use crate::correction::CorrectionModel;
use crate::error::{PsuError, Result};
use crate::events::{Event, Notifier};
use crate::hw_error::from_bus;
use crate::interpolate::voltage_to_code;
use crate::monitor::{MonitorSession, StopReason};
use crate::station::{Station, lock};
use crate::status::Status;
use psu_traits::{Bus, Clock, DAC_MAX_CODE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Requests accepted by `Controller::handle`.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartCalibration { step: u16, settle: Duration },
    SetVoltage { voltage: f64 },
    StopMonitoring,
    UpdateCorrection { raw: Vec<f64>, truth: Vec<f64> },
}

struct SweepTask {
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SweepTask {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn join(&mut self) {
        if let Some(h) = self.handle.take()
            && h.join().is_err()
        {
            warn!("calibration thread panicked");
            self.running.store(false, Ordering::Release);
        }
    }
}

pub struct Controller<B: Bus + Send + 'static> {
    pub(crate) station: Arc<Mutex<Station<B>>>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) cfg: ControllerCfg,
    monitor: Option<MonitorSession>,
    /// Sessions that ended on their own but may still be publishing their final events.
    retired: Vec<MonitorSession>,
    sweep: Option<SweepTask>,
}

impl<B: Bus + Send + 'static> std::fmt::Debug for Controller<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}

impl<B: Bus + Send + 'static> Controller<B> {
    pub(crate) fn from_parts(
        station: Station<B>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock + Send + Sync>,
        cfg: ControllerCfg,
    ) -> Self {
        Self {
            station: Arc::new(Mutex::new(station)),
            notifier,
            clock,
            cfg,
            monitor: None,
            retired: Vec::new(),
            sweep: None,
        }
    }

    /// Dispatch a command. A rejected command is also published as an `error` event.
    pub fn handle(&mut self, cmd: Command) -> Result<()> {
        let res = match cmd {
            Command::StartCalibration { step, settle } => self.request_calibration(step, settle),
            Command::SetVoltage { voltage } => self.set_voltage(voltage).map(|_| ()),
            Command::StopMonitoring => self.stop_monitoring(),
            Command::UpdateCorrection { raw, truth } => {
                self.update_correction(&raw, &truth).map(|_| ())
            }
        };
        if let Err(e) = &res {
            warn!(error = %e, kind = e.kind(), "command rejected");
            self.notifier.publish(Event::Error {
                message: e.to_string(),
            });
        }
        res
    }

    /// Start a calibration sweep in the background with the configured step and settle.
    pub fn calibrate(&mut self) -> Result<()> {
        let SweepCfg { step, settle, .. } = self.cfg.sweep;
        self.request_calibration(step, settle)
    }

    /// Start a calibration sweep in the background.
    ///
    /// Returns once the sweep is running; progress, completion and failure are
    /// reported as events. Rejected while monitoring or while another sweep runs.
    pub fn request_calibration(&mut self, step: u16, settle: Duration) -> Result<()> {
        if step == 0 || step > DAC_MAX_CODE {
            return Err(PsuError::Validation(format!(
                "calibration step {step} outside [1, {DAC_MAX_CODE}]"
            )));
        }
        if self.is_calibrating() {
            return Err(PsuError::State("calibration already running".into()));
        }
        if self.is_monitoring() {
            return Err(PsuError::State(
                "current monitoring active; stop it before calibrating".into(),
            ));
        }
        if let Some(mut done) = self.sweep.take() {
            done.join();
        }

        let cfg = SweepCfg {
            step,
            settle,
            ..self.cfg.sweep
        };
        let running = Arc::new(AtomicBool::new(true));
        let cancel = Arc::new(AtomicBool::new(false));
        let station = self.station.clone();
        let clock = self.clock.clone();
        let notifier = self.notifier.clone();
        let (running_w, cancel_w) = (running.clone(), cancel.clone());

        self.notifier.publish(Event::CalibrationStarted);
        let spawned = std::thread::Builder::new()
            .name("calibration".into())
            .spawn(move || {
                let outcome = sweep(&station, &cfg, clock.as_ref(), notifier.as_ref(), &cancel_w);
                // Install the result before announcing it, so a listener reacting to
                // the event sees the new table.
                let event = {
                    let mut st = lock(&station);
                    st.state.mark_idle();
                    match outcome {
                        Ok(table) => {
                            let event = table.complete_event();
                            st.state.table = table;
                            st.state.failed_sweep = None;
                            event
                        }
                        Err(failure) => {
                            let message = format!(
                                "calibration failed after {} points: {}",
                                failure.partial.len(),
                                failure.error
                            );
                            st.state.failed_sweep = Some(failure);
                            Event::Error { message }
                        }
                    }
                };
                running_w.store(false, Ordering::Release);
                notifier.publish(event);
            });

        match spawned {
            Ok(handle) => {
                self.sweep = Some(SweepTask {
                    running,
                    cancel,
                    handle: Some(handle),
                });
                Ok(())
            }
            Err(e) => Err(PsuError::Internal(format!(
                "failed to spawn calibration thread: {e}"
            ))),
        }
    }

    /// Block until the running sweep (if any) has finished and its result is installed.
    pub fn wait_for_calibration(&mut self) {
        if let Some(task) = self.sweep.as_mut() {
            task.join();
        }
    }

    /// Ask a running sweep to stop at the next code. Its partial table is kept.
    pub fn cancel_calibration(&mut self) {
        if let Some(task) = self.sweep.as_ref() {
            task.cancel.store(true, Ordering::Relaxed);
        }
    }

    /// Drive the output to `voltage` and make sure current monitoring is running.
    ///
    /// Returns the DAC code written.
    pub fn set_voltage(&mut self, voltage: f64) -> Result<u16> {
        let min = self.cfg.limits.min_voltage;
        if voltage > 0.0 {
            return Err(PsuError::Validation(format!(
                "positive voltage {voltage} V not permitted"
            )));
        }
        if !voltage.is_finite() || voltage < min {
            return Err(PsuError::Validation(format!(
                "voltage {voltage} V outside [{min}, 0] V"
            )));
        }
        if self.is_calibrating() {
            return Err(PsuError::State("calibration in progress".into()));
        }

        let (code, start_monitor) = {
            let mut st = lock(&self.station);
            let code = voltage_to_code(&st.state.table, voltage)?;
            if let Err(e) = st.bus.write_code(code) {
                let err = from_bus(e);
                if st.bus.write_code(0).is_ok() {
                    st.state.mark_idle();
                }
                return Err(err);
            }
            st.state.last_code = code;
            st.state.last_set_voltage = voltage;
            // Decided under the same lock as the write: a session that tripped a
            // moment ago has already cleared the flag.
            let start_monitor = !st.state.monitoring;
            st.state.monitoring = true;
            (code, start_monitor)
        };

        info!(voltage, code, "output voltage set");
        self.notifier.publish(Event::VoltageSet { voltage, code });
        if start_monitor {
            self.start_monitoring();
        }
        Ok(code)
    }

    fn start_monitoring(&mut self) {
        if let Some(ended) = self.monitor.take() {
            // Its worker may still be publishing; it no longer touches the bus.
            ended.request_stop();
            self.retired.push(ended);
        }
        self.retired.retain(|s| !s.is_finished());
        self.monitor = Some(MonitorSession::spawn(
            self.station.clone(),
            self.cfg.monitor,
            self.clock.clone(),
            self.notifier.clone(),
        ));
    }

    /// Stop current monitoring and drive the output to 0. Idempotent.
    ///
    /// A running sweep is cancelled too; the points measured so far are kept as
    /// a failed sweep. With no session and no sweep this only writes 0 and
    /// publishes `monitoring_stopped`.
    pub fn stop_monitoring(&mut self) -> Result<()> {
        let reason = self.monitor.take().and_then(MonitorSession::stop);
        self.reap_retired();
        if self.is_calibrating() {
            self.cancel_calibration();
        }
        let zeroed = {
            let mut st = lock(&self.station);
            st.state.monitoring = false;
            match st.bus.write_code(0) {
                Ok(()) => {
                    st.state.mark_idle();
                    Ok(())
                }
                Err(e) => Err(from_bus(e)),
            }
        };
        info!(?reason, "monitoring stopped");
        self.notifier.publish(Event::MonitoringStopped);
        zeroed
    }

    /// Fit a new correction model and make it active for subsequent samples.
    pub fn update_correction(&mut self, raw: &[f64], truth: &[f64]) -> Result<CorrectionModel> {
        let model = CorrectionModel::fit(raw, truth)?;
        lock(&self.station).state.correction = model;
        info!(a = model.a, b = model.b, pairs = raw.len(), "correction updated");
        self.notifier.publish(Event::CorrectionUpdated {
            a: model.a,
            b: model.b,
        });
        Ok(model)
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.station).state.monitoring
    }

    pub fn is_calibrating(&self) -> bool {
        self.sweep.as_ref().is_some_and(SweepTask::is_running)
    }

    pub fn calibration_table(&self) -> CalibrationTable {
        lock(&self.station).state.table.clone()
    }

    /// Points measured by the last failed sweep.
    pub fn partial_calibration(&self) -> Option<CalibrationTable> {
        lock(&self.station)
            .state
            .failed_sweep
            .as_ref()
            .map(|f| f.partial.clone())
    }

    /// Why the last sweep failed, if it did.
    pub fn last_calibration_error(&self) -> Option<PsuError> {
        lock(&self.station)
            .state
            .failed_sweep
            .as_ref()
            .map(|f| f.error.clone())
    }

    pub fn correction(&self) -> CorrectionModel {
        lock(&self.station).state.correction
    }

    pub fn config(&self) -> &ControllerCfg {
        &self.cfg
    }

    pub fn status(&self) -> Status {
        let st = lock(&self.station);
        Status {
            point_count: st.state.table.len(),
            min_voltage: st.state.table.min_voltage(),
            max_voltage: st.state.table.max_voltage(),
            partial_points: st.state.failed_sweep.as_ref().map(|f| f.partial.len()),
            correction: st.state.correction,
            calibrating: self.is_calibrating(),
            monitoring: st.state.monitoring,
            last_code: st.state.last_code,
            last_set_voltage: st.state.last_set_voltage,
        }
    }

    fn reap_retired(&mut self) {
        for ended in self.retired.drain(..) {
            let _ = ended.stop();
        }
    }

    /// Cancel background work and park the DAC at 0. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(mut task) = self.sweep.take() {
            task.cancel.store(true, Ordering::Relaxed);
            task.join();
        }
        let reason: Option<StopReason> = self.monitor.take().and_then(MonitorSession::stop);
        self.reap_retired();
        let mut st = lock(&self.station);
        st.state.monitoring = false;
        match st.bus.write_code(0) {
            Ok(()) => st.state.mark_idle(),
            Err(e) => warn!(error = %e, "failed to drive DAC to 0 on shutdown"),
        }
        tracing::debug!(?reason, "controller shut down");
    }
}

impl<B: Bus + Send + 'static> Drop for Controller<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
