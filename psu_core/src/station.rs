//! The bus and the controller's mutable state, behind one lock.
//!
//! Every bus transaction and every read-modify-write of the state happens while
//! holding the station mutex, so a DAC write and the `last_code` it implies are
//! always observed together.
use crate::calibration::{CalibrationTable, SweepFailure};
use crate::correction::CorrectionModel;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
pub struct ControllerState {
    /// Active calibration; empty until a sweep succeeds.
    pub table: CalibrationTable,
    /// The last failed sweep (error plus the points it measured), kept for inspection only.
    pub failed_sweep: Option<SweepFailure>,
    pub correction: CorrectionModel,
    pub last_code: u16,
    pub last_set_voltage: f64,
    /// A monitor session guards the output. Only changed under the station lock,
    /// in the same critical section as the DAC write that goes with it.
    pub monitoring: bool,
}

impl ControllerState {
    /// Record that the DAC now sits at 0.
    pub fn mark_idle(&mut self) {
        self.last_code = 0;
        self.last_set_voltage = 0.0;
    }
}

pub struct Station<B> {
    pub bus: B,
    pub state: ControllerState,
}

impl<B> Station<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            state: ControllerState::default(),
        }
    }

    pub fn with_state(bus: B, state: ControllerState) -> Self {
        Self { bus, state }
    }
}

/// Lock the station, recovering from poisoning.
///
/// A panicked worker must not prevent the DAC from being driven back to 0.
pub fn lock<B>(station: &Mutex<Station<B>>) -> MutexGuard<'_, Station<B>> {
    station.lock().unwrap_or_else(|p| p.into_inner())
}
