//! Calibration table and the DAC sweep that builds it.
//!
//! The sweep walks DAC codes upward in fixed steps, waits for the output to
//! settle, samples it, and keeps every non-positive reading. The resulting table
//! is ordered by voltage ascending (most negative first) so the interpolator can
//! bracket a target with a single scan.
use crate::config::SweepCfg;
use crate::error::PsuError;
use crate::events::{Event, Notifier};
use crate::hw_error::from_bus;
use crate::station::{Station, lock};
use crate::util::{sweep_codes, sweep_percent};
use psu_traits::{Bus, Clock, DAC_MAX_CODE};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// One measured (voltage, code) pair. `voltage <= 0`, `code <= 4095`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    pub voltage: f64,
    pub code: u16,
}

impl CalibrationPoint {
    pub const fn new(voltage: f64, code: u16) -> Self {
        Self { voltage, code }
    }
}

/// Points sorted by voltage ascending. Empty means "not calibrated".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationTable {
    points: Vec<CalibrationPoint>,
}

impl CalibrationTable {
    /// Build a table from points in any order. Ties keep their input order.
    pub fn from_points(mut points: Vec<CalibrationPoint>) -> Self {
        points.sort_by(|a, b| a.voltage.total_cmp(&b.voltage));
        Self { points }
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn min_voltage(&self) -> Option<f64> {
        self.points.first().map(|p| p.voltage)
    }

    pub fn max_voltage(&self) -> Option<f64> {
        self.points.last().map(|p| p.voltage)
    }

    /// True when codes never increase as voltage rises, i.e. the supply curve
    /// measured as a proper monotonic map.
    pub fn codes_monotonic(&self) -> bool {
        self.points.windows(2).all(|w| w[0].code >= w[1].code)
    }

    /// The `calibration_complete` event describing this table.
    pub fn complete_event(&self) -> Event {
        Event::CalibrationComplete {
            point_count: self.len(),
            min_voltage: self.min_voltage().unwrap_or(0.0),
            max_voltage: self.max_voltage().unwrap_or(0.0),
        }
    }
}

impl FromIterator<CalibrationPoint> for CalibrationTable {
    fn from_iter<I: IntoIterator<Item = CalibrationPoint>>(iter: I) -> Self {
        Self::from_points(iter.into_iter().collect())
    }
}

/// A sweep that did not finish: the error plus whatever it measured before failing.
#[derive(Debug, Clone)]
pub struct SweepFailure {
    pub error: PsuError,
    pub partial: CalibrationTable,
}

/// Run a full calibration sweep.
///
/// Each bus transaction takes the station lock on its own, so commands and the
/// settle wait interleave without holding the bus. On failure or cancellation the
/// DAC is driven back to 0 (best effort) and the points collected so far are
/// returned inside the `SweepFailure`.
pub fn sweep<B: Bus>(
    station: &Mutex<Station<B>>,
    cfg: &SweepCfg,
    clock: &dyn Clock,
    notifier: &dyn Notifier,
    cancel: &AtomicBool,
) -> Result<CalibrationTable, SweepFailure> {
    let mut points: Vec<CalibrationPoint> = Vec::new();
    info!(step = cfg.step, settle_ms = cfg.settle.as_millis() as u64, "calibration sweep started");

    for code in sweep_codes(cfg.step) {
        if cancel.load(Ordering::Relaxed) {
            return Err(abort(station, PsuError::State("calibration cancelled".into()), points));
        }
        match measure(station, cfg, clock, code) {
            Ok(v) => accept(&mut points, notifier, code, v),
            Err(e) => return Err(abort(station, e, points)),
        }
    }

    // The full-scale code is only probed when the stepped walk did not already land on it.
    if !points.iter().any(|p| p.code == DAC_MAX_CODE) {
        match measure(station, cfg, clock, DAC_MAX_CODE) {
            Ok(v) => accept(&mut points, notifier, DAC_MAX_CODE, v),
            Err(e) => return Err(abort(station, e, points)),
        }
    }

    if let Err(e) = lock(station).bus.write_code(0) {
        return Err(SweepFailure {
            error: from_bus(e),
            partial: CalibrationTable::from_points(points),
        });
    }

    let table = CalibrationTable::from_points(points);
    if !table.codes_monotonic() {
        warn!(points = table.len(), "calibration curve is not monotonic");
    }
    info!(
        points = table.len(),
        min_v = table.min_voltage(),
        max_v = table.max_voltage(),
        "calibration sweep finished"
    );
    Ok(table)
}

fn measure<B: Bus>(
    station: &Mutex<Station<B>>,
    cfg: &SweepCfg,
    clock: &dyn Clock,
    code: u16,
) -> Result<f64, PsuError> {
    lock(station).bus.write_code(code).map_err(from_bus)?;
    clock.sleep(cfg.settle);
    lock(station)
        .bus
        .read_voltage(cfg.voltage_channel)
        .map_err(from_bus)
}

fn accept(points: &mut Vec<CalibrationPoint>, notifier: &dyn Notifier, code: u16, voltage: f64) {
    // NaN fails the comparison and is dropped with the positive readings.
    if voltage <= 0.0 {
        points.push(CalibrationPoint::new(voltage, code));
        debug!(code, voltage, "calibration point");
        notifier.publish(Event::CalibrationUpdate {
            code,
            voltage,
            percent: sweep_percent(code),
        });
    } else {
        debug!(code, voltage, "discarding non-negative calibration reading");
    }
}

fn abort<B: Bus>(
    station: &Mutex<Station<B>>,
    error: PsuError,
    points: Vec<CalibrationPoint>,
) -> SweepFailure {
    if let Err(e) = lock(station).bus.write_code(0) {
        warn!(error = %e, "failed to return DAC to 0 after aborted sweep");
    }
    warn!(%error, points = points.len(), "calibration sweep aborted");
    SweepFailure {
        error,
        partial: CalibrationTable::from_points(points),
    }
}
