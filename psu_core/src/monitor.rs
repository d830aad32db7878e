//! Background current monitoring.
//!
//! A `MonitorSession` owns one worker thread that starts a continuous scan on
//! the current channel, converts the newest sample to a corrected current, and
//! publishes it. A corrected current above the limit drives the DAC to 0 inside
//! the same lock as the read, ends the session, and publishes `overcurrent`.
//!
//! Safety: each session spawns exactly one thread and joins it on drop; the stop
//! flag is observed at every iteration boundary, so a stop request completes
//! within one poll interval plus one bounded scan read.
use crate::config::MonitorCfg;
use crate::error::PsuError;
use crate::events::{CurrentReading, Event, Notifier};
use crate::hw_error::from_bus;
use crate::station::{Station, lock};
use crate::util::shunt_to_ma;
use psu_traits::{Bus, Clock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Active,
    Stopped,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was requested.
    Manual,
    /// Corrected current exceeded the limit; DAC was driven to 0.
    Overcurrent,
    /// A bus transaction failed; an `error` event was published.
    Fault,
}

/// Result of one monitor iteration.
#[derive(Debug)]
enum Tick {
    /// No samples arrived within the read timeout.
    Idle,
    Sample(CurrentReading),
    /// Limit exceeded. `zeroed` carries the outcome of the DAC write to 0.
    Tripped {
        reading: CurrentReading,
        zeroed: Result<(), PsuError>,
    },
}

pub struct MonitorSession {
    /// Mirrors `ControllerState::monitoring`; cleared under the station lock
    /// together with the final DAC write.
    active: Arc<AtomicBool>,
    /// Stop request (atomic for lock-free check each iteration)
    stop: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<StopReason>>,
}

impl MonitorSession {
    pub fn spawn<B: Bus + Send + 'static>(
        station: Arc<Mutex<Station<B>>>,
        cfg: MonitorCfg,
        clock: Arc<dyn Clock + Send + Sync>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));
        lock(&station).state.monitoring = true;
        let worker = Worker {
            station: station.clone(),
            cfg,
            clock,
            notifier,
            active: active.clone(),
            stop: stop.clone(),
        };
        let join_handle = std::thread::Builder::new()
            .name("current-monitor".into())
            .spawn(move || worker.run());
        let join_handle = match join_handle {
            Ok(h) => Some(h),
            Err(e) => {
                // Without a thread there is nothing to monitor; report as stopped.
                warn!(error = %e, "failed to spawn monitor thread");
                lock(&station).state.monitoring = false;
                active.store(false, Ordering::Release);
                None
            }
        };
        Self {
            active,
            stop,
            join_handle,
        }
    }

    pub fn state(&self) -> MonitorState {
        if self.active.load(Ordering::Acquire) {
            MonitorState::Active
        } else {
            MonitorState::Stopped
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == MonitorState::Active
    }

    /// Whether the worker thread has returned (or never started).
    pub fn is_finished(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_none_or(std::thread::JoinHandle::is_finished)
    }

    /// Ask the worker to exit at the next iteration boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Request a stop and wait for the worker. Returns why the session ended,
    /// or `None` if the thread never started or panicked.
    pub fn stop(mut self) -> Option<StopReason> {
        self.request_stop();
        self.join()
    }

    fn join(&mut self) -> Option<StopReason> {
        let handle = self.join_handle.take()?;
        match handle.join() {
            Ok(reason) => {
                tracing::trace!(?reason, "monitor thread joined");
                Some(reason)
            }
            Err(e) => {
                warn!(?e, "monitor thread panicked");
                self.active.store(false, Ordering::Release);
                None
            }
        }
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        self.request_stop();
        let _ = self.join();
    }
}

struct Worker<B> {
    station: Arc<Mutex<Station<B>>>,
    cfg: MonitorCfg,
    clock: Arc<dyn Clock + Send + Sync>,
    notifier: Arc<dyn Notifier>,
    active: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl<B: Bus> Worker<B> {
    fn run(self) -> StopReason {
        let started = lock(&self.station)
            .bus
            .start_scan(self.cfg.current_channel, self.cfg.scan_rate_hz)
            .map_err(from_bus);
        if let Err(e) = started {
            return self.fault(e);
        }
        info!(
            channel = self.cfg.current_channel,
            rate_hz = self.cfg.scan_rate_hz,
            limit_ma = self.cfg.max_current_ma,
            "current monitoring started"
        );

        loop {
            if self.stop.load(Ordering::Acquire) {
                debug!("monitor received stop request");
                return self.finish();
            }
            match self.tick() {
                Ok(Tick::Idle) => {}
                Ok(Tick::Sample(reading)) => {
                    self.notifier.publish(Event::CurrentData(reading));
                }
                Ok(Tick::Tripped { reading, zeroed }) => {
                    return self.trip(reading, zeroed);
                }
                Err(e) => return self.fault(e),
            }
            if self.stop.load(Ordering::Acquire) {
                return self.finish();
            }
            self.clock.sleep(self.cfg.poll_interval);
        }
    }

    fn tick(&self) -> Result<Tick, PsuError> {
        let mut st = lock(&self.station);
        let samples = st.bus.read_scan(self.cfg.read_timeout).map_err(from_bus)?;
        let Some(&shunt_voltage) = samples.last() else {
            return Ok(Tick::Idle);
        };
        if !shunt_voltage.is_finite() {
            return Err(PsuError::Hardware(format!(
                "non-finite current sample: {shunt_voltage}"
            )));
        }
        let measured_current = shunt_to_ma(shunt_voltage, self.cfg.amp_gain, self.cfg.shunt_ohms);
        let corrected_current = st.state.correction.apply(measured_current);
        let reading = CurrentReading {
            shunt_voltage,
            measured_current,
            corrected_current,
            dac_code: st.state.last_code,
            set_voltage: st.state.last_set_voltage,
        };

        if corrected_current > self.cfg.max_current_ma {
            let zeroed = st.bus.write_code(0).map_err(from_bus);
            if zeroed.is_ok() {
                st.state.mark_idle();
            }
            if let Err(e) = st.bus.stop_scan() {
                warn!(error = %e, "failed to stop scan after overcurrent");
            }
            self.disarm(&mut st);
            return Ok(Tick::Tripped { reading, zeroed });
        }
        Ok(Tick::Sample(reading))
    }

    fn trip(&self, reading: CurrentReading, zeroed: Result<(), PsuError>) -> StopReason {
        warn!(
            current_ma = reading.corrected_current,
            limit_ma = self.cfg.max_current_ma,
            code = reading.dac_code,
            "overcurrent: output disabled"
        );
        self.notifier.publish(Event::CurrentData(reading));
        self.notifier.publish(Event::Overcurrent {
            current: reading.corrected_current,
            limit: self.cfg.max_current_ma,
        });
        if let Err(e) = zeroed {
            self.notifier.publish(Event::Error {
                message: format!("failed to disable output after overcurrent: {e}"),
            });
        }
        StopReason::Overcurrent
    }

    fn fault(&self, error: PsuError) -> StopReason {
        {
            let mut st = lock(&self.station);
            if let Err(e) = st.bus.stop_scan() {
                debug!(error = %e, "stop_scan failed during fault handling");
            }
            match st.bus.write_code(0) {
                Ok(()) => st.state.mark_idle(),
                Err(e) => warn!(error = %e, "failed to drive DAC to 0 after monitor fault"),
            }
            self.disarm(&mut st);
        }
        warn!(%error, "current monitoring aborted");
        self.notifier.publish(Event::Error {
            message: format!("current monitoring failed: {error}"),
        });
        StopReason::Fault
    }

    fn finish(&self) -> StopReason {
        {
            let mut st = lock(&self.station);
            if let Err(e) = st.bus.stop_scan() {
                warn!(error = %e, "failed to stop scan");
            }
            self.disarm(&mut st);
        }
        info!("current monitoring stopped");
        StopReason::Manual
    }

    /// End the session while the caller still holds the station guard, so a
    /// command that takes the lock next sees no active monitor.
    fn disarm(&self, st: &mut Station<B>) {
        st.state.monitoring = false;
        self.active.store(false, Ordering::Release);
    }
}
