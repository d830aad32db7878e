//! Test and helper mocks for psu_core.
use crate::events::{Event, Notifier};
use psu_traits::{Adc, BusError, DAC_MAX_CODE, Dac};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type VoltageCurve = Arc<dyn Fn(u16) -> f64 + Send + Sync>;

/// One scripted answer to `read_scan`.
#[derive(Debug, Clone)]
pub enum ScanStep {
    Samples(Vec<f64>),
    Fail(&'static str),
}

struct ScriptState {
    code: u16,
    writes: Vec<u16>,
    curve: VoltageCurve,
    fail_write_at: Option<u16>,
    fail_read_at: Option<u16>,
    fail_start_scan: Option<&'static str>,
    scans: VecDeque<ScanStep>,
    /// Returned once the script is exhausted.
    idle_scan: Vec<f64>,
    scanning: bool,
    scan_starts: usize,
}

/// A bus whose voltage curve and scan results are scripted by the test.
///
/// Clones share state, so a test can keep one clone as an inspection handle
/// while the controller owns another.
#[derive(Clone)]
pub struct ScriptedBus {
    inner: Arc<Mutex<ScriptState>>,
}

impl Default for ScriptedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBus {
    /// Linear supply: 0 V at code 0, -10 V at 4095; empty scans.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScriptState {
                code: 0,
                writes: Vec::new(),
                curve: Arc::new(|code| -10.0 * f64::from(code) / f64::from(DAC_MAX_CODE)),
                fail_write_at: None,
                fail_read_at: None,
                fail_start_scan: None,
                scans: VecDeque::new(),
                idle_scan: Vec::new(),
                scanning: false,
                scan_starts: 0,
            })),
        }
    }

    /// Output voltage as a function of the current DAC code.
    pub fn with_curve(self, f: impl Fn(u16) -> f64 + Send + Sync + 'static) -> Self {
        self.state().curve = Arc::new(f);
        self
    }

    /// Fail any write of `code`.
    pub fn fail_write_at(self, code: u16) -> Self {
        self.state().fail_write_at = Some(code);
        self
    }

    /// Fail the voltage read taken while the DAC sits at `code`.
    pub fn fail_read_at(self, code: u16) -> Self {
        self.state().fail_read_at = Some(code);
        self
    }

    /// Change the failing read code on a live bus (`None` clears it).
    pub fn set_fail_read_at(&self, code: Option<u16>) {
        self.state().fail_read_at = code;
    }

    pub fn fail_start_scan(self, msg: &'static str) -> Self {
        self.state().fail_start_scan = Some(msg);
        self
    }

    /// Samples returned by every scan read once the script runs out.
    pub fn with_idle_scan(self, samples: Vec<f64>) -> Self {
        self.state().idle_scan = samples;
        self
    }

    pub fn push_scan(&self, step: ScanStep) {
        self.state().scans.push_back(step);
    }

    pub fn code(&self) -> u16 {
        self.state().code
    }

    pub fn writes(&self) -> Vec<u16> {
        self.state().writes.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    pub fn scan_starts(&self) -> usize {
        self.state().scan_starts
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn scripted(msg: impl Into<String>) -> BusError {
    Box::new(std::io::Error::other(msg.into()))
}

impl Dac for ScriptedBus {
    fn write_code(&mut self, code: u16) -> Result<(), BusError> {
        let mut st = self.state();
        if code > DAC_MAX_CODE {
            return Err(scripted(format!("code {code} out of range")));
        }
        if st.fail_write_at == Some(code) {
            return Err(scripted(format!("scripted write failure at {code}")));
        }
        st.code = code;
        st.writes.push(code);
        Ok(())
    }
}

impl Adc for ScriptedBus {
    fn read_voltage(&mut self, _channel: u8) -> Result<f64, BusError> {
        let st = self.state();
        if st.fail_read_at == Some(st.code) {
            return Err(scripted(format!("scripted read failure at {}", st.code)));
        }
        Ok((st.curve)(st.code))
    }

    fn start_scan(&mut self, _channel: u8, _scan_rate_hz: f64) -> Result<(), BusError> {
        let mut st = self.state();
        if let Some(msg) = st.fail_start_scan {
            return Err(scripted(msg));
        }
        st.scanning = true;
        st.scan_starts += 1;
        Ok(())
    }

    fn read_scan(&mut self, _timeout: Duration) -> Result<Vec<f64>, BusError> {
        let mut st = self.state();
        if !st.scanning {
            return Err(scripted("scan not running"));
        }
        match st.scans.pop_front() {
            Some(ScanStep::Samples(s)) => Ok(s),
            Some(ScanStep::Fail(msg)) => Err(scripted(msg)),
            None => Ok(st.idle_scan.clone()),
        }
    }

    fn stop_scan(&mut self) -> Result<(), BusError> {
        self.state().scanning = false;
        Ok(())
    }
}

/// Collects every published event.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.lock().iter().map(Event::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.lock().iter().filter(|e| e.name() == name).count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, event: Event) {
        self.lock().push(event);
    }
}
