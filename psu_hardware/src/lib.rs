pub mod error;
pub mod mcp49xx;

use crate::error::HwError;
use psu_traits::{Adc, BusError, DAC_MAX_CODE, Dac};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Upper bound on samples returned by one simulated scan read (mirrors a finite FIFO).
const SIM_SCAN_BUFFER: usize = 10_000;

/// Which bus transaction the simulator should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimFault {
    #[default]
    None,
    /// `write_code` fails.
    DacWrite,
    /// Single-shot `read_voltage` fails.
    VoltageRead,
    /// Continuous `read_scan` fails.
    ScanRead,
}

#[derive(Debug)]
struct SimState {
    code: u16,
    writes: Vec<u16>,
    /// Output at code 0; slightly positive like the real board.
    zero_offset_v: f64,
    /// Output swing reached at full scale.
    full_scale_v: f64,
    /// Exponent of the code→voltage curve; 1.0 is linear.
    curve: f64,
    load_ohms: f64,
    shunt_ohms: f64,
    amp_gain: f64,
    voltage_channel: u8,
    current_channel: u8,
    scan: Option<Scan>,
    fault: SimFault,
    /// Number of successful transactions of the faulted kind before it starts failing.
    fault_after: usize,
}

#[derive(Debug, Clone, Copy)]
struct Scan {
    channel: u8,
    rate_hz: f64,
    last_read: Instant,
}

impl SimState {
    fn output_voltage(&self) -> f64 {
        let x = f64::from(self.code) / f64::from(DAC_MAX_CODE);
        self.zero_offset_v + self.full_scale_v * x.powf(self.curve)
    }

    fn channel_voltage(&self, channel: u8) -> f64 {
        if channel == self.voltage_channel {
            self.output_voltage()
        } else if channel == self.current_channel {
            self.shunt_voltage()
        } else {
            0.0
        }
    }

    fn shunt_voltage(&self) -> f64 {
        if self.load_ohms <= 0.0 {
            return 0.0;
        }
        let amps = self.output_voltage().abs() / self.load_ohms;
        amps * self.shunt_ohms * self.amp_gain
    }

    fn check_fault(&mut self, kind: SimFault) -> Result<(), HwError> {
        if self.fault != kind {
            return Ok(());
        }
        if self.fault_after > 0 {
            self.fault_after -= 1;
            return Ok(());
        }
        Err(HwError::Injected(match kind {
            SimFault::DacWrite => "dac write",
            SimFault::VoltageRead => "voltage read",
            SimFault::ScanRead => "scan read",
            SimFault::None => "none",
        }))
    }
}

/// Simulated negative supply: nonlinear DAC→voltage curve into a resistive load,
/// with a shunt amplifier on the current channel.
pub struct SimulatedSupply {
    state: Arc<Mutex<SimState>>,
}

/// Test/CLI handle to inspect and perturb a running simulator.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedSupply {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSupply {
    pub fn new() -> Self {
        SimulatedSupply {
            state: Arc::new(Mutex::new(SimState {
                code: 0,
                writes: Vec::new(),
                zero_offset_v: 0.02,
                full_scale_v: -10.5,
                curve: 1.15,
                load_ohms: 100.0,
                shunt_ohms: 0.1,
                amp_gain: 69.0,
                voltage_channel: 0,
                current_channel: 5,
                scan: None,
                fault: SimFault::None,
                fault_after: 0,
            })),
        }
    }

    /// Resistive load across the output.
    pub fn with_load_ohms(self, ohms: f64) -> Self {
        lock(&self.state).load_ohms = ohms;
        self
    }

    /// Shunt and amplifier seen by the current channel.
    pub fn with_shunt(self, shunt_ohms: f64, amp_gain: f64) -> Self {
        {
            let mut st = lock(&self.state);
            st.shunt_ohms = shunt_ohms;
            st.amp_gain = amp_gain;
        }
        self
    }

    pub fn with_channels(self, voltage_channel: u8, current_channel: u8) -> Self {
        {
            let mut st = lock(&self.state);
            st.voltage_channel = voltage_channel;
            st.current_channel = current_channel;
        }
        self
    }

    /// Make the output linear from `zero_offset_v` at code 0 to `full_scale_v` at 4095.
    pub fn with_linear_curve(self, zero_offset_v: f64, full_scale_v: f64) -> Self {
        {
            let mut st = lock(&self.state);
            st.zero_offset_v = zero_offset_v;
            st.full_scale_v = full_scale_v - zero_offset_v;
            st.curve = 1.0;
        }
        self
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: self.state.clone(),
        }
    }
}

impl SimHandle {
    /// Last code written to the DAC.
    pub fn code(&self) -> u16 {
        lock(&self.state).code
    }

    /// Every code written so far, in order.
    pub fn writes(&self) -> Vec<u16> {
        lock(&self.state).writes.clone()
    }

    pub fn output_voltage(&self) -> f64 {
        lock(&self.state).output_voltage()
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.state).scan.is_some()
    }

    pub fn set_load_ohms(&self, ohms: f64) {
        lock(&self.state).load_ohms = ohms;
    }

    /// Fail every transaction of `kind` after `after` more successful ones.
    pub fn inject(&self, kind: SimFault, after: usize) {
        let mut st = lock(&self.state);
        st.fault = kind;
        st.fault_after = after;
    }

    pub fn clear_fault(&self) {
        self.inject(SimFault::None, 0);
    }
}

// A poisoned simulator is still a usable simulator.
fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

impl Dac for SimulatedSupply {
    fn write_code(&mut self, code: u16) -> Result<(), BusError> {
        if code > DAC_MAX_CODE {
            return Err(Box::new(HwError::CodeOutOfRange(code)));
        }
        let mut st = lock(&self.state);
        st.check_fault(SimFault::DacWrite)?;
        st.code = code;
        st.writes.push(code);
        tracing::trace!(code, volts = st.output_voltage(), "sim dac write");
        Ok(())
    }
}

impl Adc for SimulatedSupply {
    fn read_voltage(&mut self, channel: u8) -> Result<f64, BusError> {
        let mut st = lock(&self.state);
        st.check_fault(SimFault::VoltageRead)?;
        Ok(st.channel_voltage(channel))
    }

    fn start_scan(&mut self, channel: u8, scan_rate_hz: f64) -> Result<(), BusError> {
        let mut st = lock(&self.state);
        st.scan = Some(Scan {
            channel,
            rate_hz: scan_rate_hz.max(1.0),
            last_read: Instant::now(),
        });
        tracing::debug!(channel, scan_rate_hz, "sim scan started");
        Ok(())
    }

    fn read_scan(&mut self, timeout: Duration) -> Result<Vec<f64>, BusError> {
        let deadline = Instant::now() + timeout;
        loop {
            let wait = {
                let mut st = lock(&self.state);
                st.check_fault(SimFault::ScanRead)?;
                let scan = st.scan.ok_or(HwError::ScanNotRunning)?;
                let now = Instant::now();
                let elapsed = now.saturating_duration_since(scan.last_read);
                let n = (elapsed.as_secs_f64() * scan.rate_hz).floor() as usize;
                if n > 0 {
                    let v = st.channel_voltage(scan.channel);
                    st.scan = Some(Scan {
                        last_read: now,
                        ..scan
                    });
                    return Ok(vec![v; n.min(SIM_SCAN_BUFFER)]);
                }
                if now >= deadline {
                    return Ok(Vec::new());
                }
                Duration::from_secs_f64(1.0 / scan.rate_hz)
                    .min(deadline.saturating_duration_since(now))
            };
            std::thread::sleep(wait);
        }
    }

    fn stop_scan(&mut self) -> Result<(), BusError> {
        if lock(&self.state).scan.take().is_some() {
            tracing::debug!("sim scan stopped");
        }
        Ok(())
    }
}

/// Pair a DAC driver with an ADC driver so they can be used as one `Bus`.
pub struct SplitBus<D, A> {
    pub dac: D,
    pub adc: A,
}

impl<D: Dac, A: Adc> SplitBus<D, A> {
    pub fn new(dac: D, adc: A) -> Self {
        Self { dac, adc }
    }
}

impl<D: Dac, A> Dac for SplitBus<D, A> {
    fn write_code(&mut self, code: u16) -> Result<(), BusError> {
        self.dac.write_code(code)
    }
}

impl<D, A: Adc> Adc for SplitBus<D, A> {
    fn read_voltage(&mut self, channel: u8) -> Result<f64, BusError> {
        self.adc.read_voltage(channel)
    }

    fn start_scan(&mut self, channel: u8, scan_rate_hz: f64) -> Result<(), BusError> {
        self.adc.start_scan(channel, scan_rate_hz)
    }

    fn read_scan(&mut self, timeout: Duration) -> Result<Vec<f64>, BusError> {
        self.adc.read_scan(timeout)
    }

    fn stop_scan(&mut self) -> Result<(), BusError> {
        self.adc.stop_scan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_curve_is_negative_and_decreasing() {
        let mut sim = SimulatedSupply::new();
        let h = sim.handle();
        sim.write_code(0).unwrap();
        assert!(h.output_voltage() > 0.0);
        let mut prev = h.output_voltage();
        for code in (256..=4095).step_by(256) {
            sim.write_code(code).unwrap();
            let v = sim.read_voltage(0).unwrap();
            assert!(v < prev, "code {code}: {v} !< {prev}");
            prev = v;
        }
        assert!(prev < -9.0);
    }

    #[test]
    fn test_injected_fault_after_n() {
        let mut sim = SimulatedSupply::new();
        sim.handle().inject(SimFault::VoltageRead, 2);
        assert!(sim.read_voltage(0).is_ok());
        assert!(sim.read_voltage(0).is_ok());
        assert!(sim.read_voltage(0).is_err());
    }
}
