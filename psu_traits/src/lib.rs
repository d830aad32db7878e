//! Hardware seams for the supply controller.
//!
//! The core only talks to the outside world through these traits; drivers and the
//! simulator in `psu_hardware` implement them. Errors cross the boundary boxed so
//! any driver error type can be carried without the core depending on it.

pub mod clock;

pub use clock::{Clock, MonotonicClock};

use std::time::Duration;

/// Error type used at the trait boundary.
pub type BusError = Box<dyn std::error::Error + Send + Sync>;

/// Highest code accepted by a 12-bit converter.
pub const DAC_MAX_CODE: u16 = 4095;

/// A 12-bit digital-to-analog converter.
pub trait Dac {
    /// Write `code` (0..=4095) to the converter output.
    fn write_code(&mut self, code: u16) -> Result<(), BusError>;
}

/// An analog input device with on-demand reads and one continuous scan.
pub trait Adc {
    /// Single-shot read of `channel`, in volts.
    fn read_voltage(&mut self, channel: u8) -> Result<f64, BusError>;

    /// Start continuous acquisition of `channel` at `scan_rate_hz`.
    fn start_scan(&mut self, channel: u8, scan_rate_hz: f64) -> Result<(), BusError>;

    /// Return every sample acquired since the last call, waiting at most `timeout`
    /// for at least one to arrive. An empty vector is not an error.
    fn read_scan(&mut self, timeout: Duration) -> Result<Vec<f64>, BusError>;

    /// Stop the continuous acquisition. Stopping an idle scan is a no-op.
    fn stop_scan(&mut self) -> Result<(), BusError>;
}

/// The single physical bus carrying both converters.
pub trait Bus: Dac + Adc {}

impl<T: Dac + Adc> Bus for T {}

impl<T: Dac + ?Sized> Dac for Box<T> {
    fn write_code(&mut self, code: u16) -> Result<(), BusError> {
        (**self).write_code(code)
    }
}

impl<T: Adc + ?Sized> Adc for Box<T> {
    fn read_voltage(&mut self, channel: u8) -> Result<f64, BusError> {
        (**self).read_voltage(channel)
    }

    fn start_scan(&mut self, channel: u8, scan_rate_hz: f64) -> Result<(), BusError> {
        (**self).start_scan(channel, scan_rate_hz)
    }

    fn read_scan(&mut self, timeout: Duration) -> Result<Vec<f64>, BusError> {
        (**self).read_scan(timeout)
    }

    fn stop_scan(&mut self) -> Result<(), BusError> {
        (**self).stop_scan()
    }
}
