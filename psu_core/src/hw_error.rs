//! Maps `Box<dyn Error>` from trait boundaries to typed `PsuError`.
//!
//! The traits in `psu_traits` use `Box<dyn Error + Send + Sync>` so any driver
//! can plug in; this module converts those to our typed error enum, with an
//! optional feature-gated path for `psu_hardware::HwError` downcasting.

use crate::error::PsuError;
use psu_traits::BusError;

/// Map a trait-boundary error to a typed `PsuError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> PsuError {
    #[cfg(feature = "hardware-errors")]
    {
        use psu_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout => PsuError::Timeout,
                HwError::CodeOutOfRange(code) => {
                    PsuError::Validation(format!("dac code {code} out of range (0..=4095)"))
                }
                other => PsuError::Hardware(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        PsuError::Timeout
    } else {
        PsuError::Hardware(s)
    }
}

/// Convenience for `map_err` at bus call sites.
pub fn from_bus(e: BusError) -> PsuError {
    map_hw_error(&*e)
}
