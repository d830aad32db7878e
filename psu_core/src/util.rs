//! Small numeric helpers shared by the sweep and the monitor.
use psu_traits::DAC_MAX_CODE;

/// Sweep progress for `code`, as a percentage of the 4096-code range.
///
/// The last code (4095) therefore reports just under 100.
#[inline]
pub fn sweep_percent(code: u16) -> f64 {
    f64::from(code) / (f64::from(DAC_MAX_CODE) + 1.0) * 100.0
}

/// Convert the amplified shunt voltage to milliamps.
///
/// `current = v / (gain * shunt)`, reported in mA.
#[inline]
pub fn shunt_to_ma(shunt_voltage: f64, amp_gain: f64, shunt_ohms: f64) -> f64 {
    shunt_voltage / (amp_gain * shunt_ohms) * 1000.0
}

/// Codes visited by a sweep with `step`: 0, step, 2*step, ... below 4096.
pub fn sweep_codes(step: u16) -> impl Iterator<Item = u16> {
    (0..=DAC_MAX_CODE).step_by(usize::from(step.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_relative_to_4096() {
        assert_eq!(sweep_percent(0), 0.0);
        assert_eq!(sweep_percent(2048), 50.0);
        assert!(sweep_percent(4095) < 100.0);
    }

    #[test]
    fn shunt_conversion_matches_board_constants() {
        // 0.1 Ω shunt, x69: 6.9 V at the ADC is 1 A
        let ma = shunt_to_ma(6.9, 69.0, 0.1);
        assert!((ma - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn sweep_codes_stop_below_4096() {
        let codes: Vec<u16> = sweep_codes(1024).collect();
        assert_eq!(codes, vec![0, 1024, 2048, 3072]);
        assert_eq!(sweep_codes(1).count(), 4096);
        assert_eq!(sweep_codes(4095).collect::<Vec<_>>(), vec![0, 4095]);
    }
}
