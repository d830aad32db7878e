//! Voltage → DAC code lookup by linear interpolation over the calibration table.
use crate::calibration::CalibrationTable;
use crate::error::{PsuError, Result};
use psu_traits::DAC_MAX_CODE;

/// Map a requested (non-positive) voltage to the DAC code that produces it.
///
/// - targets at or beyond the table ends clamp to the end codes;
/// - between two points the code is interpolated and rounded half away from zero;
/// - a pair of points at the same voltage yields the first point's code.
pub fn voltage_to_code(table: &CalibrationTable, target: f64) -> Result<u16> {
    if !target.is_finite() {
        return Err(PsuError::Validation(format!(
            "voltage must be a finite number, got {target}"
        )));
    }
    if target > 0.0 {
        return Err(PsuError::Validation(format!(
            "positive voltage {target} V not permitted"
        )));
    }

    let points = table.points();
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Err(PsuError::State("not calibrated".into()));
    };
    if target <= first.voltage {
        return Ok(first.code);
    }
    if target >= last.voltage {
        return Ok(last.code);
    }

    for pair in points.windows(2) {
        let (p1, p2) = (pair[0], pair[1]);
        if p1.voltage <= target && target <= p2.voltage {
            let span = p2.voltage - p1.voltage;
            if span == 0.0 {
                return Ok(p1.code);
            }
            let c1 = f64::from(p1.code);
            let c2 = f64::from(p2.code);
            let code = c1 + (c2 - c1) * (target - p1.voltage) / span;
            return Ok(code.round().clamp(0.0, f64::from(DAC_MAX_CODE)) as u16);
        }
    }

    Err(PsuError::Internal(format!(
        "no calibration bracket found for {target} V"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationPoint;

    fn table() -> CalibrationTable {
        CalibrationTable::from_points(vec![
            CalibrationPoint::new(-10.0, 4095),
            CalibrationPoint::new(-5.0, 2048),
            CalibrationPoint::new(0.0, 0),
        ])
    }

    #[test]
    fn interpolates_and_rounds_half_away_from_zero() {
        // 2048 + (4095 - 2048) * 0.5 = 3071.5
        assert_eq!(voltage_to_code(&table(), -7.5).unwrap(), 3072);
    }

    #[test]
    fn exact_points_map_to_their_codes() {
        assert_eq!(voltage_to_code(&table(), -5.0).unwrap(), 2048);
        assert_eq!(voltage_to_code(&table(), 0.0).unwrap(), 0);
        assert_eq!(voltage_to_code(&table(), -10.0).unwrap(), 4095);
    }

    #[test]
    fn beyond_table_clamps_to_end_code() {
        let t = CalibrationTable::from_points(vec![
            CalibrationPoint::new(-9.0, 3900),
            CalibrationPoint::new(-1.0, 400),
        ]);
        assert_eq!(voltage_to_code(&t, -9.5).unwrap(), 3900);
        assert_eq!(voltage_to_code(&t, -0.5).unwrap(), 400);
    }

    #[test]
    fn positive_target_is_rejected_even_when_uncalibrated() {
        let err = voltage_to_code(&CalibrationTable::default(), 1.0).unwrap_err();
        assert!(matches!(err, PsuError::Validation(_)));
    }

    #[test]
    fn empty_table_is_a_state_error() {
        let err = voltage_to_code(&CalibrationTable::default(), -1.0).unwrap_err();
        assert_eq!(err, PsuError::State("not calibrated".into()));
    }

    #[test]
    fn duplicate_voltages_use_first_point() {
        let t = CalibrationTable::from_points(vec![
            CalibrationPoint::new(-10.0, 4095),
            CalibrationPoint::new(-4.0, 2000),
            CalibrationPoint::new(-4.0, 2100),
            CalibrationPoint::new(0.0, 0),
        ]);
        assert_eq!(voltage_to_code(&t, -4.0).unwrap(), 2000);
    }

    #[test]
    fn single_point_table_clamps_everything() {
        let t = CalibrationTable::from_points(vec![CalibrationPoint::new(-3.0, 1200)]);
        assert_eq!(voltage_to_code(&t, -8.0).unwrap(), 1200);
        assert_eq!(voltage_to_code(&t, -1.0).unwrap(), 1200);
    }
}
