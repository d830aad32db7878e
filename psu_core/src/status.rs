//! Point-in-time snapshot of the controller.

use crate::correction::CorrectionModel;

#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    /// Points in the active calibration table (0 = not calibrated).
    pub point_count: usize,
    pub min_voltage: Option<f64>,
    pub max_voltage: Option<f64>,
    /// Points kept from the last failed sweep, if any.
    pub partial_points: Option<usize>,
    pub correction: CorrectionModel,
    pub calibrating: bool,
    pub monitoring: bool,
    pub last_code: u16,
    pub last_set_voltage: f64,
}

impl Status {
    pub fn is_calibrated(&self) -> bool {
        self.point_count > 0
    }
}
