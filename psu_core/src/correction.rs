//! Linear current correction: `true = a + b * raw`, fitted by ordinary least squares.
use crate::error::{PsuError, Result};

/// Affine map from measured to true current (mA).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionModel {
    /// Intercept (mA).
    pub a: f64,
    /// Slope.
    pub b: f64,
}

impl Default for CorrectionModel {
    /// Bench fit of the shunt amplifier against a reference meter.
    fn default() -> Self {
        Self {
            a: -0.279388,
            b: 1.782842,
        }
    }
}

impl CorrectionModel {
    pub const fn new(a: f64, b: f64) -> Self {
        Self { a, b }
    }

    /// Identity model (`a = 0`, `b = 1`).
    pub const fn identity() -> Self {
        Self { a: 0.0, b: 1.0 }
    }

    #[inline]
    pub fn apply(&self, raw_ma: f64) -> f64 {
        self.a + self.b * raw_ma
    }

    /// Least-squares fit of `truth ≈ a + b * raw`.
    ///
    /// Needs at least two pairs of equal length and at least two distinct raw values.
    pub fn fit(raw: &[f64], truth: &[f64]) -> Result<Self> {
        if raw.len() != truth.len() {
            return Err(PsuError::Validation(format!(
                "correction pairs mismatched: {} raw vs {} true values",
                raw.len(),
                truth.len()
            )));
        }
        if raw.len() < 2 {
            return Err(PsuError::Validation(format!(
                "correction needs at least 2 pairs, got {}",
                raw.len()
            )));
        }
        if raw.iter().chain(truth).any(|v| !v.is_finite()) {
            return Err(PsuError::Validation(
                "correction values must be finite".into(),
            ));
        }

        let n = raw.len() as f64;
        let mean_x = raw.iter().sum::<f64>() / n;
        let mean_y = truth.iter().sum::<f64>() / n;
        // Centered sums keep the normal equations well conditioned for mA-scale data.
        let (sxx, sxy) = raw
            .iter()
            .zip(truth)
            .fold((0.0, 0.0), |(sxx, sxy), (&x, &y)| {
                let dx = x - mean_x;
                (sxx + dx * dx, sxy + dx * (y - mean_y))
            });
        if sxx == 0.0 {
            return Err(PsuError::Numerical(
                "singular fit: all raw values are identical".into(),
            ));
        }
        let b = sxy / sxx;
        let a = mean_y - b * mean_x;
        if !(a.is_finite() && b.is_finite()) {
            return Err(PsuError::Numerical("fit produced non-finite coefficients".into()));
        }
        Ok(Self { a, b })
    }
}
