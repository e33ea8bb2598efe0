//! Feature standardization: `(value - mean) / scale`.

use crate::error::{check_finite, check_len, Dimension, EngineResult, Stage};
use crate::params::ScalerParams;

/// Divisor for feature `i`. Zero-variance features keep their centered value.
#[inline]
pub fn effective_scale(scale: f64) -> f64 {
    if scale == 0.0 {
        1.0
    } else {
        scale
    }
}

/// Standardize a raw feature vector.
///
/// Fails with `DimensionMismatch` when `values` and the scaler disagree in
/// length, and with `NonFiniteIntermediate` when a finite value overflows
/// (huge inputs or tiny scales).
pub fn transform(values: &[f64], params: &ScalerParams) -> EngineResult<Vec<f64>> {
    check_len(Dimension::ScalerScale, params.mean.len(), params.scale.len())?;
    check_len(Dimension::Input, params.mean.len(), values.len())?;

    let scaled: Vec<f64> = values
        .iter()
        .zip(params.mean.iter().zip(&params.scale))
        .map(|(&v, (&mean, &scale))| (v - mean) / effective_scale(scale))
        .collect();
    check_finite(Stage::Scaled, &scaled)?;
    Ok(scaled)
}
