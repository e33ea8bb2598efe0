//! Intensity regression: `Σ coef[i]·scaled[i] + intercept`, clamped to [0, 10].

use crate::error::{check_finite, check_len, Dimension, EngineResult, Stage};
use crate::params::LinearParams;

/// Lower bound of the intensity scale.
pub const INTENSITY_MIN: f64 = 0.0;
/// Upper bound of the intensity scale.
pub const INTENSITY_MAX: f64 = 10.0;

/// Dot product of equal-length slices. Lengths are checked by callers.
#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Unclamped linear combination. Used by offline evaluation for MSE/R².
///
/// A sum that overflows is `NonFiniteIntermediate`, never a NaN or infinite
/// score.
pub fn raw_score(scaled: &[f64], params: &LinearParams) -> EngineResult<f64> {
    check_len(Dimension::LinearCoef, scaled.len(), params.coef.len())?;
    let score = dot(&params.coef, scaled) + params.intercept;
    check_finite(Stage::Intensity, &[score])?;
    Ok(score)
}

/// Intensity estimate on the [0, 10] scale.
///
/// Out-of-range raw scores are expected for unusual inputs and are clamped,
/// never reported raw.
pub fn predict_intensity(scaled: &[f64], params: &LinearParams) -> EngineResult<f64> {
    raw_score(scaled, params).map(clamp_intensity)
}

#[inline]
pub fn clamp_intensity(raw: f64) -> f64 {
    raw.clamp(INTENSITY_MIN, INTENSITY_MAX)
}
