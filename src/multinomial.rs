//! Multinomial emotion classifier: per-class linear logits followed by softmax.

use crate::error::{check_finite, check_len, Dimension, EngineError, EngineResult, Stage};
use crate::linear::dot;
use crate::params::MultinomialParams;
use crate::scores::ClassScores;

/// `logit[c] = Σ coef[c][i]·scaled[i] + intercept[c]` for every class.
///
/// Fails with `NonFiniteIntermediate` when a class's sum overflows.
pub fn logits(scaled: &[f64], params: &MultinomialParams) -> EngineResult<Vec<f64>> {
    let class_count = params.class_count();
    if class_count == 0 {
        return Err(EngineError::EmptyClassSet);
    }
    check_len(
        Dimension::MultinomialIntercept,
        class_count,
        params.intercept.len(),
    )?;

    let logits = params
        .coef
        .iter()
        .zip(&params.intercept)
        .enumerate()
        .map(|(class, (row, &intercept))| {
            check_len(Dimension::MultinomialRow { class }, scaled.len(), row.len())?;
            Ok(dot(row, scaled) + intercept)
        })
        .collect::<EngineResult<Vec<f64>>>()?;
    check_finite(Stage::Logits, &logits)?;
    Ok(logits)
}

/// Class distribution for a standardized vector.
pub fn predict_scores(scaled: &[f64], params: &MultinomialParams) -> EngineResult<ClassScores> {
    ClassScores::from_logits(&logits(scaled, params)?)
}
