//! ClassScores: softmax normalization of per-class logits.

use serde::Serialize;

use crate::error::{check_finite, EngineError, EngineResult, Stage};

/// Normalized entropy threshold for flagging uncertain predictions.
///
/// Above this value no class holds a clear majority; the prediction is still
/// reported but marked uncertain.
pub const ENTROPY_ABSTAIN_THRESHOLD: f64 = 0.85;

/// Numerically stable softmax.
///
/// The maximum logit is subtracted before exponentiating, so adding the same
/// constant to every logit leaves the result unchanged. Non-finite logits are
/// rejected with `NonFiniteIntermediate`.
pub fn softmax(logits: &[f64]) -> EngineResult<Vec<f64>> {
    if logits.is_empty() {
        return Err(EngineError::EmptyClassSet);
    }
    check_finite(Stage::Logits, logits)?;

    let max_val = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    // The max term contributes exp(0) = 1, so total >= 1.
    let exp_vals: Vec<f64> = logits.iter().map(|&x| (x - max_val).exp()).collect();
    let total: f64 = exp_vals.iter().sum();

    Ok(exp_vals.into_iter().map(|e| e / total).collect())
}

/// Index of the largest value; the lowest index wins ties.
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, &v) in values.iter().enumerate() {
        match best {
            Some((_, top)) if v <= top => {}
            _ if v.is_nan() => {}
            _ => best = Some((idx, v)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Probability distribution over the emotion classes, in class order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassScores {
    probabilities: Vec<f64>,
}

impl ClassScores {
    pub fn from_logits(logits: &[f64]) -> EngineResult<Self> {
        Ok(Self {
            probabilities: softmax(logits)?,
        })
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.probabilities
    }

    /// Selected class index and its probability.
    pub fn best(&self) -> (usize, f64) {
        // softmax never returns an empty distribution
        let idx = argmax(&self.probabilities).unwrap_or(0);
        (idx, self.probabilities[idx])
    }

    /// Shannon entropy of the distribution, normalized to [0, 1].
    ///
    /// - 0.0 = all probability on one class
    /// - 1.0 = uniform across all classes
    pub fn entropy(&self) -> f64 {
        let k = self.probabilities.len();
        if k < 2 {
            return 0.0;
        }
        let max_entropy = (k as f64).ln();
        let mut h = 0.0;
        for &p in &self.probabilities {
            if p > 1e-15 {
                h -= p * p.ln();
            }
        }
        (h / max_entropy).clamp(0.0, 1.0)
    }

    /// True when entropy exceeds [`ENTROPY_ABSTAIN_THRESHOLD`].
    pub fn is_uncertain(&self) -> bool {
        self.entropy() > ENTROPY_ABSTAIN_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_uniform() {
        let scores = ClassScores::from_logits(&[0.0, 0.0, 0.0, 0.0]).unwrap();
        for &p in scores.as_slice() {
            assert!((p - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn test_softmax_two_class_reference() {
        let probs = softmax(&[5.0, 0.0]).unwrap();
        assert!((probs[0] - 0.993_307_149_075_715_2).abs() < 1e-12);
        assert!((probs[1] - 0.006_692_850_924_284_856).abs() < 1e-12);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[3.2, -1.0, 0.5, 7.7, -20.0, 0.0]).unwrap();
        let total: f64 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_softmax_large_logits_stay_finite() {
        let probs = softmax(&[1000.0, 999.0, -1000.0]).unwrap();
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!(probs[0] > probs[1]);
    }

    #[test]
    fn test_softmax_shift_invariant() {
        let a = softmax(&[1.0, 2.0, 3.0]).unwrap();
        let b = softmax(&[101.0, 102.0, 103.0]).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_softmax_rejects_non_finite_logits() {
        for logits in [[f64::INFINITY, f64::NEG_INFINITY], [0.0, f64::NAN]] {
            assert!(matches!(
                softmax(&logits),
                Err(EngineError::NonFiniteIntermediate {
                    stage: Stage::Logits,
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_softmax_opposite_extremes() {
        let probs = softmax(&[1e308, -1e308]).unwrap();
        assert_eq!(probs, vec![1.0, 0.0]);
    }

    #[test]
    fn test_softmax_empty() {
        assert_eq!(softmax(&[]), Err(EngineError::EmptyClassSet));
    }

    #[test]
    fn test_argmax_tie_picks_lowest_index() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), Some(1));
        assert_eq!(argmax(&[0.5, 0.5]), Some(0));
        for _ in 0..100 {
            assert_eq!(argmax(&[1.0, 1.0, 1.0]), Some(0));
        }
    }

    #[test]
    fn test_argmax_skips_nan() {
        assert_eq!(argmax(&[f64::NAN, 0.1, 0.3]), Some(2));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_best_on_tied_logits() {
        let scores = ClassScores::from_logits(&[2.0, 2.0, -1.0]).unwrap();
        let (idx, p) = scores.best();
        assert_eq!(idx, 0);
        assert_eq!(p, scores.as_slice()[1]);
    }

    #[test]
    fn test_entropy_uniform() {
        let scores = ClassScores::from_logits(&[0.0; 6]).unwrap();
        assert!((scores.entropy() - 1.0).abs() < 1e-9);
        assert!(scores.is_uncertain());
    }

    #[test]
    fn test_entropy_dominant() {
        let scores = ClassScores::from_logits(&[40.0, 0.0, -5.0, -3.0]).unwrap();
        assert!(scores.entropy() < 0.01);
        assert!(!scores.is_uncertain());
    }

    #[test]
    fn test_entropy_single_class() {
        let scores = ClassScores::from_logits(&[3.0]).unwrap();
        assert_eq!(scores.as_slice(), &[1.0]);
        assert_eq!(scores.entropy(), 0.0);
    }
}
