//! Error types for the inference engine.
//!
//! Every failure is deterministic given the same input and parameters, so
//! none of these are retryable. Callers above the engine wrap them in
//! `eyre::Report` and attach context.

use std::fmt;

use thiserror::Error;

/// Which length disagreed in a [`EngineError::DimensionMismatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    /// The caller's feature vector
    Input,
    /// `ScalerParams::mean`
    ScalerMean,
    /// `ScalerParams::scale`
    ScalerScale,
    /// `LinearParams::coef`
    LinearCoef,
    /// One coefficient row of the multinomial model
    MultinomialRow { class: usize },
    /// `MultinomialParams::intercept`
    MultinomialIntercept,
    /// Emotion label list
    EmotionLabels,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input vector"),
            Self::ScalerMean => write!(f, "scaler mean"),
            Self::ScalerScale => write!(f, "scaler scale"),
            Self::LinearCoef => write!(f, "linear coefficients"),
            Self::MultinomialRow { class } => write!(f, "multinomial coefficients for class {class}"),
            Self::MultinomialIntercept => write!(f, "multinomial intercepts"),
            Self::EmotionLabels => write!(f, "emotion labels"),
        }
    }
}

/// Pipeline step that produced a non-finite value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Standardized feature vector
    Scaled,
    /// Linear intensity score
    Intensity,
    /// Per-class logits
    Logits,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scaled => write!(f, "scaled features"),
            Self::Intensity => write!(f, "intensity score"),
            Self::Logits => write!(f, "class logits"),
        }
    }
}

/// Engine error kinds.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A length disagrees with the loaded parameters
    #[error("Dimension mismatch in {dimension}: expected {expected}, got {got}")]
    DimensionMismatch {
        /// What disagreed
        dimension: Dimension,
        /// Length implied by the loaded parameters
        expected: usize,
        /// Length actually supplied
        got: usize,
    },

    /// Multinomial parameters have zero classes; softmax is undefined
    #[error("Multinomial parameters define no classes")]
    EmptyClassSet,

    /// A non-finite value in the input vector
    #[error("Invalid numeric input at channel {index}: {value}")]
    InvalidNumericInput {
        /// Channel index of the first offending value
        index: usize,
        /// The offending value
        value: f64,
    },

    /// Finite inputs overflowed inside the pipeline
    #[error("Non-finite {stage} at position {index}")]
    NonFiniteIntermediate {
        /// Step that overflowed
        stage: Stage,
        /// Position within that step's output
        index: usize,
    },

    /// A parameter part is empty or holds non-finite numbers
    #[error("Incomplete model parameters: {part}")]
    IncompleteParams {
        /// Which part of the parameter set is unusable
        part: &'static str,
    },

    /// An emotion label is the empty string
    #[error("Emotion label {index} is empty")]
    InvalidLabel {
        /// Position of the empty label
        index: usize,
    },
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Fail with `DimensionMismatch` unless `got == expected`.
pub(crate) fn check_len(dimension: Dimension, expected: usize, got: usize) -> EngineResult<()> {
    if expected != got {
        return Err(EngineError::DimensionMismatch {
            dimension,
            expected,
            got,
        });
    }
    Ok(())
}

/// Fail with `NonFiniteIntermediate` at the first non-finite value.
pub(crate) fn check_finite(stage: Stage, values: &[f64]) -> EngineResult<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(EngineError::NonFiniteIntermediate { stage, index }),
        None => Ok(()),
    }
}
