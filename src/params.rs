//! Model parameters and the exported coefficient bundle.
//!
//! Parameters are produced once by the offline fit ([`crate::train`]) and
//! loaded as one unit through [`ModelParams::load`]. A loaded `ModelParams`
//! has no mutating methods; every prediction borrows it.

use std::path::Path;

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{check_len, Dimension, EngineError, EngineResult};

/// Version prefix for parameter hashes. Bump when the serialized layout changes.
const MODEL_HASH_VERSION: &str = "v1";

/// Assignment wrapper used by the browser module form of a bundle.
pub const BROWSER_CONFIG_PREFIX: &str = "window.APP_CONFIG = ";

/// 10-20 montage channel names, in dataset column order.
pub const CHANNEL_LABELS: [&str; 19] = [
    "Fp1", "Fp2", "F7", "F3", "Fz", "F4", "F8", "T7", "C3", "Cz", "C4", "T8", "P7", "P3", "Pz",
    "P4", "P8", "O1", "O2",
];

/// Emotion classes, in coefficient row order.
pub const EMOTION_LABELS: [&str; 6] = ["Calm", "Sad", "Fearful", "Angry", "Surprised", "Happy"];

// ---------------------------------------------------------------------------
// Parameter parts
// ---------------------------------------------------------------------------

/// Per-feature standardization learned offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub mean: Vec<f64>,
    /// A zero entry is treated as 1 when scaling.
    pub scale: Vec<f64>,
}

/// Intensity regression coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearParams {
    pub coef: Vec<f64>,
    pub intercept: f64,
}

/// One coefficient row and one intercept per emotion class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultinomialParams {
    pub coef: Vec<Vec<f64>>,
    pub intercept: Vec<f64>,
}

impl MultinomialParams {
    pub fn class_count(&self) -> usize {
        self.coef.len()
    }
}

// ---------------------------------------------------------------------------
// Loaded parameter set
// ---------------------------------------------------------------------------

/// A validated, mutually consistent parameter set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelParams {
    channel_labels: Vec<String>,
    emotion_labels: Vec<String>,
    scaler: ScalerParams,
    linear: LinearParams,
    multinomial: MultinomialParams,
}

impl ModelParams {
    /// Validate and assemble all five parts at once.
    ///
    /// Fails with [`EngineError::EmptyClassSet`] when there are no emotion
    /// classes, [`EngineError::DimensionMismatch`] on any length
    /// disagreement, [`EngineError::InvalidLabel`] on an empty label, and
    /// [`EngineError::IncompleteParams`] when there are no channels or a
    /// coefficient is not finite.
    pub fn load(
        channel_labels: Vec<String>,
        emotion_labels: Vec<String>,
        scaler: ScalerParams,
        linear: LinearParams,
        multinomial: MultinomialParams,
    ) -> EngineResult<Self> {
        let channel_count = channel_labels.len();
        if channel_count == 0 {
            return Err(EngineError::IncompleteParams {
                part: "channel labels",
            });
        }
        if emotion_labels.is_empty() || multinomial.coef.is_empty() {
            return Err(EngineError::EmptyClassSet);
        }
        let class_count = multinomial.class_count();

        check_len(Dimension::EmotionLabels, class_count, emotion_labels.len())?;
        check_len(
            Dimension::MultinomialIntercept,
            class_count,
            multinomial.intercept.len(),
        )?;
        for (class, row) in multinomial.coef.iter().enumerate() {
            check_len(Dimension::MultinomialRow { class }, channel_count, row.len())?;
        }
        check_len(Dimension::ScalerMean, channel_count, scaler.mean.len())?;
        check_len(Dimension::ScalerScale, channel_count, scaler.scale.len())?;
        check_len(Dimension::LinearCoef, channel_count, linear.coef.len())?;

        if let Some(index) = emotion_labels.iter().position(|l| l.trim().is_empty()) {
            return Err(EngineError::InvalidLabel { index });
        }

        require_finite(&scaler.mean, "scaler mean")?;
        require_finite(&scaler.scale, "scaler scale")?;
        require_finite(&linear.coef, "linear coefficients")?;
        require_finite(&[linear.intercept], "linear intercept")?;
        for row in &multinomial.coef {
            require_finite(row, "multinomial coefficients")?;
        }
        require_finite(&multinomial.intercept, "multinomial intercepts")?;

        Ok(Self {
            channel_labels,
            emotion_labels,
            scaler,
            linear,
            multinomial,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channel_labels.len()
    }

    pub fn class_count(&self) -> usize {
        self.emotion_labels.len()
    }

    pub fn channel_labels(&self) -> &[String] {
        &self.channel_labels
    }

    pub fn emotion_labels(&self) -> &[String] {
        &self.emotion_labels
    }

    pub fn scaler(&self) -> &ScalerParams {
        &self.scaler
    }

    pub fn linear(&self) -> &LinearParams {
        &self.linear
    }

    pub fn multinomial(&self) -> &MultinomialParams {
        &self.multinomial
    }

    /// SHA-256 over the serialized parameter set, as `sha256:<hex>`.
    pub fn model_hash(&self) -> String {
        let serialized =
            serde_json::to_vec(self).unwrap_or_else(|_| format!("{:?}", self).into_bytes());
        let mut hasher = Sha256::new();
        hasher.update(MODEL_HASH_VERSION.as_bytes());
        hasher.update(&serialized);
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}

fn require_finite(values: &[f64], part: &'static str) -> EngineResult<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(EngineError::IncompleteParams { part })
    }
}

// ---------------------------------------------------------------------------
// Exported bundle
// ---------------------------------------------------------------------------

/// Coefficient block of a [`ModelBundle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleCoefficients {
    pub scaler_mean: Vec<f64>,
    pub scaler_scale: Vec<f64>,
    pub linear_coef: Vec<f64>,
    pub linear_intercept: f64,
    pub logistic_coef: Vec<Vec<f64>>,
    pub logistic_intercept: Vec<f64>,
}

/// Everything the offline fit exports: labels, demo inputs and coefficients.
///
/// Serializes to the same object the browser page reads as `APP_CONFIG`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelBundle {
    pub channel_labels: Vec<String>,
    /// One raw reading per channel, used to prefill input forms.
    #[serde(default)]
    pub example_values: Vec<f64>,
    /// Pool of raw readings for "random sample" inputs.
    #[serde(default)]
    pub sample_values: Vec<Vec<f64>>,
    pub emotion_labels: Vec<String>,
    pub model: BundleCoefficients,
}

impl ModelBundle {
    /// Parse a bundle from JSON or from the `window.APP_CONFIG = {...};` form.
    pub fn parse(content: &str) -> Result<Self> {
        let trimmed = content.trim();
        let json = match trimmed.strip_prefix(BROWSER_CONFIG_PREFIX) {
            Some(rest) => rest.trim_end().trim_end_matches(';'),
            None => trimmed,
        };
        serde_json::from_str(json).wrap_err("Invalid model bundle JSON")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read model bundle {}", path.display()))?;
        let bundle = Self::parse(&content)
            .wrap_err_with(|| format!("Failed to parse model bundle {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            channels = bundle.channel_labels.len(),
            classes = bundle.emotion_labels.len(),
            "model bundle loaded"
        );
        Ok(bundle)
    }

    /// Validate the coefficients and produce the engine's parameter set.
    pub fn to_params(&self) -> EngineResult<ModelParams> {
        ModelParams::load(
            self.channel_labels.clone(),
            self.emotion_labels.clone(),
            ScalerParams {
                mean: self.model.scaler_mean.clone(),
                scale: self.model.scaler_scale.clone(),
            },
            LinearParams {
                coef: self.model.linear_coef.clone(),
                intercept: self.model.linear_intercept,
            },
            MultinomialParams {
                coef: self.model.logistic_coef.clone(),
                intercept: self.model.logistic_intercept.clone(),
            },
        )
    }

    /// Rebuild a bundle from loaded parameters (no demo inputs).
    pub fn from_params(params: &ModelParams) -> Self {
        Self {
            channel_labels: params.channel_labels().to_vec(),
            example_values: Vec::new(),
            sample_values: Vec::new(),
            emotion_labels: params.emotion_labels().to_vec(),
            model: BundleCoefficients {
                scaler_mean: params.scaler().mean.clone(),
                scaler_scale: params.scaler().scale.clone(),
                linear_coef: params.linear().coef.clone(),
                linear_intercept: params.linear().intercept,
                logistic_coef: params.multinomial().coef.clone(),
                logistic_intercept: params.multinomial().intercept.clone(),
            },
        }
    }
}

/// Owned label list from string literals, e.g. `labels(&EMOTION_LABELS)`.
pub fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Three channels, two classes; identity scaler.
    pub(crate) fn small_params() -> ModelParams {
        ModelParams::load(
            labels(&["C1", "C2", "C3"]),
            labels(&["Calm", "Happy"]),
            ScalerParams {
                mean: vec![0.0; 3],
                scale: vec![1.0; 3],
            },
            LinearParams {
                coef: vec![1.0, 1.0, 1.0],
                intercept: 0.0,
            },
            MultinomialParams {
                coef: vec![vec![1.0, 0.0, 0.0], vec![0.0, 0.0, 0.0]],
                intercept: vec![0.0, 0.0],
            },
        )
        .unwrap()
    }

    fn parts() -> (ScalerParams, LinearParams, MultinomialParams) {
        let p = small_params();
        (p.scaler.clone(), p.linear.clone(), p.multinomial.clone())
    }

    #[test]
    fn test_load_valid() {
        let p = small_params();
        assert_eq!(p.channel_count(), 3);
        assert_eq!(p.class_count(), 2);
        assert_eq!(p.emotion_labels()[1], "Happy");
    }

    #[test]
    fn test_load_rejects_empty_class_set() {
        let (scaler, linear, _) = parts();
        let err = ModelParams::load(
            labels(&["C1", "C2", "C3"]),
            vec![],
            scaler,
            linear,
            MultinomialParams {
                coef: vec![],
                intercept: vec![],
            },
        )
        .unwrap_err();
        assert_eq!(err, EngineError::EmptyClassSet);
    }

    #[test]
    fn test_load_rejects_short_scaler() {
        let (mut scaler, linear, multi) = parts();
        scaler.scale.pop();
        let err = ModelParams::load(
            labels(&["C1", "C2", "C3"]),
            labels(&["Calm", "Happy"]),
            scaler,
            linear,
            multi,
        )
        .unwrap_err();
        assert_eq!(
            err,
            EngineError::DimensionMismatch {
                dimension: Dimension::ScalerScale,
                expected: 3,
                got: 2,
            }
        );
    }

    #[test]
    fn test_load_rejects_ragged_row() {
        let (scaler, linear, mut multi) = parts();
        multi.coef[1].push(0.5);
        let err = ModelParams::load(
            labels(&["C1", "C2", "C3"]),
            labels(&["Calm", "Happy"]),
            scaler,
            linear,
            multi,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::DimensionMismatch {
                dimension: Dimension::MultinomialRow { class: 1 },
                ..
            }
        ));
    }

    #[test]
    fn test_load_rejects_label_count_mismatch() {
        let (scaler, linear, multi) = parts();
        let err = ModelParams::load(
            labels(&["C1", "C2", "C3"]),
            labels(&["Calm", "Happy", "Sad"]),
            scaler,
            linear,
            multi,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::DimensionMismatch {
                dimension: Dimension::EmotionLabels,
                ..
            }
        ));
    }

    #[test]
    fn test_load_rejects_empty_label() {
        let (scaler, linear, multi) = parts();
        let err = ModelParams::load(
            labels(&["C1", "C2", "C3"]),
            labels(&["Calm", ""]),
            scaler,
            linear,
            multi,
        )
        .unwrap_err();
        assert_eq!(err, EngineError::InvalidLabel { index: 1 });
    }

    #[test]
    fn test_load_rejects_no_channels() {
        let err = ModelParams::load(
            vec![],
            labels(&["Calm"]),
            ScalerParams {
                mean: vec![],
                scale: vec![],
            },
            LinearParams {
                coef: vec![],
                intercept: 0.0,
            },
            MultinomialParams {
                coef: vec![vec![]],
                intercept: vec![0.0],
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::IncompleteParams { .. }));
    }

    #[test]
    fn test_load_rejects_nan_coefficient() {
        let (scaler, mut linear, multi) = parts();
        linear.coef[0] = f64::NAN;
        let err = ModelParams::load(
            labels(&["C1", "C2", "C3"]),
            labels(&["Calm", "Happy"]),
            scaler,
            linear,
            multi,
        )
        .unwrap_err();
        assert_eq!(
            err,
            EngineError::IncompleteParams {
                part: "linear coefficients"
            }
        );
    }

    #[test]
    fn test_model_hash_deterministic() {
        let h1 = small_params().model_hash();
        let h2 = small_params().model_hash();
        assert_eq!(h1, h2);
        assert!(h1.starts_with("sha256:"));
        assert_eq!(h1.len(), "sha256:".len() + 64);
    }

    #[test]
    fn test_model_hash_changes_with_coefficients() {
        let a = small_params();
        let mut bundle = ModelBundle::from_params(&a);
        bundle.model.linear_intercept = 0.5;
        let b = bundle.to_params().unwrap();
        assert_ne!(a.model_hash(), b.model_hash());
    }

    #[test]
    fn test_bundle_uses_browser_field_names() {
        let bundle = ModelBundle::from_params(&small_params());
        let json = serde_json::to_string(&bundle).unwrap();
        assert!(json.contains("\"channelLabels\""));
        assert!(json.contains("\"emotionLabels\""));
        assert!(json.contains("\"scalerMean\""));
        assert!(json.contains("\"logisticIntercept\""));
    }

    #[test]
    fn test_bundle_parse_browser_module() {
        let bundle = ModelBundle::from_params(&small_params());
        let module = format!(
            "{}{};\n",
            BROWSER_CONFIG_PREFIX,
            serde_json::to_string_pretty(&bundle).unwrap()
        );
        let parsed = ModelBundle::parse(&module).unwrap();
        assert_eq!(parsed.channel_labels, bundle.channel_labels);
        assert_eq!(parsed.model.logistic_coef, bundle.model.logistic_coef);
        assert_eq!(parsed.to_params().unwrap(), small_params());
    }

    #[test]
    fn test_bundle_parse_without_demo_inputs() {
        let json = r#"{
            "channelLabels": ["A"],
            "emotionLabels": ["Calm"],
            "model": {
                "scalerMean": [0.0], "scalerScale": [1.0],
                "linearCoef": [1.0], "linearIntercept": 0.0,
                "logisticCoef": [[1.0]], "logisticIntercept": [0.0]
            }
        }"#;
        let bundle = ModelBundle::parse(json).unwrap();
        assert!(bundle.example_values.is_empty());
        assert!(bundle.sample_values.is_empty());
        assert_eq!(bundle.to_params().unwrap().class_count(), 1);
    }

    #[test]
    fn test_default_label_sets() {
        assert_eq!(CHANNEL_LABELS.len(), 19);
        assert_eq!(EMOTION_LABELS.len(), 6);
        assert!(EMOTION_LABELS.iter().all(|l| !l.is_empty()));
    }
}
