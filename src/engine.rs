//! Inference engine: raw vector → scaler → {intensity, emotion distribution}.
//!
//! The engine owns an immutable [`ModelParams`] and has no interior
//! mutability, so one instance can be shared behind `Arc` by any number of
//! concurrent callers.

use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{check_len, Dimension, EngineError, EngineResult};
use crate::params::{ModelBundle, ModelParams};
use crate::{linear, multinomial, scaler};

// ---------------------------------------------------------------------------
// Prediction result
// ---------------------------------------------------------------------------

/// Label → value, kept in the fixed class order.
///
/// Serializes as a JSON object whose keys appear in class order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabelMap<T>(Vec<(String, T)>);

/// Label → probability for one prediction.
pub type LabelProbabilities = LabelMap<f64>;

/// Label → number of predictions served.
pub type LabelCounts = LabelMap<u64>;

impl<T: Copy> LabelMap<T> {
    pub fn get(&self, label: &str) -> Option<T> {
        self.0.iter().find(|(l, _)| l == label).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, T)> + '_ {
        self.0.iter().map(|(l, v)| (l.as_str(), *v))
    }

    pub fn values(&self) -> Vec<T> {
        self.0.iter().map(|(_, v)| *v).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl LabelMap<f64> {
    pub fn sum(&self) -> f64 {
        self.0.iter().map(|(_, p)| p).sum()
    }
}

impl<T> FromIterator<(String, T)> for LabelMap<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T: Serialize> Serialize for LabelMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, v) in &self.0 {
            map.serialize_entry(label, v)?;
        }
        map.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for LabelMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
            type Value = LabelMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map keyed by emotion label")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((label, v)) = access.next_entry::<String, T>()? {
                    entries.push((label, v));
                }
                Ok(LabelMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

/// Output of one [`Engine::predict`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Highest-probability emotion class
    pub label: String,
    /// Position of `label` in the class order
    pub class_index: usize,
    /// Probability of `label`, in [0, 1]
    pub confidence: f64,
    /// Emotion intensity, clamped to [0, 10]
    pub intensity: f64,
    pub probabilities: LabelProbabilities,
    /// Normalized Shannon entropy of `probabilities` (0 = certain, 1 = uniform)
    pub entropy: f64,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    params: ModelParams,
    model_hash: String,
}

impl Engine {
    pub fn new(params: ModelParams) -> Self {
        let model_hash = params.model_hash();
        Self { params, model_hash }
    }

    /// Validate a bundle's coefficients and build an engine from them.
    pub fn from_bundle(bundle: &ModelBundle) -> EngineResult<Self> {
        bundle.to_params().map(Self::new)
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    pub fn model_hash(&self) -> &str {
        &self.model_hash
    }

    /// Reject vectors of the wrong length or containing non-finite values.
    pub fn validate_input(&self, values: &[f64]) -> EngineResult<()> {
        check_len(Dimension::Input, self.params.channel_count(), values.len())?;
        if let Some((index, &value)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(EngineError::InvalidNumericInput { index, value });
        }
        Ok(())
    }

    /// Run the full pipeline on one raw feature vector.
    ///
    /// Finite inputs that overflow a pipeline stage fail with
    /// `NonFiniteIntermediate`; an `Ok` result always has a finite intensity
    /// in [0, 10] and a proper distribution.
    pub fn predict(&self, values: &[f64]) -> EngineResult<PredictionResult> {
        self.predict_at(values, Utc::now())
    }

    /// [`Engine::predict`] with a caller-supplied timestamp.
    pub fn predict_at(
        &self,
        values: &[f64],
        timestamp: DateTime<Utc>,
    ) -> EngineResult<PredictionResult> {
        self.validate_input(values)?;

        let scaled = scaler::transform(values, self.params.scaler())?;
        let intensity = linear::predict_intensity(&scaled, self.params.linear())?;
        let logits = multinomial::logits(&scaled, self.params.multinomial())?;
        let scores = crate::scores::ClassScores::from_logits(&logits)?;

        let (class_index, confidence) = scores.best();
        let entropy = scores.entropy();
        let label = self.params.emotion_labels()[class_index].clone();

        tracing::debug!(
            logits = ?logits,
            softmax = ?scores.as_slice(),
            entropy,
            uncertain = scores.is_uncertain(),
            intensity,
            top_class = %label,
            top_confidence = confidence,
            "prediction computed"
        );

        let probabilities: LabelProbabilities = self
            .params
            .emotion_labels()
            .iter()
            .cloned()
            .zip(scores.into_vec())
            .collect();

        Ok(PredictionResult {
            label,
            class_index,
            confidence,
            intensity,
            probabilities,
            entropy,
            timestamp,
        })
    }

    /// Predict every row, stopping at the first failure.
    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> EngineResult<Vec<PredictionResult>> {
        let timestamp = Utc::now();
        rows.iter().map(|row| self.predict_at(row, timestamp)).collect()
    }

    /// Unclamped intensity score, for regression metrics.
    pub fn raw_intensity(&self, values: &[f64]) -> EngineResult<f64> {
        self.validate_input(values)?;
        let scaled = scaler::transform(values, self.params.scaler())?;
        linear::raw_score(&scaled, self.params.linear())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("channels", &self.params.channel_count())
            .field("classes", &self.params.emotion_labels())
            .field("model_hash", &self.model_hash)
            .finish()
    }
}
