//! Offline fitting of the scaler, intensity regression and emotion classifier.
//!
//! Runs once over a loaded [`Dataset`] and produces a [`ModelBundle`]. The
//! engine never calls into this module.
//!
//! Labels are synthetic: a seeded random projection of the standardized
//! channels, min-max normalized to the intensity scale, then cut into
//! quantile bins for the emotion classes. They exist to exercise the
//! pipeline, not as ground truth.

use eyre::{bail, eyre, Result, WrapErr};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use tracing::{debug, info};

use crate::dataset::{Dataset, DEFAULT_MAX_SUBJECTS};
use crate::linear::{INTENSITY_MAX, INTENSITY_MIN};
use crate::params::{
    BundleCoefficients, LinearParams, ModelBundle, MultinomialParams, ScalerParams, EMOTION_LABELS,
};
use crate::scaler;
use crate::scores::softmax;

/// Channels whose synthetic weight is doubled.
const EMPHASIZED_CHANNELS: [usize; 4] = [0, 4, 9, 14];

/// Raw rows kept in the bundle's sample pool.
const SAMPLE_POOL_SIZE: usize = 200;

/// Offline fitting configuration.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Subject files to load
    pub max_subjects: usize,
    /// Seed for synthetic labels, splits and sampling
    pub seed: u64,
    /// Fraction of rows held out for evaluation
    pub test_fraction: f64,
    /// Gradient descent iterations for the classifier
    pub max_iter: usize,
    /// Inverse L2 regularization strength
    pub c: f64,
    pub learning_rate: f64,
    /// Stop when the largest gradient component falls below this
    pub tolerance: f64,
    pub emotion_labels: Vec<String>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            max_subjects: DEFAULT_MAX_SUBJECTS,
            seed: 42,
            test_fraction: 0.2,
            max_iter: 1000,
            c: 1.0,
            learning_rate: 0.1,
            tolerance: 1e-4,
            emotion_labels: EMOTION_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scaler
// ---------------------------------------------------------------------------

/// Per-feature mean and population standard deviation. Zero deviation is stored as 1.
pub fn fit_scaler(rows: &[Vec<f64>]) -> Result<ScalerParams> {
    let Some(first) = rows.first() else {
        bail!("Cannot fit scaler on zero rows");
    };
    let n = rows.len() as f64;
    let p = first.len();

    let mut mean = vec![0.0; p];
    for row in rows {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n);

    let mut var = vec![0.0; p];
    for row in rows {
        for ((acc, v), m) in var.iter_mut().zip(row).zip(&mean) {
            *acc += (v - m).powi(2);
        }
    }
    let scale = var
        .into_iter()
        .map(|v| {
            let std = (v / n).sqrt();
            if std == 0.0 {
                1.0
            } else {
                std
            }
        })
        .collect();

    Ok(ScalerParams { mean, scale })
}

/// Standardize every row with the engine's scaler.
pub fn transform_rows(rows: &[Vec<f64>], params: &ScalerParams) -> Result<Vec<Vec<f64>>> {
    rows.iter()
        .map(|r| scaler::transform(r, params).map_err(eyre::Report::from))
        .collect()
}

// ---------------------------------------------------------------------------
// Synthetic labels
// ---------------------------------------------------------------------------

/// Continuous intensity targets on [0, 10] from a seeded random projection.
pub fn synthetic_intensity(scaled: &[Vec<f64>], seed: u64) -> Vec<f64> {
    let p = scaled.first().map(|r| r.len()).unwrap_or(0);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut weights: Vec<f64> = StandardNormal.sample_iter(&mut rng).take(p).collect();
    for &ch in &EMPHASIZED_CHANNELS {
        if let Some(w) = weights.get_mut(ch) {
            *w *= 2.0;
        }
    }

    let scores: Vec<f64> = scaled
        .iter()
        .map(|r| r.iter().zip(&weights).map(|(x, w)| x * w).sum())
        .collect();
    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !(range > 0.0) {
        return vec![INTENSITY_MIN; scores.len()];
    }
    scores
        .into_iter()
        .map(|s| (s - min) / range * (INTENSITY_MAX - INTENSITY_MIN) + INTENSITY_MIN)
        .collect()
}

/// Linear-interpolated quantile of sorted data, `q` in [0, 1].
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn sorted_copy(y: &[f64]) -> Vec<f64> {
    let mut sorted = y.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Assign each target to one of `k` quantile bins (right-closed).
pub fn quantile_classes(y: &[f64], k: usize) -> Vec<usize> {
    if y.is_empty() || k == 0 {
        return Vec::new();
    }
    let sorted = sorted_copy(y);
    let mut edges: Vec<f64> = (0..=k)
        .map(|i| quantile(&sorted, i as f64 / k as f64))
        .collect();
    for i in 1..edges.len() {
        if edges[i] <= edges[i - 1] {
            edges[i] = edges[i - 1] + 1e-6;
        }
    }
    let interior = &edges[1..k];
    y.iter()
        .map(|&v| interior.iter().filter(|&&e| e < v).count())
        .collect()
}

/// 1 ("High") above the median, 0 ("Low") otherwise.
pub fn median_split(y: &[f64]) -> Vec<usize> {
    if y.is_empty() {
        return Vec::new();
    }
    let median = quantile(&sorted_copy(y), 0.5);
    y.iter().map(|&v| usize::from(v > median)).collect()
}

// ---------------------------------------------------------------------------
// Splits
// ---------------------------------------------------------------------------

/// Row indices of a train/test partition.
#[derive(Debug, Clone)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Split {
    pub fn select<T: Clone>(items: &[T], idx: &[usize]) -> Vec<T> {
        idx.iter().map(|&i| items[i].clone()).collect()
    }
}

fn test_count(n: usize, test_fraction: f64) -> usize {
    ((n as f64 * test_fraction).ceil() as usize).min(n)
}

/// Seeded shuffle split.
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> Split {
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(&mut StdRng::seed_from_u64(seed));
    let n_test = test_count(n, test_fraction);
    let train = idx.split_off(n_test);
    Split { train, test: idx }
}

/// Seeded split that keeps each class's share in both partitions.
pub fn stratified_split(classes: &[usize], test_fraction: f64, seed: u64) -> Split {
    let k = classes.iter().copied().max().map(|m| m + 1).unwrap_or(0);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in 0..k {
        let mut members: Vec<usize> = (0..classes.len()).filter(|&i| classes[i] == class).collect();
        members.shuffle(&mut rng);
        let n_test = test_count(members.len(), test_fraction);
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }
    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    Split { train, test }
}

// ---------------------------------------------------------------------------
// Model fitting
// ---------------------------------------------------------------------------

fn design_matrix(x: &[Vec<f64>]) -> Result<DMatrix<f64>> {
    let p = x.first().map(|r| r.len()).ok_or_else(|| eyre!("No training rows"))?;
    if x.iter().any(|r| r.len() != p) {
        bail!("Training rows have inconsistent lengths");
    }
    Ok(DMatrix::from_fn(x.len(), p, |i, j| x[i][j]))
}

/// Ordinary least squares with intercept.
pub fn fit_linear(x: &[Vec<f64>], y: &[f64]) -> Result<LinearParams> {
    if x.len() != y.len() {
        bail!("{} rows but {} targets", x.len(), y.len());
    }
    let features = design_matrix(x)?;
    let p = features.ncols();
    let design = features.insert_column(p, 1.0);
    let target = DVector::from_column_slice(y);

    let solution = design
        .svd(true, true)
        .solve(&target, 1e-12)
        .map_err(|e| eyre!("Least squares solve failed: {}", e))?;

    let coef: Vec<f64> = solution.rows(0, p).iter().cloned().collect();
    let intercept = solution[p];
    debug!(?coef, intercept, "linear regression fitted");
    Ok(LinearParams { coef, intercept })
}

/// L2-regularized softmax regression by full-batch gradient descent.
///
/// Minimizes mean cross-entropy plus `‖W‖² / (2·C·n)`; intercepts are not
/// penalized. Probabilities come from the same softmax the engine uses.
pub fn fit_multinomial(
    x: &[Vec<f64>],
    classes: &[usize],
    k: usize,
    config: &TrainConfig,
) -> Result<MultinomialParams> {
    if k == 0 {
        bail!("Cannot fit a classifier with zero classes");
    }
    if x.len() != classes.len() {
        bail!("{} rows but {} class labels", x.len(), classes.len());
    }
    if let Some(&bad) = classes.iter().find(|&&c| c >= k) {
        bail!("Class label {} out of range for {} classes", bad, k);
    }
    let features = design_matrix(x)?;
    let (n, p) = features.shape();
    let nf = n as f64;

    let mut weights = DMatrix::<f64>::zeros(k, p);
    let mut intercept = DVector::<f64>::zeros(k);
    let penalty = 1.0 / (config.c * nf);

    let mut iterations = 0;
    for iter in 0..config.max_iter {
        iterations = iter + 1;
        let logits = &features * weights.transpose();

        // residual = softmax(logits) - one_hot(classes)
        let mut residual = DMatrix::<f64>::zeros(n, k);
        let mut loss = 0.0;
        for i in 0..n {
            let row: Vec<f64> = (0..k).map(|c| logits[(i, c)] + intercept[c]).collect();
            let probs = softmax(&row)?;
            loss -= probs[classes[i]].max(1e-300).ln();
            for c in 0..k {
                residual[(i, c)] = probs[c];
            }
            residual[(i, classes[i])] -= 1.0;
        }

        let grad_w = residual.transpose() * &features / nf + &weights * penalty;
        let grad_b = residual.row_sum().transpose() / nf;

        let max_grad = grad_w
            .iter()
            .chain(grad_b.iter())
            .fold(0.0_f64, |m, g| m.max(g.abs()));
        if iter % 100 == 0 {
            debug!(
                iter,
                loss = loss / nf + 0.5 * penalty * weights.norm_squared(),
                max_grad,
                "softmax regression progress"
            );
        }
        if max_grad < config.tolerance {
            break;
        }

        weights -= grad_w * config.learning_rate;
        intercept -= grad_b * config.learning_rate;
    }
    debug!(iterations, "softmax regression fitted");

    let coef = (0..k)
        .map(|c| weights.row(c).iter().cloned().collect())
        .collect();
    Ok(MultinomialParams {
        coef,
        intercept: intercept.iter().cloned().collect(),
    })
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

fn round4(v: f64) -> f64 {
    (v * 1e4).round() / 1e4
}

/// Fit everything on the full dataset and package the exported bundle.
pub fn train_bundle(dataset: &Dataset, config: &TrainConfig) -> Result<ModelBundle> {
    let rows = dataset.rows();
    let k = config.emotion_labels.len();
    info!(rows = rows.len(), channels = dataset.channel_count(), classes = k, "fitting models");

    let scaler = fit_scaler(rows)?;
    let scaled = transform_rows(rows, &scaler)?;
    let y = synthetic_intensity(&scaled, config.seed);

    let linear = fit_linear(&scaled, &y).wrap_err("Intensity regression failed")?;
    let classes = quantile_classes(&y, k);
    let multinomial =
        fit_multinomial(&scaled, &classes, k, config).wrap_err("Emotion classifier failed")?;

    let example_values = rows[0].iter().cloned().map(round4).collect();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let pool = SAMPLE_POOL_SIZE.min(rows.len());
    let sample_values = rand::seq::index::sample(&mut rng, rows.len(), pool)
        .into_iter()
        .map(|i| rows[i].iter().cloned().map(round4).collect())
        .collect();

    let bundle = ModelBundle {
        channel_labels: dataset.channel_labels().to_vec(),
        example_values,
        sample_values,
        emotion_labels: config.emotion_labels.clone(),
        model: BundleCoefficients {
            scaler_mean: scaler.mean,
            scaler_scale: scaler.scale,
            linear_coef: linear.coef,
            linear_intercept: linear.intercept,
            logistic_coef: multinomial.coef,
            logistic_intercept: multinomial.intercept,
        },
    };

    // Refuse to export anything the engine would not load.
    let params = bundle.to_params().wrap_err("Fitted parameters are inconsistent")?;
    info!(model_hash = %params.model_hash(), "model bundle ready");
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use rand_distr::Normal;

    /// Deterministic pseudo-EEG rows.
    fn synthetic_rows(n: usize, p: usize) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(7);
        let noise = Normal::new(0.0, 10.0).unwrap();
        (0..n)
            .map(|_| (0..p).map(|j| 50.0 * j as f64 + noise.sample(&mut rng)).collect())
            .collect()
    }

    #[test]
    fn test_fit_scaler_population_std() {
        let rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let s = fit_scaler(&rows).unwrap();
        assert_eq!(s.mean, vec![2.0, 5.0]);
        assert_eq!(s.scale, vec![1.0, 1.0]); // std 1.0 and zero-variance → 1
    }

    #[test]
    fn test_fit_scaler_empty() {
        assert!(fit_scaler(&[]).is_err());
    }

    #[test]
    fn test_synthetic_intensity_range_and_seed() {
        let scaled = synthetic_rows(200, 19);
        let a = synthetic_intensity(&scaled, 42);
        let b = synthetic_intensity(&scaled, 42);
        assert_eq!(a, b);
        let min = a.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = a.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        assert!((min - 0.0).abs() < 1e-12);
        assert!((max - 10.0).abs() < 1e-9);
        assert_ne!(a, synthetic_intensity(&scaled, 43));
    }

    #[test]
    fn test_synthetic_intensity_constant_input() {
        let y = synthetic_intensity(&[vec![1.0, 1.0], vec![1.0, 1.0]], 1);
        assert_eq!(y, vec![0.0, 0.0]);
    }

    #[test]
    fn test_quantile_classes_balanced() {
        let y: Vec<f64> = (0..60).map(|i| i as f64).collect();
        let classes = quantile_classes(&y, 6);
        for c in 0..6 {
            assert_eq!(classes.iter().filter(|&&x| x == c).count(), 10);
        }
        assert_eq!(classes[0], 0);
        assert_eq!(classes[59], 5);
    }

    #[test]
    fn test_quantile_classes_degenerate_targets() {
        let classes = quantile_classes(&[3.0; 10], 4);
        assert!(classes.iter().all(|&c| c < 4));
    }

    #[test]
    fn test_median_split() {
        assert_eq!(median_split(&[1.0, 2.0, 3.0, 4.0]), vec![0, 0, 1, 1]);
        assert_eq!(median_split(&[1.0, 2.0, 3.0]), vec![0, 0, 1]);
    }

    #[test]
    fn test_train_test_split_partitions() {
        let split = train_test_split(10, 0.2, 42);
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.train.len(), 8);
        let mut all: Vec<usize> = split.train.iter().chain(&split.test).cloned().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());

        let again = train_test_split(10, 0.2, 42);
        assert_eq!(split.test, again.test);
    }

    #[test]
    fn test_stratified_split_keeps_classes() {
        let classes: Vec<usize> = (0..100).map(|i| usize::from(i >= 50)).collect();
        let split = stratified_split(&classes, 0.2, 42);
        assert_eq!(split.test.len(), 20);
        let high = split.test.iter().filter(|&&i| classes[i] == 1).count();
        assert_eq!(high, 10);
    }

    #[test]
    fn test_fit_linear_recovers_exact_relation() {
        let x: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![i as f64, ((i * 7) % 5) as f64])
            .collect();
        let y: Vec<f64> = x.iter().map(|r| 2.0 * r[0] - 3.0 * r[1] + 1.5).collect();
        let fit = fit_linear(&x, &y).unwrap();
        assert!((fit.coef[0] - 2.0).abs() < 1e-8);
        assert!((fit.coef[1] + 3.0).abs() < 1e-8);
        assert!((fit.intercept - 1.5).abs() < 1e-8);
    }

    #[test]
    fn test_fit_linear_length_mismatch() {
        assert!(fit_linear(&[vec![1.0]], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_fit_multinomial_separates_classes() {
        let x: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![if i < 20 { -2.0 } else { 2.0 } + (i % 3) as f64 * 0.1])
            .collect();
        let classes: Vec<usize> = (0..40).map(|i| usize::from(i >= 20)).collect();
        let params = fit_multinomial(&x, &classes, 2, &TrainConfig::default()).unwrap();
        assert_eq!(params.coef.len(), 2);
        assert!(params.coef[1][0] > params.coef[0][0]);
    }

    #[test]
    fn test_fit_multinomial_rejects_bad_labels() {
        let cfg = TrainConfig::default();
        assert!(fit_multinomial(&[vec![1.0]], &[3], 2, &cfg).is_err());
        assert!(fit_multinomial(&[vec![1.0]], &[0], 0, &cfg).is_err());
    }

    #[test]
    fn test_train_bundle_loads_into_engine() {
        let labels: Vec<String> = (0..19).map(|i| format!("Ch{i}")).collect();
        let dataset = Dataset::from_rows(labels, synthetic_rows(300, 19)).unwrap();
        let config = TrainConfig {
            max_iter: 200,
            ..Default::default()
        };
        let bundle = train_bundle(&dataset, &config).unwrap();
        assert_eq!(bundle.example_values.len(), 19);
        assert_eq!(bundle.sample_values.len(), 200);
        assert_eq!(bundle.model.logistic_coef.len(), 6);

        let engine = Engine::from_bundle(&bundle).unwrap();
        let result = engine.predict(&bundle.example_values).unwrap();
        assert!((0.0..=10.0).contains(&result.intensity));
        assert!((result.probabilities.sum() - 1.0).abs() < 1e-9);
    }
}
