//! Regression and classification metrics for offline evaluation.

use serde::Serialize;

/// Mean squared error. Zero for empty input.
pub fn mse(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    y_true
        .iter()
        .zip(y_pred)
        .map(|(t, p)| (t - p).powi(2))
        .sum::<f64>()
        / y_true.len() as f64
}

/// Coefficient of determination. A constant target yields 0 unless the fit is exact.
pub fn r2(y_true: &[f64], y_pred: &[f64]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_res: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let hits = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    hits as f64 / y_true.len() as f64
}

/// `matrix[true][predicted]` counts.
pub fn confusion_matrix(y_true: &[usize], y_pred: &[usize], k: usize) -> Vec<Vec<usize>> {
    let mut matrix = vec![vec![0; k]; k];
    for (&t, &p) in y_true.iter().zip(y_pred) {
        if t < k && p < k {
            matrix[t][p] += 1;
        }
    }
    matrix
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassReport {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class precision, recall and F1. Undefined ratios are reported as 0.
pub fn classification_report(
    y_true: &[usize],
    y_pred: &[usize],
    labels: &[String],
) -> Vec<ClassReport> {
    let cm = confusion_matrix(y_true, y_pred, labels.len());
    labels
        .iter()
        .enumerate()
        .map(|(c, label)| {
            let tp = cm[c][c] as f64;
            let predicted: usize = cm.iter().map(|row| row[c]).sum();
            let support: usize = cm[c].iter().sum();
            let precision = ratio(tp, predicted as f64);
            let recall = ratio(tp, support as f64);
            let f1 = ratio(2.0 * precision * recall, precision + recall);
            ClassReport {
                label: label.clone(),
                precision,
                recall,
                f1,
                support,
            }
        })
        .collect()
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mse() {
        assert_eq!(mse(&[1.0, 2.0], &[1.0, 4.0]), 2.0);
        assert_eq!(mse(&[], &[]), 0.0);
    }

    #[test]
    fn test_r2() {
        assert_eq!(r2(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1.0);
        assert_eq!(r2(&[1.0, 2.0, 3.0], &[2.0, 2.0, 2.0]), 0.0);
        assert_eq!(r2(&[5.0, 5.0], &[5.0, 5.0]), 1.0);
    }

    #[test]
    fn test_accuracy_and_confusion() {
        let t = [0, 0, 1, 1, 2];
        let p = [0, 1, 1, 1, 0];
        assert!((accuracy(&t, &p) - 0.6).abs() < 1e-12);
        let cm = confusion_matrix(&t, &p, 3);
        assert_eq!(cm, vec![vec![1, 1, 0], vec![0, 2, 0], vec![1, 0, 0]]);
    }

    #[test]
    fn test_classification_report() {
        let labels = vec!["Low".to_string(), "High".to_string()];
        let report = classification_report(&[0, 0, 1, 1], &[0, 1, 1, 1], &labels);
        assert_eq!(report[0].support, 2);
        assert_eq!(report[0].precision, 1.0);
        assert_eq!(report[0].recall, 0.5);
        assert!((report[1].precision - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(report[1].recall, 1.0);
        assert!((report[1].f1 - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_report_class_never_predicted() {
        let labels = vec!["A".to_string(), "B".to_string()];
        let report = classification_report(&[0, 0], &[0, 0], &labels);
        assert_eq!(report[1].precision, 0.0);
        assert_eq!(report[1].f1, 0.0);
    }
}
