//! Usage metrics and the JSONL access log.

use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::engine::{LabelCounts, PredictionResult};

/// Maximum number of rotated access log files to keep.
const MAX_ACCESS_LOG_ROTATIONS: usize = 5;

pub struct UsageMetrics {
    pub total_requests: AtomicU64,
    pub total_errors: AtomicU64,

    labels: Vec<String>,
    /// Indexed like `labels`
    per_label: Vec<AtomicU64>,

    pub ep_predict: AtomicU64,
    pub ep_model: AtomicU64,
    pub ep_stats: AtomicU64,

    access_log: std::sync::Mutex<Option<File>>,
    access_log_path: String,
    access_log_bytes: AtomicU64,
    max_access_log_bytes: u64,
}

impl UsageMetrics {
    pub fn new(access_log_path: &str, max_access_log_bytes: u64, labels: &[String]) -> Self {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(access_log_path)
            .ok();
        if file.is_none() {
            warn!(path = access_log_path, "could not open access log");
        }
        let current_size = std::fs::metadata(access_log_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            labels: labels.to_vec(),
            per_label: labels.iter().map(|_| AtomicU64::new(0)).collect(),
            ep_predict: AtomicU64::new(0),
            ep_model: AtomicU64::new(0),
            ep_stats: AtomicU64::new(0),
            access_log: std::sync::Mutex::new(file),
            access_log_path: access_log_path.to_string(),
            access_log_bytes: AtomicU64::new(current_size),
            max_access_log_bytes,
        }
    }

    /// Count a served prediction and append it to the access log.
    pub fn record(&self, endpoint: &str, prediction: &PredictionResult, processing_time_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if let Some(counter) = self.per_label.get(prediction.class_index) {
            counter.fetch_add(1, Ordering::Relaxed);
        }

        let entry = serde_json::json!({
            "timestamp": prediction.timestamp.to_rfc3339(),
            "endpoint": endpoint,
            "label": prediction.label,
            "confidence": prediction.confidence,
            "intensity": prediction.intensity,
            "processing_time_ms": processing_time_ms,
        });
        self.append(entry);
    }

    pub fn record_error(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Predictions per label, in class order.
    pub fn label_counts(&self) -> LabelCounts {
        self.labels
            .iter()
            .zip(&self.per_label)
            .map(|(label, n)| (label.clone(), n.load(Ordering::Relaxed)))
            .collect()
    }

    fn append(&self, entry: serde_json::Value) {
        let Ok(mut guard) = self.access_log.try_lock() else {
            return;
        };
        let Some(ref mut file) = *guard else {
            return;
        };

        let mut line = entry.to_string();
        line.push('\n');
        let line_len = line.len() as u64;
        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!(error = %e, "failed to write access log entry");
        }
        let new_size = self.access_log_bytes.fetch_add(line_len, Ordering::Relaxed) + line_len;

        // Rotate if over size limit (0 = no limit)
        if self.max_access_log_bytes > 0 && new_size >= self.max_access_log_bytes {
            self.rotate();
            if let Ok(new_file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.access_log_path)
            {
                *file = new_file;
                self.access_log_bytes.store(0, Ordering::Relaxed);
            }
        }
    }

    /// Shift `log.1 .. log.N-1` up by one and move the live log to `log.1`.
    fn rotate(&self) {
        for i in (1..MAX_ACCESS_LOG_ROTATIONS).rev() {
            let from = format!("{}.{}", self.access_log_path, i);
            if !std::path::Path::new(&from).exists() {
                continue;
            }
            let to = format!("{}.{}", self.access_log_path, i + 1);
            if let Err(e) = std::fs::rename(&from, &to) {
                warn!(from = %from, to = %to, error = %e, "log rotation rename failed");
            }
        }
        let rotated = format!("{}.1", self.access_log_path);
        if let Err(e) = std::fs::rename(&self.access_log_path, &rotated) {
            warn!(from = %self.access_log_path, to = %rotated, error = %e, "log rotation rename failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::params::tests::small_params;

    fn labels() -> Vec<String> {
        vec!["Calm".to_string(), "Happy".to_string()]
    }

    #[test]
    fn test_counters_and_log_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.jsonl");
        let usage = UsageMetrics::new(path.to_str().unwrap(), 0, &labels());

        let engine = Engine::new(small_params());
        let prediction = engine.predict(&[5.0, 0.0, 0.0]).unwrap();
        usage.record("predict", &prediction, 2);
        usage.record_error();

        assert_eq!(usage.total_requests.load(Ordering::Relaxed), 2);
        assert_eq!(usage.total_errors.load(Ordering::Relaxed), 1);
        let counts = usage.label_counts();
        assert_eq!(counts.get("Calm"), Some(1));
        assert_eq!(counts.get("Happy"), Some(0));

        let log = std::fs::read_to_string(&path).unwrap();
        let entry: serde_json::Value = serde_json::from_str(log.lines().next().unwrap()).unwrap();
        assert_eq!(entry["endpoint"], "predict");
        assert_eq!(entry["label"], "Calm");
        assert_eq!(entry["intensity"], 5.0);
    }

    #[test]
    fn test_label_counts_keep_class_order() {
        let order = vec!["Sad".to_string(), "Angry".to_string(), "Calm".to_string()];
        let usage = UsageMetrics::new("/dev/null", 0, &order);
        let json = serde_json::to_string(&usage.label_counts()).unwrap();
        assert_eq!(json, r#"{"Sad":0,"Angry":0,"Calm":0}"#);
    }

    #[test]
    fn test_access_log_rotates_at_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.jsonl");
        let usage = UsageMetrics::new(path.to_str().unwrap(), 64, &labels());

        let engine = Engine::new(small_params());
        let prediction = engine.predict(&[0.0, 0.0, 0.0]).unwrap();
        usage.record("predict", &prediction, 0);
        usage.record("predict", &prediction, 0);

        let rotated = dir.path().join("access.jsonl.1");
        let rotated_twice = dir.path().join("access.jsonl.2");
        assert!(rotated.exists());
        assert!(rotated_twice.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_unwritable_log_is_not_fatal() {
        let usage = UsageMetrics::new("/nonexistent-dir/access.jsonl", 0, &labels());
        let engine = Engine::new(small_params());
        let prediction = engine.predict(&[0.0, 0.0, 0.0]).unwrap();
        usage.record("predict", &prediction, 0);
        assert_eq!(usage.total_requests.load(Ordering::Relaxed), 1);
    }
}
