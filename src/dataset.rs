//! Raw EEG readings loaded from per-subject CSV files.
//!
//! Each subject file (`s01.csv`, `s02.csv`, ...) is header-less with one
//! column per channel. Empty cells are missing readings and are filled with
//! the channel mean over every loaded row.

use std::path::{Path, PathBuf};

use eyre::{bail, Result, WrapErr};
use serde::Serialize;
use tracing::{debug, info};

use crate::params::CHANNEL_LABELS;

/// Subjects loaded when no limit is given.
pub const DEFAULT_MAX_SUBJECTS: usize = 5;

#[derive(Debug, Clone)]
pub struct Dataset {
    channel_labels: Vec<String>,
    rows: Vec<Vec<f64>>,
    files: Vec<PathBuf>,
    filled_missing: usize,
}

/// Summary statistics for one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub channel: String,
    pub mean: f64,
    /// Sample standard deviation (n - 1)
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Dataset {
    /// Load up to `max_subjects` subject files from `dir`, in file name order.
    pub fn load_dir(dir: &Path, max_subjects: usize) -> Result<Self> {
        if !dir.is_dir() {
            bail!("Dataset folder not found: {}", dir.display());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .wrap_err_with(|| format!("Failed to list {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| is_subject_file(p))
            .collect();
        files.sort();

        if files.is_empty() {
            bail!("No EEG CSV files found in {}", dir.display());
        }
        files.truncate(max_subjects.max(1));

        info!(count = files.len(), dir = %dir.display(), "loading subject files");

        let labels: Vec<String> = CHANNEL_LABELS.iter().map(|s| s.to_string()).collect();
        let mut raw: Vec<Vec<Option<f64>>> = Vec::new();
        for file in &files {
            let before = raw.len();
            read_subject_file(file, labels.len(), &mut raw)?;
            debug!(file = %file.display(), rows = raw.len() - before, "subject file read");
        }

        Self::from_partial_rows(labels, raw, files)
    }

    /// Build a dataset from complete rows. Every row must match `channel_labels`.
    pub fn from_rows(channel_labels: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        let raw = rows
            .into_iter()
            .map(|r| r.into_iter().map(Some).collect())
            .collect();
        Self::from_partial_rows(channel_labels, raw, Vec::new())
    }

    fn from_partial_rows(
        channel_labels: Vec<String>,
        raw: Vec<Vec<Option<f64>>>,
        files: Vec<PathBuf>,
    ) -> Result<Self> {
        if raw.is_empty() {
            bail!("Dataset contains no rows");
        }
        let n_channels = channel_labels.len();
        if let Some(idx) = raw.iter().position(|r| r.len() != n_channels) {
            bail!(
                "Row {} has {} values, expected {}",
                idx,
                raw[idx].len(),
                n_channels
            );
        }

        let mut means = Vec::with_capacity(n_channels);
        for (ch, label) in channel_labels.iter().enumerate() {
            let present: Vec<f64> = raw.iter().filter_map(|r| r[ch]).collect();
            if present.is_empty() {
                bail!("Channel {} has no readings", label);
            }
            means.push(present.iter().sum::<f64>() / present.len() as f64);
        }

        let mut filled_missing = 0;
        let rows = raw
            .into_iter()
            .map(|r| {
                r.into_iter()
                    .enumerate()
                    .map(|(ch, v)| {
                        v.unwrap_or_else(|| {
                            filled_missing += 1;
                            means[ch]
                        })
                    })
                    .collect()
            })
            .collect();

        if filled_missing > 0 {
            info!(filled_missing, "missing readings filled with channel means");
        }

        Ok(Self {
            channel_labels,
            rows,
            files,
            filled_missing,
        })
    }

    pub fn channel_labels(&self) -> &[String] {
        &self.channel_labels
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn filled_missing(&self) -> usize {
        self.filled_missing
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.channel_labels.len()
    }

    /// Per-channel mean, sample std, min and max.
    pub fn describe(&self) -> Vec<ChannelStats> {
        let n = self.rows.len() as f64;
        self.channel_labels
            .iter()
            .enumerate()
            .map(|(ch, label)| {
                let column = self.rows.iter().map(|r| r[ch]);
                let mean = column.clone().sum::<f64>() / n;
                let var = if n > 1.0 {
                    column.clone().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
                } else {
                    0.0
                };
                ChannelStats {
                    channel: label.clone(),
                    mean,
                    std: var.sqrt(),
                    min: column.clone().fold(f64::INFINITY, f64::min),
                    max: column.fold(f64::NEG_INFINITY, f64::max),
                }
            })
            .collect()
    }
}

fn is_subject_file(path: &Path) -> bool {
    let name_ok = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('s'))
        .unwrap_or(false);
    let ext_ok = path.extension().map(|e| e == "csv").unwrap_or(false);
    name_ok && ext_ok && path.is_file()
}

fn read_subject_file(
    path: &Path,
    n_channels: usize,
    out: &mut Vec<Vec<Option<f64>>>,
) -> Result<()> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .wrap_err_with(|| format!("Failed to open {}", path.display()))?;

    for (line, record) in reader.records().enumerate() {
        let record =
            record.wrap_err_with(|| format!("{}: malformed CSV at line {}", path.display(), line + 1))?;
        if record.len() != n_channels {
            bail!(
                "{}: line {} has {} columns, expected {}",
                path.display(),
                line + 1,
                record.len(),
                n_channels
            );
        }
        let row = record
            .iter()
            .enumerate()
            .map(|(col, field)| parse_reading(field).wrap_err_with(|| {
                format!("{}: line {}, column {}", path.display(), line + 1, col + 1)
            }))
            .collect::<Result<Vec<_>>>()?;
        out.push(row);
    }
    Ok(())
}

/// Empty and NaN cells are missing readings.
fn parse_reading(field: &str) -> Result<Option<f64>> {
    if field.is_empty() || field.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    let v: f64 = field
        .parse()
        .wrap_err_with(|| format!("Invalid reading {:?}", field))?;
    if !v.is_finite() {
        bail!("Non-finite reading {:?}", field);
    }
    Ok(Some(v))
}
