//! EEG emotion inference with linear models.
//!
//! A 19-channel EEG reading is standardized, then scored by two models that
//! share the scaled vector:
//! - an intensity regression clamped to the `[0, 10]` scale
//! - a multinomial classifier over the emotion labels (softmax, argmax)
//!
//! The [`Engine`] holds one immutable [`ModelParams`] set and is safe to share
//! across threads. Parameters are produced offline by [`train`] and travel as
//! a [`ModelBundle`] (plain JSON or the browser's `window.APP_CONFIG` module).
//!
//! Uses structured logging via [`tracing`]. Set the `RUST_LOG` environment
//! variable to control log verbosity (e.g., `RUST_LOG=eeg_emotion=debug`).

pub mod dataset;
pub mod engine;
pub mod error;
pub mod export;
pub mod linear;
pub mod metrics;
pub mod multinomial;
pub mod params;
pub mod report;
pub mod scaler;
pub mod scores;
pub mod server;
pub mod train;

pub use engine::{Engine, PredictionResult};
pub use error::{EngineError, EngineResult};
pub use params::{ModelBundle, ModelParams};
