use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use eyre::{bail, eyre, Result, WrapErr};
use rand::seq::SliceRandom;

use eeg_emotion::dataset::{Dataset, DEFAULT_MAX_SUBJECTS};
use eeg_emotion::export;
use eeg_emotion::report;
use eeg_emotion::train::{self, TrainConfig};
use eeg_emotion::{Engine, ModelBundle, PredictionResult};

#[derive(Parser)]
#[command(
    name = "eeg-emotion",
    about = "Emotion classification and intensity estimation from 19-channel EEG readings."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct InputSource {
    /// Comma-separated raw readings, one per channel
    #[arg(long, allow_hyphen_values = true)]
    values: Option<String>,

    /// JSON file holding an array of readings or {"values": [...]}
    #[arg(long)]
    input: Option<PathBuf>,

    /// Use the bundle's example reading
    #[arg(long)]
    example: bool,

    /// Use a random reading from the bundle's sample pool
    #[arg(long)]
    random_sample: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict emotion and intensity for one reading
    Predict {
        /// Model bundle (JSON or browser model.js)
        #[arg(long)]
        bundle: PathBuf,

        #[command(flatten)]
        source: InputSource,

        /// Output format: json or summary
        #[arg(long, default_value = "summary")]
        format: String,
    },

    /// Fit the models on subject CSV files and write a bundle
    Train {
        /// Directory containing s*.csv subject files
        #[arg(long)]
        dataset: PathBuf,

        #[arg(long, default_value_t = DEFAULT_MAX_SUBJECTS)]
        max_subjects: usize,

        /// Output bundle JSON
        #[arg(long)]
        out: PathBuf,

        /// Also write the browser module (e.g. web/model.js)
        #[arg(long)]
        js: Option<PathBuf>,
    },

    /// Print the train/test evaluation report
    Evaluate {
        /// Directory containing s*.csv subject files
        #[arg(long)]
        dataset: PathBuf,

        #[arg(long, default_value_t = DEFAULT_MAX_SUBJECTS)]
        max_subjects: usize,

        /// Output format: json or summary
        #[arg(long, default_value = "summary")]
        format: String,
    },

    /// Convert a bundle into the browser module
    Export {
        #[arg(long)]
        bundle: PathBuf,

        #[arg(long)]
        js: PathBuf,
    },

    /// Start the HTTP inference service
    Serve {
        #[arg(long)]
        bundle: PathBuf,

        /// Address to bind to (default 127.0.0.1 on $PORT or 5500)
        #[arg(long)]
        bind: Option<String>,

        /// Rate limit in requests per minute per IP (0 = no limit)
        #[arg(long, default_value_t = 60)]
        rate_limit: u32,

        /// Path for JSONL access log
        #[arg(long, default_value = "eeg-emotion-access.jsonl")]
        access_log: String,
    },
}

fn parse_values(text: &str) -> Result<Vec<f64>> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, s)| {
            s.parse::<f64>()
                .wrap_err_with(|| format!("Value {} is not a number: {:?}", i, s))
        })
        .collect()
}

fn read_input_file(path: &Path) -> Result<Vec<f64>> {
    let content = fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .wrap_err_with(|| format!("Invalid JSON in {}", path.display()))?;
    let values = match value {
        serde_json::Value::Object(mut map) => map
            .remove("values")
            .ok_or_else(|| eyre!("{} has no \"values\" field", path.display()))?,
        other => other,
    };
    serde_json::from_value(values).wrap_err("Expected an array of numbers")
}

fn resolve_input(source: &InputSource, bundle: &ModelBundle) -> Result<Vec<f64>> {
    if let Some(ref text) = source.values {
        parse_values(text)
    } else if let Some(ref path) = source.input {
        read_input_file(path)
    } else if source.example {
        if bundle.example_values.is_empty() {
            bail!("Bundle has no example values");
        }
        Ok(bundle.example_values.clone())
    } else {
        bundle
            .sample_values
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| eyre!("Bundle has no sample values"))
    }
}

fn print_prediction(prediction: &PredictionResult, model_hash: &str) {
    println!("EEG Emotion Prediction");
    println!("======================");
    println!("Emotion:    {}", prediction.label);
    println!("Confidence: {:.1}%", prediction.confidence * 100.0);
    println!("Intensity:  {:.2} / 10", prediction.intensity);
    println!("Entropy:    {:.3}", prediction.entropy);
    println!();
    println!("Probabilities:");
    for (label, p) in prediction.probabilities.iter() {
        println!("  {:<10} {:>6.1}%", label, p * 100.0);
    }
    println!();
    println!("Model Hash: {}", model_hash);
}

fn cmd_predict(bundle_path: PathBuf, source: InputSource, format: String) -> Result<()> {
    let bundle = ModelBundle::from_path(&bundle_path)?;
    let engine = Engine::from_bundle(&bundle).wrap_err("Model bundle rejected")?;
    let values = resolve_input(&source, &bundle)?;
    let prediction = engine.predict(&values)?;

    match format.as_str() {
        "json" => {
            let result = serde_json::json!({
                "success": true,
                "prediction": prediction,
                "model_hash": engine.model_hash(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_prediction(&prediction, engine.model_hash()),
    }
    Ok(())
}

fn train_config(max_subjects: usize) -> TrainConfig {
    TrainConfig {
        max_subjects,
        ..Default::default()
    }
}

fn cmd_train(dataset: PathBuf, max_subjects: usize, out: PathBuf, js: Option<PathBuf>) -> Result<()> {
    let config = train_config(max_subjects);
    let data = Dataset::load_dir(&dataset, config.max_subjects)?;
    let bundle = train::train_bundle(&data, &config)?;

    export::write_bundle_json(&bundle, &out)?;
    eprintln!("Bundle written to {}", out.display());
    if let Some(js) = js {
        export::write_browser_module(&bundle, &js)?;
        eprintln!("Browser module written to {}", js.display());
    }
    Ok(())
}

fn cmd_evaluate(dataset: PathBuf, max_subjects: usize, format: String) -> Result<()> {
    let config = train_config(max_subjects);
    let data = Dataset::load_dir(&dataset, config.max_subjects)?;
    let report = report::evaluate(&data, &config)?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print!("{}", report),
    }
    Ok(())
}

fn cmd_export(bundle_path: PathBuf, js: PathBuf) -> Result<()> {
    let bundle = ModelBundle::from_path(&bundle_path)?;
    // Only export coefficients the engine would accept.
    bundle.to_params().wrap_err("Model bundle rejected")?;
    export::write_browser_module(&bundle, &js)?;
    eprintln!("Browser module written to {}", js.display());
    Ok(())
}

fn cmd_serve(
    bundle_path: PathBuf,
    bind: Option<String>,
    rate_limit: u32,
    access_log: String,
) -> Result<()> {
    use eeg_emotion::server::{resolve_bind_addr, run_server, ServerConfig};

    let port_env = std::env::var("PORT").ok();
    let bind_addr = resolve_bind_addr(bind.as_deref(), port_env.as_deref())?;
    let bundle = ModelBundle::from_path(&bundle_path)?;

    let config = ServerConfig {
        bind_addr,
        rate_limit_rpm: rate_limit,
        access_log_path: access_log,
        ..Default::default()
    };

    eprintln!("Starting EEG emotion inference service on {}...", bind_addr);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_server(config, bundle))?;

    Ok(())
}

fn main() {
    // Logs go to stderr so JSON output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Predict {
            bundle,
            source,
            format,
        } => cmd_predict(bundle, source, format),
        Commands::Train {
            dataset,
            max_subjects,
            out,
            js,
        } => cmd_train(dataset, max_subjects, out, js),
        Commands::Evaluate {
            dataset,
            max_subjects,
            format,
        } => cmd_evaluate(dataset, max_subjects, format),
        Commands::Export { bundle, js } => cmd_export(bundle, js),
        Commands::Serve {
            bundle,
            bind,
            rate_limit,
            access_log,
        } => cmd_serve(bundle, bind, rate_limit, access_log),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}
