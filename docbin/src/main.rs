use std::path::PathBuf;

use clap::Parser;
use docbin::{Device, OnnxGenerator, RestoreConfig, TensorLayout, generator::warm_up, run_batch};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Restore and binarize scanned document images")]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    input_dir: Option<PathBuf>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    preprocessed_dir: Option<PathBuf>,

    /// Write original/restored side-by-side images here
    #[arg(long)]
    comparison_dir: Option<PathBuf>,

    /// Evaluate results against same-named images in this folder
    #[arg(long)]
    ground_truth_dir: Option<PathBuf>,

    /// Fail the run if the average F-measure is below this value
    #[arg(long)]
    min_f_measure: Option<f64>,

    #[arg(long)]
    model: Option<PathBuf>,

    #[arg(long)]
    model_sha256: Option<String>,

    #[arg(long, value_enum)]
    layout: Option<TensorLayout>,

    #[arg(long, value_enum)]
    device: Option<Device>,

    #[arg(long)]
    threads: Option<usize>,

    /// Side length of the square model input
    #[arg(long)]
    input_size: Option<u32>,

    #[arg(long)]
    blur_kernel: Option<u32>,

    /// Adaptive threshold neighbourhood, odd
    #[arg(long)]
    block_size: Option<u32>,

    /// Subtracted from the local mean before thresholding
    #[arg(long, allow_hyphen_values = true)]
    threshold_constant: Option<i32>,

    /// TrueType font used to caption comparison panels
    #[arg(long)]
    comparison_font: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<RestoreConfig> {
        let mut config = match &self.config {
            Some(path) => RestoreConfig::from_file(path)?,
            None => RestoreConfig::default(),
        };

        if let Some(dir) = self.input_dir {
            config.input_dir = dir;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(dir) = self.preprocessed_dir {
            config.preprocessed_dir = dir;
        }
        if self.comparison_dir.is_some() {
            config.comparison_dir = self.comparison_dir;
        }
        if self.ground_truth_dir.is_some() {
            config.ground_truth_dir = self.ground_truth_dir;
        }
        if let Some(path) = self.model {
            config.model.path = path;
        }
        if self.model_sha256.is_some() {
            config.model.sha256 = self.model_sha256;
        }
        if let Some(layout) = self.layout {
            config.model.layout = layout;
        }
        if let Some(device) = self.device {
            config.model.device = device;
        }
        if self.threads.is_some() {
            config.model.threads = self.threads;
        }
        if let Some(size) = self.input_size {
            config.model.input_size = size;
        }
        if let Some(kernel) = self.blur_kernel {
            config.preprocess.blur_kernel = kernel;
        }
        if let Some(block_size) = self.block_size {
            config.preprocess.block_size = block_size;
        }
        if let Some(constant) = self.threshold_constant {
            config.preprocess.threshold_constant = constant;
        }
        if self.comparison_font.is_some() {
            config.comparison_font = self.comparison_font;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Cli::parse();
    let min_f_measure = args.min_f_measure;
    let config = args.into_config()?;

    tracing::info!("Loading generator model...");
    let mut generator = OnnxGenerator::load(&config.model)?;
    warm_up(&mut generator, config.model.input_size)?;

    let report = run_batch(&mut generator, &config)?;
    tracing::info!("Restored {} images", report.processed.len());

    if let Some(metrics) = &report.metrics {
        tracing::info!(
            samples = metrics.samples.len(),
            average_f_measure = metrics.average_f_measure,
            average_psnr = metrics.average_psnr,
            min_f_measure = metrics.min_f_measure,
            "evaluation summary"
        );
        if let Some(threshold) = min_f_measure {
            if !metrics.meets_thresholds(threshold, 0.0) {
                anyhow::bail!(
                    "Average F-measure {:.4} is below the required {:.4}",
                    metrics.average_f_measure,
                    threshold
                );
            }
        }
    }

    Ok(())
}
