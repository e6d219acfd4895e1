use std::{
    fs,
    path::{Path, PathBuf},
};

use ab_glyph::FontArc;
use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    compare::{load_caption_font, save_comparison},
    config::RestoreConfig,
    generator::Generator,
    metrics::{BatchMetrics, BinarizationMetrics, SampleMetrics},
    preprocess::preprocess_image,
    restore::restore,
};

pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub file_name: String,
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub comparison_path: Option<PathBuf>,
    pub metrics: Option<BinarizationMetrics>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub processed: Vec<ProcessedImage>,
    pub metrics: Option<BatchMetrics>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Image files directly inside `dir`, sorted by name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read input folder at {:?}", dir))?;

    let mut images = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && is_image(&path) {
            images.push(path);
        }
    }
    images.sort();

    Ok(images)
}

/// Restore a single file and write every configured artifact for it.
pub fn restore_file(
    generator: &mut dyn Generator,
    config: &RestoreConfig,
    input_path: &Path,
    caption_font: Option<&FontArc>,
) -> Result<ProcessedImage> {
    let file_name = input_path
        .file_name()
        .with_context(|| format!("Image path {:?} has no file name", input_path))?;

    let preprocessed = preprocess_image(
        input_path,
        &config.preprocess,
        config.model.input_size,
        &config.preprocessed_dir,
    )?;
    let restored = restore(generator, &preprocessed)?;

    let output_path = config.output_dir.join(file_name);
    restored
        .save(&output_path)
        .with_context(|| format!("Failed to save restored image at {:?}", output_path))?;

    let comparison_path = match &config.comparison_dir {
        Some(dir) => Some(save_comparison(
            dir,
            Path::new(file_name),
            &preprocessed.original,
            &restored,
            caption_font,
        )?),
        None => None,
    };

    let metrics = match &config.ground_truth_dir {
        Some(dir) => {
            let truth_path = dir.join(file_name);
            if truth_path.is_file() {
                let truth = image::open(&truth_path)
                    .with_context(|| format!("Failed to open ground truth at {:?}", truth_path))?
                    .to_luma8();
                let metrics = BinarizationMetrics::calculate(&truth, &restored)
                    .with_context(|| format!("Failed to evaluate {:?}", input_path))?;
                info!(
                    f_measure = metrics.f_measure,
                    psnr = metrics.psnr,
                    "evaluated {:?}",
                    file_name
                );
                Some(metrics)
            } else {
                warn!("No ground truth for {:?}, skipping evaluation", file_name);
                None
            }
        }
        None => None,
    };

    Ok(ProcessedImage {
        file_name: file_name.to_string_lossy().into_owned(),
        output_path,
        width: preprocessed.width,
        height: preprocessed.height,
        comparison_path,
        metrics,
    })
}

/// Restore every image in the input folder. The first failure aborts the run.
pub fn run_batch(generator: &mut dyn Generator, config: &RestoreConfig) -> Result<BatchReport> {
    for dir in [&config.output_dir, &config.preprocessed_dir]
        .into_iter()
        .chain(config.comparison_dir.as_ref())
    {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create folder {:?}", dir))?;
    }

    let input_files = list_images(&config.input_dir)?;
    if input_files.is_empty() {
        warn!("No input images found in {:?}", config.input_dir);
        return Ok(BatchReport::default());
    }

    let caption_font = match (&config.comparison_dir, &config.comparison_font) {
        (Some(_), Some(path)) => Some(load_caption_font(path)?),
        _ => None,
    };

    info!("Starting inference on {} images", input_files.len());

    let mut report = BatchReport::default();
    for input_path in &input_files {
        info!("Processing: {:?}", input_path);
        let processed = restore_file(generator, config, input_path, caption_font.as_ref())
            .with_context(|| format!("Failed to restore {:?}", input_path))?;
        report.processed.push(processed);
    }

    if config.ground_truth_dir.is_some() {
        let samples = report
            .processed
            .iter()
            .filter_map(|p| {
                p.metrics.map(|metrics| SampleMetrics {
                    file_name: p.file_name.clone(),
                    metrics,
                })
            })
            .collect();
        report.metrics = Some(BatchMetrics::calculate(samples));
    }

    info!(
        "All images processed and saved in {:?}",
        config.output_dir
    );

    Ok(report)
}
