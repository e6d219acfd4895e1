use anyhow::Result;
use image::GrayImage;

/// Pixels darker than this count as ink.
const INK_THRESHOLD: u8 = 128;

/// Ceiling applied to each page's PSNR before averaging.
pub const MAX_PSNR: f64 = 100.0;

/// Binarization quality of one restored page against its ground truth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinarizationMetrics {
    /// Pixel F-measure over ink pixels, in `[0, 1]`.
    pub f_measure: f64,
    /// Peak signal-to-noise ratio in dB, infinite for identical images.
    pub psnr: f64,
}

impl BinarizationMetrics {
    pub fn calculate(ground_truth: &GrayImage, predicted: &GrayImage) -> Result<Self> {
        if ground_truth.dimensions() != predicted.dimensions() {
            anyhow::bail!(
                "Ground truth is {:?} but prediction is {:?}",
                ground_truth.dimensions(),
                predicted.dimensions()
            );
        }

        Ok(Self {
            f_measure: Self::f_measure(ground_truth, predicted),
            psnr: Self::psnr(ground_truth, predicted),
        })
    }

    fn f_measure(ground_truth: &GrayImage, predicted: &GrayImage) -> f64 {
        let (mut true_pos, mut false_pos, mut false_neg) = (0u64, 0u64, 0u64);
        for (gt, pred) in ground_truth.pixels().zip(predicted.pixels()) {
            match (gt[0] < INK_THRESHOLD, pred[0] < INK_THRESHOLD) {
                (true, true) => true_pos += 1,
                (false, true) => false_pos += 1,
                (true, false) => false_neg += 1,
                (false, false) => {}
            }
        }

        if true_pos + false_pos + false_neg == 0 {
            return 1.0; // blank page predicted blank
        }
        if true_pos == 0 {
            return 0.0;
        }

        let precision = true_pos as f64 / (true_pos + false_pos) as f64;
        let recall = true_pos as f64 / (true_pos + false_neg) as f64;
        2.0 * precision * recall / (precision + recall)
    }

    fn psnr(ground_truth: &GrayImage, predicted: &GrayImage) -> f64 {
        let squared_error: f64 = ground_truth
            .pixels()
            .zip(predicted.pixels())
            .map(|(gt, pred)| {
                let d = gt[0] as f64 - pred[0] as f64;
                d * d
            })
            .sum();
        let count = ground_truth.width() as f64 * ground_truth.height() as f64;
        let mse = if count > 0.0 { squared_error / count } else { 0.0 };

        if mse == 0.0 {
            return f64::INFINITY;
        }
        10.0 * (255.0 * 255.0 / mse).log10()
    }
}

#[derive(Debug, Clone)]
pub struct SampleMetrics {
    pub file_name: String,
    pub metrics: BinarizationMetrics,
}

/// Aggregate over every page that had a ground truth.
#[derive(Debug, Clone)]
pub struct BatchMetrics {
    pub samples: Vec<SampleMetrics>,
    pub average_f_measure: f64,
    pub average_psnr: f64,
    pub min_f_measure: f64,
}

impl BatchMetrics {
    pub fn calculate(samples: Vec<SampleMetrics>) -> Self {
        let count = samples.len() as f64;
        let mut total_f_measure = 0.0;
        let mut total_psnr = 0.0;
        let mut min_f_measure = f64::INFINITY;

        for sample in &samples {
            total_f_measure += sample.metrics.f_measure;
            total_psnr += sample.metrics.psnr.min(MAX_PSNR);
            min_f_measure = min_f_measure.min(sample.metrics.f_measure);
        }

        let (average_f_measure, average_psnr) = if count > 0.0 {
            (total_f_measure / count, total_psnr / count)
        } else {
            (0.0, 0.0)
        };
        if samples.is_empty() {
            min_f_measure = 0.0;
        }

        Self {
            samples,
            average_f_measure,
            average_psnr,
            min_f_measure,
        }
    }

    /// Check if quality meets thresholds
    pub fn meets_thresholds(&self, min_f_measure: f64, min_psnr: f64) -> bool {
        self.average_f_measure >= min_f_measure && self.average_psnr >= min_psnr
    }
}
