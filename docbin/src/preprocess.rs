//! Document enhancement applied before the generator sees an image:
//! denoise, equalize, binarize, then resize and normalize into a model tensor.

use std::path::Path;

use anyhow::{Context, Result};
use image::{GrayImage, ImageBuffer, Luma, imageops::FilterType};
use imageproc::{contrast::equalize_histogram, filter::separable_filter_equal};
use ndarray::Array4;
use tracing::debug;

use crate::config::PreprocessParams;

/// Output of [`preprocess`]: the model input plus what is needed to undo it.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// NHWC tensor of shape `(1, S, S, 1)` with values in `[-1, 1]`.
    pub tensor: Array4<f32>,
    pub original: GrayImage,
    /// Binarized image at original size.
    pub thresholded: GrayImage,
    pub width: u32,
    pub height: u32,
}

/// 1D Gaussian weights for an odd kernel size, sigma derived from the size.
///
/// Sizes up to 7 use the fixed binomial tables, larger sizes use
/// `sigma = 0.3 * ((size - 1) * 0.5 - 1) + 0.8`.
pub fn gaussian_kernel(size: u32) -> Vec<f32> {
    match size {
        1 => vec![1.0],
        3 => vec![0.25, 0.5, 0.25],
        5 => vec![0.0625, 0.25, 0.375, 0.25, 0.0625],
        7 => vec![
            0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125,
        ],
        _ => {
            let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
            let center = (size as f32 - 1.0) / 2.0;
            let weights = (0..size)
                .map(|i| {
                    let d = i as f32 - center;
                    (-(d * d) / (2.0 * sigma * sigma)).exp()
                })
                .collect::<Vec<_>>();
            let sum: f32 = weights.iter().sum();
            weights.into_iter().map(|w| w / sum).collect()
        }
    }
}

/// Gaussian-weighted mean of each pixel's neighbourhood, kept in full precision.
pub fn gaussian_mean(image: &GrayImage, size: u32) -> ImageBuffer<Luma<f32>, Vec<f32>> {
    let widened = ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        Luma([image.get_pixel(x, y)[0] as f32])
    });
    let kernel = gaussian_kernel(size);
    separable_filter_equal(&widened, kernel.as_slice())
}

/// Gaussian blur rounded to the nearest 8-bit level.
pub fn gaussian_blur(image: &GrayImage, size: u32) -> GrayImage {
    let mean = gaussian_mean(image, size);
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([mean.get_pixel(x, y)[0].round().clamp(0.0, 255.0) as u8])
    })
}

/// Binary threshold against the rounded Gaussian-weighted local mean minus `constant`.
pub fn adaptive_gaussian_threshold(image: &GrayImage, block_size: u32, constant: i32) -> GrayImage {
    let local_mean = gaussian_blur(image, block_size);

    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let value = image.get_pixel(x, y)[0] as i32;
        let threshold = local_mean.get_pixel(x, y)[0] as i32 - constant;
        if value > threshold { Luma([255]) } else { Luma([0]) }
    })
}

/// Denoise, equalize and binarize at the image's own resolution.
///
/// Equalization maps each level through the plain cumulative histogram, with
/// no `cdf_min` offset, so the darkest level present does not land on 0.
pub fn binarize(image: &GrayImage, params: &PreprocessParams) -> GrayImage {
    let denoised = gaussian_blur(image, params.blur_kernel);
    let enhanced = equalize_histogram(&denoised);
    adaptive_gaussian_threshold(&enhanced, params.block_size, params.threshold_constant)
}

/// Map `[0, 255]` to `[-1, 1]`.
pub fn normalize(value: u8) -> f32 {
    value as f32 / 127.5 - 1.0
}

/// Resize to `size x size` (bilinear) and pack into an NHWC batch of one.
pub fn to_tensor(image: &GrayImage, size: u32) -> Array4<f32> {
    let resized = image::imageops::resize(image, size, size, FilterType::Triangle);

    let mut tensor = Array4::zeros((1, size as usize, size as usize, 1));
    for (x, y, pixel) in resized.enumerate_pixels() {
        tensor[[0, y as usize, x as usize, 0]] = normalize(pixel[0]);
    }

    tensor
}

pub fn preprocess(original: GrayImage, params: &PreprocessParams, input_size: u32) -> Preprocessed {
    let (width, height) = original.dimensions();
    let thresholded = binarize(&original, params);
    let tensor = to_tensor(&thresholded, input_size);

    Preprocessed {
        tensor,
        original,
        thresholded,
        width,
        height,
    }
}

/// Load `image_path` as grayscale, preprocess it and keep the binarized
/// intermediate in `preprocessed_dir` under the same file name.
pub fn preprocess_image(
    image_path: &Path,
    params: &PreprocessParams,
    input_size: u32,
    preprocessed_dir: &Path,
) -> Result<Preprocessed> {
    let original = image::open(image_path)
        .with_context(|| format!("Failed to open image at {:?}", image_path))?
        .to_luma8();

    let preprocessed = preprocess(original, params, input_size);

    let file_name = image_path
        .file_name()
        .with_context(|| format!("Image path {:?} has no file name", image_path))?;
    let pre_path = preprocessed_dir.join(file_name);
    preprocessed
        .thresholded
        .save(&pre_path)
        .with_context(|| format!("Failed to save preprocessed image at {:?}", pre_path))?;

    debug!(
        width = preprocessed.width,
        height = preprocessed.height,
        "preprocessed {:?}",
        image_path
    );

    Ok(preprocessed)
}
