use anyhow::Result;
use image::{GrayImage, Luma, imageops::FilterType};
use ndarray::{Array2, Array4, s};

use crate::{generator::Generator, preprocess::Preprocessed};

/// Map `[-1, 1]` back to `[0, 255]`, saturating outside the range.
pub fn denormalize(value: f32) -> u8 {
    ((value + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8
}

/// Pull the single channel out of an NHWC batch of one.
pub fn single_channel(output: &Array4<f32>) -> Result<Array2<f32>> {
    let (batch, _, _, channels) = output.dim();
    if batch != 1 || channels != 1 {
        anyhow::bail!(
            "Generator output shape {:?} is not a single-channel batch of one",
            output.shape()
        );
    }
    Ok(output.slice(s![0, .., .., 0]).to_owned())
}

/// `(rows, cols)` plane to an 8-bit image.
pub fn to_image(plane: &Array2<f32>) -> GrayImage {
    let (rows, cols) = plane.dim();
    GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        Luma([denormalize(plane[[y as usize, x as usize]])])
    })
}

/// Run the generator on a preprocessed image and bring the prediction back
/// to the original resolution.
pub fn restore(generator: &mut dyn Generator, preprocessed: &Preprocessed) -> Result<GrayImage> {
    let output = generator.predict(&preprocessed.tensor)?;
    let plane = single_channel(&output)?;

    let (_, rows, cols, _) = preprocessed.tensor.dim();
    if plane.dim() != (rows, cols) {
        anyhow::bail!(
            "Generator returned {}x{}, expected {}x{}",
            plane.ncols(),
            plane.nrows(),
            cols,
            rows
        );
    }

    let restored = to_image(&plane);
    Ok(image::imageops::resize(
        &restored,
        preprocessed.width,
        preprocessed.height,
        FilterType::Triangle,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::PreprocessParams, preprocess::normalize, preprocess::preprocess};

    struct Invert;

    impl Generator for Invert {
        fn predict(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
            Ok(input.mapv(|v| -v))
        }
    }

    struct Shrink;

    impl Generator for Shrink {
        fn predict(&mut self, _input: &Array4<f32>) -> Result<Array4<f32>> {
            Ok(Array4::zeros((1, 8, 8, 1)))
        }
    }

    #[test]
    fn normalization_round_trips() {
        for value in 0..=255u8 {
            assert_eq!(denormalize(normalize(value)), value);
        }
    }

    #[test]
    fn denormalize_saturates() {
        assert_eq!(denormalize(-3.0), 0);
        assert_eq!(denormalize(7.5), 255);
    }

    #[test]
    fn restored_image_has_original_dimensions() {
        for (width, height) in [(640, 480), (100, 333), (256, 256), (17, 3)] {
            let original = GrayImage::from_fn(width, height, |x, y| Luma([((x * y) % 256) as u8]));
            let preprocessed = preprocess(original, &PreprocessParams::default(), 256);

            let restored = restore(&mut Invert, &preprocessed).unwrap();
            assert_eq!(restored.dimensions(), (width, height));
        }
    }

    #[test]
    fn wrong_output_size_is_rejected() {
        let original = GrayImage::from_pixel(40, 40, Luma([200]));
        let preprocessed = preprocess(original, &PreprocessParams::default(), 256);
        assert!(restore(&mut Shrink, &preprocessed).is_err());
    }

    #[test]
    fn single_channel_rejects_multichannel_output() {
        let output = Array4::<f32>::zeros((1, 4, 4, 3));
        assert!(single_channel(&output).is_err());

        let mut output = Array4::<f32>::zeros((1, 4, 4, 1));
        output[[0, 2, 3, 0]] = 0.5;
        let plane = single_channel(&output).unwrap();
        assert_eq!(plane.dim(), (4, 4));
        assert_eq!(plane[[2, 3]], 0.5);
    }
}
