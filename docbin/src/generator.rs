use std::{fs, path::Path, thread, time::Duration};

use anyhow::{Context, Result};
use ndarray::Array4;
use ort::{
    execution_providers::{
        CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
        DirectMLExecutionProvider, ExecutionProviderDispatch,
    },
    session::{Session, builder::GraphOptimizationLevel},
    value::Tensor,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::{Device, ModelConfig, TensorLayout};

/// Image-to-image restoration network.
///
/// Input and output are NHWC batches of one, `(1, S, S, 1)`, values in `[-1, 1]`.
pub trait Generator {
    fn predict(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;
}

/// Generator backed by an ONNX Runtime session.
#[derive(Debug)]
pub struct OnnxGenerator {
    model: Session,
    input_name: String,
    layout: TensorLayout,
}

impl OnnxGenerator {
    pub fn load(config: &ModelConfig) -> Result<Self> {
        if !config.path.exists() {
            anyhow::bail!("Missing generator model at {:?}", config.path);
        }
        if let Some(expected) = &config.sha256 {
            verify_checksum(&config.path, expected)?;
        }

        let threads = match config.threads {
            Some(threads) => threads,
            None => thread::available_parallelism()?.get(),
        };

        let model = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers([execution_provider(config.device)])?
            .with_intra_threads(threads)?
            .commit_from_file(&config.path)
            .with_context(|| format!("Failed to load generator model at {:?}", config.path))?;

        let input_name = model
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("Generator model declares no inputs")?;

        info!(
            device = ?config.device,
            threads,
            "loaded generator from {:?}",
            config.path
        );
        log_session_metadata(&model);

        Ok(Self {
            model,
            input_name,
            layout: config.layout,
        })
    }
}

impl Generator for OnnxGenerator {
    fn predict(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let (shape, data) = to_graph_layout(input, self.layout);
        let tensor = Tensor::from_array((shape, data))?;

        let outputs = self
            .model
            .run(ort::inputs![self.input_name.as_str() => tensor])?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

        let dims = shape.iter().map(|&d| d as usize).collect::<Vec<_>>();
        if dims.len() != 4 {
            anyhow::bail!("Generator output has rank {}, expected 4", dims.len());
        }
        let output = Array4::from_shape_vec((dims[0], dims[1], dims[2], dims[3]), data.to_vec())?;

        Ok(from_graph_layout(output, self.layout))
    }
}

/// Flatten an NHWC tensor in the graph's layout, row-major.
pub fn to_graph_layout(input: &Array4<f32>, layout: TensorLayout) -> (Vec<usize>, Vec<f32>) {
    let view = match layout {
        TensorLayout::Nhwc => input.view(),
        TensorLayout::Nchw => input.view().permuted_axes([0, 3, 1, 2]),
    };
    let shape = view.shape().to_vec();
    let data = view.iter().copied().collect();
    (shape, data)
}

/// Reinterpret a graph output as NHWC.
pub fn from_graph_layout(output: Array4<f32>, layout: TensorLayout) -> Array4<f32> {
    match layout {
        TensorLayout::Nhwc => output,
        TensorLayout::Nchw => output.permuted_axes([0, 2, 3, 1]),
    }
}

fn execution_provider(device: Device) -> ExecutionProviderDispatch {
    match device {
        Device::Cpu => CPUExecutionProvider::default().build(),
        Device::Cuda => CUDAExecutionProvider::default().build(),
        Device::DirectMl => DirectMLExecutionProvider::default().build(),
        Device::CoreMl => CoreMLExecutionProvider::default().build(),
    }
}

fn log_session_metadata(session: &Session) {
    for (i, input) in session.inputs.iter().enumerate() {
        debug!("  Input {}: {} - {:?}", i, input.name, input.input_type);
    }
    for (i, output) in session.outputs.iter().enumerate() {
        debug!("  Output {}: {} - {:?}", i, output.name, output.output_type);
    }
}

/// Run one blank prediction so session setup cost is paid before the batch.
pub fn warm_up(generator: &mut dyn Generator, input_size: u32) -> Result<Duration> {
    let dummy = Array4::zeros((1, input_size as usize, input_size as usize, 1));

    let start = std::time::Instant::now();
    generator.predict(&dummy).context("Generator warmup failed")?;
    let elapsed = start.elapsed();

    info!("Warmup completed in {}ms", elapsed.as_millis());
    Ok(elapsed)
}

/// SHA-256 of a file as lowercase hex.
pub fn file_sha256(path: &Path) -> Result<String> {
    let content = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    Ok(format!("{:x}", Sha256::digest(&content)))
}

pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    let actual = file_sha256(path)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(anyhow::anyhow!(
            "Checksum mismatch for {:?}: expected {}, got {}",
            path,
            expected,
            actual
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        fs::write(&path, b"abc").unwrap();

        let digest = file_sha256(&path).unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(verify_checksum(&path, &digest.to_uppercase()).is_ok());
        assert!(verify_checksum(&path, "00").is_err());
    }

    #[test]
    fn missing_model_is_reported() {
        let config = ModelConfig {
            path: "no/such/generator.onnx".into(),
            ..Default::default()
        };
        let err = OnnxGenerator::load(&config).unwrap_err();
        assert!(err.to_string().contains("no/such/generator.onnx"));
    }

    #[test]
    fn nchw_plane_is_flattened_row_major() {
        // 2x3 single-channel plane, value = row * 10 + col
        let input = Array4::from_shape_fn((1, 2, 3, 1), |(_, y, x, _)| (y * 10 + x) as f32);

        let (shape, data) = to_graph_layout(&input, TensorLayout::Nchw);
        assert_eq!(shape, [1, 1, 2, 3]);
        assert_eq!(data, [0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);

        let (shape, _) = to_graph_layout(&input, TensorLayout::Nhwc);
        assert_eq!(shape, [1, 2, 3, 1]);
    }

    #[test]
    fn nchw_channels_are_planar() {
        // two channels: c0 = 0..6, c1 = 100..106 in NHWC
        let input =
            Array4::from_shape_fn((1, 2, 3, 2), |(_, y, x, c)| (c * 100 + y * 3 + x) as f32);

        let (_, data) = to_graph_layout(&input, TensorLayout::Nchw);
        assert_eq!(&data[..6], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(&data[6..], &[100.0, 101.0, 102.0, 103.0, 104.0, 105.0]);

        let (_, data) = to_graph_layout(&input, TensorLayout::Nhwc);
        assert_eq!(&data[..4], &[0.0, 100.0, 1.0, 101.0]);
    }

    #[test]
    fn layout_conversion_round_trips() {
        let input =
            Array4::from_shape_fn((1, 4, 5, 2), |(_, y, x, c)| (c * 1000 + y * 10 + x) as f32);

        for layout in [TensorLayout::Nhwc, TensorLayout::Nchw] {
            let (shape, data) = to_graph_layout(&input, layout);
            let graph_output =
                Array4::from_shape_vec((shape[0], shape[1], shape[2], shape[3]), data).unwrap();
            let restored = from_graph_layout(graph_output, layout);
            assert_eq!(restored, input, "{layout:?}");
        }
    }

    struct Echo;

    impl Generator for Echo {
        fn predict(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
            Ok(input.clone())
        }
    }

    #[test]
    fn warm_up_runs_blank_input() {
        assert!(warm_up(&mut Echo, 16).is_ok());
    }
}
