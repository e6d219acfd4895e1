use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Execution provider requested for the generator session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
    #[value(name = "directml")]
    DirectMl,
    #[value(name = "coreml")]
    CoreMl,
}

/// Memory layout the exported generator graph expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// Keras export, `(1, S, S, 1)`.
    #[default]
    Nhwc,
    Nchw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub input_size: u32,
    pub layout: TensorLayout,
    pub device: Device,
    /// Intra-op threads; `None` uses all available cores.
    pub threads: Option<usize>,
    /// Expected SHA-256 of the model file, lowercase hex.
    pub sha256: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("binarization_generator.onnx"),
            input_size: 256,
            layout: TensorLayout::Nhwc,
            device: Device::Cpu,
            threads: None,
            sha256: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessParams {
    pub blur_kernel: u32,
    pub block_size: u32,
    pub threshold_constant: i32,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            blur_kernel: 5,
            block_size: 11,
            threshold_constant: 2,
        }
    }
}

impl PreprocessParams {
    pub fn validate(&self) -> Result<()> {
        if self.blur_kernel == 0 || self.blur_kernel % 2 == 0 {
            anyhow::bail!("blur_kernel must be odd and positive, got {}", self.blur_kernel);
        }
        if self.block_size < 3 || self.block_size % 2 == 0 {
            anyhow::bail!("block_size must be odd and greater than 1, got {}", self.block_size);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub preprocessed_dir: PathBuf,
    pub comparison_dir: Option<PathBuf>,
    /// TrueType font for the comparison captions; panels stay uncaptioned without one.
    pub comparison_font: Option<PathBuf>,
    pub ground_truth_dir: Option<PathBuf>,
    pub model: ModelConfig,
    pub preprocess: PreprocessParams,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input_images"),
            output_dir: PathBuf::from("restored"),
            preprocessed_dir: PathBuf::from("preprocessed"),
            comparison_dir: None,
            comparison_font: None,
            ground_truth_dir: None,
            model: ModelConfig::default(),
            preprocess: PreprocessParams::default(),
        }
    }
}

impl RestoreConfig {
    pub fn from_file(config_path: &Path) -> Result<Self> {
        let config_file = std::fs::File::open(config_path)
            .with_context(|| format!("Failed to open config file at {:?}", config_path))?;

        let config: Self = serde_json::from_reader(config_file)
            .with_context(|| format!("Failed to parse config file at {:?}", config_path))?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.preprocess.validate()?;
        if self.model.input_size == 0 {
            anyhow::bail!("model.input_size must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fixed_layout() {
        let config = RestoreConfig::default();
        assert_eq!(config.input_dir, PathBuf::from("input_images"));
        assert_eq!(config.output_dir, PathBuf::from("restored"));
        assert_eq!(config.preprocessed_dir, PathBuf::from("preprocessed"));
        assert_eq!(config.model.input_size, 256);
        assert_eq!(config.preprocess, PreprocessParams::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "output_dir": "out", "model": { "layout": "nchw", "device": "cuda" } }"#,
        )
        .unwrap();

        let config = RestoreConfig::from_file(&path).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.input_dir, PathBuf::from("input_images"));
        assert_eq!(config.model.layout, TensorLayout::Nchw);
        assert_eq!(config.model.device, Device::Cuda);
        assert_eq!(config.model.input_size, 256);
    }

    #[test]
    fn even_block_size_is_rejected() {
        let params = PreprocessParams {
            block_size: 10,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = PreprocessParams {
            blur_kernel: 4,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn missing_file_names_path() {
        let err = RestoreConfig::from_file(Path::new("does/not/exist.json")).unwrap_err();
        assert!(format!("{err:#}").contains("does/not/exist.json"));
    }
}
