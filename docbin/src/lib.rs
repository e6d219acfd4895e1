//! Batch restoration of scanned document pages with a pretrained GAN
//! generator: classical binarization, a generator pass, and resizing back to
//! the page's own resolution.

pub mod batch;
pub mod compare;
pub mod config;
pub mod generator;
pub mod metrics;
pub mod preprocess;
pub mod restore;

pub use batch::{BatchReport, ProcessedImage, run_batch};
pub use config::{Device, ModelConfig, PreprocessParams, RestoreConfig, TensorLayout};
pub use generator::{Generator, OnnxGenerator};
