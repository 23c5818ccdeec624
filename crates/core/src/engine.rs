//! Inference engine seam.
//!
//! The pipeline hands an ordered batch of tile inputs to an opaque engine and
//! consumes index-aligned outputs; it never inspects which model is behind
//! the trait. [`OrtEngine`] is the production implementation over
//! `ort::Session` with CUDA/TensorRT execution providers; supports both FP32
//! and FP16 models (dtype detected from the session's input signature).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use half::f16;
use half::slice::HalfFloatSliceExt;
use ndarray::Array4;
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider, TensorRTExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use tracing::{debug, warn};

use crate::collect::TileOutput;
use crate::error::ConvertError;
use crate::extract::TileInput;

/// Opaque tile-in, tile-out inference contract. Output `i` must correspond to
/// input `i`; any engine fault surfaces as [`ConvertError::InferenceFailed`].
pub trait InferenceEngine: Send {
    fn infer(&mut self, inputs: &[TileInput]) -> Result<Vec<TileOutput>, ConvertError>;
}

/// Execution-provider selection. `Tensorrt` registers the TRT EP with engine
/// caching and falls back to CUDA when the TRT runtime is unavailable; CUDA
/// itself falls back to CPU inside ORT.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum InferenceBackend {
    #[default]
    Cuda,
    Tensorrt,
}

impl InferenceBackend {
    /// Parse from string (case-insensitive). Returns `Cuda` for unknown values.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "tensorrt" | "trt" => Self::Tensorrt,
            _ => Self::Cuda,
        }
    }
}

impl std::fmt::Display for InferenceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cuda => write!(f, "cuda"),
            Self::Tensorrt => write!(f, "tensorrt"),
        }
    }
}

pub struct EngineConfig {
    pub model_path: PathBuf,
    pub backend: InferenceBackend,
    pub trt_cache_dir: Option<PathBuf>,
}

/// ONNX Runtime implementation of [`InferenceEngine`]. One tile per `run`
/// call; the session is exclusively owned by the video pump for the duration
/// of a conversion.
pub struct OrtEngine {
    session: Session,
    input_name: String,
    output_name: String,
    is_fp16_model: bool,
}

impl OrtEngine {
    pub fn load(config: &EngineConfig) -> Result<Self> {
        let session = build_session(config)?;

        let input_name = session.inputs()[0].name().to_string();
        let output_name = session.outputs()[0].name().to_string();
        let is_fp16 = match session.inputs()[0].dtype() {
            ort::value::ValueType::Tensor { ty, .. } => {
                *ty == ort::tensor::TensorElementType::Float16
            }
            _ => false,
        };

        debug!(%input_name, %output_name, is_fp16, "Detected model IO");

        Ok(Self {
            session,
            input_name,
            output_name,
            is_fp16_model: is_fp16,
        })
    }

    fn run_tile(&mut self, input: &TileInput) -> Result<Vec<f64>> {
        let side = input.side;
        let f32_data: Vec<f32> = input.data.iter().map(|&v| v as f32).collect();
        let arr = Array4::from_shape_vec((1, 3, side, side), f32_data)
            .context("failed to shape tile input as NCHW")?;

        if self.is_fp16_model {
            let f32_slice = arr.as_slice().expect("freshly built array is contiguous");
            let mut fp16_data = vec![f16::ZERO; f32_slice.len()];
            fp16_data.convert_from_f32_slice(f32_slice);
            let fp16_array =
                ndarray::ArrayD::from_shape_vec(vec![1, 3, side, side], fp16_data)?;

            let input_tensor = Tensor::from_array(fp16_array)?;
            let outputs = self
                .session
                .run(ort::inputs![&self.input_name => &input_tensor])?;
            let view = outputs[self.output_name.as_str()].try_extract_array::<f16>()?;

            let owned_contig;
            let slice = if let Some(s) = view.as_slice() {
                s
            } else {
                owned_contig = view.as_standard_layout().into_owned();
                owned_contig.as_slice().unwrap()
            };
            Ok(slice.iter().map(|v| v.to_f64()).collect())
        } else {
            let input_tensor = Tensor::from_array(arr)?;
            let outputs = self
                .session
                .run(ort::inputs![&self.input_name => &input_tensor])?;
            let view = outputs[self.output_name.as_str()].try_extract_array::<f32>()?;

            let owned_contig;
            let slice = if let Some(s) = view.as_slice() {
                s
            } else {
                owned_contig = view.as_standard_layout().into_owned();
                owned_contig.as_slice().unwrap()
            };
            Ok(slice.iter().map(|&v| v as f64).collect())
        }
    }
}

impl InferenceEngine for OrtEngine {
    fn infer(&mut self, inputs: &[TileInput]) -> Result<Vec<TileOutput>, ConvertError> {
        let mut outputs = Vec::with_capacity(inputs.len());
        for input in inputs {
            let data = self
                .run_tile(input)
                .map_err(ConvertError::InferenceFailed)?;
            outputs.push(TileOutput { data });
        }
        Ok(outputs)
    }
}

/// Build an `ort::Session` with the requested backend and fallback chain.
fn build_session(config: &EngineConfig) -> Result<Session> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    let session = match config.backend {
        InferenceBackend::Tensorrt => {
            let cache_dir = config
                .trt_cache_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("trt_cache"));

            if let Err(e) = std::fs::create_dir_all(&cache_dir) {
                warn!(
                    dir = %cache_dir.display(),
                    error = %e,
                    "Failed to create TRT cache directory"
                );
            }

            debug!(
                backend = "tensorrt",
                cache_dir = %cache_dir.display(),
                "Building session with TensorRT EP (CUDA EP fallback)"
            );

            // TRT EP may fail at runtime if libnvinfer is not installed; the
            // fallback CUDA EP keeps inference working.
            builder
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_engine_cache(true)
                        .with_engine_cache_path(cache_dir.to_string_lossy())
                        .with_fp16(true)
                        .with_device_id(0)
                        .build(),
                    CUDAExecutionProvider::default().build(),
                ])?
                .commit_from_file(&config.model_path)
                .with_context(|| {
                    format!("Failed to load ONNX model: {}", config.model_path.display())
                })?
        }
        InferenceBackend::Cuda => {
            let cuda = CUDAExecutionProvider::default();
            if !cuda.is_available().unwrap_or(false) {
                warn!("CUDA EP is not available; inference will fall back to CPU");
            }

            debug!(backend = "cuda", "Building session with CUDA EP");

            builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])?
                .commit_from_file(&config.model_path)
                .with_context(|| {
                    format!("Failed to load ONNX model: {}", config.model_path.display())
                })?
        }
    };

    Ok(session)
}

/// TRT engine caches are model-specific; keyed subdirectories keep engines
/// built for different models from clobbering each other.
pub fn resolve_trt_cache_dir(base_dir: &Path, cache_key: Option<&str>) -> PathBuf {
    match cache_key {
        Some(key) => base_dir.join(key),
        None => base_dir.to_path_buf(),
    }
}
