//! 計算バックエンドの選択
//!
//! 設定の `device_type` に応じて、学習は `Autodiff<Wgpu>` または `Autodiff<NdArray>`、
//! 推論は `Wgpu` または `NdArray` で実行します。

use std::path::Path;

use anyhow::Result;
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use burn_wgpu::{Wgpu, WgpuDevice};

use crate::ml::{InferenceEngine, Prediction};
use crate::model::config::{DeviceType, PipelineConfig};
use crate::model::InferenceConfig;
use crate::pipeline::{self, PipelineOutcome};

/// GPU学習用バックエンド
pub type WgpuTrainingBackend = Autodiff<Wgpu>;
/// CPU学習用バックエンド
pub type CpuTrainingBackend = Autodiff<NdArray>;

/// 設定されたデバイスでパイプラインを実行
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineOutcome> {
    match config.device_type {
        DeviceType::Wgpu => {
            let device = WgpuDevice::default();
            pipeline::run::<WgpuTrainingBackend>(config, &device)
        }
        DeviceType::Cpu => {
            let device = NdArrayDevice::Cpu;
            pipeline::run::<CpuTrainingBackend>(config, &device)
        }
    }
}

/// 推論エンジン（デバイスごと）
pub enum AnyInferenceEngine {
    Wgpu(InferenceEngine<Wgpu>),
    Cpu(InferenceEngine<NdArray>),
}

impl AnyInferenceEngine {
    pub fn load(package_path: &Path, device_type: DeviceType) -> Result<Self> {
        match device_type {
            DeviceType::Wgpu => Ok(Self::Wgpu(InferenceEngine::load(
                package_path,
                &WgpuDevice::default(),
            )?)),
            DeviceType::Cpu => Ok(Self::Cpu(InferenceEngine::load(
                package_path,
                &NdArrayDevice::Cpu,
            )?)),
        }
    }

    pub fn classify_image(&self, path: &Path) -> Result<Prediction> {
        match self {
            Self::Wgpu(engine) => engine.classify_image(path),
            Self::Cpu(engine) => engine.classify_image(path),
        }
    }

    pub fn config(&self) -> &InferenceConfig {
        match self {
            Self::Wgpu(engine) => engine.config(),
            Self::Cpu(engine) => engine.config(),
        }
    }
}
