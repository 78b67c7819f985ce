use anyhow::{Context, Result};
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use crate::config::ModelConfig;
use crate::landmark::{decode_heatmap, BodyPart, InferenceResults};
use crate::stage::InferenceCore;

fn build_session(model_path: &Path) -> Result<Session> {
    let builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "cuda")]
    let builder = {
        tracing::info!("[ort] Attempting CUDA execution provider...");
        builder.with_execution_providers([ort::execution_providers::CUDAExecutionProvider::default().build()])?
    };

    builder
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load ONNX model {}", model_path.display()))
}

/// ヒートマップを出力するモデル用の検出器
///
/// 入力: [1, H, W, 3] の f32 テンソル (-1.0〜1.0)
/// 出力: [1, H, W, 16] のヒートマップ
pub struct HeatmapDetector {
    session: Session,
    input_name: String,
    output_name: String,
}

impl HeatmapDetector {
    /// ONNXモデルを読み込んで初期化。名前を省略するとモデルの最初の入力/出力を使う
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_name: Option<String>,
        output_name: Option<String>,
    ) -> Result<Self> {
        let session = build_session(model_path.as_ref())?;
        let input_name = match input_name {
            Some(name) => name,
            None => session
                .inputs
                .first()
                .map(|input| input.name.clone())
                .context("Model has no inputs")?,
        };
        let output_name = match output_name {
            Some(name) => name,
            None => session
                .outputs
                .first()
                .map(|output| output.name.clone())
                .context("Model has no outputs")?,
        };
        tracing::debug!(%input_name, %output_name, "model loaded");

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }

    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        Self::new(&config.path, config.input_name.clone(), config.output_name.clone())
    }

    /// 前処理済みテンソルからランドマークを検出
    pub fn detect(&mut self, input: &Array4<f32>) -> Result<InferenceResults> {
        let input_tensor = Tensor::from_array(input.clone())?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .context("Inference failed")?;

        let output: ndarray::ArrayViewD<f32> = outputs[self.output_name.as_str()]
            .try_extract_array()
            .context("Failed to extract output tensor")?;

        let shape = output.shape();
        if shape.len() != 4 || shape[3] != BodyPart::COUNT {
            anyhow::bail!("Unexpected heatmap shape {:?}", shape);
        }
        let (height, width) = (shape[1], shape[2]);
        let heatmap: Vec<f32> = output.iter().copied().collect();

        Ok(decode_heatmap(&heatmap, width, height))
    }
}

impl InferenceCore for HeatmapDetector {
    fn run(&mut self, input: &Array4<f32>) -> Result<InferenceResults> {
        self.detect(input)
    }
}
