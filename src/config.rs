use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::framerate::DEFAULT_FRAMERATE_INDEX;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    /// カメラデバイス番号
    #[serde(default)]
    pub index: i32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// ONNXモデルのパス
    #[serde(default = "default_model_path")]
    pub path: String,
    /// モデル入力サイズ
    #[serde(default = "default_input_size")]
    pub input_width: u32,
    #[serde(default = "default_input_size")]
    pub input_height: u32,
    /// 省略時はモデルの最初の入力/出力を使う
    #[serde(default)]
    pub input_name: Option<String>,
    #[serde(default)]
    pub output_name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// 推論ワーカー数（各ワーカーがモデルを1つ持つ）
    #[serde(default = "default_inference_workers")]
    pub inference_workers: usize,
    /// ステージ間バッファの容量
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// この値を超える信頼度のランドマークのみ採用 (0.0〜1.0)
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// 起動時のフレームレートプリセット（0 が最も遅い）
    #[serde(default = "default_framerate_index")]
    pub framerate_index: usize,
    /// ブロック中の待機が停止フラグを確認する間隔
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_pose_change_threshold")]
    pub pose_change_threshold: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// RUST_LOG が未設定の場合のフィルタ
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 指定するとコンソールに加えてファイルにも出力
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }
fn default_model_path() -> String { "models/EfficientPoseRT_LITE.onnx".to_string() }
fn default_input_size() -> u32 { 224 }
fn default_inference_workers() -> usize { 2 }
fn default_buffer_capacity() -> usize { 8 }
fn default_confidence_threshold() -> f32 { 0.1 }
fn default_framerate_index() -> usize { DEFAULT_FRAMERATE_INDEX }
fn default_poll_interval_ms() -> u64 { 10 }
fn default_pose_change_threshold() -> f32 { 0.3 }
fn default_log_level() -> String { "info".to_string() }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            input_width: default_input_size(),
            input_height: default_input_size(),
            input_name: None,
            output_name: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inference_workers: default_inference_workers(),
            buffer_capacity: default_buffer_capacity(),
            confidence_threshold: default_confidence_threshold(),
            framerate_index: default_framerate_index(),
            poll_interval_ms: default_poll_interval_ms(),
            pose_change_threshold: default_pose_change_threshold(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

impl PipelineConfig {
    /// 最初に見つかった不正な項目を返す
    pub fn validate(&self) -> std::result::Result<(), PipelineError> {
        if self.inference_workers == 0 {
            return Err(PipelineError::NoWorkers);
        }
        if self.buffer_capacity == 0 {
            return Err(PipelineError::invalid("buffer_capacity", self.buffer_capacity));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(PipelineError::invalid(
                "confidence_threshold",
                self.confidence_threshold,
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(PipelineError::invalid("poll_interval_ms", self.poll_interval_ms));
        }
        if !self.pose_change_threshold.is_finite() || self.pose_change_threshold < 0.0 {
            return Err(PipelineError::invalid(
                "pose_change_threshold",
                self.pose_change_threshold,
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// ファイルが存在しなければデフォルト設定
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }
}
