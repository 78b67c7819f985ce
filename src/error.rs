use thiserror::Error;

/// パイプラインの構築・実行時エラー
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline needs at least one inference worker")]
    NoWorkers,

    #[error("invalid {name}: {value}")]
    InvalidParameter { name: &'static str, value: String },

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("failed to spawn stage thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub(crate) fn invalid(name: &'static str, value: impl ToString) -> Self {
        Self::InvalidParameter {
            name,
            value: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
