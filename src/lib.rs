pub mod buffer;
#[cfg(feature = "desktop")]
pub mod camera;
pub mod config;
pub mod error;
pub mod filter;
pub mod framerate;
pub mod landmark;
pub mod logging;
pub mod pipeline;
#[cfg(feature = "desktop")]
pub mod pose;
pub mod posture;
pub mod stage;

pub use buffer::{OrderedBuffer, PushError, SequenceId, Sequenced};
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineOptions, ProcessedFrame};
