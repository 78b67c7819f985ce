pub mod detector;
pub mod preprocess;

pub use detector::HeatmapDetector;
pub use preprocess::ImagePreprocessor;
