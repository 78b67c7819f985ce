pub mod iir;
pub mod smoother;

pub use iir::{Biquad, IirFilter, SectionCoefficients, SmoothingSettings};
pub use smoother::LandmarkSmoother;
