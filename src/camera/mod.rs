mod capture;

pub use capture::OpenCvCamera;
