/// Settle runs stop once this many consecutive outputs are within tolerance.
const SETTLE_CONSECUTIVE_SAMPLES: u8 = 3;
const SETTLE_MAX_ITERS: usize = 1000;
const SETTLE_TOLERANCE: f32 = 0.01;

/// One second-order section: `(b0, b1, b2, a0, a1, a2)`.
///
/// `a0` is the normalisation term and is assumed to be 1.0; the recursion
/// never divides by it.
pub type SectionCoefficients = [f32; 6];

/// Coefficient set for one cascade of biquad sections.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SmoothingSettings {
    pub sections: Vec<SectionCoefficients>,
}

impl SmoothingSettings {
    pub fn new(sections: Vec<SectionCoefficients>) -> Self {
        Self { sections }
    }

    /// No stages: the filter built from this is the identity.
    pub fn passthrough() -> Self {
        Self::default()
    }
}

/// Second-order IIR section (direct form II)
#[derive(Debug, Clone)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    #[allow(dead_code)]
    a0: f32,
    a1: f32,
    a2: f32,
    tap1: f32,
    tap2: f32,
}

impl Biquad {
    pub fn new(coefficients: SectionCoefficients) -> Self {
        let [b0, b1, b2, a0, a1, a2] = coefficients;
        Self {
            b0,
            b1,
            b2,
            a0,
            a1,
            a2,
            tap1: 0.0,
            tap2: 0.0,
        }
    }

    pub fn run(&mut self, x: f32) -> f32 {
        let w = x - self.a1 * self.tap1 - self.a2 * self.tap2;
        let output = self.b0 * w + self.b1 * self.tap1 + self.b2 * self.tap2;
        self.tap2 = self.tap1;
        self.tap1 = w;
        output
    }
}

/// Higher-order low-pass filter made of biquads in series
#[derive(Debug, Clone)]
pub struct IirFilter {
    stages: Vec<Biquad>,
}

impl IirFilter {
    pub fn new(settings: &SmoothingSettings) -> Self {
        Self {
            stages: settings.sections.iter().copied().map(Biquad::new).collect(),
        }
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn run(&mut self, x: f32) -> f32 {
        self.stages.iter_mut().fold(x, |acc, stage| stage.run(acc))
    }

    /// Drive the taps to the steady state for a constant input `x`, so the
    /// first filtered samples do not ramp up from zero.
    ///
    /// Returns the number of samples run.
    pub fn settle(&mut self, x: f32) -> usize {
        if self.stages.is_empty() {
            return 0;
        }
        let tolerance = (x.abs() * SETTLE_TOLERANCE).max(f32::EPSILON);
        let mut in_range = 0u8;
        let mut iters = 0;
        while in_range <= SETTLE_CONSECUTIVE_SAMPLES && iters < SETTLE_MAX_ITERS {
            let y = self.run(x);
            if (y - x).abs() <= tolerance {
                in_range += 1;
            } else {
                in_range = 0;
            }
            iters += 1;
        }
        iters
    }
}
