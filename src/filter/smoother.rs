use crate::landmark::BodyPart;

use super::iir::{IirFilter, SmoothingSettings};

/// Per-axis filter with lazy priming on its first sample
#[derive(Debug, Clone)]
struct AxisFilter {
    filter: IirFilter,
    primed: bool,
}

impl AxisFilter {
    fn new(settings: &SmoothingSettings) -> Self {
        Self {
            filter: IirFilter::new(settings),
            primed: false,
        }
    }

    fn run(&mut self, value: f32) -> f32 {
        if !self.primed {
            self.filter.settle(value);
            self.primed = true;
        }
        self.filter.run(value)
    }
}

/// 全ランドマークの x, y 座標それぞれに独立した IIR フィルタを持つ平滑化器
///
/// Built once per coefficient set; a frame-rate change replaces the whole
/// smoother rather than touching the coefficients of this one.
#[derive(Debug, Clone)]
pub struct LandmarkSmoother {
    x: [AxisFilter; BodyPart::COUNT],
    y: [AxisFilter; BodyPart::COUNT],
    settings: SmoothingSettings,
}

impl LandmarkSmoother {
    pub fn new(settings: &SmoothingSettings) -> Self {
        Self {
            x: std::array::from_fn(|_| AxisFilter::new(settings)),
            y: std::array::from_fn(|_| AxisFilter::new(settings)),
            settings: settings.clone(),
        }
    }

    pub fn settings(&self) -> &SmoothingSettings {
        &self.settings
    }

    pub fn smooth(&mut self, part: BodyPart, x: f32, y: f32) -> (f32, f32) {
        let i = part as usize;
        (self.x[i].run(x), self.y[i].run(y))
    }

    pub fn reset(&mut self) {
        *self = Self::new(&self.settings);
    }
}
