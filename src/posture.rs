//! Posture judgment seam.
//!
//! The pipeline only needs a verdict per frame; how a verdict is reached is
//! up to the [`PostureJudge`] implementation. [`DisplacementJudge`] is the
//! built-in one: it compares the current frame against a stored ideal pose
//! by mean landmark displacement.

use crate::landmark::{BodyPart, ProcessedResults};

pub const DEFAULT_POSE_CHANGE_THRESHOLD: f32 = 0.3;

/// 1フレーム分の姿勢判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostureStatus {
    Good,
    Bad,
    /// 理想姿勢が未設定、または比較できるランドマークがない
    #[default]
    Undefined,
}

pub trait PostureJudge: Send + 'static {
    fn judge(&self, current: &ProcessedResults) -> PostureStatus;

    fn set_ideal_posture(&mut self, ideal: &ProcessedResults);

    /// Called with values already checked to be finite and non-negative.
    fn set_pose_change_threshold(&mut self, threshold: f32);

    fn pose_change_threshold(&self) -> f32;
}

#[derive(Debug, Clone)]
pub struct DisplacementJudge {
    ideal: Option<ProcessedResults>,
    threshold: f32,
}

impl DisplacementJudge {
    pub fn new(threshold: f32) -> Self {
        Self {
            ideal: None,
            threshold,
        }
    }

    /// Mean distance over landmarks trustworthy in both poses.
    fn mean_displacement(ideal: &ProcessedResults, current: &ProcessedResults) -> Option<f32> {
        let (sum, n) = BodyPart::ALL
            .iter()
            .map(|&part| (ideal.get(part), current.get(part)))
            .filter(|(a, b)| a.is_trustworthy() && b.is_trustworthy())
            .fold((0.0f32, 0usize), |(sum, n), (a, b)| {
                (sum + (a.x - b.x).hypot(a.y - b.y), n + 1)
            });
        (n > 0).then(|| sum / n as f32)
    }
}

impl Default for DisplacementJudge {
    fn default() -> Self {
        Self::new(DEFAULT_POSE_CHANGE_THRESHOLD)
    }
}

impl PostureJudge for DisplacementJudge {
    fn judge(&self, current: &ProcessedResults) -> PostureStatus {
        let Some(ideal) = &self.ideal else {
            return PostureStatus::Undefined;
        };
        match Self::mean_displacement(ideal, current) {
            Some(d) if d > self.threshold => PostureStatus::Bad,
            Some(_) => PostureStatus::Good,
            None => PostureStatus::Undefined,
        }
    }

    fn set_ideal_posture(&mut self, ideal: &ProcessedResults) {
        self.ideal = Some(ideal.clone());
    }

    fn set_pose_change_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    fn pose_change_threshold(&self) -> f32 {
        self.threshold
    }
}
