use crate::filter::LandmarkSmoother;
use crate::landmark::{BodyPart, Coordinate, InferenceResults, ProcessedResults, Status};

/// 信頼度で閾値処理し、信頼できる座標だけを平滑化する
///
/// Landmarks at or below `threshold` keep their raw position, are marked
/// untrustworthy and leave the smoother untouched. A frame without inference
/// output comes back entirely untrustworthy.
pub fn process(
    inference: Option<&InferenceResults>,
    threshold: f32,
    smoother: &mut LandmarkSmoother,
) -> ProcessedResults {
    let mut processed = ProcessedResults::default();
    let Some(inference) = inference else {
        return processed;
    };

    for (part, coordinate) in BodyPart::ALL.iter().zip(processed.body_parts.iter_mut()) {
        let landmark = inference.get(*part);
        *coordinate = if landmark.exceeds(threshold) {
            let (x, y) = smoother.smooth(*part, landmark.x, landmark.y);
            Coordinate::new(x, y, Status::Trustworthy)
        } else {
            Coordinate::new(landmark.x, landmark.y, Status::Untrustworthy)
        };
    }
    processed
}
