//! Detection aggregation shared by the image, sync video and async video paths.
//!
//! Summaries always use string stage keys ("0", "1", "2") with every key
//! present, so stored records and response payloads never disagree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::detection::{Detection, Stage};
use crate::models::record::VideoSummary;

/// Count of detections per stage, keyed by the stage code as a string.
pub type StageCounts = BTreeMap<String, u64>;

/// Summary of a single detection list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub stage_counts: StageCounts,
    pub flower_count: u64,
}

pub fn empty_stage_counts() -> StageCounts {
    Stage::ALL.iter().map(|stage| (stage.key(), 0)).collect()
}

fn count_into<'a>(counts: &mut StageCounts, detections: impl IntoIterator<Item = &'a Detection>) -> u64 {
    let mut total = 0;
    for detection in detections {
        *counts.entry(detection.stage.key()).or_insert(0) += 1;
        total += 1;
    }
    total
}

pub fn summarize(detections: &[Detection]) -> ImageSummary {
    let mut stage_counts = empty_stage_counts();
    let flower_count = count_into(&mut stage_counts, detections);
    ImageSummary {
        stage_counts,
        flower_count,
    }
}

/// Summarize per-frame detections of a video.
///
/// The average is taken over `total_frames` as reported by the decoder, and
/// is 0 for an empty video.
pub fn summarize_video(frame_results: &[Vec<Detection>], total_frames: u64) -> VideoSummary {
    let mut stage_summary = empty_stage_counts();
    let total_detections = count_into(&mut stage_summary, frame_results.iter().flatten());
    let average_flowers_per_frame = if total_frames > 0 {
        total_detections as f64 / total_frames as f64
    } else {
        0.0
    };

    VideoSummary {
        stage_summary,
        total_detections,
        average_flowers_per_frame,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(stage: Stage) -> Detection {
        Detection::new([0.0, 0.0, 10.0, 10.0], stage, 0.9)
    }

    #[test]
    fn test_summarize_empty_has_all_keys() {
        let summary = summarize(&[]);
        assert_eq!(summary.flower_count, 0);
        assert_eq!(summary.stage_counts.len(), 3);
        for key in ["0", "1", "2"] {
            assert_eq!(summary.stage_counts[key], 0);
        }
    }

    #[test]
    fn test_summarize_counts_sum_to_input_length() {
        let detections = vec![
            det(Stage::Bud),
            det(Stage::Bud),
            det(Stage::Anthesis),
            det(Stage::PostAnthesis),
            det(Stage::PostAnthesis),
            det(Stage::PostAnthesis),
        ];
        let summary = summarize(&detections);
        assert_eq!(summary.flower_count, 6);
        assert_eq!(summary.stage_counts["0"], 2);
        assert_eq!(summary.stage_counts["1"], 1);
        assert_eq!(summary.stage_counts["2"], 3);
        assert_eq!(summary.stage_counts.values().sum::<u64>(), detections.len() as u64);
    }

    #[test]
    fn test_summarize_video_single_bud_in_ten_frames() {
        let mut frames = vec![Vec::new(); 10];
        frames[0].push(det(Stage::Bud));

        let summary = summarize_video(&frames, 10);
        assert_eq!(summary.total_detections, 1);
        assert_eq!(summary.average_flowers_per_frame, 0.1);

        let expected: StageCounts = [("0", 1), ("1", 0), ("2", 0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(summary.stage_summary, expected);
    }

    #[test]
    fn test_summarize_video_zero_frames() {
        let summary = summarize_video(&[], 0);
        assert_eq!(summary.total_detections, 0);
        assert_eq!(summary.average_flowers_per_frame, 0.0);
        assert_eq!(summary.stage_summary, empty_stage_counts());
    }

    #[test]
    fn test_summarize_video_uses_reported_frame_count() {
        let frames = vec![vec![det(Stage::Anthesis), det(Stage::Bud)], vec![det(Stage::Anthesis)]];
        let summary = summarize_video(&frames, 4);
        assert_eq!(summary.total_detections, 3);
        assert_eq!(summary.average_flowers_per_frame, 0.75);
        assert_eq!(summary.stage_summary["1"], 2);
    }

    #[test]
    fn test_summary_serializes_with_string_keys() {
        let summary = summarize(&[det(Stage::Anthesis)]);
        let json = serde_json::to_value(&summary.stage_counts).unwrap();
        assert_eq!(json, serde_json::json!({"0": 0, "1": 1, "2": 0}));
    }
}
