use crate::labelmap::LabelMap;
use serde::{Deserialize, Serialize};

/// One labeled class prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub display_name: String,
    /// Model confidence in [0,1].
    pub score: f32,
}

/// Turns raw per-class scores into labeled results.
///
/// `scores[i]` is the score of class `i`. Scores below `score_threshold`
/// are dropped, the rest are labeled through `label_map` and returned
/// highest score first; equal scores keep their class order.
pub fn build_classifier_results(
    scores: &[f32],
    label_map: &LabelMap,
    score_threshold: f32,
) -> Vec<ClassificationResult> {
    let mut results: Vec<ClassificationResult> = scores
        .iter()
        .enumerate()
        .filter(|(_, score)| **score >= score_threshold)
        .map(|(id, &score)| ClassificationResult {
            display_name: label_map.get(id).to_string(),
            score,
        })
        .collect();
    // stable: ties stay in class-id order
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results
}

/// Softmax over raw logits for backends that do not normalize their output.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|x| x / sum).collect()
}
