use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Heuristic quality scores for one generated response. Every field except
/// `length` is clamped to [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetrics {
    /// Word count. At least 1; callers substitute a placeholder before
    /// scoring an empty response.
    pub length: usize,
    pub creativity: f64,
    pub coherence: f64,
    pub structure: f64,
    pub completeness: f64,
    pub lexical_diversity: f64,
}

/// Score a response text.
///
/// Word, sentence, and unique-word counts drive the ratios; structure and
/// completeness carry a small random component so repeated generations with
/// similar text do not chart as identical points.
pub fn score_response(text: &str) -> ResponseMetrics {
    let words: Vec<&str> = text.split_whitespace().collect();
    let word_count = words.len().max(1);
    let unique_words: HashSet<String> = words.iter().map(|w| w.to_lowercase()).collect();
    let unique_count = unique_words.len();
    let sentence_count = text
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count();

    let mut rng = rand::thread_rng();
    let structure = if sentence_count > 0 {
        80.0 + rng.gen_range(0.0..20.0)
    } else {
        50.0
    };
    let completeness = if word_count > 50 {
        90.0 + rng.gen_range(0.0..10.0)
    } else {
        word_count as f64 / 50.0 * 90.0
    };

    ResponseMetrics {
        length: word_count,
        creativity: clamp_score(unique_count as f64 / word_count as f64 * 150.0),
        coherence: clamp_score(sentence_count as f64 / word_count as f64 * 400.0),
        structure: clamp_score(structure),
        completeness: clamp_score(completeness),
        lexical_diversity: clamp_score(unique_count as f64 / word_count as f64 * 100.0),
    }
}

fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bounded(metrics: &ResponseMetrics) {
        for (name, value) in [
            ("creativity", metrics.creativity),
            ("coherence", metrics.coherence),
            ("structure", metrics.structure),
            ("completeness", metrics.completeness),
            ("lexical_diversity", metrics.lexical_diversity),
        ] {
            assert!(
                (0.0..=100.0).contains(&value),
                "{name} out of bounds: {value}"
            );
        }
        assert!(metrics.length >= 1);
    }

    #[test]
    fn empty_text_stays_bounded() {
        assert_bounded(&score_response(""));
        assert_bounded(&score_response("   "));
    }

    #[test]
    fn single_word_stays_bounded() {
        let metrics = score_response("entropy");
        assert_bounded(&metrics);
        assert_eq!(metrics.length, 1);
        // One word, no sentence terminator.
        assert_eq!(metrics.structure, 50.0);
    }

    #[test]
    fn pathologically_repetitive_text_stays_bounded() {
        let text = "spam ".repeat(200);
        let metrics = score_response(&text);
        assert_bounded(&metrics);
        assert_eq!(metrics.length, 200);
        // One unique word out of 200: diversity collapses toward zero.
        assert!(metrics.lexical_diversity < 1.0);
        assert!(metrics.creativity < 1.0);
    }

    #[test]
    fn sentence_heavy_text_scores_high_coherence() {
        let metrics = score_response("Yes. No. Maybe. Sure. Done.");
        assert_bounded(&metrics);
        assert_eq!(metrics.length, 5);
        // 5 sentences / 5 words * 400, clamped.
        assert_eq!(metrics.coherence, 100.0);
        assert!(metrics.structure >= 80.0);
    }

    #[test]
    fn word_counting_ignores_case_for_uniqueness() {
        let metrics = score_response("Word word WORD");
        assert_eq!(metrics.length, 3);
        assert!((metrics.lexical_diversity - 100.0 / 3.0).abs() < 1e-9);
    }
}
