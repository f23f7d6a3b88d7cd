//! Maps a user's calibration answers to parameter ranges and insights.
//!
//! Scoring is keyword-driven: answers that mention creativity-signaling words
//! push ranges toward the exploratory end, precision-signaling words toward
//! the conservative end. Long free-text answers count as a weak creativity
//! signal. Deterministic for a fixed answer order.

use crate::calibration::{AnswerValue, CalibrationAnswer, ParameterRanges, Range};

const CREATIVITY_KEYWORDS: &[&str] = &["creative", "varied", "exploratory", "free-form"];
const PRECISION_KEYWORDS: &[&str] = &["precise", "accurate", "structured", "consistent"];

/// Free-text answers longer than this many words count 0.5 toward creativity.
const LONG_ANSWER_WORDS: usize = 20;

// TODO: apply CalibrationAnswer::weight once the quiz starts emitting weights.
fn keyword_scores(answers: &[CalibrationAnswer]) -> (f64, f64) {
    let mut creativity = 0.0;
    let mut precision = 0.0;

    for answer in answers {
        match &answer.answer {
            AnswerValue::Text(text) => {
                let lower = text.to_lowercase();
                if CREATIVITY_KEYWORDS[..3].iter().any(|k| lower.contains(k)) {
                    creativity += 1.0;
                }
                if PRECISION_KEYWORDS[..3].iter().any(|k| lower.contains(k)) {
                    precision += 1.0;
                }
                if lower.split_whitespace().count() > LONG_ANSWER_WORDS {
                    creativity += 0.5;
                }
            }
            AnswerValue::Choices(choices) => {
                if choices.len() > 1 {
                    creativity += 0.5;
                }
            }
        }
    }

    (creativity, precision)
}

/// Derive the four parameter ranges from calibration answers.
///
/// A creativity ratio of 0 yields the most conservative ranges, 1 the most
/// exploratory. Float bounds are rounded to two decimals, token bounds to
/// whole tokens.
pub fn derive_parameter_ranges(answers: &[CalibrationAnswer]) -> ParameterRanges {
    let (creativity, precision) = keyword_scores(answers);

    let total = creativity + precision;
    let total = if total == 0.0 { 1.0 } else { total };
    let creativity_ratio = creativity / total;
    let precision_ratio = precision / total;

    ParameterRanges {
        temperature: Range::new(
            round2(0.3 + creativity_ratio * 0.4),
            round2(0.7 + creativity_ratio * 0.3),
        ),
        top_p: Range::new(
            round2(0.6 + creativity_ratio * 0.2),
            round2(0.85 + creativity_ratio * 0.15),
        ),
        max_tokens: Range::new(
            (300.0 + precision_ratio * 200.0).round(),
            (1000.0 + creativity_ratio * 1500.0).round(),
        ),
        frequency_penalty: Range::new(0.0, round2(0.3 + creativity_ratio * 0.4)),
    }
}

/// Qualitative summary of where the answers landed. Counts every keyword hit
/// (several per answer possible) so a strongly-worded answer weighs more than
/// it does in range derivation.
pub fn calibration_insights(answers: &[CalibrationAnswer]) -> Vec<String> {
    let mut creativity_hits = 0usize;
    let mut precision_hits = 0usize;

    for answer in answers {
        let AnswerValue::Text(text) = &answer.answer else {
            continue;
        };
        let lower = text.to_lowercase();
        creativity_hits += CREATIVITY_KEYWORDS
            .iter()
            .filter(|k| lower.contains(*k))
            .count();
        precision_hits += PRECISION_KEYWORDS
            .iter()
            .filter(|k| lower.contains(*k))
            .count();
    }

    if creativity_hits > precision_hits {
        vec![
            "Your preferences lean toward creative and exploratory responses".to_string(),
            "Higher temperature settings will suit your needs".to_string(),
            "Expect more varied and imaginative outputs".to_string(),
        ]
    } else if precision_hits > creativity_hits {
        vec![
            "Your preferences favor precision and consistency".to_string(),
            "Lower temperature settings will provide better results".to_string(),
            "Responses will be more focused and deterministic".to_string(),
        ]
    } else {
        vec![
            "You prefer a balanced approach".to_string(),
            "Moderate parameter settings will work well".to_string(),
            "Expect a mix of reliability and creativity".to_string(),
        ]
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_answer(id: &str, text: &str) -> CalibrationAnswer {
        CalibrationAnswer {
            question_id: id.to_string(),
            answer: AnswerValue::Text(text.to_string()),
            weight: None,
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let answers = vec![
            text_answer("q1", "I want creative and varied output"),
            text_answer("q2", "but it should stay accurate"),
        ];

        let first = derive_parameter_ranges(&answers);
        let second = derive_parameter_ranges(&answers);
        assert_eq!(first, second);
        assert_eq!(calibration_insights(&answers), calibration_insights(&answers));
    }

    #[test]
    fn all_derived_ranges_are_ordered() {
        let cases: Vec<Vec<CalibrationAnswer>> = vec![
            vec![],
            vec![text_answer("q1", "creative varied exploratory")],
            vec![text_answer("q1", "precise accurate structured")],
            vec![
                text_answer("q1", "creative"),
                text_answer("q2", "precise"),
                CalibrationAnswer {
                    question_id: "q3".to_string(),
                    answer: AnswerValue::Choices(vec!["a".to_string(), "b".to_string()]),
                    weight: None,
                },
            ],
        ];

        for answers in cases {
            let ranges = derive_parameter_ranges(&answers);
            ranges.validate().expect("derived ranges must be ordered");
        }
    }

    #[test]
    fn neutral_answers_yield_the_conservative_baseline() {
        let answers = vec![text_answer("q1", "whatever works")];
        let ranges = derive_parameter_ranges(&answers);

        assert_eq!(ranges.temperature, Range::new(0.3, 0.7));
        assert_eq!(ranges.top_p, Range::new(0.6, 0.85));
        assert_eq!(ranges.max_tokens, Range::new(300.0, 1000.0));
        assert_eq!(ranges.frequency_penalty, Range::new(0.0, 0.3));
    }

    #[test]
    fn pure_creativity_hits_the_exploratory_end() {
        let answers = vec![text_answer("q1", "creative and varied please")];
        let ranges = derive_parameter_ranges(&answers);

        assert_eq!(ranges.temperature, Range::new(0.7, 1.0));
        assert_eq!(ranges.top_p, Range::new(0.8, 1.0));
        assert_eq!(ranges.max_tokens, Range::new(300.0, 2500.0));
        assert_eq!(ranges.frequency_penalty, Range::new(0.0, 0.7));
    }

    #[test]
    fn long_answers_count_as_weak_creativity() {
        let long_text = "word ".repeat(25);
        let answers = vec![text_answer("q1", &long_text)];
        let ranges = derive_parameter_ranges(&answers);

        // 0.5 creativity, 0 precision: ratio 1 despite no keyword hit.
        assert_eq!(ranges.temperature, Range::new(0.7, 1.0));
    }

    #[test]
    fn insights_follow_the_keyword_balance() {
        let creative = vec![text_answer("q1", "creative, varied, free-form")];
        assert!(calibration_insights(&creative)[0].contains("creative"));

        let precise = vec![text_answer("q1", "precise and consistent")];
        assert!(calibration_insights(&precise)[0].contains("precision"));

        let balanced = vec![text_answer("q1", "creative but precise")];
        assert!(calibration_insights(&balanced)[0].contains("balanced"));

        assert_eq!(calibration_insights(&creative).len(), 3);
    }
}
