use serde_json::Value;
use tracing::warn;

use crate::errors::{GenerationError, truncate_chars};
use crate::models::{
    Flashcard, GeneratedContent, GenerationKind, QUIZ_OPTION_COUNT, QuizQuestion,
};

// Import logging macros
use crate::log_validation;

/// Raw text kept on an `InvalidFormat` failure for diagnosis
pub const EXCERPT_CHARS: usize = 500;

const FENCE: &str = "```";

/// Strip a surrounding markdown code fence (with optional language tag).
/// Text without a fence is returned trimmed; applying this twice is a no-op.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();

    let body = match trimmed.strip_prefix(FENCE) {
        Some(rest) => match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            // single-line fence, drop an inline language tag if any
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        },
        None => trimmed,
    };

    let body = body.trim_end();
    body.strip_suffix(FENCE).unwrap_or(body).trim()
}

pub fn excerpt(raw: &str) -> String {
    truncate_chars(raw, EXCERPT_CHARS)
}

/// Parses model output into typed, validated flashcards or quiz questions
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseValidator;

impl ResponseValidator {
    pub fn validate(
        &self,
        raw: &str,
        kind: GenerationKind,
        expected_count: Option<usize>,
    ) -> Result<GeneratedContent, GenerationError> {
        let result = match kind {
            GenerationKind::Flashcards => self
                .validate_flashcards(raw, expected_count)
                .map(GeneratedContent::Flashcards),
            GenerationKind::Quiz => self
                .validate_quiz(raw, expected_count)
                .map(GeneratedContent::Quiz),
        };

        match &result {
            Ok(content) => {
                log_validation!(success, "llm_response", format!("{} items", content.len()));
            }
            Err(e) => {
                log_validation!(failure, "llm_response", error = e);
            }
        }
        result
    }

    pub fn validate_flashcards(
        &self,
        raw: &str,
        expected_count: Option<usize>,
    ) -> Result<Vec<Flashcard>, GenerationError> {
        let items = parse_array(raw)?;
        let mut cards = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            let item = as_object(raw, index, item)?;
            cards.push(Flashcard {
                question: required_text(raw, index, item, "question")?,
                answer: required_text(raw, index, item, "answer")?,
            });
        }

        Ok(apply_expected_count(cards, expected_count))
    }

    pub fn validate_quiz(
        &self,
        raw: &str,
        expected_count: Option<usize>,
    ) -> Result<Vec<QuizQuestion>, GenerationError> {
        let items = parse_array(raw)?;
        let mut questions = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            let item = as_object(raw, index, item)?;
            let question = required_text(raw, index, item, "question")?;

            let options = match item.get("options").and_then(Value::as_array) {
                Some(options) if options.len() == QUIZ_OPTION_COUNT => options,
                Some(options) => {
                    return Err(invalid_at(
                        raw,
                        index,
                        format!(
                            "'options' must contain exactly {} entries, found {}",
                            QUIZ_OPTION_COUNT,
                            options.len()
                        ),
                    ));
                }
                None => return Err(invalid_at(raw, index, "missing 'options' array")),
            };

            let mut option_texts = Vec::with_capacity(QUIZ_OPTION_COUNT);
            for (option_index, option) in options.iter().enumerate() {
                match option.as_str().map(str::trim) {
                    Some(text) if !text.is_empty() => option_texts.push(text.to_string()),
                    _ => {
                        return Err(invalid_at(
                            raw,
                            index,
                            format!("'options[{}]' must be non-empty text", option_index),
                        ));
                    }
                }
            }

            let correct_answer = match item.get("correctAnswer").and_then(Value::as_i64) {
                Some(value) if (0..QUIZ_OPTION_COUNT as i64).contains(&value) => value as u8,
                Some(value) => {
                    return Err(invalid_at(
                        raw,
                        index,
                        format!("'correctAnswer' must be between 0 and 3, found {}", value),
                    ));
                }
                None => {
                    return Err(invalid_at(raw, index, "missing integer 'correctAnswer'"));
                }
            };

            questions.push(QuizQuestion {
                question,
                options: option_texts,
                correct_answer,
            });
        }

        Ok(apply_expected_count(questions, expected_count))
    }
}

fn parse_array(raw: &str) -> Result<Vec<Value>, GenerationError> {
    let body = strip_code_fence(raw);
    let value: Value = serde_json::from_str(body)
        .map_err(|e| invalid(raw, None, format!("response is not valid JSON: {}", e)))?;

    match value {
        Value::Array(items) if items.is_empty() => Err(invalid(raw, None, "response array is empty")),
        Value::Array(items) => Ok(items),
        _ => Err(invalid(raw, None, "response is not a JSON array")),
    }
}

fn as_object<'a>(
    raw: &str,
    index: usize,
    item: &'a Value,
) -> Result<&'a serde_json::Map<String, Value>, GenerationError> {
    item.as_object()
        .ok_or_else(|| invalid_at(raw, index, "item is not an object"))
}

fn required_text(
    raw: &str,
    index: usize,
    item: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<String, GenerationError> {
    match item.get(field).and_then(Value::as_str).map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(invalid_at(
            raw,
            index,
            format!("missing or empty '{}'", field),
        )),
    }
}

/// A count of zero means "no preference" and keeps every item
fn apply_expected_count<T>(mut items: Vec<T>, expected_count: Option<usize>) -> Vec<T> {
    if let Some(expected) = expected_count.filter(|n| *n > 0) {
        if items.len() > expected {
            items.truncate(expected);
        } else if items.len() < expected {
            warn!(
                expected = expected,
                received = items.len(),
                "Model returned fewer items than requested"
            );
        }
    }
    items
}

fn invalid_at(raw: &str, index: usize, reason: impl Into<String>) -> GenerationError {
    invalid(raw, Some(index), format!("item {}: {}", index, reason.into()))
}

fn invalid(raw: &str, index: Option<usize>, reason: impl Into<String>) -> GenerationError {
    GenerationError::InvalidFormat {
        index,
        reason: reason.into(),
        excerpt: excerpt(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLASHCARDS: &str = r#"[{"question":"2+2?","answer":"4"},{"question":"Capital of France?","answer":"Paris"}]"#;

    const QUIZ: &str = r#"[{"question":"Largest planet?","options":["Mars","Jupiter","Venus","Earth"],"correctAnswer":1}]"#;

    fn invalid_index(error: GenerationError) -> Option<usize> {
        match error {
            GenerationError::InvalidFormat { index, .. } => index,
            other => panic!("expected InvalidFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_strip_code_fence_variants() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("  [1]  "), "[1]");
        assert_eq!(strip_code_fence("```json [1] ```"), "[1]");
    }

    #[test]
    fn test_strip_code_fence_is_idempotent() {
        let fenced = format!("```json\n{}\n```", FLASHCARDS);
        let once = strip_code_fence(&fenced);
        assert_eq!(strip_code_fence(once), once);
        assert_eq!(once, FLASHCARDS);
    }

    #[test]
    fn test_fenced_and_plain_payloads_validate_identically() {
        let validator = ResponseValidator;
        let fenced = format!("```json\n{}\n```", FLASHCARDS);

        let plain = validator.validate(FLASHCARDS, GenerationKind::Flashcards, None).unwrap();
        let wrapped = validator.validate(&fenced, GenerationKind::Flashcards, None).unwrap();
        assert_eq!(plain, wrapped);
        assert_eq!(plain.len(), 2);
    }

    #[test]
    fn test_valid_quiz_is_accepted() {
        let questions = ResponseValidator.validate_quiz(QUIZ, None).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].correct_answer, 1);
        assert_eq!(questions[0].options[1], "Jupiter");
    }

    #[test]
    fn test_rejects_non_array_payload() {
        let error = ResponseValidator
            .validate(r#"{"question":"q","answer":"a"}"#, GenerationKind::Flashcards, None)
            .unwrap_err();
        assert_eq!(invalid_index(error), None);
    }

    #[test]
    fn test_rejects_unparsable_payload() {
        let error = ResponseValidator
            .validate("Sure! Here are your flashcards:", GenerationKind::Flashcards, None)
            .unwrap_err();
        assert!(matches!(error, GenerationError::InvalidFormat { .. }));
    }

    #[test]
    fn test_rejects_empty_array() {
        let error = ResponseValidator
            .validate("[]", GenerationKind::Quiz, None)
            .unwrap_err();
        assert_eq!(invalid_index(error), None);
    }

    #[test]
    fn test_rejects_flashcard_missing_answer() {
        let raw = r#"[{"question":"q1","answer":"a1"},{"question":"q2"}]"#;
        let error = ResponseValidator.validate_flashcards(raw, None).unwrap_err();
        assert!(error.to_string().contains("'answer'"));
        assert_eq!(invalid_index(error), Some(1));
    }

    #[test]
    fn test_rejects_flashcard_with_blank_question() {
        let raw = r#"[{"question":"   ","answer":"a1"}]"#;
        let error = ResponseValidator.validate_flashcards(raw, None).unwrap_err();
        assert_eq!(invalid_index(error), Some(0));
    }

    #[test]
    fn test_rejects_quiz_with_three_options() {
        let raw = r#"[{"question":"q","options":["a","b","c"],"correctAnswer":0}]"#;
        let error = ResponseValidator.validate_quiz(raw, None).unwrap_err();
        assert!(error.to_string().contains("exactly 4"));
        assert_eq!(invalid_index(error), Some(0));
    }

    #[test]
    fn test_rejects_quiz_with_out_of_range_answer() {
        let raw = format!(
            "[{}, {}]",
            r#"{"question":"q","options":["a","b","c","d"],"correctAnswer":0}"#,
            r#"{"question":"q","options":["a","b","c","d"],"correctAnswer":4}"#
        );
        let error = ResponseValidator.validate_quiz(&raw, None).unwrap_err();
        assert_eq!(invalid_index(error), Some(1));
    }

    #[test]
    fn test_rejects_quiz_with_non_integer_answer() {
        let raw = r#"[{"question":"q","options":["a","b","c","d"],"correctAnswer":"B"}]"#;
        let error = ResponseValidator.validate_quiz(raw, None).unwrap_err();
        assert_eq!(invalid_index(error), Some(0));
    }

    #[test]
    fn test_rejects_quiz_with_empty_option() {
        let raw = r#"[{"question":"q","options":["a","","c","d"],"correctAnswer":0}]"#;
        let error = ResponseValidator.validate_quiz(raw, None).unwrap_err();
        assert!(error.to_string().contains("options[1]"));
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let raw = format!("[{}", "x".repeat(5_000));
        match ResponseValidator.validate_flashcards(&raw, None).unwrap_err() {
            GenerationError::InvalidFormat { excerpt, .. } => {
                assert_eq!(excerpt.chars().count(), EXCERPT_CHARS + 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_expected_count_truncates_extra_items() {
        let cards = ResponseValidator.validate_flashcards(FLASHCARDS, Some(1)).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].answer, "4");

        let cards = ResponseValidator.validate_flashcards(FLASHCARDS, Some(5)).unwrap();
        assert_eq!(cards.len(), 2);
    }

    #[test]
    fn test_zero_expected_count_keeps_all_items() {
        let cards = ResponseValidator.validate_flashcards(FLASHCARDS, Some(0)).unwrap();
        assert_eq!(cards.len(), 2);

        let content = ResponseValidator
            .validate(FLASHCARDS, GenerationKind::Flashcards, Some(0))
            .unwrap();
        assert!(matches!(content, GeneratedContent::Flashcards(cards) if cards.len() == 2));
    }
}
