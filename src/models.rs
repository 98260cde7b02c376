use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_ITEM_COUNT: usize = 10;
pub const QUIZ_OPTION_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    Flashcards,
    Quiz,
}

/// One generation call: the source text, what to produce, and how many items to ask for
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub kind: GenerationKind,
    pub expected_count: Option<usize>,
}

impl GenerationRequest {
    pub fn flashcards(prompt: impl Into<String>, expected_count: Option<usize>) -> Self {
        Self {
            prompt: prompt.into(),
            kind: GenerationKind::Flashcards,
            expected_count,
        }
    }

    pub fn quiz(prompt: impl Into<String>, expected_count: Option<usize>) -> Self {
        Self {
            prompt: prompt.into(),
            kind: GenerationKind::Quiz,
            expected_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>, // always QUIZ_OPTION_COUNT entries
    pub correct_answer: u8,   // index into options
}

/// Validated output of a generation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum GeneratedContent {
    Flashcards(Vec<Flashcard>),
    Quiz(Vec<QuizQuestion>),
}

impl GeneratedContent {
    pub fn len(&self) -> usize {
        match self {
            GeneratedContent::Flashcards(cards) => cards.len(),
            GeneratedContent::Quiz(questions) => questions.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashcardSet {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub source_name: Option<String>,
    pub cards: Vec<Flashcard>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub source_name: Option<String>,
    pub questions: Vec<QuizQuestion>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerFeedback {
    pub question_index: usize,
    pub selected: Option<u8>,
    pub correct_answer: u8,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizResult {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub user_id: String,
    pub answers: Vec<AnswerFeedback>,
    pub score: i64,
    pub total: i64,
    pub completed_at: DateTime<Utc>,
}

/// Per-user progress totals
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserStats {
    pub user_id: String,
    pub flashcard_sets: i64,
    pub flashcards: i64,
    pub quizzes: i64,
    pub quiz_attempts: i64,
    pub average_score_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateFromTextRequest {
    pub text: String,
    pub count: Option<usize>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitQuizRequest {
    pub user_id: String,
    pub answers: Vec<Option<u8>>,
}
