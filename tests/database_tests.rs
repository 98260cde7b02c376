use chrono::{Duration, Utc};
use uuid::Uuid;

use study_assistant::{
    AnswerFeedback, Database, Flashcard, FlashcardSet, Quiz, QuizQuestion, QuizResult, UserStats,
};

async fn setup_test_db() -> Database {
    Database::new("sqlite::memory:").await.unwrap()
}

fn flashcard_set(user_id: &str, cards: usize) -> FlashcardSet {
    FlashcardSet {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        title: "Cell Biology".to_string(),
        source_name: Some("biology.pdf".to_string()),
        cards: (0..cards)
            .map(|i| Flashcard {
                question: format!("Q{}", i),
                answer: format!("A{}", i),
            })
            .collect(),
        created_at: Utc::now(),
    }
}

fn quiz(user_id: &str) -> Quiz {
    Quiz {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        title: "Astronomy".to_string(),
        source_name: None,
        questions: vec![QuizQuestion {
            question: "Largest planet?".to_string(),
            options: vec![
                "Mars".to_string(),
                "Jupiter".to_string(),
                "Venus".to_string(),
                "Earth".to_string(),
            ],
            correct_answer: 1,
        }],
        created_at: Utc::now(),
    }
}

fn result_for(quiz: &Quiz, score: i64, total: i64) -> QuizResult {
    QuizResult {
        id: Uuid::new_v4(),
        quiz_id: quiz.id,
        user_id: quiz.user_id.clone(),
        answers: vec![AnswerFeedback {
            question_index: 0,
            selected: Some(1),
            correct_answer: 1,
            is_correct: true,
        }],
        score,
        total,
        completed_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_flashcard_set_round_trip() {
    let db = setup_test_db().await;
    let set = flashcard_set("user-1", 3);

    db.save_flashcard_set(&set).await.unwrap();
    let loaded = db.get_flashcard_set(set.id).await.unwrap().expect("set exists");

    assert_eq!(loaded.title, "Cell Biology");
    assert_eq!(loaded.source_name.as_deref(), Some("biology.pdf"));
    assert_eq!(loaded.cards, set.cards);
    assert!(db.get_flashcard_set(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_flashcard_sets_are_listed_newest_first_per_user() {
    let db = setup_test_db().await;

    let mut older = flashcard_set("user-1", 1);
    older.created_at = Utc::now() - Duration::hours(2);
    let newer = flashcard_set("user-1", 1);
    let foreign = flashcard_set("user-2", 1);

    db.save_flashcard_set(&older).await.unwrap();
    db.save_flashcard_set(&newer).await.unwrap();
    db.save_flashcard_set(&foreign).await.unwrap();

    let sets = db.find_flashcard_sets("user-1").await.unwrap();
    let ids: Vec<Uuid> = sets.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![newer.id, older.id]);
}

#[tokio::test]
async fn test_quiz_round_trip_preserves_options() {
    let db = setup_test_db().await;
    let quiz = quiz("user-1");

    db.save_quiz(&quiz).await.unwrap();
    let loaded = db.get_quiz(quiz.id).await.unwrap().expect("quiz exists");

    assert_eq!(loaded.questions, quiz.questions);
    assert_eq!(db.find_quizzes("user-1").await.unwrap().len(), 1);
    assert!(db.find_quizzes("user-2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_user_stats_aggregate_across_tables() {
    let db = setup_test_db().await;

    db.save_flashcard_set(&flashcard_set("user-1", 3)).await.unwrap();
    db.save_flashcard_set(&flashcard_set("user-1", 5)).await.unwrap();
    let quiz = quiz("user-1");
    db.save_quiz(&quiz).await.unwrap();
    db.save_quiz_result(&result_for(&quiz, 3, 4)).await.unwrap();
    db.save_quiz_result(&result_for(&quiz, 1, 4)).await.unwrap();

    let stats = db.get_user_stats("user-1").await.unwrap();
    assert_eq!(stats.flashcard_sets, 2);
    assert_eq!(stats.flashcards, 8);
    assert_eq!(stats.quizzes, 1);
    assert_eq!(stats.quiz_attempts, 2);
    assert_eq!(stats.average_score_percent, Some(50.0));

    let results = db.find_quiz_results("user-1").await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.quiz_id == quiz.id));
}

#[tokio::test]
async fn test_user_stats_for_new_user_are_empty() {
    let db = setup_test_db().await;

    let stats = db.get_user_stats("nobody").await.unwrap();
    assert_eq!(
        stats,
        UserStats {
            user_id: "nobody".to_string(),
            ..UserStats::default()
        }
    );
}
