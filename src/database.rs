use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::time::Instant;
use uuid::Uuid;

use crate::models::*;

// Import logging macros
use crate::log_db_operation;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        let db = Database { pool };
        db.migrate().await?;
        log_db_operation!(info, "migrate", "database initialized");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flashcard_sets (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                source_name TEXT,
                cards TEXT NOT NULL,
                card_count INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quizzes (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                source_name TEXT,
                questions TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quiz_results (
                id TEXT PRIMARY KEY,
                quiz_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                answers TEXT NOT NULL,
                score INTEGER NOT NULL,
                total INTEGER NOT NULL,
                completed_at TEXT NOT NULL,
                FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_flashcard_sets_user ON flashcard_sets(user_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_quizzes_user ON quizzes(user_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_quiz_results_user ON quiz_results(user_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // Flashcard set operations
    pub async fn save_flashcard_set(&self, set: &FlashcardSet) -> Result<Uuid> {
        let started = Instant::now();
        sqlx::query(
            r#"
            INSERT INTO flashcard_sets (id, user_id, title, source_name, cards, card_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(set.id.to_string())
        .bind(&set.user_id)
        .bind(&set.title)
        .bind(&set.source_name)
        .bind(serde_json::to_string(&set.cards)?)
        .bind(set.cards.len() as i64)
        .bind(set.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        log_db_operation!(
            debug,
            "insert_flashcard_set",
            id = set.id,
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(set.id)
    }

    pub async fn get_flashcard_set(&self, id: Uuid) -> Result<Option<FlashcardSet>> {
        let row = sqlx::query("SELECT * FROM flashcard_sets WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_flashcard_set(&row)).transpose()
    }

    pub async fn find_flashcard_sets(&self, user_id: &str) -> Result<Vec<FlashcardSet>> {
        let started = Instant::now();
        let rows = sqlx::query(
            "SELECT * FROM flashcard_sets WHERE user_id = ?1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let sets = rows
            .iter()
            .map(row_to_flashcard_set)
            .collect::<Result<Vec<_>>>()?;
        log_db_operation!(
            debug,
            "select_flashcard_sets",
            count = sets.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(sets)
    }

    // Quiz operations
    pub async fn save_quiz(&self, quiz: &Quiz) -> Result<Uuid> {
        let started = Instant::now();
        sqlx::query(
            r#"
            INSERT INTO quizzes (id, user_id, title, source_name, questions, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(quiz.id.to_string())
        .bind(&quiz.user_id)
        .bind(&quiz.title)
        .bind(&quiz.source_name)
        .bind(serde_json::to_string(&quiz.questions)?)
        .bind(quiz.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        log_db_operation!(
            debug,
            "insert_quiz",
            id = quiz.id,
            duration_ms = started.elapsed().as_millis() as u64
        );
        Ok(quiz.id)
    }

    pub async fn get_quiz(&self, id: Uuid) -> Result<Option<Quiz>> {
        let row = sqlx::query("SELECT * FROM quizzes WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_quiz(&row)).transpose()
    }

    pub async fn find_quizzes(&self, user_id: &str) -> Result<Vec<Quiz>> {
        let rows = sqlx::query("SELECT * FROM quizzes WHERE user_id = ?1 ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_quiz).collect()
    }

    // Quiz result operations
    pub async fn save_quiz_result(&self, result: &QuizResult) -> Result<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO quiz_results (id, quiz_id, user_id, answers, score, total, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(result.id.to_string())
        .bind(result.quiz_id.to_string())
        .bind(&result.user_id)
        .bind(serde_json::to_string(&result.answers)?)
        .bind(result.score)
        .bind(result.total)
        .bind(result.completed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.id)
    }

    pub async fn find_quiz_results(&self, user_id: &str) -> Result<Vec<QuizResult>> {
        let rows = sqlx::query(
            "SELECT * FROM quiz_results WHERE user_id = ?1 ORDER BY completed_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            results.push(QuizResult {
                id: Uuid::parse_str(&row.get::<String, _>("id"))?,
                quiz_id: Uuid::parse_str(&row.get::<String, _>("quiz_id"))?,
                user_id: row.get("user_id"),
                answers: serde_json::from_str(&row.get::<String, _>("answers"))?,
                score: row.get("score"),
                total: row.get("total"),
                completed_at: parse_timestamp(&row.get::<String, _>("completed_at"))?,
            });
        }
        Ok(results)
    }

    /// Totals across a user's saved content and quiz attempts
    pub async fn get_user_stats(&self, user_id: &str) -> Result<UserStats> {
        let sets = sqlx::query(
            "SELECT COUNT(*) AS set_count, COALESCE(SUM(card_count), 0) AS card_total FROM flashcard_sets WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let quizzes = sqlx::query("SELECT COUNT(*) AS quiz_count FROM quizzes WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let results = sqlx::query(
            r#"
            SELECT COUNT(*) AS attempts,
                   COALESCE(SUM(score), 0) AS score_sum,
                   COALESCE(SUM(total), 0) AS total_sum
            FROM quiz_results WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let score_sum: i64 = results.get("score_sum");
        let total_sum: i64 = results.get("total_sum");
        let average_score_percent = if total_sum > 0 {
            Some(score_sum as f64 * 100.0 / total_sum as f64)
        } else {
            None
        };

        Ok(UserStats {
            user_id: user_id.to_string(),
            flashcard_sets: sets.get("set_count"),
            flashcards: sets.get("card_total"),
            quizzes: quizzes.get("quiz_count"),
            quiz_attempts: results.get("attempts"),
            average_score_percent,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn row_to_flashcard_set(row: &sqlx::sqlite::SqliteRow) -> Result<FlashcardSet> {
    Ok(FlashcardSet {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        user_id: row.get("user_id"),
        title: row.get("title"),
        source_name: row.get("source_name"),
        cards: serde_json::from_str(&row.get::<String, _>("cards"))?,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn row_to_quiz(row: &sqlx::sqlite::SqliteRow) -> Result<Quiz> {
    Ok(Quiz {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        user_id: row.get("user_id"),
        title: row.get("title"),
        source_name: row.get("source_name"),
        questions: serde_json::from_str(&row.get::<String, _>("questions"))?,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}
