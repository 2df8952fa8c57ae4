use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use crate::error::AppResult;
use crate::models::Question;
use crate::services::catalog::QuestionStore;

/// Deep questions in the `questions` table
pub struct PgQuestionStore {
    pool: PgPool,
}

impl PgQuestionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct QuestionRow {
    id: i64,
    category: String,
    question_text: String,
    options: Option<Json<Vec<String>>>,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        Question {
            id: row.id,
            category: row.category,
            question_text: row.question_text,
            options: row.options.map(|j| j.0).unwrap_or_default(),
        }
    }
}

#[async_trait::async_trait]
impl QuestionStore for PgQuestionStore {
    async fn all(&self) -> AppResult<Vec<Question>> {
        let rows: Vec<QuestionRow> =
            sqlx::query_as("SELECT id, category, question_text, options FROM questions")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(Question::from).collect())
    }

    async fn random(&self) -> AppResult<Option<Question>> {
        let row: Option<QuestionRow> = sqlx::query_as(
            "SELECT id, category, question_text, options \
             FROM questions ORDER BY random() LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Question::from))
    }
}
