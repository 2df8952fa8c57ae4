use axum::{extract::State, Json};

use crate::error::{AppError, AppResult};
use crate::models::Question;
use crate::routes::AppState;

/// Handler for listing every deep question
pub async fn all(State(state): State<AppState>) -> AppResult<Json<Vec<Question>>> {
    let questions = state.questions.all().await?;
    Ok(Json(questions))
}

/// Handler for drawing one deep question at random
pub async fn random(State(state): State<AppState>) -> AppResult<Json<Question>> {
    let question = state
        .questions
        .random()
        .await?
        .ok_or_else(|| AppError::NotFound("No questions found".to_string()))?;
    Ok(Json(question))
}
