use axum::{extract::State, Json};

use crate::error::{AppError, AppResult};
use crate::models::{QuizAnswers, RecommendationResponse};
use crate::routes::AppState;

const MOOD_MAX_CHARS: usize = 500;

/// Handler for quiz submissions
///
/// Validates the quiz input and runs the recommendation pipeline.
pub async fn recommend(
    State(state): State<AppState>,
    Json(answers): Json<QuizAnswers>,
) -> AppResult<Json<RecommendationResponse>> {
    validate(&answers)?;
    let response = state.recommender.get_recommendations(&answers).await?;

    tracing::info!(
        primary = %response.primary.title,
        secondary_count = response.secondary.len(),
        from_cache = response.from_cache,
        elapsed_ms = response.processing_time_ms,
        "Recommendations served"
    );

    Ok(Json(response))
}

fn validate(answers: &QuizAnswers) -> AppResult<()> {
    if answers.mood.trim().is_empty() {
        return Err(AppError::InvalidInput("mood must not be empty".to_string()));
    }
    if answers.mood.chars().count() > MOOD_MAX_CHARS {
        return Err(AppError::InvalidInput(format!(
            "mood must be at most {} characters",
            MOOD_MAX_CHARS
        )));
    }
    if answers.platforms.is_empty() {
        return Err(AppError::InvalidInput(
            "at least one platform is required".to_string(),
        ));
    }
    if answers.genres.is_empty() {
        return Err(AppError::InvalidInput(
            "at least one genre is required".to_string(),
        ));
    }
    Ok(())
}
