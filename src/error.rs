use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("No candidate films to recommend")]
    NoCandidates,

    #[error("Failed to generate recommendations: {0}")]
    RecommendationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Infrastructure messages carry connection strings, SQL and upstream
        // payloads; callers only ever get a generic line for those.
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NoCandidates => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::RecommendationFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Database(_)
            | AppError::HttpClient(_)
            | AppError::Embedding(_)
            | AppError::ExternalApi(_)
            | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_candidates_message() {
        let err = AppError::NoCandidates;
        assert_eq!(err.to_string(), "No candidate films to recommend");
    }

    #[test]
    fn test_recommendation_failed_message() {
        let err = AppError::RecommendationFailed("could not reach the catalog".to_string());
        assert_eq!(
            err.to_string(),
            "Failed to generate recommendations: could not reach the catalog"
        );
    }
}
