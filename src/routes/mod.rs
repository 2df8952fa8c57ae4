use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::services::{QuestionStore, RecommendationService};

pub mod questions;
pub mod recommend;

/// Shared application state, cloned per request
#[derive(Clone)]
pub struct AppState {
    pub recommender: Arc<RecommendationService>,
    pub questions: Arc<dyn QuestionStore>,
}

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// API routes under /api
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/recommend", post(recommend::recommend))
        .route("/questions", get(questions::all))
        .route("/questions/random", get(questions::random))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
