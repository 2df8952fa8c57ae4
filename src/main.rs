use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use cinemood_api::config::Config;
use cinemood_api::db::{create_pool, PgCacheStore, PgFilmStore, PgQuestionStore};
use cinemood_api::routes::{create_router, AppState};
use cinemood_api::services::{
    GeminiClient, HttpEmbedder, LlmRanker, RankerMode, RecommendationService, ResponseCache,
};

/// How often the expired-entry sweep runs
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let pool = create_pool(&config.database_url, config.database_max_connections).await?;

    // Composition root: every collaborator is constructed here and injected,
    // with lifecycle tied to the process
    let films = Arc::new(PgFilmStore::new(pool.clone()));
    let questions = Arc::new(PgQuestionStore::new(pool.clone()));
    let cache = ResponseCache::new(
        Arc::new(PgCacheStore::new(pool)),
        config.cache_ttl_days,
    );

    let embedder = Arc::new(HttpEmbedder::new(
        config.embedding_url.clone(),
        config.embedding_dim,
    ));

    let mode = if config.mock_mode() {
        tracing::info!("Generative ranker running in mock mode");
        RankerMode::Mock
    } else {
        RankerMode::Live
    };
    let ranker = Arc::new(LlmRanker::new(
        Arc::new(GeminiClient::new(
            config.gemini_api_key.clone(),
            config.gemini_api_url.clone(),
            config.gemini_model.clone(),
        )),
        mode,
        config.gemini_requests_per_minute,
    ));

    let recommender = Arc::new(RecommendationService::new(
        films,
        cache.clone(),
        embedder,
        ranker,
        config.embedding_dim,
        config.top_k_results,
    ));

    // Periodic maintenance: purge expired cache entries off the request path
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = cache.sweep_expired().await {
                tracing::error!(error = %e, "Cache sweep failed");
            }
        }
    });

    let state = AppState {
        recommender,
        questions,
    };
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Server running");
    axum::serve(listener, app).await?;

    Ok(())
}
