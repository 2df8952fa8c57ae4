use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{AppError, AppResult};
use crate::models::{
    CachedRecommendations, CandidateSummary, CatalogFilter, Film, FilmData, QuizAnswers,
    RecommendationResponse,
};
use crate::services::cache::ResponseCache;
use crate::services::catalog::FilmStore;
use crate::services::embedding::Embedder;
use crate::services::llm::{LlmRanker, GENERIC_TAGLINE, SECONDARY_COUNT};
use crate::services::similarity::{decode_embedding, VectorIndex};

/// Orchestrates the full recommendation pipeline
///
/// cache check → query embedding → catalog filter → vector retrieval →
/// candidate assembly → generative ranking → response assembly → cache
/// write. One run per request; nothing here is shared mutable state except
/// the cache and the catalog behind their own seams.
pub struct RecommendationService {
    films: Arc<dyn FilmStore>,
    cache: ResponseCache,
    embedder: Arc<dyn Embedder>,
    ranker: Arc<LlmRanker>,
    embedding_dim: usize,
    top_k: usize,
}

impl RecommendationService {
    pub fn new(
        films: Arc<dyn FilmStore>,
        cache: ResponseCache,
        embedder: Arc<dyn Embedder>,
        ranker: Arc<LlmRanker>,
        embedding_dim: usize,
        top_k: usize,
    ) -> Self {
        Self {
            films,
            cache,
            embedder,
            ranker,
            embedding_dim,
            top_k,
        }
    }

    pub async fn get_recommendations(
        &self,
        answers: &QuizAnswers,
    ) -> AppResult<RecommendationResponse> {
        let started = Instant::now();

        // 1. Cache check
        let cache_key = ResponseCache::compute_key(answers);
        if let Some(cached) = self.read_cache(&cache_key).await {
            tracing::info!(key = %&cache_key[..8], "Serving recommendations from cache");
            return Ok(RecommendationResponse {
                primary: cached.primary,
                secondary: cached.secondary,
                processing_time_ms: elapsed_ms(started),
                from_cache: true,
            });
        }

        // 2. Encode the mood text
        let user_embedding = self.embedder.embed(&answers.mood).await.map_err(|e| {
            tracing::error!(error = %e, "Embedding call failed");
            AppError::RecommendationFailed("could not encode the mood text".to_string())
        })?;

        // 3. Filtered candidate set, falling back to the whole catalog when
        // the filters match nothing. Deliberate trade-off: a result always
        // beats exact filtering.
        let filter = CatalogFilter::from(answers);
        let mut films = self.fetch_films(&filter).await?;
        if films.is_empty() {
            tracing::info!("Filters matched no films, retrying unfiltered");
            films = self.fetch_films(&CatalogFilter::unfiltered()).await?;
        }

        // 4. Per-request index over the filtered set, top-k retrieval
        let allowed: HashSet<i64> = films.iter().map(|(f, _)| f.id).collect();
        let mut index = VectorIndex::new(self.embedding_dim);
        index.load(
            films
                .iter()
                .map(|(f, bytes)| (f.id, decode_embedding(bytes)))
                .collect(),
        );
        let ranked = index.query(&user_embedding, self.top_k, Some(&allowed));
        if ranked.is_empty() {
            return Err(AppError::NoCandidates);
        }

        // 5. Full records in retrieval order, scores kept by lookup rather
        // than record order
        let candidate_ids: Vec<i64> = ranked.iter().map(|r| r.film_id).collect();
        let candidate_films = self
            .films
            .films_by_ids(&candidate_ids)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Candidate fetch failed");
                AppError::RecommendationFailed("could not load candidate films".to_string())
            })?;
        if candidate_films.is_empty() {
            return Err(AppError::NoCandidates);
        }
        let score_map: HashMap<i64, f32> =
            ranked.iter().map(|r| (r.film_id, r.score)).collect();

        // 6. Generative ranking
        let summaries: Vec<CandidateSummary> = candidate_films
            .iter()
            .map(CandidateSummary::from_film)
            .collect();
        let ranking = self.ranker.rank(answers, &summaries).await?;

        // 7. Assemble: resolve picks against the candidate map, backfill to
        // four secondaries from unused candidates in retrieval order
        let film_map: HashMap<i64, &Film> =
            candidate_films.iter().map(|f| (f.id, f)).collect();

        let primary_film = film_map
            .get(&ranking.primary.film_id)
            .copied()
            .unwrap_or(&candidate_films[0]);
        let primary = FilmData::from_film(
            primary_film,
            ranking.primary.reasoning.clone(),
            None,
            score_map.get(&primary_film.id).copied(),
        );

        let mut secondary: Vec<FilmData> = Vec::with_capacity(SECONDARY_COUNT);
        for pick in &ranking.secondary {
            if let Some(film) = film_map.get(&pick.film_id) {
                secondary.push(FilmData::from_film(
                    film,
                    None,
                    pick.tagline.clone(),
                    score_map.get(&film.id).copied(),
                ));
            }
        }

        if secondary.len() < SECONDARY_COUNT {
            let mut used: HashSet<i64> = secondary.iter().map(|s| s.id).collect();
            used.insert(primary.id);
            for film in &candidate_films {
                if secondary.len() >= SECONDARY_COUNT {
                    break;
                }
                if used.insert(film.id) {
                    secondary.push(FilmData::from_film(
                        film,
                        None,
                        Some(GENERIC_TAGLINE.to_string()),
                        score_map.get(&film.id).copied(),
                    ));
                }
            }
        }
        secondary.truncate(SECONDARY_COUNT);

        let response = RecommendationResponse {
            primary,
            secondary,
            processing_time_ms: elapsed_ms(started),
            from_cache: false,
        };

        // 8. Cache write, on its own task so a client disconnect cannot
        // abandon a write that already began
        self.write_cache(&cache_key, &response).await;

        Ok(response)
    }

    async fn fetch_films(&self, filter: &CatalogFilter) -> AppResult<Vec<(Film, Vec<u8>)>> {
        self.films.films_with_embeddings(filter).await.map_err(|e| {
            tracing::error!(error = %e, "Catalog access failed");
            AppError::RecommendationFailed("could not load the film catalog".to_string())
        })
    }

    /// Cache read failures are absorbed: the cache is an optimization, a
    /// broken one degrades to a miss
    async fn read_cache(&self, cache_key: &str) -> Option<CachedRecommendations> {
        let payload = match self.cache.get(cache_key).await {
            Ok(hit) => hit?,
            Err(e) => {
                tracing::warn!(error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&payload) {
            Ok(cached) => Some(cached),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding undecodable cache payload");
                None
            }
        }
    }

    async fn write_cache(&self, cache_key: &str, response: &RecommendationResponse) {
        let payload = CachedRecommendations {
            primary: response.primary.clone(),
            secondary: response.secondary.clone(),
        };
        let json = match serde_json::to_string(&payload) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Cache serialization failed");
                return;
            }
        };

        let cache = self.cache.clone();
        let key = cache_key.to_string();
        let write = tokio::spawn(async move {
            if let Err(e) = cache.set(&key, &json).await {
                tracing::warn!(error = %e, "Cache write failed");
            }
        });
        // Awaited on the happy path; the spawned task runs to completion
        // even if this future is dropped mid-request.
        let _ = write.await;
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeepQuestion, DurationBucket};
    use crate::services::embedding::MockEmbedder;
    use crate::services::llm::{MockGenerativeClient, RankerMode};
    use std::sync::Mutex;

    const DIM: usize = 4;

    struct MemoryFilms {
        films: Vec<(Film, Vec<u8>)>,
    }

    #[async_trait::async_trait]
    impl FilmStore for MemoryFilms {
        async fn films_with_embeddings(
            &self,
            filter: &CatalogFilter,
        ) -> AppResult<Vec<(Film, Vec<u8>)>> {
            Ok(self
                .films
                .iter()
                .filter(|(f, _)| filter.matches(f))
                .cloned()
                .collect())
        }

        async fn films_by_ids(&self, ids: &[i64]) -> AppResult<Vec<Film>> {
            let by_id: HashMap<i64, &Film> =
                self.films.iter().map(|(f, _)| (f.id, f)).collect();
            Ok(ids
                .iter()
                .filter_map(|id| by_id.get(id).map(|f| (*f).clone()))
                .collect())
        }
    }

    struct MemoryCache {
        records: Mutex<HashMap<String, crate::models::CacheRecord>>,
    }

    #[async_trait::async_trait]
    impl crate::services::cache::CacheStore for MemoryCache {
        async fn find(
            &self,
            input_hash: &str,
        ) -> AppResult<Option<crate::models::CacheRecord>> {
            Ok(self.records.lock().unwrap().get(input_hash).cloned())
        }

        async fn upsert(&self, record: &crate::models::CacheRecord) -> AppResult<()> {
            self.records
                .lock()
                .unwrap()
                .insert(record.input_hash.clone(), record.clone());
            Ok(())
        }

        async fn delete(&self, input_hash: &str) -> AppResult<()> {
            self.records.lock().unwrap().remove(input_hash);
            Ok(())
        }

        async fn delete_expired(
            &self,
            cutoff: chrono::DateTime<chrono::Utc>,
        ) -> AppResult<u64> {
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|_, r| r.expires_at >= cutoff);
            Ok((before - records.len()) as u64)
        }
    }

    fn film(id: i64, title: &str, genres: &[&str], platforms: &[&str]) -> Film {
        Film {
            id,
            tmdb_id: id * 1000,
            title: title.to_string(),
            overview: Some(format!("Synopsis de {}", title)),
            runtime: Some(100),
            genres: genres.iter().map(|s| s.to_string()).collect(),
            platforms: platforms.iter().map(|s| s.to_string()).collect(),
            poster_path: None,
            vote_average: Some(7.0),
            release_date: Some("2018-03-09".to_string()),
        }
    }

    fn embedding_bytes(vector: &[f32]) -> Vec<u8> {
        vector.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    fn comedy_catalog() -> Vec<(Film, Vec<u8>)> {
        (1..=6)
            .map(|i| {
                let f = film(i, &format!("Comédie {}", i), &["Comédie"], &["Netflix"]);
                // Decreasing alignment with the unit-x query
                let angle = (i as f32) * 0.1;
                (f, embedding_bytes(&[angle.cos(), angle.sin(), 0.0, 0.0]))
            })
            .collect()
    }

    fn answers() -> QuizAnswers {
        QuizAnswers {
            mood: "stressé, besoin de rire".to_string(),
            duration: DurationBucket::Any,
            platforms: vec!["Netflix".to_string()],
            genres: vec!["Comédie".to_string()],
            deep_question: DeepQuestion {
                question_id: 2,
                question_text: "Qu'est-ce qui te ferait du bien ce soir ?".to_string(),
                answer: "rire un bon coup".to_string(),
            },
        }
    }

    fn unit_x_embedder() -> MockEmbedder {
        let mut embedder = MockEmbedder::new();
        embedder
            .expect_embed()
            .returning(|_| Ok(vec![1.0, 0.0, 0.0, 0.0]));
        embedder
    }

    fn service_with(
        catalog: Vec<(Film, Vec<u8>)>,
        embedder: MockEmbedder,
        client: MockGenerativeClient,
        mode: RankerMode,
    ) -> RecommendationService {
        let cache = ResponseCache::new(
            Arc::new(MemoryCache {
                records: Mutex::new(HashMap::new()),
            }),
            7,
        );
        RecommendationService::new(
            Arc::new(MemoryFilms { films: catalog }),
            cache,
            Arc::new(embedder),
            Arc::new(LlmRanker::new(Arc::new(client), mode, 60)),
            DIM,
            20,
        )
    }

    #[tokio::test]
    async fn test_full_pipeline_then_cache_hit() {
        let service = service_with(
            comedy_catalog(),
            unit_x_embedder(),
            MockGenerativeClient::new(),
            RankerMode::Mock,
        );

        let first = service.get_recommendations(&answers()).await.unwrap();
        assert!(!first.from_cache);
        assert!(first.primary.reasoning.is_some());
        assert_eq!(first.secondary.len(), 4);
        for s in &first.secondary {
            assert!(s.tagline.is_some());
        }

        let second = service.get_recommendations(&answers()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.primary, first.primary);
        assert_eq!(second.secondary, first.secondary);
    }

    #[tokio::test]
    async fn test_restrictive_filters_retry_unfiltered() {
        let mut quiz = answers();
        quiz.platforms = vec!["Plateforme inexistante".to_string()];

        let service = service_with(
            comedy_catalog(),
            unit_x_embedder(),
            MockGenerativeClient::new(),
            RankerMode::Mock,
        );

        let response = service.get_recommendations(&quiz).await.unwrap();
        assert!(response.primary.reasoning.is_some());
        assert_eq!(response.secondary.len(), 4);
    }

    #[tokio::test]
    async fn test_malformed_llm_output_still_completes() {
        let mut client = MockGenerativeClient::new();
        client
            .expect_complete()
            .returning(|_| Ok("pas du JSON du tout".to_string()));

        let service = service_with(
            comedy_catalog(),
            unit_x_embedder(),
            client,
            RankerMode::Live,
        );

        let response = service.get_recommendations(&answers()).await.unwrap();
        assert!(response.primary.reasoning.is_some());
        assert_eq!(response.secondary.len(), 4);
        for s in &response.secondary {
            assert!(s.tagline.is_some());
        }
    }

    #[tokio::test]
    async fn test_secondary_backfill_in_retrieval_order() {
        let mut client = MockGenerativeClient::new();
        // Valid JSON whose secondary list is too short; primary resolves
        client.expect_complete().returning(|_| {
            Ok(serde_json::json!({
                "primary": {"film_id": 3, "title": "Comédie 3", "reasoning": "Pour rire."},
                "secondary": [
                    {"film_id": 2, "title": "Comédie 2", "tagline": "Accroche"}
                ]
            })
            .to_string())
        });

        let service = service_with(
            comedy_catalog(),
            unit_x_embedder(),
            client,
            RankerMode::Live,
        );

        let response = service.get_recommendations(&answers()).await.unwrap();
        assert_eq!(response.primary.id, 3);
        // Backfilled to four, never reusing the primary or picked ids
        assert_eq!(response.secondary.len(), 4);
        let ids: HashSet<i64> = response.secondary.iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), 4);
        assert!(!ids.contains(&3));
        assert_eq!(response.secondary[0].id, 2);
        // Backfilled entries carry the generic tagline
        assert_eq!(
            response.secondary[1].tagline.as_deref(),
            Some(GENERIC_TAGLINE)
        );
    }

    #[tokio::test]
    async fn test_embedding_failure_propagates() {
        let mut embedder = MockEmbedder::new();
        embedder
            .expect_embed()
            .returning(|_| Err(AppError::Embedding("sidecar down".to_string())));

        let service = service_with(
            comedy_catalog(),
            embedder,
            MockGenerativeClient::new(),
            RankerMode::Mock,
        );

        let result = service.get_recommendations(&answers()).await;
        assert!(matches!(result, Err(AppError::RecommendationFailed(_))));
    }

    #[tokio::test]
    async fn test_empty_catalog_is_no_candidates() {
        let service = service_with(
            Vec::new(),
            unit_x_embedder(),
            MockGenerativeClient::new(),
            RankerMode::Mock,
        );

        let result = service.get_recommendations(&answers()).await;
        assert!(matches!(result, Err(AppError::NoCandidates)));
    }

    #[tokio::test]
    async fn test_zero_mood_vector_is_no_candidates() {
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed().returning(|_| Ok(vec![0.0; DIM]));

        let service = service_with(
            comedy_catalog(),
            embedder,
            MockGenerativeClient::new(),
            RankerMode::Mock,
        );

        let mut quiz = answers();
        quiz.mood = String::new();
        let result = service.get_recommendations(&quiz).await;
        assert!(matches!(result, Err(AppError::NoCandidates)));
    }

    #[tokio::test]
    async fn test_similarity_scores_attached() {
        let service = service_with(
            comedy_catalog(),
            unit_x_embedder(),
            MockGenerativeClient::new(),
            RankerMode::Mock,
        );

        let response = service.get_recommendations(&answers()).await.unwrap();
        let score = response.primary.similarity_score.unwrap();
        assert!((0.0..=1.0).contains(&score));
        // Mock primary is the top-similarity candidate
        assert_eq!(response.primary.id, 1);
    }
}
