use crate::error::AppResult;
use crate::models::{CatalogFilter, Film, Question};

/// Catalog collaborator
///
/// The pipeline never mutates films; ingestion owns the rows. Only films
/// that have an embedding participate in retrieval.
#[async_trait::async_trait]
pub trait FilmStore: Send + Sync {
    /// Films passing the filter, paired with their raw embedding blobs
    async fn films_with_embeddings(
        &self,
        filter: &CatalogFilter,
    ) -> AppResult<Vec<(Film, Vec<u8>)>>;

    /// Full film records for the given ids, in the order of `ids`
    ///
    /// Unknown ids are silently skipped.
    async fn films_by_ids(&self, ids: &[i64]) -> AppResult<Vec<Film>>;
}

/// Deep-question collaborator for the quiz
#[async_trait::async_trait]
pub trait QuestionStore: Send + Sync {
    async fn all(&self) -> AppResult<Vec<Question>>;
    async fn random(&self) -> AppResult<Option<Question>>;
}
