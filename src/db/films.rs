use std::collections::HashMap;

use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use crate::error::AppResult;
use crate::models::{CatalogFilter, Film};
use crate::services::catalog::FilmStore;

/// Film catalog backed by the `films` and `embeddings` tables
///
/// Rows come back with the embedded-catalog join; filter predicates run in
/// process through [`CatalogFilter::matches`] so the SQL path and the test
/// stores share one tested implementation. The corpus is small enough that
/// this is a wash.
pub struct PgFilmStore {
    pool: PgPool,
}

impl PgFilmStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct FilmRow {
    id: i64,
    tmdb_id: i64,
    title: String,
    overview: Option<String>,
    runtime: Option<i32>,
    genres: Option<Json<Vec<String>>>,
    watch_providers: Option<Json<Vec<String>>>,
    poster_path: Option<String>,
    vote_average: Option<f64>,
    release_date: Option<String>,
}

impl From<FilmRow> for Film {
    fn from(row: FilmRow) -> Self {
        Film {
            id: row.id,
            tmdb_id: row.tmdb_id,
            title: row.title,
            overview: row.overview,
            runtime: row.runtime,
            genres: row.genres.map(|j| j.0).unwrap_or_default(),
            platforms: row.watch_providers.map(|j| j.0).unwrap_or_default(),
            poster_path: row.poster_path,
            vote_average: row.vote_average,
            release_date: row.release_date,
        }
    }
}

#[derive(FromRow)]
struct FilmEmbeddingRow {
    #[sqlx(flatten)]
    film: FilmRow,
    vector: Vec<u8>,
}

const FILM_COLUMNS: &str = "f.id, f.tmdb_id, f.title, f.overview, f.runtime, \
     f.genres, f.watch_providers, f.poster_path, f.vote_average, f.release_date";

#[async_trait::async_trait]
impl FilmStore for PgFilmStore {
    async fn films_with_embeddings(
        &self,
        filter: &CatalogFilter,
    ) -> AppResult<Vec<(Film, Vec<u8>)>> {
        let sql = format!(
            "SELECT {FILM_COLUMNS}, e.vector \
             FROM films f JOIN embeddings e ON e.film_id = f.id"
        );
        let rows: Vec<FilmEmbeddingRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|row| (Film::from(row.film), row.vector))
            .filter(|(film, _)| filter.matches(film))
            .collect())
    }

    async fn films_by_ids(&self, ids: &[i64]) -> AppResult<Vec<Film>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!("SELECT {FILM_COLUMNS} FROM films f WHERE f.id = ANY($1)");
        let rows: Vec<FilmRow> = sqlx::query_as(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        // The database returns rows in its own order; restore the caller's
        let mut by_id: HashMap<i64, Film> =
            rows.into_iter().map(Film::from).map(|f| (f.id, f)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}
