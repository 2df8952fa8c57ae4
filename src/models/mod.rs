use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// A film from the catalog
///
/// Immutable from the pipeline's viewpoint; rows are owned and refreshed by
/// the TMDB ingestion job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Film {
    pub id: i64,
    pub tmdb_id: i64,
    pub title: String,
    pub overview: Option<String>,
    /// Runtime in minutes
    pub runtime: Option<i32>,
    pub genres: Vec<String>,
    /// Streaming platforms the film is available on (e.g. "Netflix")
    pub platforms: Vec<String>,
    pub poster_path: Option<String>,
    pub vote_average: Option<f64>,
    /// YYYY-MM-DD
    pub release_date: Option<String>,
}

impl Film {
    /// Release year extracted from the date, as displayed in prompts
    pub fn release_year(&self) -> Option<String> {
        self.release_date
            .as_ref()
            .map(|d| d.chars().take(4).collect())
    }
}

/// Duration bucket selected in the quiz
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DurationBucket {
    #[serde(rename = "<90")]
    Under90,
    #[serde(rename = "90-120")]
    Between90And120,
    #[serde(rename = ">120")]
    Over120,
    #[serde(rename = "any")]
    Any,
}

impl Display for DurationBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DurationBucket::Under90 => "<90",
            DurationBucket::Between90And120 => "90-120",
            DurationBucket::Over120 => ">120",
            DurationBucket::Any => "any",
        };
        write!(f, "{}", label)
    }
}

/// The deep question answered alongside the quiz
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeepQuestion {
    pub question_id: i64,
    #[serde(default)]
    pub question_text: String,
    pub answer: String,
}

/// Per-request quiz input driving the whole pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizAnswers {
    pub mood: String,
    pub duration: DurationBucket,
    pub platforms: Vec<String>,
    pub genres: Vec<String>,
    pub deep_question: DeepQuestion,
}

/// Genre sentinel that disables genre filtering
pub const SURPRISE_GENRE: &str = "surprise";

/// Platform value with no matchable label; excluded from the predicate
pub const OTHER_PLATFORM: &str = "other";

/// Catalog filter derived from the quiz answers
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogFilter {
    pub duration: DurationBucket,
    pub platforms: Vec<String>,
    pub genres: Vec<String>,
}

impl CatalogFilter {
    /// A filter that matches the entire catalog
    pub fn unfiltered() -> Self {
        Self {
            duration: DurationBucket::Any,
            platforms: Vec::new(),
            genres: Vec::new(),
        }
    }

    /// Whether a film passes the filter
    ///
    /// OR-semantics within each multi-valued field, AND-semantics across
    /// fields. The `surprise` genre disables the genre predicate; the
    /// `other` platform carries no label and is skipped. A film with no
    /// recorded runtime fails any duration bound.
    pub fn matches(&self, film: &Film) -> bool {
        let duration_ok = match self.duration {
            DurationBucket::Any => true,
            DurationBucket::Under90 => film.runtime.is_some_and(|r| r < 90),
            DurationBucket::Between90And120 => film.runtime.is_some_and(|r| (90..=120).contains(&r)),
            DurationBucket::Over120 => film.runtime.is_some_and(|r| r > 120),
        };
        if !duration_ok {
            return false;
        }

        let matchable_platforms: Vec<&String> = self
            .platforms
            .iter()
            .filter(|p| p.as_str() != OTHER_PLATFORM)
            .collect();
        if !matchable_platforms.is_empty()
            && !matchable_platforms
                .iter()
                .any(|p| film.platforms.contains(p))
        {
            return false;
        }

        let genres_active = !self.genres.is_empty()
            && !self.genres.iter().any(|g| g == SURPRISE_GENRE);
        if genres_active && !self.genres.iter().any(|g| film.genres.contains(g)) {
            return false;
        }

        true
    }
}

impl From<&QuizAnswers> for CatalogFilter {
    fn from(answers: &QuizAnswers) -> Self {
        Self {
            duration: answers.duration,
            platforms: answers.platforms.clone(),
            genres: answers.genres.clone(),
        }
    }
}

/// One retrieval hit: film id plus cosine similarity clamped to [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedCandidate {
    pub film_id: i64,
    pub score: f32,
}

/// Bounded film summary handed to the generative ranker
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSummary {
    pub id: i64,
    pub title: String,
    pub year: Option<String>,
    pub genres: Vec<String>,
    pub vote_average: Option<f64>,
    pub overview: Option<String>,
}

impl CandidateSummary {
    pub fn from_film(film: &Film) -> Self {
        Self {
            id: film.id,
            title: film.title.clone(),
            year: film.release_year(),
            genres: film.genres.clone(),
            vote_average: film.vote_average,
            overview: film.overview.clone(),
        }
    }
}

/// A single recommendation returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilmData {
    pub id: i64,
    pub tmdb_id: i64,
    pub title: String,
    pub overview: Option<String>,
    pub runtime: Option<i32>,
    pub genres: Vec<String>,
    pub platforms: Vec<String>,
    pub poster_path: Option<String>,
    pub vote_average: Option<f64>,
    pub release_date: Option<String>,
    /// 2-3 sentence personalized justification (primary only)
    pub reasoning: Option<String>,
    /// One-line hook (secondary only)
    pub tagline: Option<String>,
    pub similarity_score: Option<f32>,
}

impl FilmData {
    pub fn from_film(
        film: &Film,
        reasoning: Option<String>,
        tagline: Option<String>,
        similarity_score: Option<f32>,
    ) -> Self {
        Self {
            id: film.id,
            tmdb_id: film.tmdb_id,
            title: film.title.clone(),
            overview: film.overview.clone(),
            runtime: film.runtime,
            genres: film.genres.clone(),
            platforms: film.platforms.clone(),
            poster_path: film.poster_path.clone(),
            vote_average: film.vote_average,
            release_date: film.release_date.clone(),
            reasoning,
            tagline,
            similarity_score,
        }
    }
}

/// Recommendation set as persisted in the response cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedRecommendations {
    pub primary: FilmData,
    pub secondary: Vec<FilmData>,
}

/// Full response for one quiz submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationResponse {
    pub primary: FilmData,
    pub secondary: Vec<FilmData>,
    pub processing_time_ms: u64,
    pub from_cache: bool,
}

/// One row of the response cache
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    /// 64-character lowercase hex SHA-256 digest of the normalized profile
    pub input_hash: String,
    /// Serialized [`CachedRecommendations`]
    pub response: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A deep question offered by the quiz
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: i64,
    pub category: String,
    pub question_text: String,
    pub options: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn film(runtime: Option<i32>, genres: &[&str], platforms: &[&str]) -> Film {
        Film {
            id: 1,
            tmdb_id: 100,
            title: "Test".to_string(),
            overview: None,
            runtime,
            genres: genres.iter().map(|s| s.to_string()).collect(),
            platforms: platforms.iter().map(|s| s.to_string()).collect(),
            poster_path: None,
            vote_average: None,
            release_date: Some("2010-07-16".to_string()),
        }
    }

    #[test]
    fn test_duration_bucket_serde() {
        assert_eq!(
            serde_json::to_string(&DurationBucket::Under90).unwrap(),
            r#""<90""#
        );
        let parsed: DurationBucket = serde_json::from_str(r#""90-120""#).unwrap();
        assert_eq!(parsed, DurationBucket::Between90And120);
        let parsed: DurationBucket = serde_json::from_str(r#""any""#).unwrap();
        assert_eq!(parsed, DurationBucket::Any);
    }

    #[test]
    fn test_filter_duration_bounds() {
        let filter = CatalogFilter {
            duration: DurationBucket::Between90And120,
            platforms: vec![],
            genres: vec![],
        };
        assert!(filter.matches(&film(Some(90), &[], &[])));
        assert!(filter.matches(&film(Some(120), &[], &[])));
        assert!(!filter.matches(&film(Some(121), &[], &[])));
        // Unknown runtime fails any bound
        assert!(!filter.matches(&film(None, &[], &[])));
    }

    #[test]
    fn test_filter_platform_or_semantics() {
        let filter = CatalogFilter {
            duration: DurationBucket::Any,
            platforms: vec!["Netflix".to_string(), "Disney+".to_string()],
            genres: vec![],
        };
        assert!(filter.matches(&film(None, &[], &["Disney+"])));
        assert!(!filter.matches(&film(None, &[], &["Canal+"])));
    }

    #[test]
    fn test_filter_other_platform_excluded() {
        let filter = CatalogFilter {
            duration: DurationBucket::Any,
            platforms: vec![OTHER_PLATFORM.to_string()],
            genres: vec![],
        };
        // "other" carries no label, so the platform predicate vanishes
        assert!(filter.matches(&film(None, &[], &[])));
    }

    #[test]
    fn test_filter_surprise_disables_genres() {
        let filter = CatalogFilter {
            duration: DurationBucket::Any,
            platforms: vec![],
            genres: vec![SURPRISE_GENRE.to_string()],
        };
        assert!(filter.matches(&film(None, &["Horreur"], &[])));
    }

    #[test]
    fn test_filter_and_across_fields() {
        let filter = CatalogFilter {
            duration: DurationBucket::Under90,
            platforms: vec!["Netflix".to_string()],
            genres: vec!["Comédie".to_string()],
        };
        assert!(filter.matches(&film(Some(85), &["Comédie"], &["Netflix"])));
        assert!(!filter.matches(&film(Some(85), &["Drame"], &["Netflix"])));
        assert!(!filter.matches(&film(Some(95), &["Comédie"], &["Netflix"])));
    }

    #[test]
    fn test_unfiltered_matches_everything() {
        assert!(CatalogFilter::unfiltered().matches(&film(None, &[], &[])));
    }

    #[test]
    fn test_release_year() {
        let f = film(None, &[], &[]);
        assert_eq!(f.release_year(), Some("2010".to_string()));
    }
}
