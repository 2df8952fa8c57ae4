pub mod cache;
pub mod catalog;
pub mod embedding;
pub mod llm;
pub mod recommendation;
pub mod similarity;

pub use cache::{CacheStore, ResponseCache};
pub use catalog::{FilmStore, QuestionStore};
pub use embedding::{Embedder, HttpEmbedder};
pub use llm::{GeminiClient, GenerativeClient, LlmRanker, RankerMode};
pub use recommendation::RecommendationService;
pub use similarity::VectorIndex;
