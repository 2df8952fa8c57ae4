pub mod films;
pub mod llm_cache;
pub mod postgres;
pub mod questions;

pub use films::PgFilmStore;
pub use llm_cache::PgCacheStore;
pub use postgres::create_pool;
pub use questions::PgQuestionStore;
