use std::sync::Arc;

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};

use crate::error::AppResult;
use crate::models::{CacheRecord, QuizAnswers};

/// Row-level persistence for cache entries
///
/// The storage engine behind it (and its schema) is not this crate's
/// concern; implementations must make each operation durable before
/// returning. Colliding writes to one key are last-write-wins, which is
/// fine: payloads for the same normalized profile are equivalent.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn find(&self, input_hash: &str) -> AppResult<Option<CacheRecord>>;
    async fn upsert(&self, record: &CacheRecord) -> AppResult<()>;
    async fn delete(&self, input_hash: &str) -> AppResult<()>;
    /// Deletes every record with `expires_at` before the cutoff, returning
    /// the number removed
    async fn delete_expired(&self, cutoff: chrono::DateTime<Utc>) -> AppResult<u64>;
}

/// Content-addressable cache of full recommendation payloads
///
/// Keys are a SHA-256 digest of the normalized quiz profile, so two
/// semantically identical submissions hit the same entry regardless of how
/// the client ordered its lists.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl_days: i64) -> Self {
        Self {
            store,
            ttl: Duration::days(ttl_days),
        }
    }

    /// Computes the 64-character lowercase hex cache key for a profile
    ///
    /// Only the fields that shape the LLM prompt participate. Multi-valued
    /// fields are sorted and the canonical JSON form orders keys
    /// alphabetically, so the digest is independent of client-side ordering.
    pub fn compute_key(answers: &QuizAnswers) -> String {
        let mut platforms = answers.platforms.clone();
        platforms.sort();
        let mut genres = answers.genres.clone();
        genres.sort();

        // serde_json maps are BTreeMap-backed: keys serialize sorted
        let canonical = serde_json::json!({
            "mood": answers.mood,
            "duration": answers.duration,
            "platforms": platforms,
            "genres": genres,
            "deep_question_id": answers.deep_question.question_id,
            "deep_answer": answers.deep_question.answer,
        });

        let digest = Sha256::digest(canonical.to_string().as_bytes());
        hex::encode(digest)
    }

    /// Returns the cached payload if present and unexpired
    ///
    /// An expired entry is deleted on the way out (lazy expiry); a miss is
    /// not an error.
    pub async fn get(&self, input_hash: &str) -> AppResult<Option<String>> {
        let Some(record) = self.store.find(input_hash).await? else {
            return Ok(None);
        };

        if record.expires_at < Utc::now() {
            self.store.delete(input_hash).await?;
            tracing::debug!(key = %&input_hash[..8], "Evicted expired cache entry");
            return Ok(None);
        }

        Ok(Some(record.response))
    }

    /// Upserts the payload, refreshing both content and expiry
    pub async fn set(&self, input_hash: &str, response: &str) -> AppResult<()> {
        let now = Utc::now();
        let record = CacheRecord {
            input_hash: input_hash.to_string(),
            response: response.to_string(),
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.store.upsert(&record).await?;
        tracing::debug!(key = %&input_hash[..8], ttl_days = self.ttl.num_days(), "Cached response");
        Ok(())
    }

    /// Bulk-deletes expired entries; maintenance path, not the request path
    pub async fn sweep_expired(&self) -> AppResult<u64> {
        let removed = self.store.delete_expired(Utc::now()).await?;
        if removed > 0 {
            tracing::info!(removed, "Swept expired cache entries");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeepQuestion, DurationBucket};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MemoryStore {
        records: Mutex<HashMap<String, CacheRecord>>,
    }

    impl MemoryStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(HashMap::new()),
            })
        }

        fn expire(&self, input_hash: &str) {
            let mut records = self.records.lock().unwrap();
            if let Some(record) = records.get_mut(input_hash) {
                record.expires_at = Utc::now() - Duration::seconds(1);
            }
        }

        fn len(&self) -> usize {
            self.records.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl CacheStore for MemoryStore {
        async fn find(&self, input_hash: &str) -> AppResult<Option<CacheRecord>> {
            Ok(self.records.lock().unwrap().get(input_hash).cloned())
        }

        async fn upsert(&self, record: &CacheRecord) -> AppResult<()> {
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

        async fn delete_expired(&self, cutoff: chrono::DateTime<Utc>) -> AppResult<u64> {
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|_, r| r.expires_at >= cutoff);
            Ok((before - records.len()) as u64)
        }
    }

    fn answers(platforms: &[&str], genres: &[&str]) -> QuizAnswers {
        QuizAnswers {
            mood: "stressé, besoin de rire".to_string(),
            duration: DurationBucket::Any,
            platforms: platforms.iter().map(|s| s.to_string()).collect(),
            genres: genres.iter().map(|s| s.to_string()).collect(),
            deep_question: DeepQuestion {
                question_id: 3,
                question_text: "Qu'est-ce qui te ferait du bien ce soir ?".to_string(),
                answer: "rire un bon coup".to_string(),
            },
        }
    }

    #[test]
    fn test_compute_key_shape() {
        let key = ResponseCache::compute_key(&answers(&["Netflix"], &["Comédie"]));
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_compute_key_order_independent() {
        let a = answers(&["Netflix", "Prime"], &["Comédie", "Drame"]);
        let b = answers(&["Prime", "Netflix"], &["Drame", "Comédie"]);
        assert_eq!(ResponseCache::compute_key(&a), ResponseCache::compute_key(&b));
    }

    #[test]
    fn test_compute_key_sensitive_to_content() {
        let a = answers(&["Netflix"], &["Comédie"]);
        let mut b = a.clone();
        b.mood = "envie de pleurer".to_string();
        assert_ne!(ResponseCache::compute_key(&a), ResponseCache::compute_key(&b));

        let mut c = a.clone();
        c.deep_question.answer = "autre chose".to_string();
        assert_ne!(ResponseCache::compute_key(&a), ResponseCache::compute_key(&c));
    }

    #[test]
    fn test_compute_key_ignores_question_text() {
        // Only the question id and the answer feed the prompt
        let a = answers(&["Netflix"], &["Comédie"]);
        let mut b = a.clone();
        b.deep_question.question_text = String::new();
        assert_eq!(ResponseCache::compute_key(&a), ResponseCache::compute_key(&b));
    }

    #[tokio::test]
    async fn test_round_trip_within_ttl() {
        let store = MemoryStore::new();
        let cache = ResponseCache::new(store, 7);
        let key = ResponseCache::compute_key(&answers(&["Netflix"], &["Comédie"]));

        cache.set(&key, r#"{"primary":1}"#).await.unwrap();
        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.as_deref(), Some(r#"{"primary":1}"#));
    }

    #[tokio::test]
    async fn test_miss_is_not_an_error() {
        let store = MemoryStore::new();
        let cache = ResponseCache::new(store, 7);
        assert!(cache.get(&"0".repeat(64)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_deleted_on_get() {
        let store = MemoryStore::new();
        let cache = ResponseCache::new(store.clone(), 7);
        let key = "a".repeat(64);

        cache.set(&key, "payload").await.unwrap();
        store.expire(&key);

        assert!(cache.get(&key).await.unwrap().is_none());
        // Lazy delete happened; a second get is also a clean miss
        assert_eq!(store.len(), 0);
        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_refreshes_content_and_expiry() {
        let store = MemoryStore::new();
        let cache = ResponseCache::new(store.clone(), 7);
        let key = "b".repeat(64);

        cache.set(&key, "old").await.unwrap();
        store.expire(&key);
        cache.set(&key, "new").await.unwrap();

        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_sweep_expired_counts() {
        let store = MemoryStore::new();
        let cache = ResponseCache::new(store.clone(), 7);

        cache.set(&"c".repeat(64), "one").await.unwrap();
        cache.set(&"d".repeat(64), "two").await.unwrap();
        cache.set(&"e".repeat(64), "three").await.unwrap();
        store.expire(&"c".repeat(64));
        store.expire(&"d".repeat(64));

        assert_eq!(cache.sweep_expired().await.unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(cache.sweep_expired().await.unwrap(), 0);
    }
}
